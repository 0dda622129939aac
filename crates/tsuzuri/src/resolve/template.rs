// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::{Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};

use crate::{
    manifest::base_url::merge_baseurls, SegmentRequest, SegmentTemplate, TemplateTiming, TsuzuriError,
    TsuzuriResult,
};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers. The reason
// is that such a string replacement can be easily implemented without requiring a specific library."
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
// `$$` is an escaped `$`.
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)?(?:%0(\d+)d)?\$").unwrap()
});

pub struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl Template<'_> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'static str, value: String) {
        self.args.insert(key, value);
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }
}

impl Default for Template<'_> {
    fn default() -> Self {
        Self::new()
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'a str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &regex::Captures<'_>, dst: &mut String) {
        let Some(key) = caps.get(1) else {
            // `$$`, or a width without an identifier which is left untouched
            if caps.get(2).is_some() {
                dst.push_str(&caps[0]);
            } else {
                dst.push('$');
            }
            return;
        };

        let Some(value) = self.0.get(key.as_str()) else {
            dst.push_str(&caps[0]);
            return;
        };

        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) => dst.push_str(&format!("{value:0>width$}")),
            None => dst.push_str(value),
        }
    }
}

impl SegmentTemplate {
    fn template(&self) -> Template<'static> {
        let mut template = Template::new();
        template.insert(Template::REPRESENTATION_ID, self.representation_id.clone());
        if let Some(bandwidth) = self.bandwidth {
            template.insert(Template::BANDWIDTH, bandwidth.to_string());
        }
        template
    }

    /// The `initialization` request, with identifiers substituted.
    pub fn init_request(&self) -> TsuzuriResult<Option<SegmentRequest>> {
        let Some(initialization) = &self.initialization else {
            return Ok(None);
        };
        let url = merge_baseurls(&self.base_url, &self.template().resolve(initialization))?;
        Ok(Some(SegmentRequest::new(url)))
    }

    /// Expands the template into one request per segment.
    pub fn expand(&self) -> TsuzuriResult<Vec<SegmentRequest>> {
        if self.timescale == 0 {
            return Err(TsuzuriError::InvalidTimingSchema(
                "timescale must be positive".to_string(),
            ));
        }
        let timescale = self.timescale as f64;
        let mut template = self.template();

        let mut segments = Vec::new();
        let mut push = |template: &mut Template, number: u64, time: u64, duration: f64| {
            template.insert(Template::NUMBER, number.to_string());
            template.insert(Template::TIME, time.to_string());
            let url = merge_baseurls(&self.base_url, &template.resolve(&self.media))?;
            segments.push(SegmentRequest::new(url).with_duration(duration));
            Ok::<_, TsuzuriError>(())
        };

        match &self.timing {
            TemplateTiming::Timeline(entries) => {
                let presentation_end = self
                    .presentation_duration
                    .map(|duration| (duration * timescale).round() as u64);

                let mut time = 0u64;
                let mut number = self.start_number;
                for (i, entry) in entries.iter().enumerate() {
                    if let Some(t) = entry.t {
                        time = t;
                    }
                    if entry.d == 0 {
                        return Err(TsuzuriError::InvalidTimingSchema(
                            "S@d must be positive".to_string(),
                        ));
                    }

                    let (repeat, duration) = if entry.r >= 0 {
                        (entry.r as u64, entry.d as f64 / timescale)
                    } else {
                        // Repeat until the next S@t, or until the end of the presentation
                        let end = entries
                            .get(i + 1)
                            .and_then(|next| next.t)
                            .or(presentation_end);
                        match end {
                            Some(end) if end > time => {
                                ((end - time).div_ceil(entry.d) - 1, entry.d as f64 / timescale)
                            }
                            _ => {
                                tracing::warn!(
                                    "Can not resolve open-ended S element at {time}, its duration is unknown"
                                );
                                (0, 0.0)
                            }
                        }
                    };

                    for _ in 0..=repeat {
                        push(&mut template, number, time, duration)?;
                        time += entry.d;
                        number += 1;
                    }
                }
            }
            TemplateTiming::Constant { duration } => {
                if *duration <= 0.0 {
                    return Err(TsuzuriError::InvalidTimingSchema(
                        "SegmentTemplate@duration must be positive".to_string(),
                    ));
                }
                let presentation_duration = self.presentation_duration.ok_or_else(|| {
                    TsuzuriError::InvalidTimingSchema(
                        "SegmentTemplate@duration requires a known presentation duration".to_string(),
                    )
                })?;

                let segment_duration = duration / timescale;
                let count = (presentation_duration / segment_duration).ceil() as u64;
                for i in 0..count {
                    let time = (i as f64 * duration).round() as u64;
                    push(&mut template, self.start_number + i, time, segment_duration)?;
                }
            }
        }

        Ok(segments)
    }
}
