//! MPEG-DASH manifests, parsed with `dash-mpd`.

use dash_mpd::{AdaptationSet, Initialization, Period, Representation, SegmentList, MPD};
use url::Url;

use super::{
    base_url::{merge_baseurls, resolve_base},
    Stream,
};
use crate::{
    protection::ContentProtectionRecord, Addressing, ByteRange, SegmentFormat, SegmentRequest,
    SegmentTemplate, StreamDescriptor, StreamType, TemplateTiming, TimelineEntry, TsuzuriError,
    TsuzuriResult,
};

pub struct DashStream {
    descriptor: StreamDescriptor,
}

impl DashStream {
    pub fn new(descriptor: StreamDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Stream for DashStream {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }
}

fn protection_record(cp: &dash_mpd::ContentProtection) -> ContentProtectionRecord {
    ContentProtectionRecord {
        scheme_id_uri: cp.schemeIdUri.clone(),
        value: cp.value.clone(),
        default_kid: cp.default_KID.clone(),
        pssh: cp.cenc_pssh.iter().find_map(|pssh| pssh.content.clone()),
    }
}

/// Lists every representation of a static MPD.
///
/// `manifest_url` is the final url the manifest was fetched from, after redirects.
pub fn parse(text: &str, manifest_url: &Url) -> TsuzuriResult<Vec<StreamDescriptor>> {
    let mpd: MPD = dash_mpd::parse(text)?;
    if mpd.mpdtype.as_deref() == Some("dynamic") {
        return Err(TsuzuriError::ManifestParseError(
            "live (dynamic) manifests are not supported".to_string(),
        ));
    }

    let presentation_duration = mpd.mediaPresentationDuration.map(|d| d.as_secs_f64());
    let mpd_base = resolve_base(manifest_url, [mpd.base_url.first().map(|b| &b.base)])?;
    let multi_period = mpd.periods.len() > 1;

    let mut streams = Vec::new();
    for (period_index, period) in mpd.periods.iter().enumerate() {
        let period_base = resolve_base(&mpd_base, [period.BaseURL.first().map(|b| &b.base)])?;
        let period_duration = period
            .duration
            .map(|d| d.as_secs_f64())
            .or(presentation_duration);

        for adaptation in &period.adaptations {
            for representation in &adaptation.representations {
                let base_url = resolve_base(
                    &period_base,
                    [
                        adaptation.BaseURL.first().map(|b| &b.base),
                        representation.BaseURL.first().map(|b| &b.base),
                    ],
                )?;

                let representation_id = representation
                    .id
                    .clone()
                    .unwrap_or_else(|| streams.len().to_string());
                let id = if multi_period {
                    let period_id = period.id.clone().unwrap_or_else(|| period_index.to_string());
                    format!("{period_id}/{representation_id}")
                } else {
                    representation_id.clone()
                };

                let mime_type = representation
                    .mimeType
                    .clone()
                    .or_else(|| adaptation.mimeType.clone());
                let stream_type = match StreamType::from_mime_type(mime_type.as_deref()) {
                    StreamType::Unknown => StreamType::from_mime_type(
                        representation
                            .contentType
                            .as_deref()
                            .or(adaptation.contentType.as_deref()),
                    ),
                    stream_type => stream_type,
                };

                let addressing = addressing(
                    period,
                    adaptation,
                    representation,
                    &representation_id,
                    base_url,
                    period_duration,
                )?;

                let protection = adaptation
                    .ContentProtection
                    .iter()
                    .chain(&representation.ContentProtection)
                    .map(protection_record)
                    .collect();

                streams.push(StreamDescriptor {
                    id,
                    format: SegmentFormat::from_mime_type(mime_type.as_deref()),
                    mime_type,
                    codecs: representation
                        .codecs
                        .clone()
                        .or_else(|| adaptation.codecs.clone()),
                    bandwidth: representation.bandwidth,
                    language: representation.lang.clone().or_else(|| adaptation.lang.clone()),
                    resolution: representation.width.zip(representation.height),
                    stream_type,
                    addressing,
                    protection,
                });
            }
        }
    }

    Ok(streams)
}

fn addressing(
    period: &Period,
    adaptation: &AdaptationSet,
    representation: &Representation,
    representation_id: &str,
    base_url: Url,
    presentation_duration: Option<f64>,
) -> TsuzuriResult<Addressing> {
    // Innermost first, unset attributes are inherited from the enclosing elements
    let templates: Vec<&dash_mpd::SegmentTemplate> = [
        &representation.SegmentTemplate,
        &adaptation.SegmentTemplate,
        &period.SegmentTemplate,
    ]
    .into_iter()
    .flatten()
    .collect();
    if !templates.is_empty() {
        return segment_template(
            &templates,
            representation,
            representation_id,
            base_url,
            presentation_duration,
        );
    }

    if let Some(list) = representation
        .SegmentList
        .as_ref()
        .or(adaptation.SegmentList.as_ref())
    {
        return segment_list(list, &base_url);
    }

    if let Some(base) = representation
        .SegmentBase
        .as_ref()
        .or(adaptation.SegmentBase.as_ref())
    {
        if let Some(index_range) = &base.indexRange {
            let init_range = base
                .Initialization
                .as_ref()
                .and_then(|i| i.range.as_deref())
                .map(str::parse::<ByteRange>)
                .transpose()?;
            return Ok(Addressing::IndexBox {
                url: base_url,
                index_range: index_range.parse()?,
                init_range,
            });
        }
    }

    // A single self-contained resource
    Ok(Addressing::List {
        init: None,
        segments: vec![SegmentRequest::new(base_url)],
    })
}

fn segment_template(
    templates: &[&dash_mpd::SegmentTemplate],
    representation: &Representation,
    representation_id: &str,
    base_url: Url,
    presentation_duration: Option<f64>,
) -> TsuzuriResult<Addressing> {
    let media = templates.iter().find_map(|t| t.media.clone()).ok_or_else(|| {
        TsuzuriError::UnsupportedAddressing("SegmentTemplate without @media".to_string())
    })?;

    let timeline = templates.iter().find_map(|t| t.SegmentTimeline.as_ref());
    let duration = templates.iter().find_map(|t| t.duration);
    let timing = match (timeline, duration) {
        (Some(timeline), _) => TemplateTiming::Timeline(
            timeline
                .segments
                .iter()
                .map(|s| TimelineEntry {
                    t: s.t,
                    d: s.d,
                    r: s.r.unwrap_or(0),
                })
                .collect(),
        ),
        (None, Some(duration)) => TemplateTiming::Constant { duration },
        (None, None) => {
            return Err(TsuzuriError::UnsupportedAddressing(
                "SegmentTemplate needs either a SegmentTimeline or @duration".to_string(),
            ))
        }
    };

    Ok(Addressing::Template(SegmentTemplate {
        base_url,
        media,
        initialization: templates.iter().find_map(|t| {
            t.initialization
                .clone()
                .or_else(|| t.Initialization.as_ref().and_then(|i| i.sourceURL.clone()))
        }),
        representation_id: representation_id.to_string(),
        bandwidth: representation.bandwidth,
        timescale: templates.iter().find_map(|t| t.timescale).unwrap_or(1),
        start_number: templates.iter().find_map(|t| t.startNumber).unwrap_or(1),
        timing,
        presentation_duration,
    }))
}

fn initialization_request(initialization: &Initialization, base_url: &Url) -> TsuzuriResult<SegmentRequest> {
    let url = match &initialization.sourceURL {
        Some(source_url) => merge_baseurls(base_url, source_url)?,
        None => base_url.clone(),
    };
    let range = initialization
        .range
        .as_deref()
        .map(str::parse::<ByteRange>)
        .transpose()?;
    Ok(SegmentRequest::new(url).with_range(range))
}

fn segment_list(list: &SegmentList, base_url: &Url) -> TsuzuriResult<Addressing> {
    let init = list
        .Initialization
        .as_ref()
        .map(|initialization| initialization_request(initialization, base_url))
        .transpose()?;

    let duration = list
        .duration
        .map(|d| d as f64 / list.timescale.unwrap_or(1).max(1) as f64);

    let segments = list
        .segment_urls
        .iter()
        .map(|segment| {
            let url = match &segment.media {
                Some(media) => merge_baseurls(base_url, media)?,
                None => base_url.clone(),
            };
            let range = segment
                .mediaRange
                .as_deref()
                .map(str::parse::<ByteRange>)
                .transpose()?;

            let mut request = SegmentRequest::new(url).with_range(range);
            if let Some(duration) = duration {
                request = request.with_duration(duration);
            }
            Ok(request)
        })
        .collect::<TsuzuriResult<_>>()?;

    Ok(Addressing::List { init, segments })
}
