use url::Url;

use crate::{protection::ContentProtectionRecord, ByteRange, TsuzuriResult};

/// One HTTP request producing one media segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    /// Duration in seconds, when the manifest or index declares it.
    pub duration: Option<f64>,
    /// Size in bytes, when known without fetching.
    pub size: Option<u64>,
}

impl SegmentRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            byte_range: None,
            duration: None,
            size: None,
        }
    }

    pub fn with_range(mut self, range: Option<ByteRange>) -> Self {
        self.size = range.and_then(|r| r.length);
        self.byte_range = range;
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StreamType {
    #[default]
    Video,
    Audio,
    Subtitle,
    Unknown,
}

impl StreamType {
    pub fn from_mime_type(mime_type: Option<&str>) -> Self {
        let Some(mime_type) = mime_type else {
            return Self::Unknown;
        };

        if mime_type.starts_with("video") {
            Self::Video
        } else if mime_type.starts_with("audio") {
            Self::Audio
        } else if mime_type.starts_with("text") || mime_type.starts_with("application/ttml") {
            Self::Subtitle
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SegmentFormat {
    #[default]
    Mp4,
    Mpeg2TS,
    WebVtt,
    Other(String),
}

impl SegmentFormat {
    pub fn from_filename(s: &str) -> Self {
        let path = s.split(['?', '#']).next().unwrap_or(s);
        let (_, ext) = path.rsplit_once('.').unwrap_or(("", path));
        match ext {
            "ts" => Self::Mpeg2TS,
            "mp4" | "m4s" | "m4f" | "m4a" | "m4v" | "cmfv" | "cmfa" => Self::Mp4,
            "vtt" | "webvtt" => Self::WebVtt,
            _ => Self::Other(ext.to_string()),
        }
    }

    pub fn from_mime_type(mime_type: Option<&str>) -> Self {
        match mime_type {
            Some("text/vtt") => Self::WebVtt,
            Some("video/mp2t") => Self::Mpeg2TS,
            _ => Self::Mp4,
        }
    }

    pub fn is_mp4(&self) -> bool {
        matches!(self, Self::Mp4)
    }
}

/// One entry of a `SegmentTimeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Start time in timescale ticks. Continues from the previous entry when absent.
    pub t: Option<u64>,
    pub d: u64,
    /// Number of additional repetitions. Negative repeats until the next `t` or the end.
    pub r: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateTiming {
    Timeline(Vec<TimelineEntry>),
    /// Every segment lasts `duration` ticks.
    Constant { duration: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTemplate {
    pub base_url: Url,
    pub media: String,
    pub initialization: Option<String>,
    pub representation_id: String,
    pub bandwidth: Option<u64>,
    pub timescale: u64,
    pub start_number: u64,
    pub timing: TemplateTiming,
    /// Length of the enclosing period or presentation in seconds.
    pub presentation_duration: Option<f64>,
}

/// How the media segments of a stream are located.
#[derive(Debug, Clone, PartialEq)]
pub enum Addressing {
    /// Every segment is listed explicitly.
    List {
        init: Option<SegmentRequest>,
        segments: Vec<SegmentRequest>,
    },
    /// Segment urls are generated from a template.
    Template(SegmentTemplate),
    /// One resource whose `sidx` box describes the segment byte ranges.
    IndexBox {
        url: Url,
        index_range: ByteRange,
        init_range: Option<ByteRange>,
    },
}

impl Addressing {
    /// The initialization segment request, if the stream has one.
    pub fn init_segment(&self) -> TsuzuriResult<Option<SegmentRequest>> {
        match self {
            Addressing::List { init, .. } => Ok(init.clone()),
            Addressing::Template(template) => template.init_request(),
            Addressing::IndexBox {
                url,
                index_range,
                init_range,
            } => {
                // Without an explicit range everything before the index is the init segment
                let range = match init_range {
                    Some(range) => *range,
                    None if index_range.offset > 0 => {
                        ByteRange::new(0, Some(index_range.offset))
                    }
                    None => return Ok(None),
                };
                Ok(Some(
                    SegmentRequest::new(url.clone()).with_range(Some(range)),
                ))
            }
        }
    }
}

/// A selectable representation of a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub id: String,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    /// Declared bitrate in bits per second.
    pub bandwidth: Option<u64>,
    pub language: Option<String>,
    pub resolution: Option<(u64, u64)>,
    pub stream_type: StreamType,
    pub format: SegmentFormat,
    pub addressing: Addressing,
    pub protection: Vec<ContentProtectionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_format_from_filename() {
        assert_eq!(
            SegmentFormat::from_filename("test.ts"),
            SegmentFormat::Mpeg2TS
        );
        assert_eq!(SegmentFormat::from_filename("test.m4s"), SegmentFormat::Mp4);
        assert_eq!(
            SegmentFormat::from_filename("seg.mp4?token=a.b"),
            SegmentFormat::Mp4
        );
        assert_eq!(
            SegmentFormat::from_filename("sub.vtt"),
            SegmentFormat::WebVtt
        );
        assert_eq!(
            SegmentFormat::from_filename("test.unknown"),
            SegmentFormat::Other("unknown".to_string())
        );
    }

    #[test]
    fn test_stream_type_from_mime_type() {
        assert_eq!(
            StreamType::from_mime_type(Some("video/mp4")),
            StreamType::Video
        );
        assert_eq!(
            StreamType::from_mime_type(Some("audio/mp4")),
            StreamType::Audio
        );
        assert_eq!(
            StreamType::from_mime_type(Some("text/vtt")),
            StreamType::Subtitle
        );
        assert_eq!(
            StreamType::from_mime_type(Some("image/jpeg")),
            StreamType::Unknown
        );
        assert_eq!(StreamType::from_mime_type(None), StreamType::Unknown);
    }

    #[test]
    fn test_index_box_init_defaults_to_prefix() {
        let url = Url::parse("https://example.com/video.mp4").unwrap();
        let addressing = Addressing::IndexBox {
            url: url.clone(),
            index_range: ByteRange::new(862, Some(100)),
            init_range: None,
        };

        let init = addressing.init_segment().unwrap().unwrap();
        assert_eq!(init.url, url);
        assert_eq!(init.byte_range, Some(ByteRange::new(0, Some(862))));
    }
}
