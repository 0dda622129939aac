use crate::{SegmentFormat, StreamType};

/// Extension of the file a stream is written to.
pub fn output_extension(format: &SegmentFormat, stream_type: StreamType, video_only_m4v: bool) -> &str {
    match format {
        SegmentFormat::Mpeg2TS => "ts",
        SegmentFormat::WebVtt => "vtt",
        SegmentFormat::Mp4 => match stream_type {
            StreamType::Audio => "m4a",
            StreamType::Video if video_only_m4v => "m4v",
            _ => "mp4",
        },
        SegmentFormat::Other(ext) => ext.as_str(),
    }
}

/// Replaces characters that are invalid in file names on common platforms.
pub fn sanitize(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let sanitized = sanitized.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if sanitized.is_empty() {
        "stream".to_string()
    } else {
        sanitized.to_string()
    }
}

/// `<stem>.<extension>` for one stream.
pub fn output_file_name(
    stem: &str,
    format: &SegmentFormat,
    stream_type: StreamType,
    video_only_m4v: bool,
) -> String {
    format!(
        "{}.{}",
        sanitize(stem),
        output_extension(format, stream_type, video_only_m4v)
    )
}
