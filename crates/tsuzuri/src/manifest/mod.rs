//! Manifest loading and the streams they offer.

pub mod dash;
pub mod hls;
pub mod base_url;

use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::{
    protection::{extract_from_manifest, ProtectionInfo},
    HttpClient, SegmentFormat, SegmentRequest, StreamDescriptor, StreamType, TsuzuriError,
    TsuzuriResult,
};
pub use self::{dash::DashStream, hls::HlsStream};

/// One downloadable stream of a manifest.
pub trait Stream: Send + Sync {
    fn descriptor(&self) -> &StreamDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// How the media segments are addressed. Resolved into requests by
    /// [`SegmentResolver`](crate::resolve::SegmentResolver).
    fn segments(&self) -> &crate::Addressing {
        &self.descriptor().addressing
    }

    fn init_segment(&self) -> TsuzuriResult<Option<SegmentRequest>> {
        self.descriptor().addressing.init_segment()
    }

    /// DRM signaling declared by the manifest. `None` for clear streams.
    fn protection(&self) -> TsuzuriResult<Option<ProtectionInfo>> {
        extract_from_manifest(&self.descriptor().protection)
    }

    fn mime_type(&self) -> Option<&str> {
        self.descriptor().mime_type.as_deref()
    }

    /// Declared bitrate in bits per second.
    fn bandwidth(&self) -> Option<u64> {
        self.descriptor().bandwidth
    }

    fn stream_type(&self) -> StreamType {
        self.descriptor().stream_type
    }

    fn format(&self) -> &SegmentFormat {
        &self.descriptor().format
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestType {
    Dash,
    Hls,
}

/// Guesses the manifest type from, in order, the url extension, the content type
/// and whether the body parses as a playlist.
pub fn detect(url: &Url, content_type: Option<&str>, body: &[u8]) -> ManifestType {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return ManifestType::Hls;
    } else if path.ends_with(".mpd") {
        return ManifestType::Dash;
    }

    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim().to_ascii_lowercase()).as_deref() {
        Some("application/x-mpegurl" | "application/vnd.apple.mpegurl" | "audio/mpegurl") => {
            return ManifestType::Hls
        }
        Some("application/dash+xml") => return ManifestType::Dash,
        _ => {}
    }

    if m3u8_rs::parse_playlist_res(body).is_ok() {
        ManifestType::Hls
    } else {
        ManifestType::Dash
    }
}

/// Fetches a manifest and lists its streams.
pub async fn load(client: &HttpClient, url: &Url) -> TsuzuriResult<Vec<Box<dyn Stream>>> {
    tracing::info!("Fetching manifest {url}");
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TsuzuriError::HttpError { status, body });
    }

    // Relative urls resolve against where we were redirected to
    let url = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|c| c.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?;

    let streams: Vec<Box<dyn Stream>> = match detect(&url, content_type.as_deref(), &body) {
        ManifestType::Hls => hls::load(client, &url, &body)
            .await?
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn Stream>)
            .collect(),
        ManifestType::Dash => {
            let text = String::from_utf8_lossy(&body);
            dash::parse(&text, &url)?
                .into_iter()
                .map(|d| Box::new(DashStream::new(d)) as Box<dyn Stream>)
                .collect()
        }
    };
    tracing::info!("Found {} streams.", streams.len());
    Ok(streams)
}

/// The highest bitrate stream of a type.
pub fn best_of(streams: &[Box<dyn Stream>], stream_type: StreamType) -> Option<&dyn Stream> {
    streams
        .iter()
        .filter(|s| s.stream_type() == stream_type)
        .max_by_key(|s| s.bandwidth().unwrap_or(0))
        .map(|s| s.as_ref())
}
