//! HLS playlists, parsed with `m3u8-rs`.

use m3u8_rs::{AlternativeMediaType, KeyMethod, MediaPlaylist, Playlist};
use url::Url;

use super::{base_url::merge_baseurls, Stream};
use crate::{
    protection::{ContentProtectionRecord, PLAYREADY_SCHEME_ID_URI, WIDEVINE_SCHEME_ID_URI},
    Addressing, ByteRange, HttpClient, SegmentFormat, SegmentRequest, StreamDescriptor, StreamType,
    TsuzuriError, TsuzuriResult,
};

const PLAYREADY_KEYFORMAT: &str = "com.microsoft.playready";

pub struct HlsStream {
    descriptor: StreamDescriptor,
    /// Encryption method we can not decrypt, e.g. whole-segment `AES-128`.
    unsupported_method: Option<String>,
}

impl Stream for HlsStream {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn protection(&self) -> TsuzuriResult<Option<crate::protection::ProtectionInfo>> {
        if let Some(method) = &self.unsupported_method {
            return Err(TsuzuriError::UnsupportedEncryption(method.clone()));
        }
        crate::protection::extract_from_manifest(&self.descriptor.protection)
    }
}

/// What a master playlist tells about a media playlist.
#[derive(Debug, Clone, Default)]
pub struct MediaAttributes {
    pub id: String,
    pub stream_type: StreamType,
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub language: Option<String>,
    pub resolution: Option<(u64, u64)>,
}

pub fn parse_playlist(bytes: &[u8], url: &Url) -> TsuzuriResult<Playlist> {
    m3u8_rs::parse_playlist_res(bytes).map_err(|_| TsuzuriError::M3u8ParseError(url.to_string()))
}

/// Loads every stream reachable from a playlist, fetching the media playlists of a master playlist.
pub async fn load(client: &HttpClient, url: &Url, bytes: &[u8]) -> TsuzuriResult<Vec<HlsStream>> {
    let master = match parse_playlist(bytes, url)? {
        Playlist::MediaPlaylist(playlist) => {
            let attributes = MediaAttributes {
                id: "0".to_string(),
                ..Default::default()
            };
            return Ok(vec![media_stream(url, &playlist, attributes)?]);
        }
        Playlist::MasterPlaylist(master) => master,
    };
    tracing::info!(
        "Master playlist with {} variants and {} renditions detected.",
        master.variants.len(),
        master.alternatives.len()
    );

    let mut entries = Vec::new();
    for (index, variant) in master.variants.iter().enumerate() {
        if variant.is_i_frame {
            continue;
        }
        let url = merge_baseurls(url, &variant.uri)?;
        if entries.iter().any(|(u, _): &(Url, MediaAttributes)| u == &url) {
            continue;
        }

        let stream_type = match variant.codecs.as_deref() {
            Some(codecs) if is_audio_only(codecs) => StreamType::Audio,
            _ => StreamType::Video,
        };
        entries.push((
            url,
            MediaAttributes {
                id: format!("v{index}-{}", variant.bandwidth),
                stream_type,
                bandwidth: Some(variant.average_bandwidth.unwrap_or(variant.bandwidth)),
                codecs: variant.codecs.clone(),
                language: None,
                resolution: variant.resolution.map(|r| (r.width, r.height)),
            },
        ));
    }

    for media in &master.alternatives {
        let Some(uri) = &media.uri else {
            continue;
        };
        let stream_type = match media.media_type {
            AlternativeMediaType::Audio => StreamType::Audio,
            AlternativeMediaType::Video => StreamType::Video,
            AlternativeMediaType::Subtitles => StreamType::Subtitle,
            _ => StreamType::Unknown,
        };
        entries.push((
            merge_baseurls(url, uri)?,
            MediaAttributes {
                id: format!("{}-{}", media.group_id, media.name).replace(' ', "_"),
                stream_type,
                language: media.language.clone(),
                ..Default::default()
            },
        ));
    }

    let mut streams = Vec::with_capacity(entries.len());
    for (url, attributes) in entries {
        tracing::debug!("Fetching media playlist {url}");
        let bytes = client.fetch(&url, None).await?;
        let playlist = m3u8_rs::parse_media_playlist_res(&bytes)
            .map_err(|_| TsuzuriError::M3u8ParseError(url.to_string()))?;
        streams.push(media_stream(&url, &playlist, attributes)?);
    }
    Ok(streams)
}

/// Describes one media playlist.
pub fn media_stream(
    playlist_url: &Url,
    playlist: &MediaPlaylist,
    attributes: MediaAttributes,
) -> TsuzuriResult<HlsStream> {
    if !playlist.end_list {
        tracing::warn!("{playlist_url} is a live playlist, only the segments listed now are downloaded");
    }

    let mut init = None;
    let mut segments = Vec::with_capacity(playlist.segments.len());
    let mut protection = Vec::new();
    let mut unsupported_method = None;
    // Where the previous sub-range ended, for EXT-X-BYTERANGE without an offset
    let mut last_range: Option<(Url, u64)> = None;

    for segment in &playlist.segments {
        if let Some(key) = &segment.key {
            match key_record(key) {
                KeyRecord::Clear => {}
                KeyRecord::Protection(record) => {
                    if !protection.contains(&record) {
                        protection.push(record);
                    }
                }
                KeyRecord::Unsupported(method) => {
                    unsupported_method.get_or_insert(method);
                }
            }
        }

        if let Some(map) = &segment.map {
            let url = merge_baseurls(playlist_url, &map.uri)?;
            let range = map
                .byte_range
                .as_ref()
                .map(|r| ByteRange::with_length(r.offset.unwrap_or(0), r.length))
                .transpose()?;
            let request = SegmentRequest::new(url).with_range(range);
            match &init {
                None => init = Some(request),
                Some(existing) if existing != &request => {
                    tracing::warn!("Ignoring additional EXT-X-MAP {}", request.url);
                }
                Some(_) => {}
            }
        }

        let url = merge_baseurls(playlist_url, &segment.uri)?;
        let range = segment
            .byte_range
            .as_ref()
            .map(|r| {
                let offset = r.offset.unwrap_or(match &last_range {
                    Some((last_url, end)) if last_url == &url => *end,
                    _ => 0,
                });
                ByteRange::with_length(offset, r.length)
            })
            .transpose()?;
        last_range = range.map(|r| (url.clone(), r.offset.saturating_add(r.length.unwrap_or(0))));

        segments.push(SegmentRequest::new(url).with_range(range).with_duration(segment.duration as f64));
    }

    let format = match (&init, segments.first()) {
        (Some(_), _) => SegmentFormat::Mp4,
        (None, Some(first)) => SegmentFormat::from_filename(first.url.path()),
        (None, None) => SegmentFormat::Mpeg2TS,
    };
    let mime_type = match (&format, attributes.stream_type) {
        (SegmentFormat::Mpeg2TS, _) => Some("video/mp2t".to_string()),
        (SegmentFormat::WebVtt, _) => Some("text/vtt".to_string()),
        (_, StreamType::Audio) => Some("audio/mp4".to_string()),
        (_, StreamType::Video) => Some("video/mp4".to_string()),
        _ => None,
    };

    Ok(HlsStream {
        descriptor: StreamDescriptor {
            id: attributes.id,
            mime_type,
            codecs: attributes.codecs,
            bandwidth: attributes.bandwidth,
            language: attributes.language,
            resolution: attributes.resolution,
            stream_type: attributes.stream_type,
            format,
            addressing: Addressing::List { init, segments },
            protection,
        },
        unsupported_method,
    })
}

fn is_audio_only(codecs: &str) -> bool {
    codecs.split(',').map(str::trim).all(|codec| {
        ["mp4a", "ac-3", "ec-3", "opus", "flac"]
            .iter()
            .any(|audio| codec.starts_with(audio))
    })
}

enum KeyRecord {
    Clear,
    Protection(ContentProtectionRecord),
    Unsupported(String),
}

fn key_record(key: &m3u8_rs::Key) -> KeyRecord {
    let method = match &key.method {
        KeyMethod::None => return KeyRecord::Clear,
        KeyMethod::AES128 => return KeyRecord::Unsupported("AES-128".to_string()),
        KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
        KeyMethod::Other(method) => method.clone(),
    };

    let scheme_id_uri = match key.keyformat.as_deref().map(str::to_ascii_lowercase) {
        Some(format) if format == WIDEVINE_SCHEME_ID_URI => WIDEVINE_SCHEME_ID_URI,
        Some(format) if format == PLAYREADY_KEYFORMAT || format == PLAYREADY_SCHEME_ID_URI => {
            PLAYREADY_SCHEME_ID_URI
        }
        other => {
            return KeyRecord::Unsupported(format!(
                "{method} with KEYFORMAT {}",
                other.as_deref().unwrap_or("identity")
            ))
        }
    };

    // data:text/plain;base64,<pssh>
    let pssh = key
        .uri
        .as_deref()
        .filter(|uri| uri.starts_with("data:"))
        .and_then(|uri| uri.split_once(','))
        .map(|(_, data)| data.to_string());

    KeyRecord::Protection(ContentProtectionRecord {
        scheme_id_uri: scheme_id_uri.to_string(),
        value: Some(method),
        default_kid: None,
        pssh,
    })
}
