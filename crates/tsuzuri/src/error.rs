use thiserror::Error;

use crate::{drm::LicensePhase, protection::KeyId};

#[derive(Error, Debug)]
pub enum TsuzuriError {
    #[error("HTTP error {status}: {body}")]
    HttpError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid byte range: {0}")]
    InvalidByteRange(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid manifest: {0}")]
    ManifestParseError(String),

    #[error("Invalid m3u8 file: {0}")]
    M3u8ParseError(String),

    #[error("Unsupported addressing mode: {0}")]
    UnsupportedAddressing(String),

    #[error("Unsupported encryption method: {0}")]
    UnsupportedEncryption(String),

    #[error("Invalid timing schema: {0}")]
    InvalidTimingSchema(String),

    #[error("Missing `{0}` box")]
    MissingBox(&'static str),

    #[error("Malformed `{kind}` box: {reason}")]
    MalformedBox { kind: String, reason: String },

    #[error("No segments to probe")]
    NoSegments,

    #[error("Bitrate is unknown without a positive duration, got {0}s")]
    UnknownBitrate(f64),

    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    #[error("Invalid content key: {0}")]
    InvalidContentKey(String),

    #[error("Content key must not be all zero")]
    ZeroContentKey,

    #[error("Key id mismatch: expected {expected}, got {actual}")]
    KeyIdMismatch { expected: KeyId, actual: KeyId },

    #[error("Content key for {0} not found in license")]
    KeyNotFound(KeyId),

    #[error("Stream is encrypted but no key id is known")]
    UnknownKeyId,

    #[error("Missing DRM credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("License exchange failed while {phase}: {source}")]
    License {
        phase: LicensePhase,
        #[source]
        source: Box<TsuzuriError>,
    },

    #[error("License transport error: {0}")]
    Transport(String),

    #[error("Widevine error: {0:#}")]
    Widevine(anyhow::Error),

    #[error(transparent)]
    PlayReady(#[from] tsuzuri_playready::PlayReadyError),

    #[error("mp4decrypt error: {0}")]
    Mp4DecryptError(String),

    #[error("Container has already been finished")]
    AlreadyFinished,

    #[error("Segment {0} was never delivered")]
    MissingSegment(usize),

    #[error("Download cancelled")]
    Cancelled,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error("mpd parse error: {0}")]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

impl TsuzuriError {
    pub(crate) fn malformed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedBox {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

pub type TsuzuriResult<T> = Result<T, TsuzuriError>;
