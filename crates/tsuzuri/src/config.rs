use std::{num::NonZeroU32, path::PathBuf};

use serde::Deserialize;

/// Everything one download needs besides the stream itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of segments fetched in parallel.
    pub concurrency: NonZeroU32,
    pub http: HttpConfig,
    pub drm: DrmConfig,
    pub container: ContainerConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
            http: Default::default(),
            drm: Default::default(),
            container: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Extra request headers in `Name: value` form.
    pub headers: Vec<String>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Cookies in `Set-Cookie` form, scoped to the manifest url.
    pub cookies: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            user_agent: None,
            proxy: None,
            timeout: 10,
            cookies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DrmConfig {
    /// License server the challenge is POSTed to.
    pub license_url: Option<String>,
    /// Extra license request headers in `Name: value` form.
    pub license_headers: Vec<String>,

    /// Directory containing `client_id.bin` and `private_key.pem`.
    pub widevine_device: Option<PathBuf>,
    pub widevine_client_id: Option<PathBuf>,
    pub widevine_private_key: Option<PathBuf>,

    /// BCert chain of the PlayReady device.
    pub playready_certificate_chain: Option<PathBuf>,
    pub playready_signing_key: Option<PathBuf>,
    /// Falls back to the signing key when unset.
    pub playready_encryption_key: Option<PathBuf>,

    /// Manually supplied `kid:key` pair which skips the license exchange.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Remove `edts` boxes from the initialization segment.
    pub fix_edit_lists: bool,
    /// Name video-only outputs `.m4v` instead of `.mp4`.
    pub video_only_m4v: bool,
}
