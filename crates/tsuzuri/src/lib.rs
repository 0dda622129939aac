pub mod config;
pub mod container;
pub mod download;
pub mod drm;
pub mod error;
mod job;
pub mod manifest;
pub mod mp4;
pub mod progress;
pub mod protection;
pub mod resolve;
mod segment;
pub mod util;

pub use config::{ContainerConfig, DownloadConfig, DrmConfig, HttpConfig};
pub use error::{TsuzuriError, TsuzuriResult};
pub use job::StreamDownload;
pub use segment::*;
pub use util::{http::HttpClient, range::ByteRange};

pub use tokio_util::sync::CancellationToken;
