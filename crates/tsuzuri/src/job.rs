use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::DownloadConfig,
    container::{ContainerOrchestrator, StreamState},
    download::{DownloadEngine, DownloadJob},
    drm::{DrmResolver, HttpLicenseTransport, LicenseTransport, ResolvedKey, TransportError},
    manifest::Stream,
    mp4,
    progress::ProgressTracker,
    protection::{self, ProtectionInfo},
    resolve::SegmentResolver,
    util::{http::parse_headers, path::output_file_name},
    HttpClient, SegmentRequest, TsuzuriResult,
};

/// Downloads one stream of a manifest into one file.
pub struct StreamDownload {
    client: HttpClient,
    config: DownloadConfig,
    drm: Option<Arc<DrmResolver>>,
    token: CancellationToken,
}

impl StreamDownload {
    pub fn new(client: HttpClient, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            drm: None,
            token: CancellationToken::new(),
        }
    }

    /// Uses `drm` instead of building a resolver from the configuration.
    pub fn with_drm(mut self, drm: DrmResolver) -> Self {
        self.drm = Some(Arc::new(drm));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// `<dir>/<stream id>.<ext>`
    pub fn output_path(&self, dir: &Path, stream: &dyn Stream) -> PathBuf {
        dir.join(output_file_name(
            stream.id(),
            stream.format(),
            stream.stream_type(),
            self.config.container.video_only_m4v,
        ))
    }

    pub async fn run(&self, stream: &dyn Stream, output: &Path) -> TsuzuriResult<StreamState> {
        tracing::info!("Downloading stream {} to {}", stream.id(), output.display());

        let resolved = SegmentResolver::new(self.client.clone())
            .resolve(stream.segments())
            .await?;

        let init = match &resolved.init {
            Some(request) => {
                tracing::debug!("Fetching initialization segment {}", request.url);
                Some(self.client.fetch(&request.url, request.byte_range).await?)
            }
            None => None,
        };

        let from_init = match &init {
            Some(data) if stream.format().is_mp4() => {
                protection::extract_from_init(&mp4::init::inspect(data)?)
            }
            _ => None,
        };
        let protection = protection::merge(stream.protection()?, from_init)?;

        let key = match &protection {
            Some(info) => Some(self.resolve_key(info).await?),
            None => None,
        };

        let file = tokio::fs::File::create(output).await?;
        let result = self
            .write_stream(file, stream, init.as_deref(), protection, key, resolved.segments)
            .await;
        match result {
            Ok(state) => {
                tracing::info!("Stream {} saved to {}", stream.id(), output.display());
                Ok(state)
            }
            Err(e) => {
                tracing::warn!("Removing incomplete output {}", output.display());
                if let Err(remove_error) = tokio::fs::remove_file(output).await {
                    tracing::warn!("Failed to remove {}: {remove_error}", output.display());
                }
                Err(e)
            }
        }
    }

    async fn write_stream(
        &self,
        file: tokio::fs::File,
        stream: &dyn Stream,
        init: Option<&[u8]>,
        protection: Option<ProtectionInfo>,
        key: Option<ResolvedKey>,
        segments: Vec<SegmentRequest>,
    ) -> TsuzuriResult<StreamState> {
        let mut container = ContainerOrchestrator::new(
            BufWriter::new(file),
            stream.format().clone(),
            self.config.container.clone(),
        )
        .with_key_id(protection.as_ref().and_then(|p| p.key_id));
        if let Some(data) = init {
            container.initialize(data, key.as_ref()).await?;
        }

        let mut progress = ProgressTracker::new(segments.len());
        let engine =
            DownloadEngine::new(Arc::new(self.client.clone())).with_cancellation(self.token.clone());
        let job = DownloadJob::new(segments, container)
            .with_key(key)
            .with_concurrency(self.config.concurrency);

        let container = engine.run(job, Some(&mut progress)).await?;
        Ok(container.state().clone())
    }

    async fn resolve_key(&self, info: &ProtectionInfo) -> TsuzuriResult<ResolvedKey> {
        let drm = match &self.drm {
            Some(drm) => drm.clone(),
            None => Arc::new(DrmResolver::from_config(&self.config.drm, self.license_transport()?)?),
        };
        tracing::info!("Acquiring content key with {}", drm.system_name());

        let info = info.clone();
        let key = tokio::task::spawn_blocking(move || drm.resolve_key(&info)).await??;
        tracing::info!("Content key for {} acquired.", key.key_id);
        Ok(key)
    }

    fn license_transport(&self) -> TsuzuriResult<Arc<dyn LicenseTransport>> {
        let Some(url) = &self.config.drm.license_url else {
            return Ok(Arc::new(no_license_url));
        };
        let headers = parse_headers(&self.config.drm.license_headers)?;
        Ok(Arc::new(HttpLicenseTransport::new(
            self.client.clone(),
            Url::parse(url)?,
            headers,
        )?))
    }
}

fn no_license_url(_: &[u8]) -> Result<Vec<u8>, TransportError> {
    Err("no license url configured".into())
}
