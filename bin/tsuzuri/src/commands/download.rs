use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Parser};
use tsuzuri::{
    manifest::{self, Stream},
    progress::format_bandwidth,
    CancellationToken, DownloadConfig, StreamDownload, StreamType,
};
use url::Url;

use super::{client_for, HttpOptions};

/// Download streams of a manifest, one file per stream
#[derive(Parser, Clone, Debug)]
#[clap(name = "download", visible_alias = "dl")]
pub struct DownloadCommand {
    #[clap(flatten)]
    pub http: HttpOptions,

    #[clap(flatten)]
    pub decrypt: DecryptOptions,

    #[clap(flatten)]
    pub output: OutputOptions,

    /// Streams to download, by id. Defaults to the best video and the best audio stream.
    #[clap(short, long = "stream")]
    pub streams: Vec<String>,

    /// Manifest URL
    pub url: Url,
}

impl DownloadCommand {
    pub async fn run(self, mut config: DownloadConfig) -> anyhow::Result<()> {
        self.http.apply(&mut config);
        self.decrypt.apply(&mut config);
        self.output.apply(&mut config);

        let client = client_for(&config, &self.url)?;
        let streams = manifest::load(&client, &self.url).await?;
        let selected = select(&streams, &self.streams)?;

        let token = CancellationToken::new();
        tokio::spawn({
            let token = token.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling download");
                    token.cancel();
                }
            }
        });

        let dir = self.output.dir.unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir).await?;

        let download = StreamDownload::new(client, config).with_cancellation(token);
        for stream in selected {
            let output = download.output_path(&dir, stream);
            let state = download.run(stream, &output).await?;
            match state.bandwidth() {
                Some(bandwidth) => tracing::info!(
                    "{} done, measured bitrate {}",
                    output.display(),
                    format_bandwidth(bandwidth)
                ),
                None => tracing::info!("{} done", output.display()),
            }
        }
        Ok(())
    }
}

fn select<'a>(streams: &'a [Box<dyn Stream>], ids: &[String]) -> anyhow::Result<Vec<&'a dyn Stream>> {
    if !ids.is_empty() {
        return ids
            .iter()
            .map(|id| match streams.iter().find(|s| s.id() == id) {
                Some(stream) => Ok(stream.as_ref()),
                None => bail!("stream {id} not found in manifest"),
            })
            .collect();
    }

    let selected: Vec<_> = [StreamType::Video, StreamType::Audio]
        .into_iter()
        .filter_map(|stream_type| manifest::best_of(streams, stream_type))
        .collect();
    if selected.is_empty() {
        bail!("manifest has no video or audio stream");
    }
    Ok(selected)
}

/// Decrypt related arguments
#[derive(Args, Clone, Debug, Default)]
pub struct DecryptOptions {
    /// Content key in kid:key form, skipping the license exchange
    #[clap(long)]
    pub key: Option<String>,

    #[clap(long)]
    pub license_url: Option<String>,

    /// Additional license request headers
    #[clap(long = "license-header")]
    pub license_headers: Vec<String>,

    /// Directory containing client_id.bin and private_key.pem
    #[clap(long)]
    pub widevine_device: Option<PathBuf>,

    /// PlayReady certificate chain (bgroupcert.dat)
    #[clap(long)]
    pub playready_chain: Option<PathBuf>,

    /// PlayReady signing key (zgpriv.dat)
    #[clap(long)]
    pub playready_key: Option<PathBuf>,
}

impl DecryptOptions {
    fn apply(&self, config: &mut DownloadConfig) {
        let drm = &mut config.drm;
        if self.key.is_some() {
            drm.key = self.key.clone();
        }
        if self.license_url.is_some() {
            drm.license_url = self.license_url.clone();
        }
        drm.license_headers.extend(self.license_headers.iter().cloned());
        if self.widevine_device.is_some() {
            drm.widevine_device = self.widevine_device.clone();
        }
        if self.playready_chain.is_some() {
            drm.playready_certificate_chain = self.playready_chain.clone();
        }
        if self.playready_key.is_some() {
            drm.playready_signing_key = self.playready_key.clone();
        }
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct OutputOptions {
    /// Output directory
    #[clap(short, long = "output-dir")]
    pub dir: Option<PathBuf>,

    /// Remove edit lists from the initialization segment
    #[clap(long)]
    pub fix_edit_lists: bool,

    /// Name video-only outputs .m4v
    #[clap(long)]
    pub m4v: bool,
}

impl OutputOptions {
    fn apply(&self, config: &mut DownloadConfig) {
        config.container.fix_edit_lists |= self.fix_edit_lists;
        config.container.video_only_m4v |= self.m4v;
    }
}
