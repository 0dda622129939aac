use clap::Parser;
use tsuzuri::{
    manifest::{self, Stream},
    progress::format_bandwidth,
    resolve::SegmentResolver,
    DownloadConfig,
};
use url::Url;

use super::{client_for, HttpOptions};

/// List the streams of a manifest
#[derive(Parser, Clone, Debug)]
#[clap(name = "list", visible_alias = "ls")]
pub struct ListCommand {
    #[clap(flatten)]
    pub http: HttpOptions,

    /// Estimate the bitrate of streams that do not declare one by fetching a segment
    #[clap(long)]
    pub probe: bool,

    /// Manifest URL
    pub url: Url,
}

impl ListCommand {
    pub async fn run(self, mut config: DownloadConfig) -> anyhow::Result<()> {
        self.http.apply(&mut config);
        let client = client_for(&config, &self.url)?;
        let streams = manifest::load(&client, &self.url).await?;

        let resolver = SegmentResolver::new(client);
        let mut rows = Vec::with_capacity(streams.len());
        for stream in &streams {
            let mut bandwidth = stream.bandwidth();
            if bandwidth.is_none() && self.probe {
                match resolver.probe_bandwidth(stream.segments()).await {
                    Ok(probed) => bandwidth = Some(probed),
                    Err(e) => tracing::warn!("Can not probe bitrate of {}: {e}", stream.id()),
                }
            }
            rows.push((bandwidth, stream.as_ref()));
        }
        rows.sort_by(|(a, _), (b, _)| b.cmp(a));

        for (bandwidth, stream) in rows {
            println!("{}", describe(stream, bandwidth));
        }
        Ok(())
    }
}

fn describe(stream: &dyn Stream, bandwidth: Option<u64>) -> String {
    let descriptor = stream.descriptor();
    let stream_type = format!("{:?}", stream.stream_type());
    let mut line = format!("{:<24} {stream_type:<8}", stream.id());

    match bandwidth {
        Some(bandwidth) => line.push_str(&format!(" {:>12}", format_bandwidth(bandwidth))),
        None => line.push_str(&format!(" {:>12}", "-")),
    }
    if let Some((width, height)) = descriptor.resolution {
        line.push_str(&format!(" {width}x{height}"));
    }
    if let Some(codecs) = &descriptor.codecs {
        line.push_str(&format!(" {codecs}"));
    }
    if let Some(language) = &descriptor.language {
        line.push_str(&format!(" [{language}]"));
    }
    if !descriptor.protection.is_empty() {
        line.push_str(" (encrypted)");
    }
    line
}
