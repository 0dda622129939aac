use std::{num::NonZeroU32, path::Path};

use anyhow::Context;
use clap::{Args, Subcommand};
use fake_user_agent::get_chrome_rua;
use tsuzuri::{DownloadConfig, HttpClient};
use url::Url;

mod download;
mod list;

#[derive(Subcommand, Clone, Debug)]
pub enum TsuzuriCommand {
    List(list::ListCommand),
    Download(download::DownloadCommand),
}

impl TsuzuriCommand {
    pub async fn run(self, config: DownloadConfig) -> anyhow::Result<()> {
        match self {
            TsuzuriCommand::List(command) => command.run(config).await,
            TsuzuriCommand::Download(command) => command.run(config).await,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<DownloadConfig> {
    let Some(path) = path else {
        return Ok(DownloadConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = toml::from_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

#[derive(Args, Clone, Debug, Default)]
pub struct HttpOptions {
    /// Additional HTTP headers
    ///
    /// Custom header. eg. "Referer: https://example.com/"
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookies sent to the manifest host, in Set-Cookie form
    #[clap(long = "cookie")]
    pub cookies: Vec<String>,

    #[clap(long)]
    pub user_agent: Option<String>,

    /// Use the specified HTTP/HTTPS/SOCKS5 proxy
    #[clap(long)]
    pub proxy: Option<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long)]
    pub timeout: Option<u64>,

    /// Threads limit
    #[clap(long, alias = "threads")]
    pub concurrency: Option<NonZeroU32>,
}

impl HttpOptions {
    pub fn apply(self, config: &mut DownloadConfig) {
        let http = &mut config.http;
        http.headers.extend(self.headers);
        http.cookies.extend(self.cookies);
        if let Some(user_agent) = self.user_agent {
            http.user_agent = Some(user_agent);
        }
        if http.user_agent.is_none() {
            http.user_agent = Some(get_chrome_rua().to_string());
        }
        if let Some(proxy) = self.proxy {
            http.proxy = Some(proxy);
        }
        if let Some(timeout) = self.timeout {
            http.timeout = timeout;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
    }
}

/// Client for `url`, with the configured cookies scoped to it.
pub fn client_for(config: &DownloadConfig, url: &Url) -> anyhow::Result<HttpClient> {
    let client = HttpClient::new(&config.http)?;
    client.add_cookies(&config.http.cookies, url.clone())?;
    Ok(client)
}
