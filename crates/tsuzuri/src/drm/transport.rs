use reqwest::header::HeaderMap;
use tokio::runtime::Handle;
use url::Url;

use crate::{HttpClient, TsuzuriError, TsuzuriResult};

pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Delivers a license challenge and returns the server's answer.
///
/// Implementations block the calling thread.
pub trait LicenseTransport: Send + Sync {
    fn send(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<F> LicenseTransport for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync,
{
    fn send(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self(request)
    }
}

/// POSTs challenges to a license server.
///
/// Requests run on the runtime captured at construction, so `send` must be
/// called from a blocking thread such as one started by `spawn_blocking`.
pub struct HttpLicenseTransport {
    client: HttpClient,
    url: Url,
    headers: HeaderMap,
    handle: Handle,
}

impl HttpLicenseTransport {
    pub fn new(client: HttpClient, url: Url, headers: HeaderMap) -> TsuzuriResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| TsuzuriError::Transport(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            client,
            url,
            headers,
            handle,
        })
    }
}

impl LicenseTransport for HttpLicenseTransport {
    fn send(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.handle.block_on(async {
            tracing::debug!("POST {} ({} bytes)", self.url, request.len());
            let response = self
                .client
                .post(self.url.clone())
                .headers(self.headers.clone())
                .body(request.to_vec())
                .send()
                .await?;

            let status = response.status();
            let body = response.bytes().await?;
            if !status.is_success() {
                return Err(format!(
                    "license server returned {status}: {}",
                    String::from_utf8_lossy(&body)
                )
                .into());
            }
            Ok::<_, TransportError>(body.to_vec())
        })
    }
}
