use std::{ops::Deref, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, RANGE},
    Client, IntoUrl, Response, StatusCode,
};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

use crate::{config::HttpConfig, ByteRange, TsuzuriError, TsuzuriResult};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> TsuzuriResult<Self> {
        let headers = parse_headers(&config.headers)?;

        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout))
            .cookie_provider(cookies_store.clone());
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: &[String], url: impl IntoUrl) -> TsuzuriResult<()> {
        let url = url.into_url()?;
        let mut lock = self
            .cookies_store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for cookie in cookies {
            if let Err(e) = lock.parse(cookie, &url) {
                tracing::warn!("Ignoring invalid cookie {cookie}: {e}");
            }
        }
        Ok(())
    }

    /// GET a resource, optionally restricted to `range`.
    ///
    /// Only `200 OK` and `206 Partial Content` are accepted.
    pub async fn fetch(&self, url: &Url, range: Option<ByteRange>) -> TsuzuriResult<Bytes> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.to_http_range());
        }

        let response = ensure_success(request.send().await?).await?;
        Ok(response.bytes().await?)
    }

    /// Size of a resource in bytes, asking with `HEAD` first and falling back to `GET`.
    pub async fn content_length(&self, url: &Url, range: Option<ByteRange>) -> TsuzuriResult<u64> {
        if let Some(length) = range.and_then(|r| r.length) {
            return Ok(length);
        }

        let mut head = self.client.head(url.clone());
        if let Some(range) = range {
            head = head.header(RANGE, range.to_http_range());
        }
        match head.send().await {
            Ok(response) if response.status().is_success() => {
                if let Some(length) = response.content_length().filter(|l| *l > 0) {
                    return Ok(length);
                }
            }
            Ok(response) => {
                tracing::debug!("HEAD {url} returned {}, retrying with GET", response.status())
            }
            Err(e) => tracing::debug!("HEAD {url} failed: {e}, retrying with GET"),
        }

        let mut get = self.client.get(url.clone());
        if let Some(range) = range {
            get = get.header(RANGE, range.to_http_range());
        }
        let response = ensure_success(get.send().await?).await?;
        match response.content_length() {
            Some(length) if length > 0 => Ok(length),
            _ => Ok(response.bytes().await?.len() as u64),
        }
    }
}

async fn ensure_success(response: Response) -> TsuzuriResult<Response> {
    let status = response.status();
    if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TsuzuriError::HttpError { status, body })
}

/// Parses a `Name: value` header line.
pub fn parse_header(header: &str) -> TsuzuriResult<(HeaderName, HeaderValue)> {
    let (key, value) = header
        .split_once(':')
        .ok_or_else(|| TsuzuriError::InvalidHeader(header.to_string()))?;
    let key = HeaderName::from_bytes(key.trim().as_bytes())
        .map_err(|_| TsuzuriError::InvalidHeader(header.to_string()))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|_| TsuzuriError::InvalidHeader(header.to_string()))?;
    Ok((key, value))
}

pub fn parse_headers(headers: &[String]) -> TsuzuriResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for header in headers {
        let (key, value) = parse_header(header)?;
        map.insert(key, value);
    }
    Ok(map)
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
