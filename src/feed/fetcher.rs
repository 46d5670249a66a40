use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::COOKIE;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching a feed, detail page or enclosure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// The outbound HTTP capability the filtering pipeline depends on.
///
/// `cookie` is the site's authentication cookie, sent as the `Cookie` header
/// when present.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_text(&self, url: &str, cookie: Option<&SecretString>)
        -> Result<String, FetchError>;
}

/// Settings for the shared outbound client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub user_agent: String,
    /// Optional HTTP(S) proxy all tracker traffic goes through.
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// [`Fetcher`] backed by a shared `reqwest::Client`.
///
/// 429 and 5xx responses are retried with exponential backoff (1s, 2s, 4s…)
/// up to `max_retries` times; every other failure is returned immediately.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_retries: 0,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build_client(settings: &ClientSettings) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(settings.timeout);
        if let Some(proxy) = &settings.proxy {
            tracing::info!(proxy = %proxy, "Routing tracker requests through HTTP proxy");
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        Ok(builder.build()?)
    }

    /// Issues a GET and returns the successful response with its body unread.
    ///
    /// Used directly by the enclosure proxy, which streams the body back to
    /// its caller.
    pub async fn get(
        &self,
        url: &str,
        cookie: Option<&SecretString>,
    ) -> Result<reqwest::Response, FetchError> {
        let mut retry_count = 0;

        loop {
            let mut request = self.client.get(url);
            if let Some(cookie) = cookie {
                request = request.header(COOKIE, cookie.expose_secret());
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(e)
                }
            })?;

            let status = response.status();
            let retryable =
                status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && retry_count < self.max_retries {
                let delay_secs = 1u64 << retry_count;
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count + 1,
                    delay_secs = delay_secs,
                    "Tracker busy, retrying after delay"
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }
            return Ok(response);
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(
        &self,
        url: &str,
        cookie: Option<&SecretString>,
    ) -> Result<String, FetchError> {
        let response = self.get(url, cookie).await?;
        let bytes = read_limited_bytes(response, MAX_BODY_SIZE).await?;
        let (text, replaced) = decode_body(bytes);
        if replaced {
            tracing::warn!(url = %url, "Response is not valid UTF-8, invalid bytes were replaced");
        }
        Ok(text)
    }
}

/// Decodes a body as UTF-8, replacing invalid sequences with U+FFFD.
///
/// The flag is set when anything was replaced. Feeds are re-served as UTF-8,
/// so a tracker using another charset loses those bytes.
fn decode_body(bytes: Vec<u8>) -> (String, bool) {
    match String::from_utf8(bytes) {
        Ok(text) => (text, false),
        Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), true),
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
