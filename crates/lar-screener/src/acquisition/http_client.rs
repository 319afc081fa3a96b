//! Async HTTP fetching over reqwest.
//!
//! Not a browser, just GET requests with browser-like headers. Transport
//! errors, 5xx and 429 are retried with exponential backoff; any other
//! non-2xx status fails immediately.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::time::Duration;

use crate::config::FetchConfig;

/// Why a fetch produced no HTML.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl { .. } => false,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Transport { .. } => true,
        }
    }
}

/// Retrieves raw HTML for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` within `timeout_ms` per attempt. Retries are the
    /// implementation's business; an `Err` means they are exhausted.
    async fn fetch(&self, url: &str, timeout_ms: u64) -> Result<String, FetchError>;
}

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    attempts: u32,
    backoff_initial_ms: u64,
    backoff_max_ms: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        if let Ok(lang) = HeaderValue::from_str(&config.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Self {
            client,
            attempts: config.attempts.max(1),
            backoff_initial_ms: config.backoff_initial_ms,
            backoff_max_ms: config.backoff_max_ms,
        }
    }

    /// Delay before retry number `retry` (1-based): initial * 2^(retry-1), capped.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(
            self.backoff_initial_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }

    async fn get_once(&self, url: &str, timeout_ms: u64) -> Result<String, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(transport)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout_ms: u64) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let mut attempt = 1u32;
        loop {
            match self.get_once(url, timeout_ms).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let delay = self.backoff(attempt);
                    tracing::debug!("attempt {attempt} for {url} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetchConfig {
        FetchConfig {
            backoff_initial_ms: 1,
            backoff_max_ms: 4,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let fetcher = HttpFetcher::new(&FetchConfig::default());
        assert_eq!(fetcher.backoff(1), Duration::from_millis(500));
        assert_eq!(fetcher.backoff(2), Duration::from_millis(1000));
        assert_eq!(fetcher.backoff(4), Duration::from_millis(4000));
        assert_eq!(fetcher.backoff(9), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_fetch_sends_language_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = HttpFetcher::new(&config);
        let body = fetcher
            .fetch(&format!("{}/p/1", server.uri()), 2_000)
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sent = requests[0]
            .headers
            .get("accept-language")
            .and_then(|v| v.to_str().ok());
        assert_eq!(sent, Some(config.accept_language.as_str()));
        assert_eq!(sent, Some("en-US,en;q=0.9,sv;q=0.8"));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config());
        let err = fetcher.fetch(&server.uri(), 2_000).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&fast_config());
        let err = fetcher.fetch(&server.uri(), 2_000).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let fetcher = HttpFetcher::new(&fast_config());
        let err = fetcher.fetch("ftp://example.com/x", 1_000).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
        let err = fetcher.fetch("not a url", 1_000).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
