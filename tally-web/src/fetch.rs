//! Page fetching over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tally_core::{FetchError, TallyError, TallyResult};
use tracing::debug;

/// Source of page bodies by URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Retrieve the body of `url` as text.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// [`PageFetcher`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> TallyResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TallyError::operation("HttpFetcher.new", e.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_fetcher_keeps_timeout() {
        let fetcher = HttpFetcher::new(Duration::from_millis(250)).unwrap();
        assert_eq!(fetcher.timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_request_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        // Nothing listens on the local discard port.
        let err = fetcher.fetch("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Request { ref url, .. } if url == "http://127.0.0.1:9/"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_request_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
