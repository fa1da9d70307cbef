//! Cache-through page retrieval.
//!
//! Page bodies are cached under `cache:<url>` with a fixed TTL and every
//! request bumps `count:<url>`, hit or miss. Expiry is left to the store.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{decode_integer, page_cache_key, page_count_key, ConfigError, TallyResult};
use tally_store::{KeyValueStore, MIN_EXPIRY};
use tracing::{debug, info};

use crate::fetch::PageFetcher;

/// Default lifetime of a cached page.
pub const DEFAULT_PAGE_TTL: Duration = Duration::from_secs(10);

/// Fetches pages through a key-value cache.
#[derive(Clone)]
pub struct CachedPageFetcher {
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn PageFetcher>,
    ttl: Duration,
}

impl CachedPageFetcher {
    pub fn new(store: Arc<dyn KeyValueStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            store,
            fetcher,
            ttl: DEFAULT_PAGE_TTL,
        }
    }

    /// Set how long fetched pages stay cached.
    ///
    /// Expiries below one millisecond are rejected up front; no store can
    /// hold them.
    pub fn with_ttl(mut self, ttl: Duration) -> TallyResult<Self> {
        if ttl < MIN_EXPIRY {
            return Err(ConfigError::InvalidValue {
                field: "page_ttl".to_string(),
                value: format!("{:?}", ttl),
                reason: "must be at least 1ms".to_string(),
            }
            .into());
        }
        self.ttl = ttl;
        Ok(self)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the body of `url`, from cache when an unexpired copy exists.
    ///
    /// Fetch failures propagate and leave the cache untouched.
    pub async fn get_page(&self, url: &str) -> TallyResult<String> {
        let accesses = self.store.increment(&page_count_key(url)).await?;

        let cache_key = page_cache_key(url);
        if let Some(cached) = self.store.get(&cache_key).await? {
            debug!(url, accesses, "Page cache hit");
            return Ok(String::from_utf8_lossy(&cached).into_owned());
        }

        let body = self.fetcher.fetch(url).await?;
        self.store
            .set_with_expiry(&cache_key, body.as_bytes(), self.ttl)
            .await?;
        info!(url, accesses, ttl_secs = self.ttl.as_secs_f64(), "Cached fetched page");
        Ok(body)
    }

    /// Number of times `url` has been requested through this cache.
    pub async fn access_count(&self, url: &str) -> TallyResult<i64> {
        match self.store.get(&page_count_key(url)).await? {
            Some(raw) => Ok(decode_integer(raw)?),
            None => Ok(0),
        }
    }
}

impl std::fmt::Debug for CachedPageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPageFetcher")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
