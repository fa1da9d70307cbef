//! Key-value store trait.
//!
//! One method per primitive TALLY consumes. Implementations must make
//! `increment`, `append` and `append_pair` atomic with respect to
//! concurrent callers; TALLY itself takes no locks around them.

use std::time::Duration;

use async_trait::async_trait;
use tally_core::TallyResult;

/// Shortest TTL `set_with_expiry` accepts. Expiries are kept in milliseconds.
pub const MIN_EXPIRY: Duration = Duration::from_millis(1);

/// Async key-value store.
///
/// List indices follow the usual inclusive convention: `0` is the first
/// element, `-1` the last, so `range(key, 0, -1)` reads a whole list.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the bytes stored at `key`. An unset or expired key is `Ok(None)`.
    async fn get(&self, key: &str) -> TallyResult<Option<Vec<u8>>>;

    /// Store `value` at `key` with no expiry, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> TallyResult<()>;

    /// Store `value` at `key`; the store drops it once `ttl` has elapsed.
    /// A `ttl` below [`MIN_EXPIRY`] is `StoreError::InvalidExpiry`.
    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> TallyResult<()>;

    /// Atomically add one to the counter at `key` and return the new value.
    /// A missing counter starts at zero.
    async fn increment(&self, key: &str) -> TallyResult<i64>;

    /// Append `value` to the list at `key`, returning the new length.
    async fn append(&self, key: &str, value: &[u8]) -> TallyResult<u64>;

    /// Append to two lists as one atomic step.
    async fn append_pair(
        &self,
        first_key: &str,
        first: &[u8],
        second_key: &str,
        second: &[u8],
    ) -> TallyResult<()>;

    /// Read list elements `start..=stop`.
    async fn range(&self, key: &str, start: isize, stop: isize) -> TallyResult<Vec<Vec<u8>>>;

    /// Remove every key in the current database.
    async fn flush(&self) -> TallyResult<()>;
}
