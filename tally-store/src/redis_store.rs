//! # Redis
//!
//! Production backend for [`KeyValueStore`].
//!
//! A single [`ConnectionManager`] is built when the process starts and
//! cloned per command; clones share one multiplexed connection and
//! reconnect on their own after a dropped connection.
//!
//! | Operation         | Command                       |
//! |-------------------|-------------------------------|
//! | `get`             | `GET`                         |
//! | `set`             | `SET`                         |
//! | `set_with_expiry` | `PSETEX`                      |
//! | `increment`       | `INCR`                        |
//! | `append`          | `RPUSH`                       |
//! | `append_pair`     | `MULTI; RPUSH; RPUSH; EXEC`   |
//! | `range`           | `LRANGE`                      |
//! | `flush`           | `FLUSHDB`                     |

use std::time::Duration;

use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Client, RedisError,
};
use tally_core::{StoreError, TallyResult};
use tracing::{debug, info};

use crate::kv::{KeyValueStore, MIN_EXPIRY};

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    url: String,
}

impl RedisStore {
    /// Connect to `url`, retrying the initial connection `retries` times.
    pub async fn connect(
        url: &str,
        retries: usize,
        connect_timeout: Duration,
    ) -> TallyResult<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(retries)
            .set_connection_timeout(connect_timeout);

        let client = Client::open(url).map_err(unavailable)?;
        let manager = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(unavailable)?;

        info!(url, "Connected to Redis");
        Ok(Self {
            manager,
            url: url.to_string(),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable {
        reason: e.to_string(),
    }
}

fn command_failed(command: &'static str) -> impl FnOnce(RedisError) -> StoreError {
    move |e| {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Unavailable {
                reason: e.to_string(),
            }
        } else {
            StoreError::Command {
                command,
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> TallyResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(command_failed("GET"))?;
        debug!(key, hit = value.is_some(), "GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> TallyResult<()> {
        let mut conn = self.conn();
        let _: () = conn.set(key, value).await.map_err(command_failed("SET"))?;
        debug!(key, bytes = value.len(), "SET");
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> TallyResult<()> {
        if ttl < MIN_EXPIRY {
            return Err(StoreError::InvalidExpiry {
                key: key.to_string(),
                reason: "ttl must be at least one millisecond".to_string(),
            }
            .into());
        }
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.conn();
        let _: () = conn
            .pset_ex(key, value, millis)
            .await
            .map_err(command_failed("PSETEX"))?;
        debug!(key, ttl_ms = millis, "PSETEX");
        Ok(())
    }

    async fn increment(&self, key: &str) -> TallyResult<i64> {
        let mut conn = self.conn();
        let value: i64 = conn.incr(key, 1i64).await.map_err(command_failed("INCR"))?;
        debug!(key, value, "INCR");
        Ok(value)
    }

    async fn append(&self, key: &str, value: &[u8]) -> TallyResult<u64> {
        let mut conn = self.conn();
        let len: u64 = conn.rpush(key, value).await.map_err(command_failed("RPUSH"))?;
        debug!(key, len, "RPUSH");
        Ok(len)
    }

    async fn append_pair(
        &self,
        first_key: &str,
        first: &[u8],
        second_key: &str,
        second: &[u8],
    ) -> TallyResult<()> {
        let mut conn = self.conn();
        let _: () = redis::pipe()
            .atomic()
            .rpush(first_key, first)
            .ignore()
            .rpush(second_key, second)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_failed("MULTI"))?;
        debug!(first_key, second_key, "MULTI RPUSH RPUSH");
        Ok(())
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> TallyResult<Vec<Vec<u8>>> {
        let mut conn = self.conn();
        let items: Vec<Vec<u8>> = conn
            .lrange(key, start, stop)
            .await
            .map_err(command_failed("LRANGE"))?;
        debug!(key, start, stop, len = items.len(), "LRANGE");
        Ok(items)
    }

    async fn flush(&self) -> TallyResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(command_failed("FLUSHDB"))?;
        info!(url = %self.url, "Flushed Redis database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;
    use tally_core::TallyError;
    use tally_test_utils::assertions::assert_store_error;
    use uuid::Uuid;

    #[test]
    fn test_server_error_maps_to_command() {
        let err = RedisError::from((
            ErrorKind::TypeError,
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value".to_string(),
        ));
        match command_failed("INCR")(err) {
            StoreError::Command { command, reason } => {
                assert_eq!(command, "INCR");
                assert!(reason.contains("WRONGTYPE"), "{}", reason);
            }
            other => panic!("Expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn test_io_error_maps_to_unavailable() {
        let err = RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(matches!(
            command_failed("GET")(err),
            StoreError::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        let result =
            RedisStore::connect("redis://127.0.0.1:1", 0, Duration::from_millis(200)).await;
        assert_store_error(&result);
        assert!(matches!(
            result,
            Err(TallyError::Store(StoreError::Unavailable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_malformed_url_is_unavailable() {
        let result = RedisStore::connect("not a url", 0, Duration::from_millis(200)).await;
        assert!(matches!(
            result,
            Err(TallyError::Store(StoreError::Unavailable { .. }))
        ));
    }

    async fn live_store() -> Option<RedisStore> {
        let url = std::env::var("TALLY_REDIS_URL").ok()?;
        Some(RedisStore::connect(&url, 1, Duration::from_secs(2)).await.unwrap())
    }

    fn scratch_key(suffix: &str) -> String {
        format!("tally-test:{}:{}", Uuid::new_v4(), suffix)
    }

    async fn delete(store: &RedisStore, keys: &[String]) {
        let mut conn = store.conn();
        let _: () = conn.del(keys).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at TALLY_REDIS_URL"]
    async fn test_live_roundtrip_counter_and_expiry() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = scratch_key("value");
        let counter = scratch_key("counter");

        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, b"foo").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"foo".to_vec()));

        assert_eq!(store.increment(&counter).await.unwrap(), 1);
        assert_eq!(store.increment(&counter).await.unwrap(), 2);

        store
            .set_with_expiry(&key, b"bar", Duration::from_millis(1500))
            .await
            .unwrap();
        let mut conn = store.conn();
        let pttl: i64 = conn.pttl(&key).await.unwrap();
        assert!(pttl > 0 && pttl <= 1500, "pttl = {}", pttl);

        let rejected = store.set_with_expiry(&key, b"baz", Duration::ZERO).await;
        assert_store_error(&rejected);
        assert_eq!(store.get(&key).await.unwrap(), Some(b"bar".to_vec()));

        delete(&store, &[key, counter]).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at TALLY_REDIS_URL"]
    async fn test_live_append_pair_keeps_lists_aligned() {
        let Some(store) = live_store().await else {
            return;
        };
        let inputs = scratch_key("inputs");
        let outputs = scratch_key("outputs");

        for (input, output) in [("('foo',)", "k1"), ("(42,)", "k2")] {
            store
                .append_pair(&inputs, input.as_bytes(), &outputs, output.as_bytes())
                .await
                .unwrap();
        }
        assert_eq!(
            store.range(&inputs, 0, -1).await.unwrap(),
            vec![b"('foo',)".to_vec(), b"(42,)".to_vec()]
        );
        assert_eq!(
            store.range(&outputs, 0, -1).await.unwrap(),
            vec![b"k1".to_vec(), b"k2".to_vec()]
        );
        assert_eq!(store.range(&outputs, -1, -1).await.unwrap(), vec![b"k2".to_vec()]);

        let counter = scratch_key("counter");
        store.set(&counter, b"not a number").await.unwrap();
        let result = store.increment(&counter).await;
        assert!(matches!(
            result,
            Err(TallyError::Store(StoreError::Command { command: "INCR", .. }))
        ));

        delete(&store, &[inputs, outputs, counter]).await;
    }
}
