//! Generic store accessor.
//!
//! [`Cache`] writes primitive values under fresh random keys and reads them
//! back, optionally through a conversion function. Every `store` call is
//! instrumented under `Cache.store`.

use std::sync::Arc;

use tally_core::{
    decode_bytes, decode_integer, decode_real, decode_text, CallArgs, ConversionError,
    FailurePolicy, OperationName, StoredValue, TallyResult,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::instrument::Instrumented;
use crate::kv::KeyValueStore;
use crate::replay::{replay, ReplayReport};

/// Conversion applied to raw stored bytes on retrieval.
pub type Conversion<T> = fn(Vec<u8>) -> Result<T, ConversionError>;

/// Result of [`Cache::retrieve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved<T> {
    /// No conversion was supplied.
    Raw(Vec<u8>),
    /// The supplied conversion's output.
    Converted(T),
}

impl<T> Retrieved<T> {
    /// The converted value, if a conversion ran.
    pub fn converted(self) -> Option<T> {
        match self {
            Retrieved::Converted(value) => Some(value),
            Retrieved::Raw(_) => None,
        }
    }

    /// The raw bytes, if no conversion ran.
    pub fn raw(self) -> Option<Vec<u8>> {
        match self {
            Retrieved::Raw(bytes) => Some(bytes),
            Retrieved::Converted(_) => None,
        }
    }
}

/// Random-key value store with instrumented writes.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    store_calls: Instrumented,
}

impl Cache {
    /// Owner name used in instrumented operation names.
    pub const OWNER: &'static str = "Cache";

    /// Wrap an existing store without touching its contents.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let store_calls = Instrumented::new(store.clone(), Self::store_operation());
        Self { store, store_calls }
    }

    /// Wrap `store` after flushing every key in it.
    pub async fn fresh(store: Arc<dyn KeyValueStore>) -> TallyResult<Self> {
        warn!("Flushing key-value store for a fresh cache");
        store.flush().await?;
        Ok(Self::open(store))
    }

    /// Choose what `store` records when a write fails.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.store_calls = self.store_calls.with_failure_policy(policy);
        self
    }

    /// Name under which `store` calls are counted and recorded.
    pub fn store_operation() -> OperationName {
        OperationName::method(Self::OWNER, "store")
    }

    /// Write `value` under a fresh random key and return the key.
    pub async fn store(&self, value: impl Into<StoredValue>) -> TallyResult<String> {
        let value = value.into();
        let args = CallArgs::single(&value);
        self.store_calls.call(args, || self.write_new(&value)).await
    }

    async fn write_new(&self, value: &StoredValue) -> TallyResult<String> {
        let key = Uuid::new_v4().to_string();
        self.store.set(&key, &value.to_wire()).await?;
        debug!(key = %key, kind = value.kind(), "Stored value");
        Ok(key)
    }

    /// Read the bytes at `key`, applying `convert` when supplied.
    ///
    /// An unset key is `Ok(None)`. Conversion errors are returned unchanged.
    pub async fn retrieve<T>(
        &self,
        key: &str,
        convert: Option<Conversion<T>>,
    ) -> TallyResult<Option<Retrieved<T>>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match convert {
            Some(convert) => Ok(Some(Retrieved::Converted(convert(raw)?))),
            None => Ok(Some(Retrieved::Raw(raw))),
        }
    }

    async fn retrieve_converted<T>(
        &self,
        key: &str,
        convert: Conversion<T>,
    ) -> TallyResult<Option<T>> {
        Ok(self
            .retrieve(key, Some(convert))
            .await?
            .and_then(Retrieved::converted))
    }

    /// Read the value at `key` as UTF-8 text.
    pub async fn retrieve_as_text(&self, key: &str) -> TallyResult<Option<String>> {
        self.retrieve_converted(key, decode_text).await
    }

    /// Read the value at `key` as a decimal integer.
    pub async fn retrieve_as_integer(&self, key: &str) -> TallyResult<Option<i64>> {
        self.retrieve_converted(key, decode_integer).await
    }

    /// Read the value at `key` as a real number.
    pub async fn retrieve_as_real(&self, key: &str) -> TallyResult<Option<f64>> {
        self.retrieve_converted(key, decode_real).await
    }

    /// Read the raw bytes at `key`.
    pub async fn retrieve_as_bytes(&self, key: &str) -> TallyResult<Option<Vec<u8>>> {
        self.retrieve_converted(key, decode_bytes).await
    }

    /// Number of recorded calls to `name`; zero if it was never called.
    pub async fn call_count(&self, name: &OperationName) -> TallyResult<i64> {
        Ok(self
            .retrieve_converted(&name.counter_key(), decode_integer)
            .await?
            .unwrap_or(0))
    }

    /// Replay the recorded history of `name`.
    pub async fn replay(&self, name: &OperationName) -> TallyResult<ReplayReport> {
        replay(self.store.as_ref(), name).await
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("operation", self.store_calls.name())
            .field("failure_policy", &self.store_calls.failure_policy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tally_core::{StoreError, TallyError};
    use tally_test_utils::assertions::{assert_conversion_error, assert_ok, assert_store_error};

    fn memory_cache() -> (Arc<MemoryStore>, Cache) {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::open(store.clone());
        (store, cache)
    }

    #[tokio::test]
    async fn test_store_returns_uuid_key() {
        let (_, cache) = memory_cache();
        let key = cache.store("foo").await.unwrap();
        assert!(Uuid::parse_str(&key).is_ok());
    }

    #[tokio::test]
    async fn test_store_keys_are_unique() {
        let (_, cache) = memory_cache();
        let a = cache.store("same").await.unwrap();
        let b = cache.store("same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_roundtrips_with_matching_conversion() {
        let (_, cache) = memory_cache();

        let key = cache.store("foo").await.unwrap();
        assert_eq!(cache.retrieve_as_text(&key).await.unwrap(), Some("foo".to_string()));

        let key = cache.store(42).await.unwrap();
        assert_eq!(cache.retrieve_as_integer(&key).await.unwrap(), Some(42));

        let key = cache.store(3.25).await.unwrap();
        assert_eq!(cache.retrieve_as_real(&key).await.unwrap(), Some(3.25));

        let key = cache.store(vec![0u8, 1, 255]).await.unwrap();
        assert_eq!(cache.retrieve_as_bytes(&key).await.unwrap(), Some(vec![0u8, 1, 255]));
    }

    #[tokio::test]
    async fn test_retrieve_without_conversion_is_raw() {
        let (_, cache) = memory_cache();
        let key = cache.store(7).await.unwrap();
        let got = cache.retrieve::<i64>(&key, None).await.unwrap();
        assert_eq!(got, Some(Retrieved::Raw(b"7".to_vec())));
    }

    #[tokio::test]
    async fn test_retrieve_with_custom_conversion() {
        let (_, cache) = memory_cache();
        let key = cache.store("hello").await.unwrap();
        let len: Conversion<usize> = |raw| Ok(raw.len());
        let got = cache.retrieve(&key, Some(len)).await.unwrap();
        assert_eq!(got.and_then(Retrieved::converted), Some(5));
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_none() {
        let (_, cache) = memory_cache();
        assert_eq!(cache.retrieve_as_text("missing").await.unwrap(), None);
        assert_eq!(cache.retrieve_as_integer("missing").await.unwrap(), None);
        assert_eq!(cache.retrieve::<String>("missing", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_conversion_error_surfaces() {
        let (_, cache) = memory_cache();
        let key = cache.store("not a number").await.unwrap();
        let result = cache.retrieve_as_integer(&key).await;
        assert_conversion_error(&result);
        assert!(matches!(
            result,
            Err(TallyError::Conversion(ConversionError::InvalidInteger { .. }))
        ));
    }

    fn parse_flag(raw: Vec<u8>) -> Result<bool, ConversionError> {
        match raw.as_slice() {
            b"on" => Ok(true),
            b"off" => Ok(false),
            other => Err(ConversionError::custom(format!(
                "expected on/off, got {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    #[tokio::test]
    async fn test_custom_conversion_error_surfaces_unchanged() {
        let (_, cache) = memory_cache();
        let on = cache.store("on").await.unwrap();
        let got = cache.retrieve(&on, Some(parse_flag as Conversion<bool>)).await;
        assert_ok(&got);
        assert_eq!(got.unwrap().and_then(Retrieved::converted), Some(true));

        let key = cache.store("maybe").await.unwrap();
        let err = cache
            .retrieve(&key, Some(parse_flag as Conversion<bool>))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TallyError::Conversion(ConversionError::Custom {
                reason: "expected on/off, got maybe".to_string()
            })
        );
    }

    #[test]
    fn test_debug_shows_failure_policy() {
        let (_, cache) = memory_cache();
        let cache = cache.with_failure_policy(FailurePolicy::Skip);
        let rendered = format!("{:?}", cache);
        assert!(rendered.contains("Cache.store"), "{}", rendered);
        assert!(rendered.contains("Skip"), "{}", rendered);
    }

    #[tokio::test]
    async fn test_store_is_counted() {
        let (_, cache) = memory_cache();
        let name = Cache::store_operation();
        assert_eq!(cache.call_count(&name).await.unwrap(), 0);
        cache.store("a").await.unwrap();
        cache.store(1).await.unwrap();
        assert_eq!(cache.call_count(&name).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replay_scenario() {
        let (_, cache) = memory_cache();
        let k1 = cache.store("foo").await.unwrap();
        let k2 = cache.store("bar").await.unwrap();
        let k3 = cache.store(42).await.unwrap();

        let report = cache.replay(&Cache::store_operation()).await.unwrap();
        assert_eq!(
            report.lines(),
            vec![
                "Cache.store was called 3 times:".to_string(),
                format!("Cache.store(*('foo',)) -> {}", k1),
                format!("Cache.store(*('bar',)) -> {}", k2),
                format!("Cache.store(*(42,)) -> {}", k3),
            ]
        );
    }

    #[tokio::test]
    async fn test_fresh_flushes_previous_state() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::open(store.clone());
        cache.store("old").await.unwrap();

        let cache = Cache::fresh(store.clone()).await.unwrap();
        assert_eq!(cache.call_count(&Cache::store_operation()).await.unwrap(), 0);
        assert_eq!(store.key_count().unwrap(), 0);
    }

    /// Store whose writes always fail, as an unreachable server would.
    struct UnreachableStore;

    #[async_trait]
    impl KeyValueStore for UnreachableStore {
        async fn get(&self, _key: &str) -> TallyResult<Option<Vec<u8>>> {
            Err(down())
        }
        async fn set(&self, _key: &str, _value: &[u8]) -> TallyResult<()> {
            Err(down())
        }
        async fn set_with_expiry(&self, _: &str, _: &[u8], _: Duration) -> TallyResult<()> {
            Err(down())
        }
        async fn increment(&self, _key: &str) -> TallyResult<i64> {
            Err(down())
        }
        async fn append(&self, _key: &str, _value: &[u8]) -> TallyResult<u64> {
            Err(down())
        }
        async fn append_pair(&self, _: &str, _: &[u8], _: &str, _: &[u8]) -> TallyResult<()> {
            Err(down())
        }
        async fn range(&self, _key: &str, _: isize, _: isize) -> TallyResult<Vec<Vec<u8>>> {
            Err(down())
        }
        async fn flush(&self) -> TallyResult<()> {
            Err(down())
        }
    }

    fn down() -> TallyError {
        StoreError::Unavailable {
            reason: "connection refused".to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_unreachable_store_surfaces_unchanged() {
        let cache = Cache::open(Arc::new(UnreachableStore));
        let stored = cache.store("x").await;
        assert_store_error(&stored);
        assert_eq!(stored.unwrap_err(), down());
        assert_eq!(cache.retrieve_as_text("k").await.unwrap_err(), down());
    }
}
