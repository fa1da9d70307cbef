//! TALLY Test Utilities
//!
//! Shared test infrastructure for the TALLY workspace:
//! - Proptest generators for stored values and operation names
//! - A stub page fetcher that counts network calls
//! - Seeded school, student and access-log collections
//! - Assertions for TALLY error variants

pub use tally_core::{
    CallArgs, ConversionError, DocumentError, FetchError, OperationName, StoreError, StoredValue,
    TallyConfig, TallyError, TallyResult,
};
pub use tally_docs::{doc, Bson, Document, InMemoryCollection};
pub use tally_store::{Cache, KeyValueStore, MemoryStore};
pub use tally_web::PageFetcher;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// STUB FETCHER
// ============================================================================

/// Page fetcher that serves canned bodies and counts every call.
///
/// Unknown URLs get a body naming the URL and the call number, so a
/// refetch is distinguishable from a cache hit.
#[derive(Debug, Default)]
pub struct StubFetcher {
    calls: AtomicUsize,
    pages: HashMap<String, String>,
    failing: Mutex<Option<u16>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    /// Make subsequent fetches fail with `status`, or succeed again with `None`.
    pub fn fail_with(&self, status: Option<u16>) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = status;
        }
    }

    /// Number of fetches performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self.failing.lock().ok().and_then(|guard| *guard);
        if let Some(status) = failing {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("<html><body>{} (fetch #{})</body></html>", url, n)))
    }
}

/// Fresh in-memory store behind the trait object every component takes.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TALLY value types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a text value.
    pub fn arb_text() -> impl Strategy<Value = StoredValue> {
        ".{0,64}".prop_map(StoredValue::Text)
    }

    /// Generate a byte-string value.
    pub fn arb_bytes() -> impl Strategy<Value = StoredValue> {
        prop::collection::vec(any::<u8>(), 0..128).prop_map(StoredValue::Bytes)
    }

    /// Generate an integer value.
    pub fn arb_integer() -> impl Strategy<Value = StoredValue> {
        any::<i64>().prop_map(StoredValue::Integer)
    }

    /// Generate a finite real value.
    pub fn arb_real() -> impl Strategy<Value = StoredValue> {
        (prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL)
            .prop_map(StoredValue::Real)
    }

    /// Generate any stored value.
    pub fn arb_stored_value() -> impl Strategy<Value = StoredValue> {
        prop_oneof![arb_text(), arb_bytes(), arb_integer(), arb_real()]
    }

    /// Generate an `Owner.method` operation name.
    pub fn arb_operation_name() -> impl Strategy<Value = OperationName> {
        ("[A-Z][a-z]{1,8}", "[a-z_]{1,10}")
            .prop_map(|(owner, method)| OperationName::method(&owner, &method))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Seeded collections mirroring the documents the queries run against.

    use super::*;

    /// Schools with overlapping topic lists.
    pub fn school_documents() -> Vec<Document> {
        vec![
            doc! { "name": "Holberton school", "topics": ["Algo", "C", "Python", "React"] },
            doc! { "name": "UCSF", "topics": ["Algo", "MongoDB"] },
            doc! { "name": "UCLA", "topics": ["C", "Python"] },
            doc! { "name": "UCSD", "topics": ["Cassandra"] },
            doc! { "name": "Stanford", "topics": ["C", "React", "Javascript"] },
        ]
    }

    /// Students A (scores 80, 90) and B (score 70).
    pub fn student_documents() -> Vec<Document> {
        vec![
            doc! {
                "name": "A",
                "topics": [{ "title": "Algo", "score": 80 }, { "title": "C", "score": 90 }],
            },
            doc! { "name": "B", "topics": [{ "title": "Algo", "score": 70 }] },
        ]
    }

    /// Nginx access-log entries: 12 logs, 7 GET of which 3 hit `/status`.
    pub fn nginx_log_documents() -> Vec<Document> {
        let entries = [
            ("172.31.63.67", "GET", "/status"),
            ("172.31.63.67", "GET", "/status"),
            ("172.31.2.14", "GET", "/status"),
            ("172.31.63.67", "GET", "/"),
            ("172.31.2.14", "GET", "/about"),
            ("172.31.29.194", "GET", "/"),
            ("69.162.124.230", "GET", "/login"),
            ("172.31.63.67", "POST", "/login"),
            ("172.31.2.14", "POST", "/status"),
            ("64.124.26.109", "PUT", "/item/4"),
            ("172.31.63.67", "DELETE", "/item/4"),
            ("172.31.2.14", "HEAD", "/"),
        ];
        entries
            .iter()
            .map(|(ip, method, path)| doc! { "ip": *ip, "method": *method, "path": *path })
            .collect()
    }

    pub fn schools() -> InMemoryCollection {
        InMemoryCollection::with_documents("school", school_documents())
    }

    pub fn students() -> InMemoryCollection {
        InMemoryCollection::with_documents("students", student_documents())
    }

    pub fn nginx_logs() -> InMemoryCollection {
        InMemoryCollection::with_documents("nginx", nginx_log_documents())
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for TALLY-specific error variants.

    use super::*;

    /// Assert that a TallyResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TallyResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TallyResult is a store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &TallyResult<T>) {
        match result {
            Err(TallyError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a TallyResult is a conversion error.
    #[track_caller]
    pub fn assert_conversion_error<T: std::fmt::Debug>(result: &TallyResult<T>) {
        match result {
            Err(TallyError::Conversion(_)) => {}
            other => panic!("Expected Conversion error, got: {:?}", other),
        }
    }

    /// Assert that a TallyResult is a fetch error with the given status.
    #[track_caller]
    pub fn assert_fetch_status<T: std::fmt::Debug>(result: &TallyResult<T>, expected: u16) {
        match result {
            Err(TallyError::Fetch(FetchError::Status { status, .. })) => {
                assert_eq!(*status, expected, "Wrong status in fetch error");
            }
            other => panic!("Expected fetch status {}, got: {:?}", expected, other),
        }
    }

    /// Assert that a TallyResult is an unsupported-query document error.
    #[track_caller]
    pub fn assert_unsupported<T: std::fmt::Debug>(result: &TallyResult<T>) {
        match result {
            Err(TallyError::Document(DocumentError::Unsupported { .. })) => {}
            other => panic!("Expected Unsupported document error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_fetcher_counts_and_fails_on_demand() {
        let fetcher = StubFetcher::new().with_page("http://a.test/", "hello");
        assert_eq!(fetcher.fetch("http://a.test/").await.unwrap(), "hello");
        assert!(fetcher.fetch("http://b.test/").await.unwrap().contains("fetch #2"));

        fetcher.fail_with(Some(500));
        assert_eq!(
            fetcher.fetch("http://a.test/").await.unwrap_err(),
            FetchError::Status {
                url: "http://a.test/".to_string(),
                status: 500
            }
        );
        fetcher.fail_with(None);
        assert!(fetcher.fetch("http://a.test/").await.is_ok());
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn test_fixture_counts() {
        use tally_docs::DocumentCollection;
        assert_eq!(fixtures::schools().count_documents(doc! {}).await.unwrap(), 5);
        assert_eq!(fixtures::students().count_documents(doc! {}).await.unwrap(), 2);
        let logs = fixtures::nginx_logs();
        assert_eq!(logs.count_documents(doc! {}).await.unwrap(), 12);
        assert_eq!(logs.count_documents(doc! { "method": "GET" }).await.unwrap(), 7);
    }
}
