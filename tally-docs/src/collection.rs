//! Document collection abstraction.

use async_trait::async_trait;
use bson::{Bson, Document};
use tally_core::TallyResult;

/// Render a document id for reports.
///
/// Object ids print as bare hex and strings without quotes; anything else
/// uses its BSON rendering.
pub fn display_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outcome of an `update_many` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Documents the filter selected.
    pub matched: u64,
    /// Documents whose contents actually changed.
    pub modified: u64,
}

/// A collection of schema-less documents queried by filter and pipeline.
///
/// Implemented by [`crate::MongoCollection`] for a live server and by
/// [`crate::InMemoryCollection`] for tests and offline runs.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Collection name, for logs and error messages.
    fn name(&self) -> &str;

    /// Every document matching `filter`, in storage order.
    async fn find(&self, filter: Document) -> TallyResult<Vec<Document>>;

    /// Exact number of documents matching `filter`.
    async fn count_documents(&self, filter: Document) -> TallyResult<u64>;

    /// Document count from collection metadata; may lag behind writes.
    async fn estimated_document_count(&self) -> TallyResult<u64>;

    /// Insert `doc` and return its `_id`.
    async fn insert_one(&self, doc: Document) -> TallyResult<Bson>;

    /// Apply the operator document `update` to every match of `filter`.
    async fn update_many(&self, filter: Document, update: Document) -> TallyResult<UpdateSummary>;

    /// Run an aggregation pipeline and collect its output.
    async fn aggregate(&self, pipeline: Vec<Document>) -> TallyResult<Vec<Document>>;
}
