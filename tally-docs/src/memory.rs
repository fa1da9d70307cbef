//! In-memory document collection.
//!
//! Evaluates filters, updates and pipelines in process with the subset of
//! query semantics in [`crate::query`] and [`crate::pipeline`].

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use tally_core::{DocumentError, TallyResult};
use tracing::debug;

use crate::collection::{DocumentCollection, UpdateSummary};
use crate::pipeline::run_pipeline;
use crate::query::{apply_update, matches};

/// A document collection held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryCollection {
    name: String,
    documents: Arc<RwLock<Vec<Document>>>,
}

impl InMemoryCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a collection seeded with `docs`; each gets an `_id` if missing.
    pub fn with_documents(
        name: impl Into<String>,
        docs: impl IntoIterator<Item = Document>,
    ) -> Self {
        let documents = docs.into_iter().map(|doc| with_id(doc).0).collect();
        Self {
            name: name.into(),
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    /// Copy of every stored document.
    pub fn snapshot(&self) -> TallyResult<Vec<Document>> {
        let docs = self.documents.read().map_err(|_| DocumentError::LockPoisoned)?;
        Ok(docs.clone())
    }

    fn filtered(&self, filter: &Document) -> TallyResult<Vec<Document>> {
        let docs = self.documents.read().map_err(|_| DocumentError::LockPoisoned)?;
        let mut out = Vec::new();
        for doc in docs.iter() {
            if matches(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }
}

/// Ensure `doc` starts with an `_id`, returning the document and its id.
fn with_id(doc: Document) -> (Document, Bson) {
    if let Some(id) = doc.get("_id") {
        let id = id.clone();
        return (doc, id);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut out = Document::new();
    out.insert("_id", id.clone());
    for (key, value) in doc {
        out.insert(key, value);
    }
    (out, id)
}

#[async_trait]
impl DocumentCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document) -> TallyResult<Vec<Document>> {
        self.filtered(&filter)
    }

    async fn count_documents(&self, filter: Document) -> TallyResult<u64> {
        Ok(self.filtered(&filter)?.len() as u64)
    }

    async fn estimated_document_count(&self) -> TallyResult<u64> {
        let docs = self.documents.read().map_err(|_| DocumentError::LockPoisoned)?;
        Ok(docs.len() as u64)
    }

    async fn insert_one(&self, doc: Document) -> TallyResult<Bson> {
        let (doc, id) = with_id(doc);
        let mut docs = self.documents.write().map_err(|_| DocumentError::LockPoisoned)?;
        if docs.iter().any(|existing| existing.get("_id") == Some(&id)) {
            return Err(DocumentError::Query {
                collection: self.name.clone(),
                reason: format!("duplicate key _id: {}", id),
            }
            .into());
        }
        docs.push(doc);
        debug!(collection = %self.name, id = %id, "insert_one");
        Ok(id)
    }

    async fn update_many(&self, filter: Document, update: Document) -> TallyResult<UpdateSummary> {
        let mut docs = self.documents.write().map_err(|_| DocumentError::LockPoisoned)?;
        let mut summary = UpdateSummary::default();
        for doc in docs.iter_mut() {
            if !matches(doc, &filter)? {
                continue;
            }
            summary.matched += 1;
            // Apply to a copy so a failing update leaves the document intact.
            let mut updated = doc.clone();
            if apply_update(&mut updated, &update)? {
                *doc = updated;
                summary.modified += 1;
            }
        }
        debug!(
            collection = %self.name,
            matched = summary.matched,
            modified = summary.modified,
            "update_many"
        );
        Ok(summary)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> TallyResult<Vec<Document>> {
        let docs = self.snapshot()?;
        Ok(run_pipeline(docs, &pipeline)?)
    }
}
