//! MongoDB backend.
//!
//! One [`MongoConnection`] is opened at startup; collection handles borrowed
//! from it share its connection pool.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{Client, Collection};
use tally_core::{DocumentError, TallyResult};
use tracing::{debug, info};

use crate::collection::{DocumentCollection, UpdateSummary};

/// Connected MongoDB client.
#[derive(Clone)]
pub struct MongoConnection {
    client: Client,
}

impl MongoConnection {
    /// Connect to `uri` and confirm the server answers a ping.
    pub async fn connect(uri: &str) -> TallyResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| DocumentError::Connection {
                reason: e.to_string(),
            })?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DocumentError::Connection {
                reason: e.to_string(),
            })?;
        info!(uri, "Connected to MongoDB");
        Ok(Self { client })
    }

    /// Handle on `database.collection`.
    pub fn collection(&self, database: &str, collection: &str) -> MongoCollection {
        MongoCollection {
            inner: self.client.database(database).collection(collection),
            name: format!("{}.{}", database, collection),
        }
    }
}

impl std::fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoConnection").finish_non_exhaustive()
    }
}

/// A MongoDB collection of raw documents.
#[derive(Clone)]
pub struct MongoCollection {
    inner: Collection<Document>,
    name: String,
}

impl MongoCollection {
    fn query_failed(&self) -> impl Fn(mongodb::error::Error) -> DocumentError + '_ {
        move |e| DocumentError::Query {
            collection: self.name.clone(),
            reason: e.to_string(),
        }
    }
}

impl std::fmt::Debug for MongoCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCollection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: Document) -> TallyResult<Vec<Document>> {
        let cursor = self.inner.find(filter).await.map_err(self.query_failed())?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(self.query_failed())?;
        debug!(collection = %self.name, count = docs.len(), "find");
        Ok(docs)
    }

    async fn count_documents(&self, filter: Document) -> TallyResult<u64> {
        let count = self
            .inner
            .count_documents(filter)
            .await
            .map_err(self.query_failed())?;
        Ok(count)
    }

    async fn estimated_document_count(&self) -> TallyResult<u64> {
        let count = self
            .inner
            .estimated_document_count()
            .await
            .map_err(self.query_failed())?;
        Ok(count)
    }

    async fn insert_one(&self, doc: Document) -> TallyResult<Bson> {
        let result = self.inner.insert_one(doc).await.map_err(self.query_failed())?;
        debug!(collection = %self.name, id = %result.inserted_id, "insert_one");
        Ok(result.inserted_id)
    }

    async fn update_many(&self, filter: Document, update: Document) -> TallyResult<UpdateSummary> {
        let result = self
            .inner
            .update_many(filter, update)
            .await
            .map_err(self.query_failed())?;
        Ok(UpdateSummary {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> TallyResult<Vec<Document>> {
        let cursor = self
            .inner
            .aggregate(pipeline)
            .await
            .map_err(self.query_failed())?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(self.query_failed())?;
        debug!(collection = %self.name, count = docs.len(), "aggregate");
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log_stats, schools_by_topic, top_students, update_topics};
    use tally_core::{CountMode, TallyError};
    use tally_test_utils::fixtures;

    fn assert_connection_error(result: TallyResult<MongoConnection>) {
        match result {
            Err(TallyError::Document(DocumentError::Connection { .. })) => {}
            other => panic!("Expected Connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_uri_is_connection_error() {
        assert_connection_error(MongoConnection::connect("not-a-mongodb-uri").await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let uri = "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200&connectTimeoutMS=200";
        assert_connection_error(MongoConnection::connect(uri).await);
    }

    /// Scratch collection on the server at `TALLY_MONGO_URL`, seeded with `docs`.
    async fn live_collection(docs: Vec<Document>) -> Option<MongoCollection> {
        let uri = std::env::var("TALLY_MONGO_URL").ok()?;
        let conn = MongoConnection::connect(&uri).await.unwrap();
        let name = format!("scratch_{}", bson::oid::ObjectId::new().to_hex());
        let coll = conn.collection("tally_test", &name);
        for doc in docs {
            coll.insert_one(doc).await.unwrap();
        }
        Some(coll)
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB server at TALLY_MONGO_URL"]
    async fn test_live_top_students() {
        let Some(coll) = live_collection(fixtures::student_documents()).await else {
            return;
        };

        let ranked = top_students(&coll).await.unwrap();
        let summary: Vec<(String, Option<f64>)> = ranked
            .into_iter()
            .map(|s| (s.name, s.average_score))
            .collect();
        assert_eq!(
            summary,
            vec![("A".to_string(), Some(85.0)), ("B".to_string(), Some(70.0))]
        );

        coll.inner.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB server at TALLY_MONGO_URL"]
    async fn test_live_school_updates_and_bson_ids() {
        let Some(coll) = live_collection(fixtures::school_documents()).await else {
            return;
        };

        let id = coll.insert_one(doc! { "name": "Ecole 42" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let topics = vec!["Math".to_string()];
        let summary = update_topics(&coll, "UCSF", &topics).await.unwrap();
        assert_eq!(summary, UpdateSummary { matched: 1, modified: 1 });

        let math = schools_by_topic(&coll, "Math").await.unwrap();
        assert_eq!(math.len(), 1);
        assert_eq!(math[0].get_str("name").unwrap(), "UCSF");
        assert_eq!(coll.count_documents(doc! {}).await.unwrap(), 6);

        coll.inner.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a MongoDB server at TALLY_MONGO_URL"]
    async fn test_live_log_stats() {
        let Some(coll) = live_collection(fixtures::nginx_log_documents()).await else {
            return;
        };

        let stats = log_stats(&coll, CountMode::Exact, true).await.unwrap();
        assert_eq!(stats.total, 12);
        assert_eq!(stats.status_checks, 3);
        let top = stats.top_ips.unwrap();
        assert_eq!(top[0].ip, "172.31.63.67");
        assert_eq!(top[0].count, 5);

        coll.inner.drop().await.unwrap();
    }
}
