//! Backend construction.
//!
//! Commands ask a [`Backends`] for exactly the stores they use, so a
//! `fetch` never opens a MongoDB connection and `top-students` never
//! touches Redis.

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{TallyConfig, TallyResult};
use tally_docs::{DocumentCollection, InMemoryCollection, MongoConnection};
use tally_store::{KeyValueStore, MemoryStore, RedisStore};
use tally_web::{HttpFetcher, PageFetcher};
use tokio::sync::OnceCell;

/// Which configured collection a command reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionRole {
    Schools,
    Students,
    Logs,
}

/// Source of the stores a command runs against.
#[async_trait]
pub trait Backends: Send + Sync {
    async fn store(&self) -> TallyResult<Arc<dyn KeyValueStore>>;

    async fn collection(&self, role: CollectionRole) -> TallyResult<Arc<dyn DocumentCollection>>;

    fn fetcher(&self) -> TallyResult<Arc<dyn PageFetcher>>;
}

/// Redis, MongoDB and HTTP, connected on first use.
pub struct LiveBackends {
    config: TallyConfig,
    redis: OnceCell<Arc<RedisStore>>,
    mongo: OnceCell<MongoConnection>,
}

impl LiveBackends {
    pub fn new(config: TallyConfig) -> Self {
        Self {
            config,
            redis: OnceCell::new(),
            mongo: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Backends for LiveBackends {
    async fn store(&self) -> TallyResult<Arc<dyn KeyValueStore>> {
        let store = self
            .redis
            .get_or_try_init(|| async {
                RedisStore::connect(
                    &self.config.redis_url,
                    self.config.redis_retries,
                    self.config.redis_connect_timeout(),
                )
                .await
                .map(Arc::new)
            })
            .await?;
        Ok(store.clone())
    }

    async fn collection(&self, role: CollectionRole) -> TallyResult<Arc<dyn DocumentCollection>> {
        let mongo = self
            .mongo
            .get_or_try_init(|| MongoConnection::connect(&self.config.mongo_uri))
            .await?;
        let config = &self.config;
        let (database, collection) = match role {
            CollectionRole::Schools => (&config.school_database, &config.school_collection),
            CollectionRole::Students => (&config.school_database, &config.students_collection),
            CollectionRole::Logs => (&config.logs_database, &config.logs_collection),
        };
        Ok(Arc::new(mongo.collection(database, collection)))
    }

    fn fetcher(&self) -> TallyResult<Arc<dyn PageFetcher>> {
        Ok(Arc::new(HttpFetcher::new(self.config.http_timeout())?))
    }
}

impl std::fmt::Debug for LiveBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBackends")
            .field("redis_connected", &self.redis.initialized())
            .field("mongo_connected", &self.mongo.initialized())
            .finish_non_exhaustive()
    }
}

/// In-process stores; contents last as long as the value.
#[derive(Clone)]
pub struct MemoryBackends {
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub schools: InMemoryCollection,
    pub students: InMemoryCollection,
    pub logs: InMemoryCollection,
}

impl MemoryBackends {
    /// Empty stores with a real HTTP fetcher.
    pub fn new(config: &TallyConfig) -> TallyResult<Self> {
        Ok(Self::with_fetcher(Arc::new(HttpFetcher::new(config.http_timeout())?), config))
    }

    /// Empty stores with the given fetcher.
    pub fn with_fetcher(fetcher: Arc<dyn PageFetcher>, config: &TallyConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            fetcher,
            schools: InMemoryCollection::new(config.school_collection.clone()),
            students: InMemoryCollection::new(config.students_collection.clone()),
            logs: InMemoryCollection::new(config.logs_collection.clone()),
        }
    }
}

#[async_trait]
impl Backends for MemoryBackends {
    async fn store(&self) -> TallyResult<Arc<dyn KeyValueStore>> {
        Ok(self.store.clone())
    }

    async fn collection(&self, role: CollectionRole) -> TallyResult<Arc<dyn DocumentCollection>> {
        let collection = match role {
            CollectionRole::Schools => &self.schools,
            CollectionRole::Students => &self.students,
            CollectionRole::Logs => &self.logs,
        };
        Ok(Arc::new(collection.clone()))
    }

    fn fetcher(&self) -> TallyResult<Arc<dyn PageFetcher>> {
        Ok(self.fetcher.clone())
    }
}

impl std::fmt::Debug for MemoryBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackends")
            .field("store", &self.store)
            .field("schools", &self.schools)
            .field("students", &self.students)
            .field("logs", &self.logs)
            .finish_non_exhaustive()
    }
}
