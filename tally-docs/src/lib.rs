//! TALLY Docs - Document Collection Queries
//!
//! A [`DocumentCollection`] trait over MongoDB and an in-memory evaluator,
//! plus the school, student-ranking and access-log queries built on it.

pub mod collection;
pub mod logs;
pub mod memory;
pub mod mongo;
pub mod pipeline;
pub mod query;
pub mod schools;
pub mod students;

pub use collection::{display_id, DocumentCollection, UpdateSummary};
pub use logs::{log_stats, top_ips_pipeline, IpCount, LogStats, METHODS, TOP_IP_LIMIT};
pub use memory::InMemoryCollection;
pub use mongo::{MongoCollection, MongoConnection};
pub use pipeline::run_pipeline;
pub use schools::{insert_school, list_all, schools_by_topic, update_topics};
pub use students::{top_students, top_students_pipeline, TopStudent};

// Document types used throughout the public API.
pub use bson::{doc, Bson, Document};
