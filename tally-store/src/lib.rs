//! TALLY Store - Key-Value Abstraction, Instrumentation and Replay
//!
//! Defines the key-value store trait every TALLY component writes through,
//! with a Redis backend for production and an in-memory backend for tests.
//! On top of the trait sit call instrumentation (counters plus input/output
//! histories), history replay, and the random-key [`Cache`] accessor.

pub mod cache;
pub mod instrument;
pub mod kv;
pub mod memory;
pub mod redis_store;
pub mod replay;

pub use cache::{Cache, Conversion, Retrieved};
pub use instrument::{Instrumented, ERROR_MARKER_PREFIX};
pub use kv::{KeyValueStore, MIN_EXPIRY};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use replay::{replay, RecordedCall, ReplayReport, MISSING_OUTPUT};
