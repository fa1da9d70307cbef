//! TALLY Web - Cache-Through Page Fetching
//!
//! Wraps a [`PageFetcher`] with a key-value cache: bodies are kept for a
//! fixed TTL and each URL carries an access counter.

pub mod cached;
pub mod fetch;

pub use cached::{CachedPageFetcher, DEFAULT_PAGE_TTL};
pub use fetch::{HttpFetcher, PageFetcher};
