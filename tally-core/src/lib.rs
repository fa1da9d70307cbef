//! TALLY Core - Shared Types
//!
//! Error types, stored values, key naming and configuration. Every other
//! TALLY crate depends on this one; it performs no I/O beyond reading a
//! config file.

pub mod config;
pub mod error;
pub mod keys;
pub mod value;

pub use config::{CountMode, FailurePolicy, TallyConfig};
pub use error::{
    ConfigError, ConversionError, DocumentError, FetchError, StoreError, TallyError, TallyResult,
};
pub use keys::{page_cache_key, page_count_key, OperationName};
pub use value::{
    decode_bytes, decode_integer, decode_real, decode_text, format_real, CallArgs, StoredValue,
};
