//! Error types for TALLY operations

use thiserror::Error;

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store command {command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("Invalid expiry for {key}: {reason}")]
    InvalidExpiry { key: String, reason: String },

    #[error("Value at {key} is not a counter")]
    NotACounter { key: String },

    #[error("Value at {key} is not a list")]
    NotAList { key: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors raised while converting raw stored bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Stored bytes are not valid UTF-8: {reason}")]
    InvalidUtf8 { reason: String },

    #[error("Stored value {raw:?} is not an integer")]
    InvalidInteger { raw: String },

    #[error("Stored value {raw:?} is not a real number")]
    InvalidReal { raw: String },

    /// Raised by a caller-supplied conversion.
    #[error("Conversion failed: {reason}")]
    Custom { reason: String },
}

impl ConversionError {
    /// Wrap the failure of a caller-supplied conversion.
    pub fn custom(reason: impl std::fmt::Display) -> Self {
        Self::Custom {
            reason: reason.to_string(),
        }
    }
}

/// Page fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to read body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Query on {collection} failed: {reason}")]
    Query { collection: String, reason: String },

    #[error("Connection to document store failed: {reason}")]
    Connection { reason: String },

    #[error("Unsupported {kind}: {name}")]
    Unsupported { kind: &'static str, name: String },

    #[error("Malformed document: {reason}")]
    Malformed { reason: String },

    #[error("Document store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all TALLY errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TallyError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation {name} failed: {reason}")]
    Operation { name: String, reason: String },
}

impl TallyError {
    /// Build an error for a failure raised inside a wrapped operation.
    pub fn operation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Operation {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for TALLY operations.
pub type TallyResult<T> = Result<T, TallyError>;

// =============================================================================
// TESTS
// =============================================================================
