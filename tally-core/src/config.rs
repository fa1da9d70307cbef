//! Configuration loading for TALLY.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `TALLY_*` environment variables. The merged result is validated once.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// How the log statistics report counts the whole collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// `count_documents({})`, exact but scans.
    #[default]
    Exact,
    /// Collection metadata count, cheap but may lag.
    Estimated,
}

impl FromStr for CountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(CountMode::Exact),
            "estimated" => Ok(CountMode::Estimated),
            other => Err(format!("unknown count mode '{}'", other)),
        }
    }
}

/// What an instrumented call records when the wrapped operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the input paired with an `!error: ...` output marker.
    #[default]
    RecordMarker,
    /// Record nothing in either history.
    Skip,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "record_marker" => Ok(FailurePolicy::RecordMarker),
            "skip" => Ok(FailurePolicy::Skip),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TallyConfig {
    // Key-value store
    pub redis_url: String,
    pub redis_retries: usize,
    pub redis_connect_timeout_ms: u64,

    // Document store
    pub mongo_uri: String,
    pub logs_database: String,
    pub logs_collection: String,
    pub school_database: String,
    pub school_collection: String,
    pub students_collection: String,

    // Page cache
    pub page_ttl_secs: u64,
    pub http_timeout_ms: u64,

    // Policies
    pub count_mode: CountMode,
    pub failure_policy: FailurePolicy,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_retries: 1,
            redis_connect_timeout_ms: 1000,
            mongo_uri: "mongodb://127.0.0.1:27017".to_string(),
            logs_database: "logs".to_string(),
            logs_collection: "nginx".to_string(),
            school_database: "my_db".to_string(),
            school_collection: "school".to_string(),
            students_collection: "students".to_string(),
            page_ttl_secs: 10,
            http_timeout_ms: 10_000,
            count_mode: CountMode::Exact,
            failure_policy: FailurePolicy::RecordMarker,
        }
    }
}

impl TallyConfig {
    /// Load defaults, the optional TOML file and the process environment,
    /// then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Fields it omits keep their defaults.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Apply `TALLY_*` overrides read through `lookup`.
    ///
    /// Environment variables:
    /// - `TALLY_REDIS_URL`, `TALLY_REDIS_RETRIES`, `TALLY_REDIS_CONNECT_TIMEOUT_MS`
    /// - `TALLY_MONGO_URI`, `TALLY_LOGS_DATABASE`, `TALLY_LOGS_COLLECTION`
    /// - `TALLY_SCHOOL_DATABASE`, `TALLY_SCHOOL_COLLECTION`, `TALLY_STUDENTS_COLLECTION`
    /// - `TALLY_PAGE_TTL_SECS`, `TALLY_HTTP_TIMEOUT_MS`
    /// - `TALLY_COUNT_MODE` (`exact` | `estimated`)
    /// - `TALLY_FAILURE_POLICY` (`record_marker` | `skip`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(&lookup, "TALLY_REDIS_URL", &mut self.redis_url);
        override_parsed(&lookup, "TALLY_REDIS_RETRIES", &mut self.redis_retries)?;
        override_parsed(
            &lookup,
            "TALLY_REDIS_CONNECT_TIMEOUT_MS",
            &mut self.redis_connect_timeout_ms,
        )?;
        override_string(&lookup, "TALLY_MONGO_URI", &mut self.mongo_uri);
        override_string(&lookup, "TALLY_LOGS_DATABASE", &mut self.logs_database);
        override_string(&lookup, "TALLY_LOGS_COLLECTION", &mut self.logs_collection);
        override_string(&lookup, "TALLY_SCHOOL_DATABASE", &mut self.school_database);
        override_string(&lookup, "TALLY_SCHOOL_COLLECTION", &mut self.school_collection);
        override_string(
            &lookup,
            "TALLY_STUDENTS_COLLECTION",
            &mut self.students_collection,
        );
        override_parsed(&lookup, "TALLY_PAGE_TTL_SECS", &mut self.page_ttl_secs)?;
        override_parsed(&lookup, "TALLY_HTTP_TIMEOUT_MS", &mut self.http_timeout_ms)?;
        override_parsed(&lookup, "TALLY_COUNT_MODE", &mut self.count_mode)?;
        override_parsed(&lookup, "TALLY_FAILURE_POLICY", &mut self.failure_policy)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("redis_url", &self.redis_url),
            ("mongo_uri", &self.mongo_uri),
            ("logs_database", &self.logs_database),
            ("logs_collection", &self.logs_collection),
            ("school_database", &self.school_database),
            ("school_collection", &self.school_collection),
            ("students_collection", &self.students_collection),
        ];
        for (field, value) in non_empty {
            if value.trim().is_empty() {
                return Err(invalid(field, value, "must not be empty"));
            }
        }
        if self.page_ttl_secs == 0 {
            return Err(invalid("page_ttl_secs", "0", "must be > 0"));
        }
        if self.http_timeout_ms == 0 {
            return Err(invalid("http_timeout_ms", "0", "must be > 0"));
        }
        if self.redis_connect_timeout_ms == 0 {
            return Err(invalid("redis_connect_timeout_ms", "0", "must be > 0"));
        }
        Ok(())
    }

    pub fn page_ttl(&self) -> Duration {
        Duration::from_secs(self.page_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn redis_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_connect_timeout_ms)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn override_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        debug!(key, "Config override from environment");
        *target = value;
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &value, &e.to_string()))?;
        debug!(key, "Config override from environment");
    }
    Ok(())
}
