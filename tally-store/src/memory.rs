//! In-memory key-value store.
//!
//! Stands in for Redis in tests and in the CLI's `--memory` mode. Expiry is
//! evaluated lazily against [`tokio::time::Instant`], so tests running on a
//! paused tokio clock can step past a TTL with `tokio::time::advance`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tally_core::{StoreError, TallyResult};
use tokio::time::Instant;

use crate::kv::{KeyValueStore, MIN_EXPIRY};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    List(Vec<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory mock store for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn key_count(&self) -> TallyResult<usize> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        Ok(entries.values().filter(|e| e.is_live(now)).count())
    }

    /// Whether `key` currently holds a live value.
    pub fn contains(&self, key: &str) -> TallyResult<bool> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> TallyResult<T>,
    ) -> TallyResult<T> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        f(&mut entries)
    }
}

fn push(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    value: &[u8],
) -> TallyResult<u64> {
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::List(Vec::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::List(items) => {
            items.push(value.to_vec());
            Ok(items.len() as u64)
        }
        Value::Bytes(_) => Err(StoreError::NotAList {
            key: key.to_string(),
        }
        .into()),
    }
}

fn ensure_list(entries: &HashMap<String, Entry>, key: &str) -> TallyResult<()> {
    match entries.get(key).map(|e| &e.value) {
        Some(Value::Bytes(_)) => Err(StoreError::NotAList {
            key: key.to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// Resolve inclusive list bounds the way `LRANGE` does.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> TallyResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                Value::Bytes(bytes) => Ok(Some(bytes.clone())),
                Value::List(_) => Err(StoreError::Command {
                    command: "GET",
                    reason: format!("WRONGTYPE value at {} is a list", key),
                }
                .into()),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> TallyResult<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Bytes(value.to_vec()),
                    expires_at: None,
                },
            );
            Ok(())
        })
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> TallyResult<()> {
        if ttl < MIN_EXPIRY {
            return Err(StoreError::InvalidExpiry {
                key: key.to_string(),
                reason: "ttl must be at least one millisecond".to_string(),
            }
            .into());
        }
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Bytes(value.to_vec()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    async fn increment(&self, key: &str) -> TallyResult<i64> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Bytes(b"0".to_vec()),
                expires_at: None,
            });
            let current = match &entry.value {
                Value::Bytes(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok()),
                Value::List(_) => None,
            };
            let next = current
                .and_then(|n| n.checked_add(1))
                .ok_or_else(|| StoreError::NotACounter {
                    key: key.to_string(),
                })?;
            entry.value = Value::Bytes(next.to_string().into_bytes());
            Ok(next)
        })
    }

    async fn append(&self, key: &str, value: &[u8]) -> TallyResult<u64> {
        self.with_entries(|entries| push(entries, key, value))
    }

    async fn append_pair(
        &self,
        first_key: &str,
        first: &[u8],
        second_key: &str,
        second: &[u8],
    ) -> TallyResult<()> {
        self.with_entries(|entries| {
            // Check both keys up front so a type error leaves neither list touched.
            ensure_list(entries, first_key)?;
            ensure_list(entries, second_key)?;
            push(entries, first_key, first)?;
            push(entries, second_key, second)?;
            Ok(())
        })
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> TallyResult<Vec<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let items = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                Value::List(items) => items,
                Value::Bytes(_) => {
                    return Err(StoreError::NotAList {
                        key: key.to_string(),
                    }
                    .into())
                }
            },
            _ => return Ok(Vec::new()),
        };
        Ok(match resolve_range(items.len(), start, stop) {
            Some((from, to)) => items[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn flush(&self) -> TallyResult<()> {
        self.with_entries(|entries| {
            entries.clear();
            Ok(())
        })
    }
}
