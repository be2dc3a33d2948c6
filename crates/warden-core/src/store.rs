//! Key-value store with per-key expiry.
//!
//! The permission cache, the webhook dedup guard and downstream counters all
//! go through [`KvStore`]. Every operation must be atomic on its own; nothing
//! relies on multi-key transactions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};

/// Minimal TTL key-value contract (a Redis subset).
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Returns the live value for `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value and TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Stores `value` only if `key` is absent. Returns whether it was stored.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Removes `key`. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Increments the integer at `key` (missing counts as 0) and returns the
    /// new value. An existing TTL is kept.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Sets the TTL of an existing key. Returns whether the key exists.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
}

/// Shared, type-erased store handle.
pub type SharedStore = Arc<dyn KvStore>;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store for single-instance deployments and tests.
///
/// Expiry is lazy: stale entries are ignored on read and removed when touched
/// or by [`purge_expired`](Self::purge_expired). Time comes from
/// [`tokio::time::Instant`], so paused-clock tests control it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, Some(ttl)));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(StoredValue::new(value, Some(ttl)));
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let entry = occupied.get_mut();
                let current: i64 = entry.value.parse().map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                })?;
                let next = current.checked_add(1).ok_or_else(|| StoreError::InvalidValue {
                    key: key.to_string(),
                })?;
                entry.value = next.to_string();
                Ok(next)
            }
            MapEntry::Occupied(mut occupied) => {
                occupied.insert(StoredValue::new("1", None));
                Ok(1)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(StoredValue::new("1", None));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
