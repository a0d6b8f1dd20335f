//! The in-memory key → entry store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

/// A stored upstream payload.
///
/// Valid iff `now < stored_at + ttl`; an expired entry is logically absent
/// whether or not it is still physically held.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Arc<Value>,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) < self.ttl
    }

    /// Valid, and no older than `max_age`.
    ///
    /// Routes with different TTLs can share a key; each reader applies the
    /// stricter of its own TTL and the writer's.
    pub fn is_fresh_for(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age_at(now) < self.ttl.min(max_age)
    }

    fn age_at(&self, now: DateTime<Utc>) -> Duration {
        // A clock that stepped backwards counts as zero age.
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Process-local store, one entry per key.
///
/// Every operation holds a shard lock for that operation only, so a lookup
/// or an insert never waits on network I/O.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key` if it is valid at `now` and no
    /// older than `max_age`.
    ///
    /// An expired entry is removed on the way out, unless a concurrent writer
    /// has already replaced it with a fresh one. An entry that is merely
    /// older than `max_age` stays for readers with a longer TTL.
    pub fn get_fresh(&self, key: &str, now: DateTime<Utc>, max_age: Duration) -> Option<Arc<Value>> {
        {
            let entry = self.entries.get(key)?;
            if entry.is_fresh_for(now, max_age) {
                return Some(Arc::clone(&entry.value));
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_valid_at(now));
        None
    }

    /// Stores `entry`, replacing whatever was held under its key.
    pub fn insert(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Returns a copy of the raw entry, expired or not.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Drops every entry that has expired at `now` and returns how many went.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid_at(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of physically held entries, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
