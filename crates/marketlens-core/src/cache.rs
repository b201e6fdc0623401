//! Short-lived result cache for deduplicated upstream queries.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// How a fetch interacts with the result cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Serve a fresh entry if present; otherwise fetch and store. (Default)
    #[default]
    Use,
    /// Skip the read, fetch, and store the new result.
    Refresh,
    /// Skip both the read and the write. In-flight sharing still applies.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        matches!(self, Self::Use | Self::Refresh)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// TTL map keyed by cache key. Expired entries are dropped lazily on lookup.
///
/// Not synchronized on its own; the deduplicator guards it together with the
/// in-flight registry so lookups and registration are one atomic step.
#[derive(Debug)]
pub struct ResultCache<V> {
    map: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A zero TTL disables the cache entirely.
    pub fn is_disabled(&self) -> bool {
        self.ttl.is_zero()
    }

    /// Returns the value when `now - stored_at < ttl`; removes it otherwise.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        let fresh = self
            .map
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)?;

        if fresh {
            self.map.get(key).map(|entry| entry.value.clone())
        } else {
            self.map.remove(key);
            None
        }
    }

    pub fn put(&mut self, key: String, value: V, now: Instant) {
        if self.is_disabled() {
            return;
        }
        self.map.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        let ttl = self.ttl;
        self.map
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
        before - self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
