//! Time-bounded, size-bounded caches.
//!
//! [`TtlCache`] is the shared building block: an LRU map whose entries carry
//! an expiry instant. Expired entries are dropped lazily when read, and the
//! LRU cap bounds memory regardless of traffic shape.
//!
//! [`ResultCache`] puts it in front of the consensus engine, keyed by
//! `(subject_id, context_id, kind)`. Each provider adapter uses its own
//! `TtlCache` keyed by `(subject_id, context_id)`.
//!
//! Expiry uses `tokio::time::Instant` so tests can drive time with a paused
//! runtime.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::{ConsensusResult, RequestKind};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// LRU cache with a fixed freshness window per entry.
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any. An expired entry is removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        None
    }

    /// Most recent value for `key` regardless of freshness. Does not touch
    /// LRU order.
    pub fn peek_stale(&self, key: &K) -> Option<V> {
        self.lock().peek(key).map(|entry| entry.value.clone())
    }

    /// Store or replace `key`, fresh for one window from now.
    pub fn put(&self, key: K, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.lock().put(key, entry);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().pop(key).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones that expired but were not
    /// read since.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key)
            .cloned()
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    // A panic while holding the lock cannot leave an LRU map half-updated in
    // a way that matters here, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Key of the engine-level result cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub subject_id: String,
    pub context_id: String,
    pub kind: RequestKind,
}

impl CacheKey {
    pub fn new(subject_id: &str, context_id: &str, kind: RequestKind) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            context_id: context_id.to_string(),
            kind,
        }
    }
}

/// Size statistics for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

/// Memoization layer in front of the consensus engine.
pub struct ResultCache {
    inner: TtlCache<CacheKey, ConsensusResult>,
}

impl ResultCache {
    pub fn new(capacity: usize, freshness_window: Duration) -> Self {
        Self {
            inner: TtlCache::new(capacity, freshness_window),
        }
    }

    /// Cached result, only while `now < expires_at`.
    pub fn get(
        &self,
        subject_id: &str,
        context_id: &str,
        kind: RequestKind,
    ) -> Option<ConsensusResult> {
        self.inner.get(&CacheKey::new(subject_id, context_id, kind))
    }

    /// Store or replace, fresh for one freshness window.
    pub fn put(&self, subject_id: &str, context_id: &str, kind: RequestKind, result: ConsensusResult) {
        self.inner
            .put(CacheKey::new(subject_id, context_id, kind), result);
    }

    pub fn invalidate(&self, subject_id: &str, context_id: &str, kind: RequestKind) -> bool {
        self.inner
            .remove(&CacheKey::new(subject_id, context_id, kind))
            .is_some()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn freshness_window(&self) -> Duration {
        self.inner.ttl()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.len(),
            capacity: self.inner.capacity(),
        }
    }
}
