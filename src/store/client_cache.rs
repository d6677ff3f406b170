//! Client-side storage for server-assisted caching.
//!
//! Entries are bounded by key count (least recently used first out) and carry
//! the client-side TTL of the read that produced them. Invalidations arrive from
//! the store's tracking protocol, never from the strategy itself.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::local_cache::Value;

#[derive(Debug)]
struct CachedEntry {
    value: Value,
    expires_at: Instant,
}

/// Tracked-read cache attached to one store connection.
#[derive(Debug)]
pub struct ClientSideCache {
    // unbounded map trimmed by hand so a large key budget is not preallocated
    entries: Mutex<LruCache<String, CachedEntry>>,
    max_keys: NonZeroUsize,
    invalidations: AtomicU64,
}

impl ClientSideCache {
    pub fn new(max_keys: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            max_keys: NonZeroUsize::new(max_keys).unwrap_or(NonZeroUsize::MIN),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Returns the cached value unless it is absent or its TTL elapsed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: String, value: Value, ttl: Duration) {
        let entry = CachedEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.lock();
        entries.put(key, entry);
        while entries.len() > self.max_keys.get() {
            entries.pop_lru();
        }
    }

    /// Drops `key` in response to a tracking notification.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().pop(key);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops everything, e.g. after a server-side flush.
    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys.get()
    }

    /// Number of tracking notifications applied so far.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_and_invalidate() {
        let cache = ClientSideCache::new(10);
        cache.insert("k".to_string(), Arc::from("v"), Duration::from_secs(60));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        cache.invalidate("k");
        assert!(cache.get("k").is_none());
        assert_eq!(cache.invalidations(), 1);
    }

    #[test]
    fn test_key_budget() {
        let cache = ClientSideCache::new(2);
        for key in ["a", "b", "c"] {
            cache.insert(key.to_string(), Arc::from(key), Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ClientSideCache::new(10);
        cache.insert("k".to_string(), Arc::from("v"), Duration::ZERO);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_budget_holds_one_key() {
        let cache = ClientSideCache::new(0);
        assert_eq!(cache.max_keys(), 1);
    }
}
