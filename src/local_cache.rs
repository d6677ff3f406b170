//! Cost-aware concurrent local cache (the L1 tier).
//!
//! Capacity is accounted in bytes of cached values rather than in entries. Two
//! policies are available behind [`LocalCache`]:
//!
//! - [`CostCache`]: a segmented Greedy-Dual-Size-Frequency cache. Each entry
//!   carries a priority of `age + frequency / cost`; when a segment runs out of
//!   budget, the lowest-priority entries go first and the segment age rises to
//!   the last evicted priority, so entries that stop being accessed eventually
//!   lose to newcomers.
//! - moka's TinyLFU cache with a byte weigher.
//!
//! # Thread Safety
//!
//! The key space is sharded across segments by hash, each segment behind its
//! own `parking_lot::Mutex`. Reads mutate frequency and priority, so there is no
//! reader/writer split; concurrency comes from segmentation.

use std::collections::BTreeMap;
use std::hash::BuildHasher;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;
#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

use moka::sync::Cache as MokaCache;

use ahash::RandomState as AHashRandomState;

use crate::config::{LocalCacheConfig, LocalCachePolicy};

/// Shared, cheaply clonable cached value.
pub type Value = Arc<str>;

#[derive(Debug)]
struct Slot {
    value: Value,
    cost: u64,
    frequency: u64,
    priority: OrderedFloat<f64>,
    stamp: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct SegmentCounters {
    hits: u64,
    misses: u64,
    insertions: u64,
    evictions: u64,
    rejections: u64,
    removals: u64,
}

/// One independently locked shard of a [`CostCache`].
#[derive(Debug)]
struct GdsfSegment<S> {
    budget: u64,
    used: u64,
    age: f64,
    next_stamp: u64,
    map: HashMap<String, Slot, S>,
    // (priority, stamp) -> key; stamps are unique so the ordering is total
    order: BTreeMap<(OrderedFloat<f64>, u64), String>,
    counters: SegmentCounters,
}

impl<S: BuildHasher> GdsfSegment<S> {
    fn with_hasher(budget: u64, hash_builder: S) -> Self {
        Self {
            budget,
            used: 0,
            age: 0.0,
            next_stamp: 0,
            map: HashMap::with_hasher(hash_builder),
            order: BTreeMap::new(),
            counters: SegmentCounters::default(),
        }
    }

    #[inline]
    fn priority(&self, frequency: u64, cost: u64) -> OrderedFloat<f64> {
        OrderedFloat(self.age + frequency as f64 / cost.max(1) as f64)
    }

    #[inline]
    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn get(&mut self, key: &str) -> Option<Value> {
        let stamp = self.stamp();
        let age = self.age;
        let Some(slot) = self.map.get_mut(key) else {
            self.counters.misses += 1;
            return None;
        };

        let old = (slot.priority, slot.stamp);
        slot.frequency += 1;
        slot.priority = OrderedFloat(age + slot.frequency as f64 / slot.cost.max(1) as f64);
        slot.stamp = stamp;
        let new = (slot.priority, slot.stamp);
        let value = Arc::clone(&slot.value);

        if let Some(owned_key) = self.order.remove(&old) {
            self.order.insert(new, owned_key);
        }
        self.counters.hits += 1;
        Some(value)
    }

    fn insert(&mut self, key: String, value: Value, cost: u64) -> bool {
        // Re-inserting a key keeps its frequency history
        let frequency = self.remove_slot(&key).map_or(1, |slot| slot.frequency + 1);

        if cost > self.budget {
            self.counters.rejections += 1;
            return false;
        }

        while self.used + cost > self.budget {
            if !self.evict_one() {
                break;
            }
        }

        let priority = self.priority(frequency, cost);
        let stamp = self.stamp();
        self.order.insert((priority, stamp), key.clone());
        self.map.insert(
            key,
            Slot {
                value,
                cost,
                frequency,
                priority,
                stamp,
            },
        );
        self.used += cost;
        self.counters.insertions += 1;
        true
    }

    fn evict_one(&mut self) -> bool {
        let Some(((priority, _), key)) = self.order.pop_first() else {
            return false;
        };
        if let Some(slot) = self.map.remove(key.as_str()) {
            self.used -= slot.cost;
        }
        self.age = priority.into_inner();
        self.counters.evictions += 1;
        true
    }

    fn remove_slot(&mut self, key: &str) -> Option<Slot> {
        let slot = self.map.remove(key)?;
        self.order.remove(&(slot.priority, slot.stamp));
        self.used -= slot.cost;
        Some(slot)
    }

    fn remove(&mut self, key: &str) -> bool {
        let removed = self.remove_slot(key).is_some();
        if removed {
            self.counters.removals += 1;
        }
        removed
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
        self.used = 0;
        self.age = 0.0;
    }
}

/// A thread-safe, segmented, cost-bounded GDSF cache keyed by string.
///
/// The total cost budget is split evenly across segments; a value whose cost
/// exceeds its segment's share is never admitted.
pub struct CostCache<S = DefaultHashBuilder> {
    segments: Box<[Mutex<GdsfSegment<S>>]>,
    hash_builder: S,
}

impl CostCache<DefaultHashBuilder> {
    pub fn new(max_cost: u64, segment_count: usize) -> Self {
        Self::with_hasher(max_cost, segment_count, DefaultHashBuilder::default())
    }
}

impl<S: BuildHasher + Clone> CostCache<S> {
    pub fn with_hasher(max_cost: u64, segment_count: usize, hash_builder: S) -> Self {
        let segment_count = segment_count.max(1);
        let budget = max_cost / segment_count as u64;

        let segments: Vec<_> = (0..segment_count)
            .map(|_| Mutex::new(GdsfSegment::with_hasher(budget, hash_builder.clone())))
            .collect();

        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
        }
    }

    #[inline]
    fn segment(&self, key: &str) -> &Mutex<GdsfSegment<S>> {
        let idx = (self.hash_builder.hash_one(key) as usize) % self.segments.len();
        &self.segments[idx]
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.segment(key).lock().get(key)
    }

    /// Inserts `value` with the given cost. Returns false when not admitted.
    pub fn insert(&self, key: String, value: Value, cost: u64) -> bool {
        self.segment(&key).lock().insert(key, value, cost)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.segment(key).lock().remove(key)
    }

    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.lock().map.is_empty())
    }

    pub fn total_cost(&self) -> u64 {
        self.segments.iter().map(|s| s.lock().used).sum()
    }

    pub fn max_cost(&self) -> u64 {
        self.segments.iter().map(|s| s.lock().budget).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Aggregated counters across all segments.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut totals = SegmentCounters::default();
        let mut entries = 0usize;
        let mut cost = 0u64;
        for segment in self.segments.iter() {
            let segment = segment.lock();
            let c = segment.counters;
            totals.hits += c.hits;
            totals.misses += c.misses;
            totals.insertions += c.insertions;
            totals.evictions += c.evictions;
            totals.rejections += c.rejections;
            totals.removals += c.removals;
            entries += segment.map.len();
            cost += segment.used;
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("hits".to_string(), totals.hits as f64);
        metrics.insert("misses".to_string(), totals.misses as f64);
        metrics.insert("insertions".to_string(), totals.insertions as f64);
        metrics.insert("evictions".to_string(), totals.evictions as f64);
        metrics.insert("rejections".to_string(), totals.rejections as f64);
        metrics.insert("removals".to_string(), totals.removals as f64);
        metrics.insert("entries".to_string(), entries as f64);
        metrics.insert("cost_bytes".to_string(), cost as f64);
        metrics
    }
}

impl<S> std::fmt::Debug for CostCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostCache")
            .field("segment_count", &self.segments.len())
            .finish()
    }
}

/// The local cache used by a strategy, selected by [`LocalCachePolicy`].
pub enum LocalCache {
    Gdsf(CostCache),
    Moka(MokaCache<String, Value, AHashRandomState>),
}

impl LocalCache {
    pub fn from_config(config: &LocalCacheConfig) -> Self {
        match config.policy {
            LocalCachePolicy::Gdsf => {
                LocalCache::Gdsf(CostCache::new(config.max_cost, config.segments))
            }
            LocalCachePolicy::Moka => {
                let cache = MokaCache::builder()
                    .max_capacity(config.max_cost)
                    .weigher(|_key: &String, value: &Value| {
                        u32::try_from(value.len()).unwrap_or(u32::MAX)
                    })
                    .build_with_hasher(AHashRandomState::default());
                LocalCache::Moka(cache)
            }
        }
    }

    pub fn policy(&self) -> LocalCachePolicy {
        match self {
            LocalCache::Gdsf(_) => LocalCachePolicy::Gdsf,
            LocalCache::Moka(_) => LocalCachePolicy::Moka,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            LocalCache::Gdsf(c) => c.get(key),
            LocalCache::Moka(c) => c.get(key),
        }
    }

    /// Inserts a value; moka derives the cost from the value through its weigher.
    pub fn insert(&self, key: String, value: Value, cost: u64) {
        match self {
            LocalCache::Gdsf(c) => {
                c.insert(key, value, cost);
            }
            LocalCache::Moka(c) => c.insert(key, value),
        }
    }

    pub fn remove(&self, key: &str) {
        match self {
            LocalCache::Gdsf(c) => {
                c.remove(key);
            }
            LocalCache::Moka(c) => c.invalidate(key),
        }
    }

    pub fn clear(&self) {
        match self {
            LocalCache::Gdsf(c) => c.clear(),
            LocalCache::Moka(c) => {
                c.invalidate_all();
                c.run_pending_tasks();
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LocalCache::Gdsf(c) => c.len(),
            LocalCache::Moka(c) => {
                c.run_pending_tasks();
                c.entry_count() as usize
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> u64 {
        match self {
            LocalCache::Gdsf(c) => c.total_cost(),
            LocalCache::Moka(c) => {
                c.run_pending_tasks();
                c.weighted_size()
            }
        }
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("policy", &self.policy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn value(s: &str) -> Value {
        Arc::from(s)
    }

    #[test]
    fn test_basic_operations() {
        let cache = CostCache::new(1024, 1);
        assert!(cache.insert("a".to_string(), value("alpha"), 5));
        assert!(cache.insert("b".to_string(), value("beta"), 4));

        assert_eq!(cache.get("a").as_deref(), Some("alpha"));
        assert_eq!(cache.get("b").as_deref(), Some("beta"));
        assert!(cache.get("c").is_none());
        assert_eq!(cache.total_cost(), 9);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.total_cost(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cost_budget_is_respected() {
        let cache = CostCache::new(100, 1);
        for i in 0..50 {
            cache.insert(format!("k{i}"), value("0123456789"), 10);
            assert!(cache.total_cost() <= 100);
        }
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_oversized_value_rejected() {
        let cache = CostCache::new(100, 4);
        // per-segment budget is 25
        assert!(!cache.insert("big".to_string(), value("x"), 26));
        assert!(cache.get("big").is_none());
        assert_eq!(cache.metrics()["rejections"], 1.0);
    }

    #[test]
    fn test_frequent_entries_survive_eviction() {
        let cache = CostCache::new(30, 1);
        cache.insert("hot".to_string(), value("h"), 10);
        for _ in 0..10 {
            cache.get("hot");
        }
        cache.insert("cold1".to_string(), value("c"), 10);
        cache.insert("cold2".to_string(), value("c"), 10);
        // forces one eviction; the lowest priority is a cold entry
        cache.insert("new".to_string(), value("n"), 10);

        assert!(cache.get("hot").is_some());
        assert!(cache.get("new").is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_small_entries_preferred_over_large() {
        let cache = CostCache::new(100, 1);
        cache.insert("large".to_string(), value("l"), 60);
        cache.insert("small".to_string(), value("s"), 10);
        // needs 40 more: evicts the lower priority 1/60 entry first
        cache.insert("medium".to_string(), value("m"), 40);

        assert!(cache.get("large").is_none());
        assert!(cache.get("small").is_some());
        assert!(cache.get("medium").is_some());
    }

    #[test]
    fn test_reinsert_replaces_cost() {
        let cache = CostCache::new(100, 1);
        cache.insert("k".to_string(), value("v1"), 10);
        cache.insert("k".to_string(), value("v2"), 30);
        assert_eq!(cache.total_cost(), 30);
        assert_eq!(cache.get("k").as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = CostCache::new(1000, 4);
        for i in 0..20 {
            cache.insert(format!("k{i}"), value("v"), 1);
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(CostCache::new(100_000, 8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("key_{t}_{i}");
                        cache.insert(key.clone(), value("payload"), 7 + (i % 50) as u64);
                        let _ = cache.get(&key);
                        if i % 3 == 0 {
                            cache.remove(&key);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.total_cost() <= cache.max_cost());
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_moka_policy() {
        let config = LocalCacheConfig::new(1024).with_policy(LocalCachePolicy::Moka);
        let cache = LocalCache::from_config(&config);
        assert_eq!(cache.policy(), LocalCachePolicy::Moka);

        cache.insert("a".to_string(), value("alpha"), 5);
        assert_eq!(cache.get("a").as_deref(), Some("alpha"));
        cache.remove("a");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_local_cache_dispatch_gdsf() {
        let cache = LocalCache::from_config(&LocalCacheConfig::new(1024).with_segments(2));
        cache.insert("a".to_string(), value("alpha"), 5);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 5);
        cache.clear();
        assert!(cache.is_empty());
    }
}
