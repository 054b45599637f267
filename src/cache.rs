//! Bounded, thread-safe LRU cache.
//!
//! Recency is tracked with a monotonically increasing tick: every hit or
//! insert stamps the entry with a fresh tick, and the `order` map keeps
//! ticks sorted so the least-recently-used entry is always the first key.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use parking_lot::Mutex;

/// Something the resource monitor can empty when memory runs high.
pub trait MemoryPressureTarget: Send + Sync {
    /// Name used in log fields.
    fn name(&self) -> &str;

    /// Drop every entry.
    fn clear(&self);

    /// Release spare backing storage.
    fn shrink(&self);
}

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
    stats: CacheStats,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Fixed-capacity key/value store with strict least-recently-used eviction.
///
/// Every method takes the single internal lock, so operations are atomic
/// relative to each other. `size() <= capacity()` after every mutation.
pub struct LruCache<K, V> {
    name: String,
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        let Some((value, old_tick)) = inner.entries.get_mut(key) else {
            inner.stats.misses += 1;
            return None;
        };
        let previous = std::mem::replace(old_tick, tick);
        let value = value.clone();

        inner.order.remove(&previous);
        inner.order.insert(tick, key.clone());
        inner.stats.hits += 1;
        Some(value)
    }

    /// Insert or update `key`. A new key arriving at capacity evicts the
    /// least-recently-used entry first.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        if let Some((slot, old_tick)) = inner.entries.get_mut(&key) {
            *slot = value;
            let previous = std::mem::replace(old_tick, tick);
            inner.order.remove(&previous);
            inner.order.insert(tick, key);
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some((_, lru_key)) = inner.order.pop_first() {
                inner.entries.remove(&lru_key);
                inner.stats.evictions += 1;
            }
        }

        inner.order.insert(tick, key.clone());
        inner.entries.insert(key, (value, tick));
    }

    /// Whether `key` is cached. Does not affect recency or counters.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Remove every entry. Idempotent.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Release spare capacity held by the backing map.
    pub fn shrink(&self) {
        self.inner.lock().entries.shrink_to_fit();
    }

    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl<K, V> MemoryPressureTarget for LruCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) {
        LruCache::clear(self);
    }

    fn shrink(&self) {
        LruCache::shrink(self);
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("size", &inner.entries.len())
            .field("stats", &inner.stats)
            .finish()
    }
}
