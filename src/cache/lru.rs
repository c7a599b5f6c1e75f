use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

use parking_lot::Mutex;

/// Thread-safe LRU cache bounded by entry count.
///
/// Recency is tracked with a monotonically increasing tick; the ordered
/// `by_tick` map makes eviction of the least recently used entry O(log n).
pub struct LRUCache<K: Clone + Eq + Hash, V: Clone> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    map: HashMap<K, (V, u64)>,
    by_tick: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl<K: Clone + Eq + Hash, V: Clone> LRUCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        LRUCache {
            capacity,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                by_tick: BTreeMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let Some((value, old_tick)) = inner.map.get_mut(key).map(|(v, t)| {
            let old = *t;
            *t = tick;
            (v.clone(), old)
        }) else {
            inner.misses += 1;
            return None;
        };

        inner.by_tick.remove(&old_tick);
        inner.by_tick.insert(tick, key.clone());
        inner.hits += 1;
        Some(value)
    }

    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some((_, old_tick)) = inner.map.insert(key.clone(), (value, tick)) {
            inner.by_tick.remove(&old_tick);
        }
        inner.by_tick.insert(tick, key);

        while inner.map.len() > self.capacity {
            let Some((_, victim)) = inner.by_tick.pop_first() else {
                break;
            };
            inner.map.remove(&victim);
        }
    }

    /// Drop every entry matching `predicate`
    pub fn retain(&self, mut predicate: impl FnMut(&K) -> bool) {
        let mut inner = self.inner.lock();
        let Inner { map, by_tick, .. } = &mut *inner;
        map.retain(|k, _| predicate(k));
        by_tick.retain(|_, k| map.contains_key(k));
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.map.len(),
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LRUCache::new(2);
        cache.insert(1, "one");
        cache.insert(2, "two");
        assert_eq!(cache.get(&1), Some("one"));

        cache.insert(3, "three");
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some("one"));
        assert_eq!(cache.get(&3), Some("three"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_refreshes_recency() {
        let cache = LRUCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_stats_and_retain() {
        let cache = LRUCache::new(8);
        for i in 0..6u64 {
            cache.insert((i % 2, i), i);
        }
        assert_eq!(cache.get(&(0, 0)), Some(0));
        assert_eq!(cache.get(&(9, 9)), None);

        cache.retain(|(file, _)| *file != 1);
        assert_eq!(cache.len(), 3);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.capacity, 8);
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let cache = LRUCache::new(0);
        cache.insert(1, 1);
        assert!(cache.is_empty());
    }
}
