//! Generic bounded write-back cache.
//!
//! Strict LRU over `lru::LruCache`, with dirty tracking and an eviction sink
//! so owners can flush unpersisted entries before they leave memory. The
//! cache itself carries no lock: the owning repository guards it with a
//! single coarse mutex so eviction and durable writes stay atomic.

use crate::error::StorageError;
use lru::LruCache;
use std::hash::Hash;

/// In-memory wrapper around a cached value.
///
/// `dirty` means the value has not been persisted since it was last added or
/// updated. `weight` is a unit cost (always 1 for outpoint records) kept so
/// the capacity check can later account for heavier entries.
#[derive(Clone, Debug)]
pub struct CacheItem<K, V> {
    pub key: K,
    pub value: V,
    pub dirty: bool,
    pub weight: usize,
}

impl<K, V> CacheItem<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            dirty: true,
            weight: 1,
        }
    }
}

/// Receives entries evicted from the cache, before they are dropped.
///
/// Implementations flush dirty items to durable storage; returning an error
/// aborts the insertion that triggered the eviction, so no dirty data is
/// ever silently lost.
pub trait EvictionSink<K, V> {
    fn on_evict(&mut self, item: &CacheItem<K, V>) -> Result<(), StorageError>;
}

/// Sink for callers that know evictions cannot carry dirty state.
pub struct DiscardEvicted;

impl<K, V> EvictionSink<K, V> for DiscardEvicted {
    fn on_evict(&mut self, _item: &CacheItem<K, V>) -> Result<(), StorageError> {
        Ok(())
    }
}

pub struct MemoryCache<K: Eq + Hash + Clone, V> {
    entries: LruCache<K, CacheItem<K, V>>,
    max_items: usize,
}

impl<K: Eq + Hash + Clone, V> MemoryCache<K, V> {
    /// Capacity misconfiguration fails fast at construction.
    pub fn new(max_items: usize) -> Result<Self, StorageError> {
        if max_items == 0 {
            return Err(StorageError::InvalidCacheCapacity(max_items));
        }
        Ok(Self {
            entries: LruCache::unbounded(),
            max_items,
        })
    }

    /// Would inserting one more entry exceed capacity? Consulted before
    /// every insertion.
    pub fn is_full(&self) -> bool {
        self.entries.len() + 1 > self.max_items
    }

    /// Insert or replace the entry for `item.key`, promoting it to
    /// most-recently-used. If the key is new and the cache is at capacity,
    /// the least-recently-used entry is handed to `sink` and dropped first.
    pub fn add_or_update(
        &mut self,
        item: CacheItem<K, V>,
        sink: &mut dyn EvictionSink<K, V>,
    ) -> Result<(), StorageError> {
        if !self.entries.contains(&item.key) {
            while self.is_full() {
                if let Some((_, evicted)) = self.entries.pop_lru() {
                    sink.on_evict(&evicted)?;
                } else {
                    break;
                }
            }
        }
        self.entries.put(item.key.clone(), item);
        Ok(())
    }

    /// Cache-only lookup; promotes the entry on a hit. Durable fallback on a
    /// miss is the caller's responsibility.
    pub fn try_get(&mut self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.get(key).map(|item| item.value.clone())
    }

    /// Remove an entry, returning it so the caller can decide whether a
    /// durable delete is also needed. Does not persist anything itself.
    pub fn remove(&mut self, key: &K) -> Option<CacheItem<K, V>> {
        self.entries.pop(key)
    }

    /// Hand every dirty entry to `persist` in one batch, then mark all
    /// entries clean. Entries stay resident; only their dirty flags change.
    /// On error nothing is marked clean.
    pub fn save_dirty<F>(&mut self, persist: F) -> Result<usize, StorageError>
    where
        F: FnOnce(&[&CacheItem<K, V>]) -> Result<(), StorageError>,
    {
        let dirty: Vec<&CacheItem<K, V>> = self
            .entries
            .iter()
            .filter(|(_, item)| item.dirty)
            .map(|(_, item)| item)
            .collect();
        let count = dirty.len();
        if count == 0 {
            return Ok(0);
        }
        persist(&dirty)?;
        for (_, item) in self.entries.iter_mut() {
            item.dirty = false;
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Population as a percentage of capacity, rounded to two decimals.
    /// Diagnostic only, never used for control flow.
    pub fn load_percentage(&self) -> f64 {
        let pct = self.entries.len() as f64 / (self.max_items as f64 / 100.0);
        (pct * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        evicted: Vec<(String, bool)>,
    }

    impl EvictionSink<String, u64> for RecordingSink {
        fn on_evict(&mut self, item: &CacheItem<String, u64>) -> Result<(), StorageError> {
            self.evicted.push((item.key.clone(), item.dirty));
            Ok(())
        }
    }

    fn item(key: &str, value: u64) -> CacheItem<String, u64> {
        CacheItem::new(key.to_string(), value)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(MemoryCache::<String, u64>::new(0).is_err());
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut cache = MemoryCache::new(3).unwrap();
        let mut sink = RecordingSink::default();
        for i in 0..20u64 {
            cache
                .add_or_update(item(&format!("k{}", i), i), &mut sink)
                .unwrap();
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(sink.evicted.len(), 17);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = MemoryCache::new(2).unwrap();
        let mut sink = RecordingSink::default();
        cache.add_or_update(item("a", 1), &mut sink).unwrap();
        cache.add_or_update(item("b", 2), &mut sink).unwrap();
        cache.add_or_update(item("c", 3), &mut sink).unwrap();

        assert_eq!(sink.evicted, vec![("a".to_string(), true)]);
        assert!(cache.try_get(&"a".to_string()).is_none());
        assert_eq!(cache.try_get(&"b".to_string()), Some(2));
        assert_eq!(cache.try_get(&"c".to_string()), Some(3));
    }

    #[test]
    fn test_get_promotes_entry() {
        let mut cache = MemoryCache::new(2).unwrap();
        let mut sink = RecordingSink::default();
        cache.add_or_update(item("a", 1), &mut sink).unwrap();
        cache.add_or_update(item("b", 2), &mut sink).unwrap();

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.try_get(&"a".to_string()), Some(1));
        cache.add_or_update(item("c", 3), &mut sink).unwrap();

        assert_eq!(sink.evicted, vec![("b".to_string(), true)]);
        assert_eq!(cache.try_get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_update_does_not_evict() {
        let mut cache = MemoryCache::new(2).unwrap();
        let mut sink = RecordingSink::default();
        cache.add_or_update(item("a", 1), &mut sink).unwrap();
        cache.add_or_update(item("b", 2), &mut sink).unwrap();
        // Replacing an existing key must not trigger the capacity check.
        cache.add_or_update(item("a", 10), &mut sink).unwrap();

        assert!(sink.evicted.is_empty());
        assert_eq!(cache.try_get(&"a".to_string()), Some(10));
    }

    #[test]
    fn test_remove_returns_dirty_state() {
        let mut cache = MemoryCache::new(4).unwrap();
        let mut sink = RecordingSink::default();
        cache.add_or_update(item("a", 1), &mut sink).unwrap();

        let removed = cache.remove(&"a".to_string()).unwrap();
        assert!(removed.dirty);
        assert_eq!(removed.value, 1);
        assert!(cache.remove(&"a".to_string()).is_none());
    }

    #[test]
    fn test_save_dirty_clears_flags() {
        let mut cache = MemoryCache::new(4).unwrap();
        let mut sink = RecordingSink::default();
        cache.add_or_update(item("a", 1), &mut sink).unwrap();
        cache.add_or_update(item("b", 2), &mut sink).unwrap();

        let flushed = cache
            .save_dirty(|items| {
                assert_eq!(items.len(), 2);
                Ok(())
            })
            .unwrap();
        assert_eq!(flushed, 2);

        // Everything is clean now, a second flush persists nothing.
        let flushed = cache.save_dirty(|_| panic!("no dirty items expected")).unwrap();
        assert_eq!(flushed, 0);

        // A clean entry evicted later reports dirty = false.
        cache.add_or_update(item("c", 3), &mut sink).unwrap();
        cache.add_or_update(item("d", 4), &mut sink).unwrap();
        cache.add_or_update(item("e", 5), &mut sink).unwrap();
        assert_eq!(sink.evicted, vec![("a".to_string(), false)]);
    }

    #[test]
    fn test_load_percentage() {
        let mut cache = MemoryCache::new(200).unwrap();
        let mut sink = RecordingSink::default();
        for i in 0..50u64 {
            cache
                .add_or_update(item(&format!("k{}", i), i), &mut sink)
                .unwrap();
        }
        assert!((cache.load_percentage() - 25.0).abs() < f64::EPSILON);
    }
}
