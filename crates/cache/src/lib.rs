//! # Doctrail Cache
//!
//! Bounded least-recently-used key set.
//!
//! The set starts at its minimum capacity and doubles, without evicting, until
//! it reaches its maximum capacity. After that every new key evicts the least
//! recently used one. Membership tests count as a use: a key that keeps being
//! looked up stays resident.

use lru::LruCache;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Snapshot of cache occupancy and lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStatistics {
    /// Fraction of lookups that found their key (0.0-1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} hits, {} misses, {:.2}% hit rate",
            self.entries,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )
    }
}

/// LRU set of keys
pub struct Cache<K: Hash + Eq> {
    entries: LruCache<K, ()>,
    min_capacity: NonZeroUsize,
    max_capacity: NonZeroUsize,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq> Cache<K> {
    /// Create a cache sized for `min_capacity` keys that grows up to
    /// `max_capacity`.
    ///
    /// `min_capacity` is clamped into `1..=max_capacity`; a zero maximum is
    /// treated as one.
    #[must_use]
    pub fn new(min_capacity: usize, max_capacity: usize) -> Self {
        let max = NonZeroUsize::new(max_capacity).unwrap_or(NonZeroUsize::MIN);
        let min = NonZeroUsize::new(min_capacity.min(max.get())).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(min),
            min_capacity: min,
            max_capacity: max,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub fn min_capacity(&self) -> usize {
        self.min_capacity.get()
    }

    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity.get()
    }

    /// Keys the cache holds before it next grows or evicts
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Test membership, refreshing the key's recency on a hit
    pub fn contains(&mut self, key: &K) -> bool {
        if self.entries.get(key).is_some() {
            self.hits += 1;
            true
        } else {
            self.misses += 1;
            false
        }
    }

    /// Insert or refresh a single key. Returns true if the key was new.
    pub fn add(&mut self, key: K) -> bool {
        if !self.entries.contains(&key) {
            self.grow_if_full();
        }
        self.entries.put(key, ()).is_none()
    }

    /// Insert or refresh every key. Returns true if at least one key was new.
    pub fn add_all<I>(&mut self, keys: I) -> bool
    where
        I: IntoIterator<Item = K>,
    {
        let mut modified = false;
        for key in keys {
            modified |= self.add(key);
        }
        modified
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every key, reset the counters and shrink back to the minimum capacity
    pub fn clear(&mut self) {
        self.entries.clear();
        self.entries.resize(self.min_capacity);
        self.hits = 0;
        self.misses = 0;
    }

    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn grow_if_full(&mut self) {
        let cap = self.entries.cap();
        if self.entries.len() < cap.get() || cap >= self.max_capacity {
            return;
        }
        let doubled = NonZeroUsize::new(cap.get().saturating_mul(2)).unwrap_or(self.max_capacity);
        self.entries.resize(doubled.min(self.max_capacity));
    }
}

impl<K: Hash + Eq> fmt::Debug for Cache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("min_capacity", &self.min_capacity())
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity())
            .field("statistics", &self.statistics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn contains_refreshes_recency() {
        let mut cache = Cache::new(1, 3);
        cache.add_all([1, 2, 3]);

        assert!(cache.contains(&2));
        cache.add(4);

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert!(cache.contains(&4));
    }

    #[test]
    fn without_lookups_oldest_key_is_evicted() {
        let mut cache = Cache::new(1, 3);
        cache.add_all([1, 2, 3, 4]);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&1));
    }

    #[test]
    fn add_all_reports_modification() {
        let mut cache = Cache::new(3, 10);
        assert!(cache.add_all([1, 2, 3]));
        assert!(!cache.add_all([3, 1]));
        assert!(cache.add_all([3, 4, 5]));
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn add_all_of_nothing_is_unmodified() {
        let mut cache: Cache<i64> = Cache::new(1, 4);
        assert!(!cache.add_all(Vec::new()));
    }

    #[test]
    fn statistics_count_hits_and_misses() {
        let mut cache = Cache::new(1, 8);
        cache.add_all([10, 20]);

        cache.contains(&10);
        cache.contains(&10);
        cache.contains(&30);

        let stats = cache.statistics();
        assert_eq!(
            stats,
            CacheStatistics {
                entries: 2,
                hits: 2,
                misses: 1,
            }
        );
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_resets_counters() {
        let mut cache = Cache::new(1, 8);
        cache.add(1);
        cache.contains(&1);
        cache.clear();
        assert_eq!(cache.statistics(), CacheStatistics::default());
    }

    #[test]
    fn grows_to_max_before_evicting() {
        let mut cache = Cache::new(2, 8);
        assert_eq!(cache.capacity(), 2);

        cache.add_all(1..=3);
        assert_eq!(cache.capacity(), 4);

        cache.add_all(4..=8);
        assert_eq!(cache.capacity(), 8);
        assert_eq!(cache.len(), 8);
        assert!((1..=8).all(|key| cache.contains(&key)));

        cache.contains(&1);
        cache.add(9);
        assert_eq!(cache.capacity(), 8);
        assert_eq!(cache.len(), 8);
        assert!(!cache.contains(&2));
        assert!(cache.contains(&1));

        cache.clear();
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn capacities_are_clamped() {
        let cache: Cache<u32> = Cache::new(50, 0);
        assert_eq!(cache.max_capacity(), 1);
        assert_eq!(cache.min_capacity(), 1);

        let cache: Cache<u32> = Cache::new(0, 16);
        assert_eq!(cache.min_capacity(), 1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.max_capacity(), 16);
    }
}
