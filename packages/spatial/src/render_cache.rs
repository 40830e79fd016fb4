//! Size-capped memo for derived render data (clusters, heatmap cells).
//!
//! There is no expiry: keys embed a digest of their inputs, so a changed
//! record set simply misses. When the cache is full the oldest fifth of the
//! entries (by insertion order) is dropped in one pass.

use std::collections::BTreeMap;

/// Default soft cap on entries.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default fraction of entries dropped on overflow.
pub const DEFAULT_EVICT_RATIO: f64 = 0.2;

/// Insertion-ordered cache with batch eviction.
#[derive(Debug, Clone)]
pub struct RenderCache<V> {
    entries: BTreeMap<String, (u64, V)>,
    capacity: usize,
    evict_ratio: f64,
    next_seq: u64,
}

impl<V> Default for RenderCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<V> RenderCache<V> {
    /// Creates a cache holding about `capacity` entries.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            evict_ratio: DEFAULT_EVICT_RATIO,
            next_seq: 0,
        }
    }

    /// Overrides the fraction of entries dropped on overflow.
    #[must_use]
    pub const fn with_evict_ratio(mut self, ratio: f64) -> Self {
        self.evict_ratio = ratio;
        self
    }

    /// Cached value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Stores `value` under `key`. Overwriting a key moves it to the back
    /// of the eviction order. A zero-capacity cache stores nothing.
    pub fn insert(&mut self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key, (seq, value));
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn evict(&mut self) {
        let before = self.entries.len();
        if before == 0 {
            return;
        }
        let count = ((before as f64) * self.evict_ratio.clamp(0.0, 1.0)).ceil() as usize;
        let count = count.clamp(1, before);

        let mut by_seq: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(k, (seq, _))| (*seq, k.clone()))
            .collect();
        by_seq.sort_unstable();

        for (_, key) in by_seq.into_iter().take(count) {
            self.entries.remove(&key);
        }

        log::debug!(
            "Render cache evicted {count} entries ({before} -> {})",
            self.entries.len()
        );
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_fifth_on_overflow() {
        let mut cache = RenderCache::new(10);
        for i in 0..10 {
            cache.insert(format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 10);

        cache.insert("k10".to_string(), 10);
        assert_eq!(cache.len(), 9);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.get("k2"), Some(&2));
        assert_eq!(cache.get("k10"), Some(&10));
    }

    #[test]
    fn overwrite_refreshes_position() {
        let mut cache = RenderCache::new(5);
        for i in 0..5 {
            cache.insert(format!("k{i}"), i);
        }
        cache.insert("k0".to_string(), 100);
        assert_eq!(cache.len(), 5);

        cache.insert("k5".to_string(), 5);
        assert_eq!(cache.get("k0"), Some(&100));
        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = RenderCache::new(100);
        for i in 0..1_000 {
            cache.insert(i.to_string(), ());
            assert!(cache.len() <= 100);
        }
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = RenderCache::<u32>::new(0);
        cache.insert("k".to_string(), 1);
        assert!(cache.is_empty());
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn zero_ratio_still_evicts_one() {
        let mut cache = RenderCache::new(3).with_evict_ratio(0.0);
        for i in 0..4 {
            cache.insert(i.to_string(), i);
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("0").is_none());
    }
}
