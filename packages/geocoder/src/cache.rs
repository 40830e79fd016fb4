//! TTL cache of resolved addresses, persisted through a [`CacheStore`].
//!
//! Keys are normalized addresses. The whole cache is serialized as one JSON
//! object under [`GEOCODE_CACHE_KEY`]:
//!
//! ```json
//! { "12 adeola odeku street": { "result": {..}, "timestamp": 1718000000000, "expiresAt": 1718086400000 } }
//! ```
//!
//! Timestamps are Unix epoch milliseconds.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rental_map_models::{CacheEntry, GeocodeResult};
use serde::{Deserialize, Serialize};

use crate::GeocodeError;
use crate::clock::Clock;
use crate::service_registry::CacheConfig;
use crate::store::{CacheStore, GEOCODE_CACHE_KEY};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    result: GeocodeResult,
    timestamp: i64,
    expires_at: i64,
}

impl PersistedEntry {
    fn from_entry(entry: &CacheEntry<GeocodeResult>) -> Self {
        Self {
            result: entry.value.clone(),
            timestamp: entry.created_at.timestamp_millis(),
            expires_at: entry.expires_at.timestamp_millis(),
        }
    }

    fn into_entry(self) -> Option<CacheEntry<GeocodeResult>> {
        Some(CacheEntry {
            value: self.result,
            created_at: DateTime::from_timestamp_millis(self.timestamp)?,
            expires_at: DateTime::from_timestamp_millis(self.expires_at)?,
        })
    }
}

/// Resolved-address cache with expiry and size-bounded eviction.
///
/// All writes go through [`GeocodeCache::insert`], which evicts and
/// persists.
pub struct GeocodeCache {
    entries: BTreeMap<String, CacheEntry<GeocodeResult>>,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl std::fmt::Debug for GeocodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodeCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeocodeCache {
    /// Loads the persisted cache, dropping expired entries.
    ///
    /// Missing or unreadable data yields an empty cache.
    #[must_use]
    pub fn load(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let mut cache = Self {
            entries: BTreeMap::new(),
            store,
            clock,
            config,
        };

        match cache.read_persisted() {
            Ok(Some(entries)) => {
                let total = entries.len();
                let now = cache.clock.now();
                cache.entries = entries
                    .into_iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .collect();
                let dropped = total - cache.entries.len();
                log::info!(
                    "Loaded {} geocode cache entries ({dropped} expired dropped)",
                    cache.entries.len()
                );
                if dropped > 0 {
                    cache.persist();
                }
            }
            Ok(None) => log::debug!("No persisted geocode cache"),
            Err(e) => {
                log::warn!("Resetting geocode cache: {e}");
                cache.persist();
            }
        }

        cache
    }

    fn read_persisted(
        &self,
    ) -> Result<Option<BTreeMap<String, CacheEntry<GeocodeResult>>>, GeocodeError> {
        let Some(raw) = self.store.load(GEOCODE_CACHE_KEY)? else {
            return Ok(None);
        };
        let persisted: BTreeMap<String, PersistedEntry> = serde_json::from_str(&raw)?;
        Ok(Some(
            persisted
                .into_iter()
                .filter_map(|(k, v)| Some((k, v.into_entry()?)))
                .collect(),
        ))
    }

    fn persist(&self) {
        let persisted: BTreeMap<&str, PersistedEntry> = self
            .entries
            .iter()
            .map(|(k, e)| (k.as_str(), PersistedEntry::from_entry(e)))
            .collect();

        let result = serde_json::to_string(&persisted)
            .map_err(GeocodeError::from)
            .and_then(|json| self.store.save(GEOCODE_CACHE_KEY, &json));

        if let Err(e) = result {
            log::warn!("Failed to persist geocode cache: {e}");
        }
    }

    /// Returns the cached result for `key` unless it has expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<GeocodeResult> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Stores `result` under `key`, evicting first if the cache is full.
    pub fn insert(&mut self, key: String, result: GeocodeResult) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict();
        }
        let entry = CacheEntry::new(result, self.clock.now(), self.config.ttl());
        self.entries.insert(key, entry);
        self.persist();
    }

    /// Drops expired entries, then the oldest entries until the cache is
    /// at the eviction target.
    fn evict(&mut self) {
        let before = self.entries.len();
        self.remove_expired();

        let keep = self
            .config
            .eviction_target()
            .min(self.config.max_entries.saturating_sub(1));

        if self.entries.len() > keep {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .entries
                .iter()
                .map(|(k, e)| (e.created_at, k.clone()))
                .collect();
            by_age.sort();
            let excess = self.entries.len() - keep;
            for (_, key) in by_age.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }

        log::debug!(
            "Evicted geocode cache: {before} -> {} entries",
            self.entries.len()
        );
    }

    fn remove_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    /// Removes expired entries and persists. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let removed = self.remove_expired();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Empties the cache and persists.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Number of stored entries, including any not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCacheStore;
    use rental_map_models::{AddressComponents, GeoPoint};

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            ttl_hours: 24,
            max_entries,
            eviction_target_ratio: 0.9,
        }
    }

    fn result(name: &str) -> GeocodeResult {
        GeocodeResult {
            resolved_address: name.to_string(),
            coordinates: GeoPoint::new(3.4, 6.5),
            confidence: 0.9,
            components: AddressComponents::default(),
            bounds: None,
        }
    }

    #[test]
    fn expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::new());
        let mut cache = GeocodeCache::load(store, clock.clone(), config(10));

        cache.insert("ikoyi".to_string(), result("Ikoyi"));
        clock.advance(chrono::Duration::hours(23));
        assert!(cache.get("ikoyi").is_some());

        clock.advance(chrono::Duration::hours(1));
        assert!(cache.get("ikoyi").is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn size_never_exceeds_max() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::new());
        let mut cache = GeocodeCache::load(store, clock.clone(), config(20));

        for i in 0..75 {
            cache.insert(format!("addr {i}"), result(&format!("Addr {i}")));
            clock.advance(chrono::Duration::seconds(1));
            assert!(cache.len() <= 20, "cache grew to {}", cache.len());
        }
        // Newest entry survives, oldest is gone.
        assert!(cache.get("addr 74").is_some());
        assert!(cache.get("addr 0").is_none());
    }

    #[test]
    fn eviction_prefers_expired_entries() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::new());
        let mut cache = GeocodeCache::load(store, clock.clone(), config(3));

        cache.insert("old".to_string(), result("Old"));
        clock.advance(chrono::Duration::hours(25));
        cache.insert("a".to_string(), result("A"));
        cache.insert("b".to_string(), result("B"));
        cache.insert("c".to_string(), result("C"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn survives_reload() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::new());
        {
            let mut cache = GeocodeCache::load(store.clone(), clock.clone(), config(10));
            cache.insert("lekki".to_string(), result("Lekki"));
            cache.insert("yaba".to_string(), result("Yaba"));
        }
        let cache = GeocodeCache::load(store, clock, config(10));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("lekki").unwrap().resolved_address, "Lekki");
    }

    #[test]
    fn reload_drops_expired_entries() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::new());
        {
            let mut cache = GeocodeCache::load(store.clone(), clock.clone(), config(10));
            cache.insert("lekki".to_string(), result("Lekki"));
        }
        clock.advance(chrono::Duration::hours(30));
        let cache = GeocodeCache::load(store, clock, config(10));
        assert!(cache.is_empty());
    }

    #[test]
    fn corrupt_data_resets_to_empty() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::with_entry(GEOCODE_CACHE_KEY, "{not json"));
        let cache = GeocodeCache::load(store.clone(), clock, config(10));
        assert!(cache.is_empty());
        assert_eq!(store.load(GEOCODE_CACHE_KEY).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn persisted_shape_uses_epoch_millis() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCacheStore::new());
        let mut cache = GeocodeCache::load(store.clone(), clock.clone(), config(10));
        cache.insert("wuse".to_string(), result("Wuse"));

        let raw = store.load(GEOCODE_CACHE_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &json["wuse"];
        let created = entry["timestamp"].as_i64().unwrap();
        let expires = entry["expiresAt"].as_i64().unwrap();
        assert_eq!(expires - created, 24 * 60 * 60 * 1000);
        assert_eq!(entry["result"]["resolvedAddress"], "Wuse");
    }
}
