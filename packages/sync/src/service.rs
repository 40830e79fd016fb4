//! The sync service: working set of records, per-bounds fetch cache,
//! heatmap recomputation and change announcements.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rental_map_geocoder::GeocodingResolver;
use rental_map_geocoder::clock::Clock;
use rental_map_models::{BoundingBox, HeatmapCell, PropertyRecord};
use rental_map_spatial::{HeatmapAggregator, RenderCache};

use crate::broadcaster::{Broadcaster, SyncEvent};
use crate::source::RecordSource;

#[derive(Debug, Default)]
struct SyncState {
    records: BTreeMap<String, PropertyRecord>,
    by_bounds: RenderCache<Vec<PropertyRecord>>,
    last_poll: Option<DateTime<Utc>>,
}

/// Keeps the map's working set in step with the record source.
pub struct SyncService {
    source: Arc<dyn RecordSource>,
    resolver: Arc<GeocodingResolver>,
    broadcaster: Broadcaster,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    state: Mutex<SyncState>,
    heatmap: Mutex<HeatmapAggregator>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("source", &self.source.id())
            .field("records", &self.state().records.len())
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Creates a service announcing changes on `broadcaster`.
    #[must_use]
    pub fn new(
        source: Arc<dyn RecordSource>,
        resolver: Arc<GeocodingResolver>,
        broadcaster: Broadcaster,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            source,
            resolver,
            broadcaster,
            clock,
            started_at,
            state: Mutex::new(SyncState::default()),
            heatmap: Mutex::new(HeatmapAggregator::default()),
        }
    }

    /// The hub this service publishes on.
    #[must_use]
    pub const fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records for `bounds`, served from cache unless `force_refresh`.
    ///
    /// Records without coordinates are geocoded first; those that still
    /// can't be placed are returned without coordinates. A failing source
    /// yields the last cached result for these bounds, or nothing.
    pub async fn fetch_records_in_bounds(
        &self,
        bounds: &BoundingBox,
        force_refresh: bool,
    ) -> Vec<PropertyRecord> {
        let key = bounds.cache_key();

        let cached = self.state().by_bounds.get(&key).cloned();
        if !force_refresh && let Some(records) = cached {
            return records;
        }

        let fetched = match self.source.fetch_in_bounds(bounds).await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Fetching records from {} failed: {e}", self.source.id());
                return self.state().by_bounds.get(&key).cloned().unwrap_or_default();
            }
        };

        let mut records = join_all(fetched.into_iter().map(|r| self.locate(r))).await;
        records.retain(|r| r.coordinates.is_none_or(|c| bounds.contains(&c)));

        let mut state = self.state();
        for record in &records {
            state.records.insert(record.id.clone(), record.clone());
        }
        state.by_bounds.insert(key, records.clone());
        drop(state);

        log::debug!("Fetched {} records for {}", records.len(), bounds.cache_key());
        records
    }

    /// Fills in coordinates if missing. Records that can't be geocoded are
    /// returned unchanged.
    async fn locate(&self, mut record: PropertyRecord) -> PropertyRecord {
        if !record.is_located() {
            match self.resolver.resolve(&record.location_query()).await {
                Ok(result) => record.coordinates = Some(result.coordinates),
                Err(e) => log::debug!("Record {} left unlocated: {e}", record.id),
            }
        }
        record
    }

    /// Re-aggregates the heatmap for `bounds` and announces it on the
    /// heatmap channel.
    pub async fn recompute_heatmap(&self, bounds: &BoundingBox, zoom: f64) -> Vec<HeatmapCell> {
        let records = self.fetch_records_in_bounds(bounds, false).await;
        let cells = self
            .heatmap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aggregate(&records, bounds, zoom);

        self.broadcaster.publish(&SyncEvent::HeatmapUpdated {
            bounds: *bounds,
            zoom,
            cells: cells.clone(),
        });
        cells
    }

    /// Adds or replaces a record and announces it.
    ///
    /// A record that has no coordinates and can't be geocoded is dropped
    /// (returns `false`, nothing is published).
    pub async fn upsert_record(&self, mut record: PropertyRecord) -> bool {
        if !record.is_located() {
            match self.resolver.resolve(&record.location_query()).await {
                Ok(result) => record.coordinates = Some(result.coordinates),
                Err(e) => {
                    log::warn!("Dropping upsert of record {}: {e}", record.id);
                    return false;
                }
            }
        }

        let existed = {
            let mut state = self.state();
            let existed = state
                .records
                .insert(record.id.clone(), record.clone())
                .is_some();
            state.by_bounds.clear();
            existed
        };

        let event = if existed {
            SyncEvent::RecordUpdated(record)
        } else {
            SyncEvent::RecordAdded(record)
        };
        self.broadcaster.publish(&event);
        true
    }

    /// Removes a record and announces it. Returns `false` (and publishes
    /// nothing) if the record wasn't in the working set.
    pub fn remove_record(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state();
            let removed = state.records.remove(id).is_some();
            if removed {
                state.by_bounds.clear();
            }
            removed
        };

        if removed {
            self.broadcaster.publish(&SyncEvent::RecordRemoved { id: id.to_string() });
        }
        removed
    }

    /// Snapshot of every record in the working set.
    #[must_use]
    pub fn records(&self) -> Vec<PropertyRecord> {
        self.state().records.values().cloned().collect()
    }

    /// Asks the source for records changed since the last poll and upserts
    /// them. Returns how many were applied.
    pub async fn poll_once(&self) -> usize {
        let since = self.state().last_poll.unwrap_or(self.started_at);
        let now = self.clock.now();

        let changed = match self.source.fetch_updated_since(since).await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Polling {} failed: {e}", self.source.id());
                return 0;
            }
        };

        let mut applied = 0;
        for record in changed {
            if self.upsert_record(record).await {
                applied += 1;
            }
        }

        self.state().last_poll = Some(now);
        if applied > 0 {
            log::info!("Polling applied {applied} changed records");
        }
        applied
    }
}
