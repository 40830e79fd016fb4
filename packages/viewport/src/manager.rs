//! The viewport data manager.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rental_map_geocoder::GeocodingResolver;
use rental_map_models::{
    BoundingBox, ClusterPoint, HeatmapCell, MapFilters, MapFiltersPatch, MapViewPatch,
    MapViewState, PropertyRecord,
};
use rental_map_spatial::{ClusterEngine, HeatmapAggregator};
use rental_map_sync::{Channel, Subscription, SyncEvent, SyncService};

use crate::SearchOutcome;
use crate::fit::{FOCUS_ZOOM, PREFETCH_BUFFER_RATIO, SEARCH_ZOOM, fit_records};

/// Heatmap cells most recently announced by the sync service.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveHeatmap {
    /// Bounds the cells cover.
    pub bounds: BoundingBox,
    /// Zoom the cells were computed for.
    pub zoom: f64,
    /// The cells.
    pub cells: Vec<HeatmapCell>,
}

#[derive(Debug, Default)]
struct ViewportState {
    view: MapViewState,
    filters: MapFilters,
    original: Vec<PropertyRecord>,
    synced: BTreeMap<String, PropertyRecord>,
    removed: BTreeSet<String>,
    selected: Option<String>,
    search_error: Option<String>,
    searching: bool,
    live_heatmap: Option<LiveHeatmap>,
}

impl ViewportState {
    /// Original records overlaid with synced ones; synced wins on id.
    fn combined(&self) -> Vec<PropertyRecord> {
        let mut records: Vec<PropertyRecord> = self
            .original
            .iter()
            .filter(|r| !self.synced.contains_key(&r.id) && !self.removed.contains(&r.id))
            .cloned()
            .collect();
        records.extend(self.synced.values().cloned());
        records
    }

    fn filtered(&self) -> Vec<PropertyRecord> {
        self.combined()
            .into_iter()
            .filter(|r| self.filters.matches(r))
            .collect()
    }

    /// Re-derives view and selection after the record set or filters
    /// changed. Returns whether the visible bounds moved.
    fn refresh(&mut self, allow_fit: bool) -> bool {
        let combined = self.combined();
        let filtered: Vec<PropertyRecord> = combined
            .iter()
            .filter(|r| self.filters.matches(r))
            .cloned()
            .collect();

        let mut bounds_changed = false;
        if allow_fit
            && !filtered.is_empty()
            && filtered.len() != combined.len()
            && let Some(view) = fit_records(&filtered)
        {
            log::debug!(
                "Fitting view to {} of {} records (zoom {})",
                filtered.len(),
                combined.len(),
                view.zoom
            );
            bounds_changed = view.bounds != self.view.bounds;
            self.view = view;
        }

        if let Some(id) = &self.selected
            && !filtered.iter().any(|r| &r.id == id)
        {
            log::debug!("Selected record {id} filtered out, clearing selection");
            self.selected = None;
        }

        bounds_changed
    }
}

struct Attached {
    service: Arc<SyncService>,
    subscriptions: Vec<Subscription>,
}

/// Owns map view state and filters and derives render-ready data from the
/// combined record set.
///
/// Created behind an [`Arc`]; live sync callbacks and background fetches
/// hold only a weak reference, so dropping the last handle stops them.
pub struct ViewportManager {
    me: Weak<Self>,
    resolver: Arc<GeocodingResolver>,
    state: Mutex<ViewportState>,
    sync: Mutex<Option<Attached>>,
    search_seq: AtomicU64,
    clusters: Mutex<ClusterEngine>,
    heatmap: Mutex<HeatmapAggregator>,
}

impl std::fmt::Debug for ViewportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ViewportManager")
            .field("view", &state.view)
            .field("filters", &state.filters)
            .field("records", &state.original.len())
            .field("synced", &state.synced.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ViewportManager {
    /// Creates a manager with the default view and no records.
    #[must_use]
    pub fn new(resolver: Arc<GeocodingResolver>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            resolver,
            state: Mutex::new(ViewportState::default()),
            sync: Mutex::new(None),
            search_seq: AtomicU64::new(0),
            clusters: Mutex::new(ClusterEngine::default()),
            heatmap: Mutex::new(HeatmapAggregator::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, ViewportState> {
        lock(&self.state)
    }

    /// Replaces the caller-supplied record set.
    pub fn set_records(&self, records: Vec<PropertyRecord>) {
        let bounds_changed = {
            let mut state = self.state();
            state.original = records;
            state.refresh(true)
        };
        if bounds_changed {
            self.request_sync();
        }
    }

    /// Every record, original and synced, before filtering.
    #[must_use]
    pub fn records(&self) -> Vec<PropertyRecord> {
        self.state().combined()
    }

    /// Records passing every active filter.
    #[must_use]
    pub fn filtered_records(&self) -> Vec<PropertyRecord> {
        self.state().filtered()
    }

    /// Filtered records inside the current bounds, or every filtered record
    /// if bounds aren't known yet.
    #[must_use]
    pub fn records_in_bounds(&self) -> Vec<PropertyRecord> {
        let state = self.state();
        let filtered = state.filtered();
        match state.view.bounds {
            Some(bounds) => filtered
                .into_iter()
                .filter(|r| r.coordinates.is_some_and(|c| bounds.contains(&c)))
                .collect(),
            None => filtered,
        }
    }

    /// Current camera state.
    #[must_use]
    pub fn map_state(&self) -> MapViewState {
        self.state().view
    }

    /// Current filters.
    #[must_use]
    pub fn filters(&self) -> MapFilters {
        self.state().filters.clone()
    }

    /// Merges `patch` into the view. Returns whether the bounds changed; if
    /// they did and a sync service is attached, records for the new bounds
    /// are fetched in the background.
    #[allow(clippy::must_use_candidate)]
    pub fn set_map_state(&self, patch: MapViewPatch) -> bool {
        let bounds_changed = {
            let mut state = self.state();
            let before = state.view.bounds;
            state.view.apply(patch);
            before != state.view.bounds
        };
        if bounds_changed {
            self.request_sync();
        }
        bounds_changed
    }

    /// Merges `patch` into the filters.
    pub fn set_filters(&self, patch: MapFiltersPatch) {
        let bounds_changed = {
            let mut state = self.state();
            state.filters.apply(patch);
            state.refresh(true)
        };
        if bounds_changed {
            self.request_sync();
        }
    }

    /// Resets every filter to its default.
    pub fn clear_filters(&self) {
        let bounds_changed = {
            let mut state = self.state();
            state.filters = MapFilters::default();
            state.refresh(true)
        };
        if bounds_changed {
            self.request_sync();
        }
    }

    /// The selected record, if any.
    #[must_use]
    pub fn selected_record(&self) -> Option<PropertyRecord> {
        let state = self.state();
        let id = state.selected.as_ref()?;
        state.combined().into_iter().find(|r| &r.id == id)
    }

    /// Selects the record with `id` if it passes the filters. Returns
    /// whether it was selected.
    #[allow(clippy::must_use_candidate)]
    pub fn select_record(&self, id: &str) -> bool {
        let mut state = self.state();
        let visible = state.filtered().iter().any(|r| r.id == id);
        if visible {
            state.selected = Some(id.to_string());
        }
        visible
    }

    /// Clears the selection.
    pub fn clear_selection(&self) {
        self.state().selected = None;
    }

    /// Error message from the last failed search, cleared by the next
    /// successful one.
    #[must_use]
    pub fn search_error(&self) -> Option<String> {
        self.state().search_error.clone()
    }

    /// Whether a search is in flight.
    #[must_use]
    pub fn is_searching(&self) -> bool {
        self.state().searching
    }

    /// Resolves `query` and recenters the view on it at search zoom.
    ///
    /// Only the most recently started search may move the map; an older
    /// one finishing later reports [`SearchOutcome::Superseded`] and
    /// changes nothing. On failure the view is left alone and the error is
    /// kept in [`Self::search_error`].
    pub async fn search_location(&self, query: &str) -> SearchOutcome {
        let token = self.search_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.state().searching = true;

        let result = self.resolver.resolve(query).await;

        if self.search_seq.load(Ordering::SeqCst) != token {
            log::debug!("Search for '{query}' superseded by a newer one");
            return SearchOutcome::Superseded;
        }

        let mut state = self.state();
        state.searching = false;
        match result {
            Ok(found) => {
                log::debug!("Search '{query}' resolved to {}", found.resolved_address);
                state.view.center = found.coordinates;
                state.view.zoom = SEARCH_ZOOM;
                state.search_error = None;
                SearchOutcome::Applied
            }
            Err(e) => {
                log::warn!("Search for '{query}' failed: {e}");
                state.search_error = Some(e.to_string());
                SearchOutcome::NotFound
            }
        }
    }

    /// Centers on `record` at focus zoom and selects it. Returns `false`
    /// and does nothing if the record has no coordinates.
    #[allow(clippy::must_use_candidate)]
    pub fn focus_on_record(&self, record: &PropertyRecord) -> bool {
        let Some(coordinates) = record.coordinates else {
            return false;
        };
        let mut state = self.state();
        state.view.center = coordinates;
        state.view.zoom = FOCUS_ZOOM;
        state.selected = Some(record.id.clone());
        true
    }

    /// Marker clusters for the filtered records at the current zoom and
    /// bounds. Empty while markers are hidden.
    #[must_use]
    pub fn clusters(&self) -> Vec<ClusterPoint> {
        let (records, view) = {
            let state = self.state();
            if !state.filters.show_markers {
                return Vec::new();
            }
            (state.filtered(), state.view)
        };
        lock(&self.clusters).cluster(&records, view.zoom, view.bounds.as_ref())
    }

    /// Heatmap cells for the filtered records over the current bounds (or
    /// the records' envelope before bounds are known). Empty while the
    /// heatmap is hidden.
    #[must_use]
    pub fn heatmap_cells(&self) -> Vec<HeatmapCell> {
        let (records, view) = {
            let state = self.state();
            if !state.filters.show_heatmap {
                return Vec::new();
            }
            (state.filtered(), state.view)
        };
        let bounds = view
            .bounds
            .or_else(|| BoundingBox::enclosing(records.iter().filter_map(|r| r.coordinates)));
        let Some(bounds) = bounds else {
            return Vec::new();
        };
        lock(&self.heatmap).aggregate(&records, &bounds, view.zoom)
    }

    /// Heatmap most recently announced by the attached sync service.
    #[must_use]
    pub fn live_heatmap(&self) -> Option<LiveHeatmap> {
        self.state().live_heatmap.clone()
    }

    /// Subscribes to `service`'s record and heatmap channels, replacing any
    /// previously attached service.
    pub fn attach_sync(&self, service: Arc<SyncService>) {
        self.detach_sync();

        let subscriptions = [Channel::RecordUpdates, Channel::HeatmapInvalidations]
            .into_iter()
            .map(|channel| {
                let me = self.me.clone();
                service.broadcaster().subscribe(channel, move |event| {
                    if let Some(manager) = me.upgrade() {
                        manager.apply_sync_event(event);
                    }
                })
            })
            .collect();

        *lock(&self.sync) = Some(Attached {
            service,
            subscriptions,
        });
        log::debug!("Viewport attached to sync service");

        if self.state().view.bounds.is_some() {
            self.request_sync();
        }
    }

    /// Unsubscribes from the attached sync service, if any.
    pub fn detach_sync(&self) {
        let attached = lock(&self.sync).take();
        if let Some(attached) = attached {
            for subscription in attached.subscriptions {
                subscription.unsubscribe();
            }
            log::debug!("Viewport detached from sync service");
        }
    }

    fn sync_service(&self) -> Option<Arc<SyncService>> {
        lock(&self.sync).as_ref().map(|a| a.service.clone())
    }

    /// Applies one event from the sync service.
    pub fn apply_sync_event(&self, event: &SyncEvent) {
        let bounds_changed = {
            let mut state = self.state();
            match event {
                SyncEvent::RecordAdded(record) | SyncEvent::RecordUpdated(record) => {
                    state.removed.remove(&record.id);
                    state.synced.insert(record.id.clone(), record.clone());
                }
                SyncEvent::RecordRemoved { id } => {
                    state.synced.remove(id);
                    state.removed.insert(id.clone());
                }
                SyncEvent::HeatmapUpdated {
                    bounds,
                    zoom,
                    cells,
                } => {
                    state.live_heatmap = Some(LiveHeatmap {
                        bounds: *bounds,
                        zoom: *zoom,
                        cells: cells.clone(),
                    });
                    return;
                }
            }
            state.refresh(true)
        };
        if bounds_changed {
            self.request_sync();
        }
    }

    /// Fetches records for the buffered current bounds from the attached
    /// sync service, merges them into the synced set and asks the service
    /// to recompute its heatmap there. Returns the number of records
    /// fetched.
    pub async fn sync_bounds(&self) -> usize {
        let Some(service) = self.sync_service() else {
            return 0;
        };
        let view = self.map_state();
        let Some(bounds) = view.bounds else {
            return 0;
        };
        let buffered = bounds.buffered(PREFETCH_BUFFER_RATIO);

        let records = service.fetch_records_in_bounds(&buffered, false).await;
        let fetched = records.len();
        {
            let mut state = self.state();
            for record in records {
                state.removed.remove(&record.id);
                state.synced.insert(record.id.clone(), record);
            }
            // Lazily loaded records never re-frame the camera.
            state.refresh(false);
        }

        service.recompute_heatmap(&buffered, view.zoom).await;
        log::debug!("Synced {fetched} records for {}", buffered.cache_key());
        fetched
    }

    fn request_sync(&self) {
        if self.sync_service().is_none() {
            return;
        }
        let Some(manager) = self.me.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn(async move {
                manager.sync_bounds().await;
            })),
            Err(_) => log::debug!("No async runtime, skipping background viewport sync"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rental_map_geocoder::clock::ManualClock;
    use rental_map_geocoder::known_places::match_city;
    use rental_map_geocoder::service_registry::resolver_config;
    use rental_map_geocoder::store::MemoryCacheStore;
    use rental_map_geocoder::{ForwardQuery, GeocodeError, GeocodingProvider, PlaceCandidate};
    use rental_map_models::{GeoPoint, ListingType, PriceRange};
    use rental_map_sync::{Broadcaster, RecordSource, SourceError};

    use super::*;

    fn record(id: &str, lng: f64, lat: f64, price: f64, property_type: &str) -> PropertyRecord {
        PropertyRecord {
            id: id.to_string(),
            title: Some(format!("Listing {id}")),
            address: format!("{id} Marina Road"),
            city: Some("Lagos".to_string()),
            state: Some("Lagos".to_string()),
            coordinates: Some(GeoPoint::new(lng, lat)),
            price,
            property_type: property_type.to_string(),
            bedrooms: 2,
            listing_type: ListingType::Rent,
            updated_at: None,
        }
    }

    fn sample() -> Vec<PropertyRecord> {
        vec![
            record("a", 3.40, 6.40, 1_000_000.0, "apartment"),
            record("b", 3.42, 6.41, 2_000_000.0, "apartment"),
            record("c", 3.90, 6.90, 9_000_000.0, "duplex"),
        ]
    }

    fn resolver(provider: Option<Arc<dyn GeocodingProvider>>) -> Arc<GeocodingResolver> {
        Arc::new(GeocodingResolver::new(
            provider,
            Arc::new(MemoryCacheStore::new()),
            Arc::new(ManualClock::default()),
            resolver_config(),
        ))
    }

    fn manager() -> Arc<ViewportManager> {
        ViewportManager::new(resolver(None))
    }

    fn types(names: &[&str]) -> MapFiltersPatch {
        MapFiltersPatch {
            property_types: Some(names.iter().map(ToString::to_string).collect()),
            ..MapFiltersPatch::default()
        }
    }

    fn ids(records: &[PropertyRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    /// Resolves known city names, taking a while for Abuja.
    struct SlowForAbuja;

    #[async_trait]
    impl GeocodingProvider for SlowForAbuja {
        fn id(&self) -> &str {
            "slow_for_abuja"
        }

        async fn forward(
            &self,
            query: &ForwardQuery,
        ) -> Result<Vec<PlaceCandidate>, GeocodeError> {
            let Some(city) = match_city(&query.text) else {
                return Ok(Vec::new());
            };
            if city.key == "abuja" {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(vec![PlaceCandidate {
                place_name: format!("{}, Nigeria", city.name),
                text: city.name.to_string(),
                address_number: None,
                center: city.center,
                relevance: 0.9,
                context: Vec::new(),
                bbox: None,
            }])
        }

        async fn reverse(&self, _point: GeoPoint) -> Result<Vec<PlaceCandidate>, GeocodeError> {
            Ok(Vec::new())
        }
    }

    struct MemorySource {
        records: Vec<PropertyRecord>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl RecordSource for MemorySource {
        fn id(&self) -> &str {
            "memory"
        }

        async fn fetch_in_bounds(
            &self,
            bounds: &BoundingBox,
        ) -> Result<Vec<PropertyRecord>, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .iter()
                .filter(|r| r.coordinates.is_some_and(|c| bounds.contains(&c)))
                .cloned()
                .collect())
        }

        async fn fetch_updated_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<PropertyRecord>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn sync_service(records: Vec<PropertyRecord>) -> (Arc<SyncService>, Arc<MemorySource>) {
        let source = Arc::new(MemorySource {
            records,
            fetches: AtomicUsize::new(0),
        });
        let service = Arc::new(SyncService::new(
            source.clone(),
            resolver(None),
            Broadcaster::new(),
            Arc::new(ManualClock::default()),
        ));
        (service, source)
    }

    #[test]
    fn filters_combine_and_empty_dimensions_are_unconstrained() {
        let manager = manager();
        manager.set_records(sample());
        assert_eq!(manager.filtered_records().len(), 3);

        manager.set_filters(MapFiltersPatch {
            price_range: Some(PriceRange {
                min: Some(1_500_000.0),
                max: None,
            }),
            ..MapFiltersPatch::default()
        });
        assert_eq!(ids(&manager.filtered_records()), ["b", "c"]);

        manager.set_filters(types(&["Apartment"]));
        assert_eq!(ids(&manager.filtered_records()), ["b"]);

        manager.clear_filters();
        assert_eq!(manager.filtered_records().len(), 3);
        assert_eq!(manager.filters(), MapFilters::default());
    }

    #[test]
    fn set_map_state_merges_and_reports_bounds_change() {
        let manager = manager();
        let bounds = BoundingBox::new(3.3, 6.3, 3.5, 6.5);

        assert!(!manager.set_map_state(MapViewPatch {
            zoom: Some(12.0),
            ..MapViewPatch::default()
        }));
        assert!(manager.set_map_state(MapViewPatch {
            bounds: Some(Some(bounds)),
            ..MapViewPatch::default()
        }));
        assert!(!manager.set_map_state(MapViewPatch {
            bounds: Some(Some(bounds)),
            ..MapViewPatch::default()
        }));

        let view = manager.map_state();
        assert!((view.zoom - 12.0).abs() < f64::EPSILON);
        assert_eq!(view.bounds, Some(bounds));
    }

    #[test]
    fn narrowing_filters_fit_the_view() {
        let manager = manager();
        manager.set_records(sample());
        let untouched = manager.map_state();
        assert!(untouched.bounds.is_none());

        manager.set_filters(types(&["apartment"]));
        let view = manager.map_state();
        assert_eq!(view.bounds, Some(BoundingBox::new(3.40, 6.40, 3.42, 6.41)));
        assert!((view.center.lng - 3.41).abs() < 1e-9);
        assert!((view.zoom - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn filter_matching_nothing_leaves_view_alone() {
        let manager = manager();
        manager.set_records(sample());
        manager.set_filters(types(&["bungalow"]));

        assert!(manager.filtered_records().is_empty());
        assert_eq!(manager.map_state(), MapViewState::default());
    }

    #[test]
    fn filtered_out_selection_is_cleared() {
        let manager = manager();
        manager.set_records(sample());
        assert!(manager.select_record("c"));
        assert_eq!(manager.selected_record().unwrap().id, "c");

        manager.set_filters(types(&["apartment"]));
        assert!(manager.selected_record().is_none());
        assert!(!manager.select_record("c"));
    }

    #[test]
    fn focus_recenters_and_selects() {
        let manager = manager();
        let records = sample();
        manager.set_records(records.clone());

        assert!(manager.focus_on_record(&records[2]));
        let view = manager.map_state();
        assert_eq!(view.center, GeoPoint::new(3.90, 6.90));
        assert!((view.zoom - FOCUS_ZOOM).abs() < f64::EPSILON);
        assert_eq!(manager.selected_record().unwrap().id, "c");

        let mut unlocated = records[0].clone();
        unlocated.coordinates = None;
        assert!(!manager.focus_on_record(&unlocated));
        assert_eq!(manager.map_state(), view);
    }

    #[test]
    fn records_in_bounds_uses_bounds_when_known() {
        let manager = manager();
        manager.set_records(sample());
        assert_eq!(manager.records_in_bounds().len(), 3);

        manager.set_map_state(MapViewPatch {
            bounds: Some(Some(BoundingBox::new(3.3, 6.3, 3.5, 6.5))),
            ..MapViewPatch::default()
        });
        assert_eq!(ids(&manager.records_in_bounds()), ["a", "b"]);
    }

    #[test]
    fn layers_follow_visibility_toggles() {
        let manager = manager();
        manager.set_records(sample());

        let clusters = manager.clusters();
        assert_eq!(clusters.iter().map(|c| c.count).sum::<usize>(), 3);
        assert!(manager.heatmap_cells().is_empty());

        manager.set_filters(MapFiltersPatch {
            show_markers: Some(false),
            show_heatmap: Some(true),
            ..MapFiltersPatch::default()
        });
        assert!(manager.clusters().is_empty());
        let cells = manager.heatmap_cells();
        assert_eq!(cells.iter().map(|c| c.count).sum::<usize>(), 3);
    }

    #[test]
    fn clusters_reflect_updated_record_details() {
        let manager = manager();
        let mut original = record("a", 3.40, 6.40, 1_000_000.0, "apartment");
        original.title = Some("Old title".to_string());
        manager.set_records(vec![original.clone()]);

        let before = manager.clusters();
        assert_eq!(before[0].members[0].title.as_deref(), Some("Old title"));

        let mut updated = original;
        updated.title = Some("New title".to_string());
        updated.bedrooms = 4;
        manager.apply_sync_event(&SyncEvent::RecordUpdated(updated));

        let after = manager.clusters();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].members[0].title.as_deref(), Some("New title"));
        assert_eq!(after[0].members[0].bedrooms, 4);
    }

    #[tokio::test]
    async fn search_recenters_on_success() {
        let manager = manager();
        assert_eq!(manager.search_location("Abuja").await, SearchOutcome::Applied);

        let view = manager.map_state();
        assert_eq!(view.center, GeoPoint::new(7.3986, 9.0765));
        assert!((view.zoom - SEARCH_ZOOM).abs() < f64::EPSILON);
        assert!(manager.search_error().is_none());
        assert!(!manager.is_searching());
    }

    #[tokio::test]
    async fn failed_search_keeps_view_and_reports_error() {
        let manager = manager();
        let before = manager.map_state();

        assert_eq!(
            manager.search_location("Nowhere In Particular").await,
            SearchOutcome::NotFound
        );
        assert_eq!(manager.map_state(), before);
        assert!(manager.search_error().is_some());

        manager.search_location("Ibadan").await;
        assert!(manager.search_error().is_none());
    }

    #[tokio::test]
    async fn only_latest_search_moves_the_map() {
        let manager = ViewportManager::new(resolver(Some(Arc::new(SlowForAbuja))));

        let (slow, fast) = tokio::join!(
            manager.search_location("Abuja"),
            manager.search_location("Ibadan"),
        );

        assert_eq!(slow, SearchOutcome::Superseded);
        assert_eq!(fast, SearchOutcome::Applied);
        assert_eq!(manager.map_state().center, GeoPoint::new(3.9470, 7.3775));
        assert!(!manager.is_searching());
    }

    #[tokio::test]
    async fn live_updates_overlay_original_records() {
        let manager = manager();
        manager.set_records(sample());
        let (service, _) = sync_service(Vec::new());
        manager.attach_sync(service.clone());

        let mut repriced = sample()[0].clone();
        repriced.price = 1_250_000.0;
        assert!(service.upsert_record(repriced).await);
        assert!(
            service
                .upsert_record(record("d", 3.41, 6.42, 3_000_000.0, "studio"))
                .await
        );

        let records = manager.filtered_records();
        assert_eq!(records.len(), 4);
        let a = records.iter().find(|r| r.id == "a").unwrap();
        assert!((a.price - 1_250_000.0).abs() < f64::EPSILON);

        assert!(service.remove_record("d"));
        manager.apply_sync_event(&SyncEvent::RecordRemoved {
            id: "c".to_string(),
        });
        assert_eq!(
            manager
                .filtered_records()
                .iter()
                .map(|r| r.id.as_str())
                .collect::<BTreeSet<_>>(),
            BTreeSet::from(["a", "b"])
        );
    }

    #[tokio::test]
    async fn detached_manager_ignores_events() {
        let manager = manager();
        let (service, _) = sync_service(Vec::new());
        manager.attach_sync(service.clone());
        assert_eq!(
            service
                .broadcaster()
                .subscriber_count(Channel::RecordUpdates),
            1
        );

        manager.detach_sync();
        assert_eq!(
            service
                .broadcaster()
                .subscriber_count(Channel::RecordUpdates),
            0
        );
        service
            .upsert_record(record("d", 3.41, 6.42, 3_000_000.0, "studio"))
            .await;
        assert!(manager.filtered_records().is_empty());
    }

    #[tokio::test]
    async fn sync_bounds_loads_buffered_area_and_heatmap() {
        let manager = manager();
        let (service, source) = sync_service(vec![
            record("near", 3.45, 6.45, 1_000_000.0, "apartment"),
            // Just outside the visible bounds but inside the buffer.
            record("edge", 3.51, 6.45, 2_000_000.0, "apartment"),
            record("far", 7.40, 9.07, 5_000_000.0, "duplex"),
        ]);
        manager.attach_sync(service);

        manager.set_map_state(MapViewPatch {
            bounds: Some(Some(BoundingBox::new(3.4, 6.4, 3.5, 6.5))),
            ..MapViewPatch::default()
        });
        assert_eq!(manager.sync_bounds().await, 2);
        assert!(source.fetches.load(Ordering::SeqCst) >= 1);

        let loaded: BTreeSet<String> =
            manager.records().into_iter().map(|r| r.id).collect();
        assert_eq!(loaded, BTreeSet::from(["near".to_string(), "edge".to_string()]));

        let live = manager.live_heatmap().unwrap();
        assert_eq!(live.bounds, BoundingBox::new(3.4, 6.4, 3.5, 6.5).buffered(0.2));
        assert_eq!(live.cells.iter().map(|c| c.count).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn bounds_change_triggers_background_fetch() {
        let manager = manager();
        let (service, source) =
            sync_service(vec![record("near", 3.45, 6.45, 1_000_000.0, "apartment")]);
        manager.attach_sync(service);

        manager.set_map_state(MapViewPatch {
            bounds: Some(Some(BoundingBox::new(3.4, 6.4, 3.5, 6.5))),
            ..MapViewPatch::default()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(source.fetches.load(Ordering::SeqCst) >= 1);
        assert_eq!(ids(&manager.records()), ["near"]);
    }
}
