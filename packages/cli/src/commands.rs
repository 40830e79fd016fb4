//! Subcommand implementations.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rental_map_geocoder::GeocodingResolver;
use rental_map_geocoder::clock::SystemClock;
use rental_map_models::{BoundingBox, MapFiltersPatch, MapViewPatch, PriceRange, PropertyRecord};
use rental_map_spatial::export::{clusters_to_geojson, heatmap_to_geojson};
use rental_map_sync::polling::spawn_polling;
use rental_map_sync::source::JsonFileRecordSource;
use rental_map_sync::{Broadcaster, Channel, SyncEvent, SyncService};
use rental_map_viewport::ViewportManager;
use rental_map_viewport::fit::{fit_records, zoom_for_span};
use tokio::sync::watch;

use crate::ViewArgs;

type CmdResult = Result<(), Box<dyn Error>>;

/// Bounds used to load a whole records file when no `--bbox` is given.
const WORLD: BoundingBox = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);

/// Prints the resolved location of `address` as JSON.
pub async fn geocode(resolver: &GeocodingResolver, address: &str) -> CmdResult {
    let result = resolver.resolve(address).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Resolves every non-empty line of `file` and prints the results as a
/// JSON array, one entry per line.
pub async fn batch_geocode(resolver: &GeocodingResolver, file: &Path) -> CmdResult {
    let contents = tokio::fs::read_to_string(file).await?;
    let addresses: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect();

    log::info!("Resolving {} addresses from {}", addresses.len(), file.display());
    let results = resolver.batch_resolve(&addresses).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Prints one suggestion per line.
pub async fn autocomplete(resolver: &GeocodingResolver, query: &str, limit: usize) -> CmdResult {
    let suggestions = resolver.search_autocomplete(query, limit).await;
    if suggestions.is_empty() {
        println!("No suggestions for '{query}'");
    }
    for s in &suggestions {
        println!(
            "{:<50} {:>9.4} {:>9.4}  ({:.2})",
            s.place_name, s.coordinates.lat, s.coordinates.lng, s.relevance
        );
    }
    Ok(())
}

/// Prints marker clusters as `GeoJSON`.
pub async fn clusters(resolver: Arc<GeocodingResolver>, args: &ViewArgs) -> CmdResult {
    let manager = load_view(resolver, args, false).await?;
    let clusters = manager.clusters();
    log::info!(
        "{} markers for {} filtered records at zoom {}",
        clusters.len(),
        manager.filtered_records().len(),
        manager.map_state().zoom
    );
    println!("{}", serde_json::to_string_pretty(&clusters_to_geojson(&clusters))?);
    Ok(())
}

/// Prints heatmap cells as `GeoJSON`.
pub async fn heatmap(resolver: Arc<GeocodingResolver>, args: &ViewArgs) -> CmdResult {
    let manager = load_view(resolver, args, true).await?;
    let cells = manager.heatmap_cells();
    log::info!(
        "{} heatmap cells for {} filtered records at zoom {}",
        cells.len(),
        manager.filtered_records().len(),
        manager.map_state().zoom
    );
    println!("{}", serde_json::to_string_pretty(&heatmap_to_geojson(&cells))?);
    Ok(())
}

/// Loads the records file (geocoding records without coordinates) into a
/// viewport with the requested filters and camera.
async fn load_view(
    resolver: Arc<GeocodingResolver>,
    args: &ViewArgs,
    show_heatmap: bool,
) -> Result<Arc<ViewportManager>, Box<dyn Error>> {
    tokio::fs::metadata(&args.records)
        .await
        .map_err(|e| format!("Can't read {}: {e}", args.records.display()))?;

    let sync = SyncService::new(
        Arc::new(JsonFileRecordSource::new(&args.records)),
        resolver.clone(),
        Broadcaster::new(),
        Arc::new(SystemClock),
    );
    let records = sync
        .fetch_records_in_bounds(&args.bbox.unwrap_or(WORLD), true)
        .await;
    log::info!(
        "Loaded {} records ({} located)",
        records.len(),
        records.iter().filter(|r| r.is_located()).count()
    );

    let manager = ViewportManager::new(resolver);
    manager.set_records(records);
    manager.set_filters(MapFiltersPatch {
        property_types: Some(args.property_types.iter().cloned().collect()),
        price_range: Some(PriceRange {
            min: args.min_price,
            max: args.max_price,
        }),
        bedrooms: Some(args.bedrooms.iter().copied().collect()),
        listing_types: Some(args.listing.iter().copied().collect()),
        show_heatmap: Some(show_heatmap),
        show_markers: Some(!show_heatmap),
    });
    manager.set_map_state(camera_patch(
        args.zoom,
        args.bbox,
        &manager.filtered_records(),
    ));
    Ok(manager)
}

/// Camera for a one-shot render. `--bbox` frames the map, otherwise the
/// filtered records do; `--zoom` overrides the derived zoom either way.
fn camera_patch(
    zoom: Option<f64>,
    bbox: Option<BoundingBox>,
    filtered: &[PropertyRecord],
) -> MapViewPatch {
    if let Some(bbox) = bbox {
        return MapViewPatch {
            center: Some(bbox.center()),
            zoom: Some(zoom.unwrap_or_else(|| zoom_for_span(bbox.max_span()))),
            bounds: Some(Some(bbox)),
        };
    }

    let fitted = fit_records(filtered);
    MapViewPatch {
        center: fitted.map(|v| v.center),
        zoom: zoom.or_else(|| fitted.map(|v| v.zoom)),
        bounds: fitted.map(|v| v.bounds),
    }
}

/// Polls `records` and prints record changes until Ctrl-C.
pub async fn watch_records(
    resolver: Arc<GeocodingResolver>,
    records: PathBuf,
    interval_secs: u64,
) -> CmdResult {
    let service = Arc::new(SyncService::new(
        Arc::new(JsonFileRecordSource::new(records)),
        resolver,
        Broadcaster::new(),
        Arc::new(SystemClock),
    ));

    let subscription = service
        .broadcaster()
        .subscribe(Channel::RecordUpdates, |event| match event {
            SyncEvent::RecordAdded(r) => println!("added    {:<12} {}", r.id, r.address),
            SyncEvent::RecordUpdated(r) => println!("updated  {:<12} {}", r.id, r.address),
            SyncEvent::RecordRemoved { id } => println!("removed  {id}"),
            SyncEvent::HeatmapUpdated { .. } => {}
        });

    let (visible, visibility) = watch::channel(true);
    let handle = spawn_polling(
        service,
        visibility,
        Duration::from_secs(interval_secs.max(1)),
    );
    log::info!("Polling every {interval_secs}s, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    drop(visible);
    handle.await?;
    subscription.unsubscribe();
    Ok(())
}

/// Purges expired geocodes, or clears the cache entirely.
pub fn cache(resolver: &GeocodingResolver, clear: bool) {
    if clear {
        let removed = resolver.cache_len();
        resolver.clear_cache();
        println!("Cleared {removed} cached geocodes");
    } else {
        let purged = resolver.purge_expired();
        println!(
            "{} cached geocodes ({purged} expired entries removed)",
            resolver.cache_len()
        );
    }
}
