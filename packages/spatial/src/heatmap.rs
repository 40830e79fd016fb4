//! Price heatmap aggregation.
//!
//! Located records inside the bounds are binned into a square grid whose
//! cell size halves with every zoom level (never below
//! [`MIN_CELL_SIZE`]). Each cell's weight is the mean price of its
//! records, rescaled across all cells to `[0, 1]`.

use std::collections::BTreeMap;

use rental_map_models::{BoundingBox, GeoPoint, HeatmapCell, PropertyRecord};

use crate::cluster::located_in_bounds;
use crate::digest::record_set_digest;
use crate::render_cache::RenderCache;

/// Cell edge in degrees at [`REFERENCE_ZOOM`].
pub const BASE_CELL_SIZE: f64 = 0.01;

/// Smallest cell edge in degrees.
pub const MIN_CELL_SIZE: f64 = 0.0005;

/// Zoom level at which the cell size equals [`BASE_CELL_SIZE`].
pub const REFERENCE_ZOOM: f64 = 10.0;

/// Grid cell edge in degrees for `zoom`.
#[must_use]
pub fn cell_size(zoom: f64) -> f64 {
    (BASE_CELL_SIZE / 2f64.powf(zoom - REFERENCE_ZOOM)).max(MIN_CELL_SIZE)
}

/// Bins `records` inside `bounds` into heatmap cells, ordered by grid
/// position.
///
/// When every cell has the same mean price all weights are `1.0`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn aggregate(records: &[PropertyRecord], bounds: &BoundingBox, zoom: f64) -> Vec<HeatmapCell> {
    let size = cell_size(zoom);

    let mut bins: BTreeMap<(i64, i64), (f64, usize)> = BTreeMap::new();
    for (record, point) in located_in_bounds(records, Some(bounds)) {
        let key = (
            (point.lng / size).floor() as i64,
            (point.lat / size).floor() as i64,
        );
        let bin = bins.entry(key).or_insert((0.0, 0));
        bin.0 += record.price;
        bin.1 += 1;
    }

    let means: Vec<((i64, i64), f64, usize)> = bins
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64, count))
        .collect();

    let (min, max) = means
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, mean, _)| {
            (lo.min(*mean), hi.max(*mean))
        });
    let range = max - min;

    means
        .into_iter()
        .map(|((x, y), mean, count)| HeatmapCell {
            coordinates: GeoPoint::new((x as f64 + 0.5) * size, (y as f64 + 0.5) * size),
            weight: if range > 0.0 {
                (mean - min) / range
            } else {
                1.0
            },
            count,
        })
        .collect()
}

/// Heatmap aggregation with a render cache in front.
#[derive(Debug, Default)]
pub struct HeatmapAggregator {
    cache: RenderCache<Vec<HeatmapCell>>,
}

impl HeatmapAggregator {
    /// Creates an aggregator with a cache of `capacity` entries.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            cache: RenderCache::new(capacity),
        }
    }

    /// Cached [`aggregate`], keyed by zoom, bounds and a digest of the
    /// records inside the bounds.
    pub fn aggregate(
        &mut self,
        records: &[PropertyRecord],
        bounds: &BoundingBox,
        zoom: f64,
    ) -> Vec<HeatmapCell> {
        let digest = record_set_digest(located_in_bounds(records, Some(bounds)).map(|(r, _)| r));
        let key = format!("{zoom:.2}|{}|{digest}", bounds.cache_key());

        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let cells = aggregate(records, bounds, zoom);
        self.cache.insert(key, cells.clone());
        cells
    }

    /// Number of cached results.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drops all cached results.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
