//! Zoom-dependent marker clustering.
//!
//! Records are grouped greedily: each record not yet claimed seeds a
//! cluster and absorbs every other unclaimed record within the zoom's
//! radius of the seed. Distances are planar in coordinate degrees. An
//! R-tree answers the radius query, which yields the same groups as
//! scanning every remaining record.
//!
//! Above [`CLUSTER_MAX_ZOOM`] nothing is grouped and every located record
//! becomes a singleton.

use geo::{Centroid, MultiPoint, Point};
use rental_map_models::{BoundingBox, ClusterPoint, GeoPoint, PropertyRecord};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::digest::record_set_digest;
use crate::render_cache::RenderCache;

/// Zoom levels above this are never clustered.
pub const CLUSTER_MAX_ZOOM: f64 = 15.0;

/// Cluster radius in degrees at [`REFERENCE_ZOOM`].
pub const BASE_RADIUS: f64 = 0.05;

/// Zoom level at which the radius equals [`BASE_RADIUS`].
pub const REFERENCE_ZOOM: f64 = 10.0;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Grouping radius in degrees for `zoom`. Halves with every zoom level.
#[must_use]
pub fn cluster_radius(zoom: f64) -> f64 {
    BASE_RADIUS / 2f64.powf(zoom - REFERENCE_ZOOM)
}

/// Records that have valid coordinates and, if `bounds` is given, lie
/// inside it.
pub(crate) fn located_in_bounds<'a>(
    records: &'a [PropertyRecord],
    bounds: Option<&'a BoundingBox>,
) -> impl Iterator<Item = (&'a PropertyRecord, GeoPoint)> + 'a {
    records.iter().filter_map(move |r| {
        let point = r.coordinates.filter(GeoPoint::is_valid)?;
        bounds.is_none_or(|b| b.contains(&point)).then_some((r, point))
    })
}

/// Groups `records` for display at `zoom`.
///
/// Records without coordinates, or outside `bounds` when given, are
/// skipped. Every remaining record appears in exactly one cluster.
#[must_use]
pub fn cluster_records(
    records: &[PropertyRecord],
    zoom: f64,
    bounds: Option<&BoundingBox>,
) -> Vec<ClusterPoint> {
    let located: Vec<(&PropertyRecord, GeoPoint)> = located_in_bounds(records, bounds).collect();

    if zoom > CLUSTER_MAX_ZOOM {
        return located
            .into_iter()
            .map(|(record, point)| singleton(record, point))
            .collect();
    }

    let radius = cluster_radius(zoom);
    let tree = RTree::bulk_load(
        located
            .iter()
            .enumerate()
            .map(|(i, (_, p))| IndexedPoint::new([p.lng, p.lat], i))
            .collect(),
    );

    let mut claimed = vec![false; located.len()];
    let mut clusters = Vec::new();

    for seed in 0..located.len() {
        if claimed[seed] {
            continue;
        }
        claimed[seed] = true;

        let (_, seed_point) = located[seed];
        let mut members: Vec<usize> = tree
            .locate_within_distance([seed_point.lng, seed_point.lat], radius * radius)
            .map(|entry| entry.data)
            .filter(|&i| !claimed[i])
            .collect();
        members.sort_unstable();
        for &i in &members {
            claimed[i] = true;
        }

        if members.is_empty() {
            let (record, point) = located[seed];
            clusters.push(singleton(record, point));
            continue;
        }

        members.insert(0, seed);
        let n = clusters.len();
        clusters.push(group(n, members.iter().map(|&i| located[i])));
    }

    clusters
}

fn singleton(record: &PropertyRecord, point: GeoPoint) -> ClusterPoint {
    ClusterPoint {
        id: record.id.clone(),
        coordinates: point,
        members: vec![record.clone()],
        count: 1,
        bounds: BoundingBox::new(point.lng, point.lat, point.lng, point.lat),
    }
}

fn group<'a>(
    index: usize,
    members: impl Iterator<Item = (&'a PropertyRecord, GeoPoint)>,
) -> ClusterPoint {
    let (records, points): (Vec<PropertyRecord>, Vec<GeoPoint>) =
        members.map(|(r, p)| (r.clone(), p)).unzip();

    let first = points[0];
    let coordinates = MultiPoint::new(points.iter().map(|p| Point::new(p.lng, p.lat)).collect())
        .centroid()
        .map_or(first, |c| GeoPoint::new(c.x(), c.y()));
    let bounds = BoundingBox::enclosing(points.iter().copied())
        .unwrap_or_else(|| BoundingBox::new(first.lng, first.lat, first.lng, first.lat));

    ClusterPoint {
        id: format!("cluster-{index}-{}", records[0].id),
        coordinates,
        count: records.len(),
        members: records,
        bounds,
    }
}

/// Clustering with a render cache in front.
///
/// Cache keys combine zoom, bounds and a digest of the located in-bounds
/// records, so any change to the visible set recomputes.
#[derive(Debug, Default)]
pub struct ClusterEngine {
    cache: RenderCache<Vec<ClusterPoint>>,
}

impl ClusterEngine {
    /// Creates an engine with a cache of `capacity` entries.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            cache: RenderCache::new(capacity),
        }
    }

    /// Cached [`cluster_records`].
    pub fn cluster(
        &mut self,
        records: &[PropertyRecord],
        zoom: f64,
        bounds: Option<&BoundingBox>,
    ) -> Vec<ClusterPoint> {
        let digest = record_set_digest(located_in_bounds(records, bounds).map(|(r, _)| r));
        let key = format!(
            "{zoom:.2}|{}|{digest}",
            bounds.map_or_else(|| "all".to_string(), BoundingBox::cache_key)
        );

        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let clusters = cluster_records(records, zoom, bounds);
        self.cache.insert(key, clusters.clone());
        clusters
    }

    /// Number of cached clusterings.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drops all cached clusterings.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
