#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geographic and property record types for the rental map core.
//!
//! These types are shared by the geocoder, the spatial engines, the sync
//! service and the viewport manager. They are plain data: every type
//! serializes to the JSON shapes the map frontend consumes (`camelCase`
//! fields, coordinates as `[longitude, latitude]` pairs).

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A WGS84 coordinate pair.
///
/// Serialized as a `[longitude, latitude]` array, matching `GeoJSON`
/// position ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    /// Longitude in degrees, `[-180, 180]`.
    pub lng: f64,
    /// Latitude in degrees, `[-90, 90]`.
    pub lat: f64,
}

impl GeoPoint {
    /// Creates a point from a longitude/latitude pair.
    #[must_use]
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Whether both components are finite and inside the WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }

    /// Planar distance in coordinate degrees.
    ///
    /// Not geodesic. Good enough for grouping markers at city scale.
    #[must_use]
    pub fn degree_distance(&self, other: &Self) -> f64 {
        (self.lng - other.lng).hypot(self.lat - other.lat)
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([lng, lat]: [f64; 2]) -> Self {
        Self { lng, lat }
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(p: GeoPoint) -> Self {
        [p.lng, p.lat]
    }
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Smallest box enclosing every point, or `None` for an empty input.
    #[must_use]
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = GeoPoint>,
    {
        points.into_iter().fold(None, |acc: Option<Self>, p| {
            Some(acc.map_or_else(
                || Self::new(p.lng, p.lat, p.lng, p.lat),
                |b| {
                    Self::new(
                        b.west.min(p.lng),
                        b.south.min(p.lat),
                        b.east.max(p.lng),
                        b.north.max(p.lat),
                    )
                },
            ))
        })
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lng >= self.west
            && point.lng <= self.east
            && point.lat >= self.south
            && point.lat <= self.north
    }

    /// Midpoint of the box.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            f64::midpoint(self.west, self.east),
            f64::midpoint(self.south, self.north),
        )
    }

    /// Width in degrees of longitude.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in degrees of latitude.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// The larger of [`Self::width`] and [`Self::height`].
    #[must_use]
    pub fn max_span(&self) -> f64 {
        self.width().max(self.height())
    }

    /// Grows the box on every side by `ratio` of its own width/height.
    ///
    /// Used to prefetch records just outside the visible map so small pans
    /// don't trigger a reload.
    #[must_use]
    pub fn buffered(&self, ratio: f64) -> Self {
        let dx = self.width() * ratio;
        let dy = self.height() * ratio;
        Self::new(
            (self.west - dx).max(-180.0),
            (self.south - dy).max(-90.0),
            (self.east + dx).min(180.0),
            (self.north + dy).min(90.0),
        )
    }

    /// Stable string key with coordinates rounded to 4 decimal places
    /// (~11 m), so sub-pixel jitter maps to the same cache slot.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "{:.4},{:.4},{:.4},{:.4}",
            self.west, self.south, self.east, self.north
        )
    }
}

/// Southwest/northeast corner pair, as returned by geocoding providers and
/// used to describe a country's extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoBounds {
    /// Southwest corner.
    pub southwest: GeoPoint,
    /// Northeast corner.
    pub northeast: GeoPoint,
}

impl GeoBounds {
    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lng >= self.southwest.lng
            && point.lng <= self.northeast.lng
            && point.lat >= self.southwest.lat
            && point.lat <= self.northeast.lat
    }
}

impl From<GeoBounds> for BoundingBox {
    fn from(b: GeoBounds) -> Self {
        Self::new(b.southwest.lng, b.southwest.lat, b.northeast.lng, b.northeast.lat)
    }
}

/// Listing category of a property.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ListingType {
    /// Long-term rental.
    Rent,
    /// Outright sale.
    Sale,
    /// Short-stay rental, priced per night.
    Shortlet,
}

/// A property listing as delivered by the record source.
///
/// The core only ever fills in [`Self::coordinates`]; business fields are
/// read-only from its point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    /// Stable identifier from the record source.
    pub id: String,
    /// Listing title.
    #[serde(default)]
    pub title: Option<String>,
    /// Free-text street address.
    pub address: String,
    /// City, if provided separately from the address.
    #[serde(default)]
    pub city: Option<String>,
    /// State or region.
    #[serde(default)]
    pub state: Option<String>,
    /// Resolved coordinates, if known.
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    /// Asking price in the listing currency.
    pub price: f64,
    /// Property type (e.g. `"apartment"`, `"duplex"`).
    pub property_type: String,
    /// Number of bedrooms.
    pub bedrooms: u32,
    /// Listing category.
    pub listing_type: ListingType,
    /// Last modification time at the source.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PropertyRecord {
    /// Builds the one-line address used for geocoding, joining the street
    /// address with city and state when those aren't already part of it.
    #[must_use]
    pub fn location_query(&self) -> String {
        let mut parts = vec![self.address.trim().to_string()];
        let lower = self.address.to_lowercase();
        for extra in [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
        {
            let extra = extra.trim();
            if !extra.is_empty() && !lower.contains(&extra.to_lowercase()) {
                parts.push(extra.to_string());
            }
        }
        parts.retain(|p| !p.is_empty());
        parts.join(", ")
    }

    /// Whether the record has usable coordinates.
    #[must_use]
    pub fn is_located(&self) -> bool {
        self.coordinates.is_some_and(|c| c.is_valid())
    }
}

/// Structured address parts extracted from a geocoding response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponents {
    /// Street line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    /// City or locality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// State or region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Country name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Postal code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

/// A resolved address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResult {
    /// Canonical display name of the match.
    pub resolved_address: String,
    /// Matched location.
    pub coordinates: GeoPoint,
    /// Match confidence in `[0, 1]`.
    pub confidence: f64,
    /// Structured address parts.
    #[serde(default)]
    pub components: AddressComponents,
    /// Extent of the matched feature, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<GeoBounds>,
}

/// A value with a creation time and a hard expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// Cached value.
    pub value: T,
    /// When the value was stored.
    pub created_at: DateTime<Utc>,
    /// `created_at + ttl`.
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Wraps `value`, expiring `ttl` after `created_at`.
    #[must_use]
    pub fn new(value: T, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Expired once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A group of nearby records rendered as one marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPoint {
    /// Cluster identifier. Singletons reuse the record id.
    pub id: String,
    /// Centroid of the members (the member itself for singletons).
    pub coordinates: GeoPoint,
    /// Records grouped into this cluster.
    pub members: Vec<PropertyRecord>,
    /// Always `members.len()`.
    pub count: usize,
    /// Envelope of the member coordinates.
    pub bounds: BoundingBox,
}

impl ClusterPoint {
    /// Whether this groups more than one record.
    #[must_use]
    pub const fn is_cluster(&self) -> bool {
        self.count > 1
    }
}

/// One cell of the price heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapCell {
    /// Cell center.
    pub coordinates: GeoPoint,
    /// Normalized average price in `[0, 1]`.
    pub weight: f64,
    /// Number of records binned into the cell.
    pub count: usize,
}

/// Default map center (Lagos).
pub const DEFAULT_CENTER: GeoPoint = GeoPoint::new(3.3792, 6.5244);

/// Default map zoom.
pub const DEFAULT_ZOOM: f64 = 10.0;

/// Camera state of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapViewState {
    /// Map center.
    pub center: GeoPoint,
    /// Zoom level.
    pub zoom: f64,
    /// Visible bounds, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

impl Default for MapViewState {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            bounds: None,
        }
    }
}

/// Partial update to a [`MapViewState`]. `None` fields are left as is.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MapViewPatch {
    /// New center.
    pub center: Option<GeoPoint>,
    /// New zoom.
    pub zoom: Option<f64>,
    /// New bounds; `Some(None)` clears them.
    pub bounds: Option<Option<BoundingBox>>,
}

impl MapViewState {
    /// Merges `patch` into this state.
    pub fn apply(&mut self, patch: MapViewPatch) {
        if let Some(center) = patch.center {
            self.center = center;
        }
        if let Some(zoom) = patch.zoom {
            self.zoom = zoom;
        }
        if let Some(bounds) = patch.bounds {
            self.bounds = bounds;
        }
    }
}

/// Inclusive price bounds. Missing ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    /// Lower bound.
    pub min: Option<f64>,
    /// Upper bound. A non-positive value means "no upper bound".
    pub max: Option<f64>,
}

impl PriceRange {
    /// Whether `price` falls within the range.
    #[must_use]
    pub fn contains(&self, price: f64) -> bool {
        let above_min = self.min.is_none_or(|min| price >= min);
        let below_max = self.max.filter(|max| *max > 0.0).is_none_or(|max| price <= max);
        above_min && below_max
    }
}

/// Bedroom filter value that also matches anything larger.
pub const BEDROOMS_OR_MORE: u32 = 5;

/// User-selected filters for the map.
///
/// An empty set on any dimension means "no constraint" on that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapFilters {
    /// Accepted property types (case-insensitive).
    #[serde(default)]
    pub property_types: BTreeSet<String>,
    /// Accepted price range.
    #[serde(default)]
    pub price_range: PriceRange,
    /// Accepted bedroom counts. [`BEDROOMS_OR_MORE`] matches `>= 5`.
    #[serde(default)]
    pub bedrooms: BTreeSet<u32>,
    /// Accepted listing types.
    #[serde(default)]
    pub listing_types: BTreeSet<ListingType>,
    /// Whether the heatmap layer is visible.
    #[serde(default)]
    pub show_heatmap: bool,
    /// Whether marker/cluster layer is visible.
    #[serde(default = "default_true")]
    pub show_markers: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for MapFilters {
    fn default() -> Self {
        Self {
            property_types: BTreeSet::new(),
            price_range: PriceRange::default(),
            bedrooms: BTreeSet::new(),
            listing_types: BTreeSet::new(),
            show_heatmap: false,
            show_markers: true,
        }
    }
}

/// Partial update to [`MapFilters`]. `None` fields are left as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapFiltersPatch {
    /// Replacement property type set.
    pub property_types: Option<BTreeSet<String>>,
    /// Replacement price range.
    pub price_range: Option<PriceRange>,
    /// Replacement bedroom set.
    pub bedrooms: Option<BTreeSet<u32>>,
    /// Replacement listing type set.
    pub listing_types: Option<BTreeSet<ListingType>>,
    /// Heatmap visibility.
    pub show_heatmap: Option<bool>,
    /// Marker visibility.
    pub show_markers: Option<bool>,
}

impl MapFilters {
    /// Merges `patch` into these filters.
    pub fn apply(&mut self, patch: MapFiltersPatch) {
        if let Some(v) = patch.property_types {
            self.property_types = v;
        }
        if let Some(v) = patch.price_range {
            self.price_range = v;
        }
        if let Some(v) = patch.bedrooms {
            self.bedrooms = v;
        }
        if let Some(v) = patch.listing_types {
            self.listing_types = v;
        }
        if let Some(v) = patch.show_heatmap {
            self.show_heatmap = v;
        }
        if let Some(v) = patch.show_markers {
            self.show_markers = v;
        }
    }

    /// Whether `record` passes every active filter dimension.
    #[must_use]
    pub fn matches(&self, record: &PropertyRecord) -> bool {
        let type_ok = self.property_types.is_empty()
            || self
                .property_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&record.property_type));

        let bedrooms_ok = self.bedrooms.is_empty()
            || self.bedrooms.iter().any(|&b| {
                if b >= BEDROOMS_OR_MORE {
                    record.bedrooms >= b
                } else {
                    record.bedrooms == b
                }
            });

        let listing_ok =
            self.listing_types.is_empty() || self.listing_types.contains(&record.listing_type);

        type_ok && bedrooms_ok && listing_ok && self.price_range.contains(record.price)
    }
}
