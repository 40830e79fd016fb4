//! Fitting the camera to a set of records.

use rental_map_models::{BoundingBox, MapViewState, PropertyRecord};

/// Zoom used when recentering on a search result.
pub const SEARCH_ZOOM: f64 = 14.0;

/// Zoom used when focusing a single record.
pub const FOCUS_ZOOM: f64 = 16.0;

/// How far beyond the visible bounds records are prefetched, as a fraction
/// of the bounds' size.
pub const PREFETCH_BUFFER_RATIO: f64 = 0.2;

/// Zoom level for an envelope whose larger side spans `span` degrees.
#[must_use]
pub fn zoom_for_span(span: f64) -> f64 {
    if span < 0.01 {
        15.0
    } else if span < 0.05 {
        13.0
    } else if span < 0.1 {
        12.0
    } else if span < 0.5 {
        10.0
    } else {
        8.0
    }
}

/// View framing every located record, or `None` if none is located.
#[must_use]
pub fn fit_records(records: &[PropertyRecord]) -> Option<MapViewState> {
    let bounds = BoundingBox::enclosing(records.iter().filter_map(|r| r.coordinates))?;
    Some(MapViewState {
        center: bounds.center(),
        zoom: zoom_for_span(bounds.max_span()),
        bounds: Some(bounds),
    })
}
