//! `GeoJSON` output for the map renderer.
//!
//! Clusters become `Point` features carrying `count`, `cluster` and the
//! member ids; singletons also carry the record's price and type. Heatmap
//! cells become `Point` features with `weight` and `count`.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value, feature::Id};
use rental_map_models::{ClusterPoint, GeoPoint, HeatmapCell};
use serde_json::json;

fn point(p: GeoPoint) -> Geometry {
    Geometry::new(Value::Point(vec![p.lng, p.lat]))
}

fn feature(id: Option<String>, geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: id.map(Id::String),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Converts clusters to a `FeatureCollection`.
#[must_use]
pub fn clusters_to_geojson(clusters: &[ClusterPoint]) -> FeatureCollection {
    collection(
        clusters
            .iter()
            .map(|c| {
                let mut props = JsonObject::new();
                props.insert("count".to_string(), json!(c.count));
                props.insert("cluster".to_string(), json!(c.is_cluster()));
                props.insert(
                    "memberIds".to_string(),
                    json!(c.members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()),
                );
                props.insert(
                    "bounds".to_string(),
                    json!([c.bounds.west, c.bounds.south, c.bounds.east, c.bounds.north]),
                );
                if let [only] = c.members.as_slice() {
                    props.insert("price".to_string(), json!(only.price));
                    props.insert("propertyType".to_string(), json!(only.property_type));
                    props.insert("listingType".to_string(), json!(only.listing_type.as_ref()));
                    if let Some(title) = &only.title {
                        props.insert("title".to_string(), json!(title));
                    }
                }
                feature(Some(c.id.clone()), point(c.coordinates), props)
            })
            .collect(),
    )
}

/// Converts heatmap cells to a `FeatureCollection`.
#[must_use]
pub fn heatmap_to_geojson(cells: &[HeatmapCell]) -> FeatureCollection {
    collection(
        cells
            .iter()
            .map(|cell| {
                let mut props = JsonObject::new();
                props.insert("weight".to_string(), json!(cell.weight));
                props.insert("count".to_string(), json!(cell.count));
                feature(None, point(cell.coordinates), props)
            })
            .collect(),
    )
}
