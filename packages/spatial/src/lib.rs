#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Render-ready spatial outputs for the rental map.
//!
//! - [`cluster`]: groups located records into markers by zoom, backed by an
//!   R-tree radius search.
//! - [`heatmap`]: bins records into a zoom-scaled grid weighted by
//!   normalized mean price.
//! - [`render_cache`]: the size-capped cache both sit behind.
//! - [`export`]: `GeoJSON` feature collections for the map renderer.

pub mod cluster;
pub mod digest;
pub mod export;
pub mod heatmap;
pub mod render_cache;

pub use cluster::{ClusterEngine, cluster_records};
pub use heatmap::{HeatmapAggregator, aggregate};
pub use render_cache::RenderCache;
