#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport data manager for the rental map.
//!
//! [`ViewportManager`] owns the camera state and the user's filters, merges
//! the caller-supplied records with live updates from the sync service, and
//! derives what the map should draw: the filtered record set, marker
//! clusters and heatmap cells.
//!
//! Derived state is kept consistent after every mutation:
//!
//! - when filtering hides part of the record set, the view is fitted to the
//!   remaining located records ([`fit`]);
//! - a selected record that no longer passes the filters is deselected;
//! - when the visible bounds change, records for a buffered version of the
//!   bounds are fetched from the sync service and its heatmap recomputed.

pub mod fit;
pub mod manager;

pub use manager::{LiveHeatmap, ViewportManager};

use strum_macros::{AsRefStr, Display};

/// What happened to a [`ViewportManager::search_location`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SearchOutcome {
    /// The view was recentered on the result.
    Applied,
    /// The query could not be resolved; see
    /// [`ViewportManager::search_error`].
    NotFound,
    /// A newer search was started before this one finished; its result was
    /// discarded.
    Superseded,
}
