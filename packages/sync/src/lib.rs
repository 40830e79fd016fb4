#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Live record synchronization for the rental map.
//!
//! A [`service::SyncService`] pulls records from a [`source::RecordSource`],
//! fills in missing coordinates through the geocoder, keeps the working
//! set, and announces changes on a [`broadcaster::Broadcaster`]. Map
//! consumers subscribe to the broadcaster rather than talking to the
//! source directly.

pub mod broadcaster;
pub mod polling;
pub mod service;
pub mod source;

pub use broadcaster::{Broadcaster, Channel, Subscription, SyncEvent};
pub use service::SyncService;
pub use source::RecordSource;

/// Errors that can occur fetching records.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
