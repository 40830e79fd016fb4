#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Address resolution for the rental map.
//!
//! Turns free-text property addresses into coordinates using a tiered
//! strategy (see [`resolver::GeocodingResolver`]):
//!
//! 1. **Cache**: normalized-address hit that hasn't expired.
//! 2. **Provider**: a forward lookup restricted to the configured
//!    country, accepted only inside the country's bounding box.
//! 3. **Country-qualified retry**: the same lookup with the country name
//!    appended.
//! 4. **Known city**: substring match against a fixed table of major
//!    cities, at a fixed confidence of 0.6.
//!
//! Providers are described by TOML files in `services/` (see
//! [`service_registry`]). Successful lookups are cached for 24 hours and
//! persisted through a [`store::CacheStore`].

pub mod address;
pub mod cache;
pub mod clock;
pub mod known_places;
pub mod mapbox;
pub mod nominatim;
pub mod resolver;
pub mod service_registry;
pub mod store;

use std::time::Duration;

use async_trait::async_trait;
use rental_map_models::{GeoBounds, GeoPoint};
use thiserror::Error;

pub use resolver::GeocodingResolver;

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("Provider returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Provider did not answer in time.
    #[error("Provider timed out after {after:?}")]
    Timeout {
        /// Configured timeout.
        after: Duration,
    },

    /// Provider matched a location outside the configured country.
    #[error("'{address}' resolved outside the target region at [{}, {}]", .point.lng, .point.lat)]
    OutOfRegion {
        /// Queried address.
        address: String,
        /// Where the provider placed it.
        point: GeoPoint,
    },

    /// Every resolution tier was exhausted.
    #[error("Could not resolve address '{address}'")]
    Unresolved {
        /// Queried address.
        address: String,
    },

    /// Persisted cache data could not be decoded.
    #[error("Corrupt geocode cache: {0}")]
    CacheCorruption(#[from] serde_json::Error),

    /// I/O error reading or writing persisted state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },
}

impl GeocodeError {
    /// Whether this error came from talking to the provider (network,
    /// status, timeout, parsing) rather than from the result itself.
    #[must_use]
    pub const fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Status { .. }
                | Self::RateLimited
                | Self::Parse { .. }
                | Self::Timeout { .. }
        )
    }
}

/// One element of a place's administrative hierarchy (neighbourhood,
/// city, region, country, postcode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextItem {
    /// Provider identifier, prefixed by kind (e.g. `"place.123"`).
    pub id: String,
    /// Display text.
    pub text: String,
    /// Short code, e.g. `"ng"` for countries.
    pub short_code: Option<String>,
}

impl ContextItem {
    /// The kind prefix of [`Self::id`] (`"place"`, `"region"`, ...).
    #[must_use]
    pub fn kind(&self) -> &str {
        self.id.split('.').next().unwrap_or_default()
    }
}

/// A ranked candidate returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceCandidate {
    /// Full display name.
    pub place_name: String,
    /// Short name of the feature itself.
    pub text: String,
    /// House number, for address-level matches.
    pub address_number: Option<String>,
    /// Feature location.
    pub center: GeoPoint,
    /// Provider relevance in `[0, 1]`.
    pub relevance: f64,
    /// Administrative hierarchy.
    pub context: Vec<ContextItem>,
    /// Feature extent.
    pub bbox: Option<GeoBounds>,
}

/// Parameters for a forward lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardQuery {
    /// Free-text query.
    pub text: String,
    /// ISO 3166-1 alpha-2 country restriction.
    pub country_code: String,
    /// Maximum number of candidates.
    pub limit: usize,
    /// Whether to treat the text as a prefix (type-ahead).
    pub autocomplete: bool,
}

/// A geocoding backend.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Short identifier for logging.
    fn id(&self) -> &str;

    /// Looks up places matching `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the request or response parsing fails.
    async fn forward(&self, query: &ForwardQuery) -> Result<Vec<PlaceCandidate>, GeocodeError>;

    /// Looks up places at `point`, most specific first.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the request or response parsing fails.
    async fn reverse(&self, point: GeoPoint) -> Result<Vec<PlaceCandidate>, GeocodeError>;
}

/// A type-ahead suggestion.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteSuggestion {
    /// Display name.
    pub place_name: String,
    /// Suggested location.
    pub coordinates: GeoPoint,
    /// Enclosing place names, most specific first.
    pub context: Vec<String>,
    /// Relevance in `[0, 1]`.
    pub relevance: f64,
}
