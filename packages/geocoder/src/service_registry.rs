//! Compile-time registry of geocoding service and resolver configuration.
//!
//! Each provider is defined in a TOML file under `services/`, alongside
//! `resolver.toml` which holds the region, cache and batching settings.
//! The registry embeds these at compile time and exposes them via
//! [`all_services`], [`enabled_services`] and [`resolver_config`].

use std::path::Path;
use std::sync::Arc;

use rental_map_models::GeoBounds;
use serde::Deserialize;

use crate::{GeocodeError, GeocodingProvider};

/// A geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Unique identifier (e.g., `"mapbox"`, `"nominatim"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service may be selected.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Selection order; lower values are preferred.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Mapbox-style places API.
    Mapbox {
        /// API base URL up to and including the dataset path.
        base_url: String,
        /// Environment variable holding the access token.
        access_token_env: String,
    },
    /// Nominatim / `OpenStreetMap` geocoder.
    Nominatim {
        /// API base URL (e.g., `"https://nominatim.openstreetmap.org"`).
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
        /// `User-Agent` sent with every request (required by the usage policy).
        user_agent: String,
    },
}

const fn default_true() -> bool {
    true
}

impl GeocodingService {
    /// Returns the provider's base URL regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Mapbox { base_url, .. } | ProviderConfig::Nominatim { base_url, .. } => {
                base_url
            }
        }
    }

    /// Builds a provider client for this service.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Config`] if a required credential is missing
    /// from the environment, or [`GeocodeError::Http`] if the HTTP client
    /// can't be constructed.
    pub fn build_provider(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn GeocodingProvider>, GeocodeError> {
        let timeout = settings.timeout();
        match &self.provider {
            ProviderConfig::Mapbox {
                base_url,
                access_token_env,
            } => {
                let token = std::env::var(access_token_env)
                    .ok()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| GeocodeError::Config {
                        message: format!("{access_token_env} environment variable not set"),
                    })?;
                Ok(Arc::new(crate::mapbox::MapboxProvider::new(
                    base_url, &token, timeout,
                )?))
            }
            ProviderConfig::Nominatim {
                base_url,
                rate_limit_ms,
                user_agent,
            } => Ok(Arc::new(crate::nominatim::NominatimProvider::new(
                base_url,
                user_agent,
                *rate_limit_ms,
                timeout,
            )?)),
        }
    }
}

/// Region the resolver is restricted to.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    /// ISO 3166-1 alpha-2 code sent to the provider.
    pub country_code: String,
    /// Country name appended on the qualified retry.
    pub country_name: String,
    /// Provider matches outside these bounds are rejected.
    pub bounds: GeoBounds,
}

/// Provider call settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Default number of autocomplete suggestions.
    #[serde(default = "default_autocomplete_limit")]
    pub autocomplete_limit: usize,
}

const fn default_autocomplete_limit() -> usize {
    5
}

impl ProviderSettings {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Geocode cache sizing and expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in hours.
    pub ttl_hours: i64,
    /// Hard cap on stored entries.
    pub max_entries: usize,
    /// Fraction of `max_entries` to shrink to when evicting.
    pub eviction_target_ratio: f64,
}

impl CacheConfig {
    /// Entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }

    /// Size to shrink to once the cap is hit.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn eviction_target(&self) -> usize {
        let ratio = self.eviction_target_ratio.clamp(0.0, 1.0);
        ((self.max_entries as f64) * ratio).floor() as usize
    }
}

/// Batch resolution pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Addresses resolved concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches in milliseconds.
    pub batch_delay_ms: u64,
}

impl BatchConfig {
    /// Pause between batches.
    #[must_use]
    pub const fn batch_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_delay_ms)
    }
}

/// Everything the resolver needs besides a provider and a store.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Target region.
    pub region: RegionConfig,
    /// Provider call settings.
    pub provider: ProviderSettings,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Batch settings.
    pub batch: BatchConfig,
}

impl ResolverConfig {
    /// Parses a resolver configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Config`] if the TOML is malformed or
    /// incomplete.
    pub fn from_toml_str(s: &str) -> Result<Self, GeocodeError> {
        toml::de::from_str(s).map_err(|e| GeocodeError::Config {
            message: e.to_string(),
        })
    }

    /// Reads and parses a resolver configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the file can't be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, GeocodeError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        resolver_config()
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("mapbox", include_str!("../services/mapbox.toml")),
    ("nominatim", include_str!("../services/nominatim.toml")),
];

const RESOLVER_TOML: &str = include_str!("../services/resolver.toml");

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 2;

/// Returns all geocoding service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<GeocodingService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse geocoding service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
#[must_use]
pub fn enabled_services() -> Vec<GeocodingService> {
    let mut services: Vec<GeocodingService> =
        all_services().into_iter().filter(|s| s.enabled).collect();
    services.sort_by_key(|s| s.priority);
    services
}

/// Returns the embedded resolver configuration.
///
/// # Panics
///
/// Panics if the embedded `resolver.toml` is malformed.
#[must_use]
pub fn resolver_config() -> ResolverConfig {
    ResolverConfig::from_toml_str(RESOLVER_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse embedded resolver config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn loads_all_services() {
        let services = all_services();
        assert_eq!(services.len(), EXPECTED_SERVICE_COUNT);
    }

    #[test]
    fn service_ids_are_unique() {
        let services = all_services();
        let mut seen = BTreeSet::new();
        for svc in &services {
            assert!(seen.insert(&svc.id), "Duplicate service ID: {}", svc.id);
        }
    }

    #[test]
    fn all_services_have_required_fields() {
        for svc in &all_services() {
            assert!(!svc.id.is_empty(), "Service has empty id");
            assert!(!svc.name.is_empty(), "Service {} has empty name", svc.id);
            assert!(
                !svc.base_url().is_empty(),
                "Service {} has empty base_url",
                svc.id
            );
        }
    }

    #[test]
    fn enabled_services_sorted_by_priority() {
        let services = enabled_services();
        for window in services.windows(2) {
            assert!(
                window[0].priority <= window[1].priority,
                "Services not sorted by priority: {} ({}) > {} ({})",
                window[0].id,
                window[0].priority,
                window[1].id,
                window[1].priority
            );
        }
    }

    #[test]
    fn embedded_resolver_config_is_valid() {
        let config = resolver_config();
        assert_eq!(config.region.country_code, "ng");
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.ttl(), chrono::Duration::hours(24));
        assert_eq!(config.cache.eviction_target(), 900);
        assert_eq!(config.batch.batch_size, 5);
        assert!(config.provider.timeout_secs >= 5 && config.provider.timeout_secs <= 10);
    }

    #[test]
    fn region_bounds_contain_lagos() {
        let config = resolver_config();
        assert!(
            config
                .region
                .bounds
                .contains(&rental_map_models::GeoPoint::new(3.3792, 6.5244))
        );
    }

    #[test]
    fn rejects_incomplete_config() {
        let err = ResolverConfig::from_toml_str("[region]\ncountry_code = \"ng\"").unwrap_err();
        assert!(matches!(err, GeocodeError::Config { .. }));
    }
}
