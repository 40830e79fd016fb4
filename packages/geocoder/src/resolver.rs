//! Tiered address resolution.
//!
//! See the crate docs for the tier order. Provider failures of any kind
//! (network, status, parse, timeout, out-of-region) only advance to the
//! next tier; the caller sees [`GeocodeError::Unresolved`] once every tier
//! has been tried.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use rental_map_models::{AddressComponents, GeoPoint, GeocodeResult};

use crate::address::{is_geocodable, normalize_address, qualify_with_country};
use crate::cache::GeocodeCache;
use crate::clock::Clock;
use crate::known_places::{DEFAULT_CITY, KnownPlace, match_city, search_locations};
use crate::service_registry::ResolverConfig;
use crate::store::CacheStore;
use crate::{
    AutocompleteSuggestion, ForwardQuery, GeocodeError, GeocodingProvider, PlaceCandidate,
};

/// Confidence reported for known-city matches.
pub const KNOWN_CITY_CONFIDENCE: f64 = 0.6;

/// Confidence reported for batch entries that fell back to the default city.
pub const DEFAULT_CITY_CONFIDENCE: f64 = 0.1;

/// Resolves addresses to coordinates through a provider, a TTL cache and
/// static fallbacks.
pub struct GeocodingResolver {
    provider: Option<Arc<dyn GeocodingProvider>>,
    cache: Mutex<GeocodeCache>,
    config: ResolverConfig,
}

impl std::fmt::Debug for GeocodingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodingResolver")
            .field("provider", &self.provider.as_ref().map(|p| p.id().to_string()))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeocodingResolver {
    /// Creates a resolver, loading the persisted cache from `store`.
    ///
    /// With no provider only the cache and known-city tiers are available.
    #[must_use]
    pub fn new(
        provider: Option<Arc<dyn GeocodingProvider>>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: ResolverConfig,
    ) -> Self {
        let cache = GeocodeCache::load(store, clock, config.cache.clone());
        Self {
            provider,
            cache: Mutex::new(cache),
            config,
        }
    }

    /// Resolver configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn cache(&self) -> MutexGuard<'_, GeocodeCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves `address` to a location.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Unresolved`] if no tier produced a result.
    pub async fn resolve(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        let key = normalize_address(address);

        let cached = self.cache().get(&key);
        if let Some(hit) = cached {
            log::debug!("Geocode cache hit for '{key}'");
            return Ok(hit);
        }

        let result = self.resolve_uncached(address).await?;
        self.cache().insert(key, result.clone());
        Ok(result)
    }

    async fn resolve_uncached(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        let trimmed = address.trim();

        if is_geocodable(trimmed) {
            match self.lookup(trimmed).await {
                Ok(result) => return Ok(result),
                Err(e) => log::debug!("Provider lookup for '{trimmed}' failed: {e}"),
            }

            let qualified = qualify_with_country(trimmed, &self.config.region.country_name);
            if qualified != trimmed {
                match self.lookup(&qualified).await {
                    Ok(result) => return Ok(result),
                    Err(e) => log::debug!("Qualified lookup for '{qualified}' failed: {e}"),
                }
            }
        } else {
            log::debug!("Skipping provider for non-geocodable address '{trimmed}'");
        }

        if let Some(city) = match_city(trimmed) {
            log::debug!("Resolved '{trimmed}' by known city {}", city.name);
            return Ok(self.city_result(city, KNOWN_CITY_CONFIDENCE));
        }

        log::warn!("Could not resolve address '{trimmed}'");
        Err(GeocodeError::Unresolved {
            address: trimmed.to_string(),
        })
    }

    /// One forward lookup, accepting only the top candidate and only
    /// inside the configured region.
    async fn lookup(&self, text: &str) -> Result<GeocodeResult, GeocodeError> {
        let provider = self.provider()?;
        let query = ForwardQuery {
            text: text.to_string(),
            country_code: self.config.region.country_code.clone(),
            limit: 1,
            autocomplete: false,
        };

        let candidates = self.with_timeout(provider.forward(&query)).await?;
        let top = candidates
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::Unresolved {
                address: text.to_string(),
            })?;

        if !self.config.region.bounds.contains(&top.center) {
            return Err(GeocodeError::OutOfRegion {
                address: text.to_string(),
                point: top.center,
            });
        }

        Ok(candidate_to_result(top))
    }

    fn provider(&self) -> Result<&Arc<dyn GeocodingProvider>, GeocodeError> {
        self.provider.as_ref().ok_or_else(|| GeocodeError::Config {
            message: "no geocoding provider configured".to_string(),
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, GeocodeError>> + Send,
    ) -> Result<T, GeocodeError> {
        let after = self.config.provider.timeout();
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| GeocodeError::Timeout { after })?
    }

    fn city_result(&self, city: &KnownPlace, confidence: f64) -> GeocodeResult {
        let country = &self.config.region.country_name;
        GeocodeResult {
            resolved_address: format!("{}, {country}", city.name),
            coordinates: city.center,
            confidence,
            components: AddressComponents {
                city: Some(city.name.to_string()),
                state: Some(city.state.to_string()),
                country: Some(country.clone()),
                ..AddressComponents::default()
            },
            bounds: None,
        }
    }

    /// Type-ahead suggestions for `query`.
    ///
    /// Falls back to the known-locations table if the provider fails.
    /// Never errors; an empty query yields no suggestions.
    pub async fn search_autocomplete(
        &self,
        query: &str,
        limit: usize,
    ) -> Vec<AutocompleteSuggestion> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        match self.autocomplete_from_provider(query, limit).await {
            Ok(suggestions) => suggestions,
            Err(e) => {
                log::debug!("Autocomplete for '{query}' fell back to known locations: {e}");
                let country = &self.config.region.country_name;
                search_locations(query, limit)
                    .into_iter()
                    .map(|place| AutocompleteSuggestion {
                        place_name: format!("{}, {}, {country}", place.name, place.state),
                        coordinates: place.center,
                        context: vec![place.state.to_string(), country.clone()],
                        relevance: 1.0,
                    })
                    .collect()
            }
        }
    }

    async fn autocomplete_from_provider(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<AutocompleteSuggestion>, GeocodeError> {
        let provider = self.provider()?;
        let request = ForwardQuery {
            text: query.to_string(),
            country_code: self.config.region.country_code.clone(),
            limit,
            autocomplete: true,
        };
        let candidates = self.with_timeout(provider.forward(&request)).await?;
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|c| AutocompleteSuggestion {
                place_name: c.place_name,
                coordinates: c.center,
                context: c.context.into_iter().map(|item| item.text).collect(),
                relevance: c.relevance,
            })
            .collect())
    }

    /// Best-effort display name for a coordinate.
    ///
    /// Falls back to `"lat, lng"` with six decimals on any failure.
    pub async fn reverse_resolve(&self, lat: f64, lng: f64) -> String {
        let fallback = || format!("{lat:.6}, {lng:.6}");

        let Ok(provider) = self.provider() else {
            return fallback();
        };

        match self.with_timeout(provider.reverse(GeoPoint::new(lng, lat))).await {
            Ok(candidates) => candidates
                .into_iter()
                .map(|c| c.place_name)
                .find(|name| !name.is_empty())
                .unwrap_or_else(fallback),
            Err(e) => {
                log::debug!("Reverse lookup at ({lat}, {lng}) failed: {e}");
                fallback()
            }
        }
    }

    /// Resolves many addresses, `batch_size` at a time with a pause between
    /// batches.
    ///
    /// The output always has one entry per input, in order. Addresses that
    /// can't be resolved get the default city at confidence 0.1.
    pub async fn batch_resolve(&self, addresses: &[String]) -> Vec<GeocodeResult> {
        let batch_size = self.config.batch.batch_size.max(1);
        let delay = self.config.batch.batch_delay();
        let mut results = Vec::with_capacity(addresses.len());

        for (i, chunk) in addresses.chunks(batch_size).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let resolved = join_all(chunk.iter().map(|a| self.resolve(a))).await;
            for (address, outcome) in chunk.iter().zip(resolved) {
                results.push(outcome.unwrap_or_else(|e| {
                    log::warn!("Substituting default city for '{address}': {e}");
                    self.city_result(&DEFAULT_CITY, DEFAULT_CITY_CONFIDENCE)
                }));
            }
        }

        results
    }

    /// Number of cached entries.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache().len()
    }

    /// Drops expired cache entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.cache().purge_expired()
    }

    /// Empties the cache.
    pub fn clear_cache(&self) {
        self.cache().clear();
    }
}

fn candidate_to_result(candidate: PlaceCandidate) -> GeocodeResult {
    let mut components = AddressComponents::default();
    for item in candidate.context {
        match item.kind() {
            "place" | "locality" => {
                components.city.get_or_insert(item.text);
            }
            "region" => components.state = Some(item.text),
            "country" => components.country = Some(item.text),
            "postcode" => components.postal_code = Some(item.text),
            _ => {}
        }
    }
    components.street = candidate
        .address_number
        .map(|number| format!("{number} {}", candidate.text));

    GeocodeResult {
        resolved_address: candidate.place_name,
        coordinates: candidate.center,
        confidence: candidate.relevance.clamp(0.0, 1.0),
        components,
        bounds: candidate.bbox,
    }
}
