//! Nominatim / OpenStreetMap geocoder client.
//!
//! An alternative provider for deployments without a Mapbox token.
//! Nominatim has strict rate limits: **1 request per second** maximum on
//! the public instance, enforced here by spacing requests at least
//! `rate_limit_ms` apart.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::time::Duration;

use async_trait::async_trait;
use rental_map_models::{GeoBounds, GeoPoint};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{ContextItem, ForwardQuery, GeocodeError, GeocodingProvider, PlaceCandidate};

/// HTTP client for a Nominatim instance.
#[derive(Debug)]
pub struct NominatimProvider {
    client: reqwest::Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimProvider {
    /// Creates a client for the instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the client can't be built.
    pub fn new(
        base_url: &str,
        user_agent: &str,
        rate_limit_ms: u64,
        timeout: Duration,
    ) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_interval: Duration::from_millis(rate_limit_ms),
            last_request: Mutex::new(None),
        })
    }

    /// Sleeps until `min_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        self.throttle().await;

        let resp = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .query(&[("format", "jsonv2"), ("addressdetails", "1")])
            .query(params)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        if !resp.status().is_success() {
            return Err(GeocodeError::Status {
                status: resp.status().as_u16(),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

#[async_trait]
impl GeocodingProvider for NominatimProvider {
    fn id(&self) -> &str {
        "nominatim"
    }

    async fn forward(&self, query: &ForwardQuery) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        let params = [
            ("q", query.text.clone()),
            ("countrycodes", query.country_code.clone()),
            ("limit", query.limit.to_string()),
        ];
        self.get("search", &params).await
    }

    async fn reverse(&self, point: GeoPoint) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        let params = [("lat", point.lat.to_string()), ("lon", point.lng.to_string())];
        self.get("reverse", &params).await
    }
}

/// Parses a Nominatim response. Search returns an array; reverse returns a
/// single object (or `{"error": ...}` when nothing is there).
fn parse_response(body: &serde_json::Value) -> Result<Vec<PlaceCandidate>, GeocodeError> {
    if let Some(results) = body.as_array() {
        return results.iter().map(parse_place).collect();
    }
    if body.get("error").is_some() {
        return Ok(Vec::new());
    }
    if body.is_object() {
        return Ok(vec![parse_place(body)?]);
    }
    Err(GeocodeError::Parse {
        message: "Nominatim response is neither an array nor an object".to_string(),
    })
}

fn parse_place(place: &serde_json::Value) -> Result<PlaceCandidate, GeocodeError> {
    let lat = place["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lat in Nominatim response".to_string(),
        })?;

    let lon = place["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lon in Nominatim response".to_string(),
        })?;

    let place_name = place["display_name"].as_str().unwrap_or_default().to_string();
    let text = place["name"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map_or_else(
            || place_name.split(',').next().unwrap_or_default().trim().to_string(),
            String::from,
        );

    let address = &place["address"];
    let mut context = Vec::new();
    for (kind, keys) in [
        ("place", &["city", "town", "village"][..]),
        ("region", &["state"][..]),
        ("postcode", &["postcode"][..]),
        ("country", &["country"][..]),
    ] {
        if let Some(value) = keys.iter().find_map(|k| address[*k].as_str()) {
            context.push(ContextItem {
                id: format!("{kind}.osm"),
                text: value.to_string(),
                short_code: (kind == "country")
                    .then(|| address["country_code"].as_str().map(String::from))
                    .flatten(),
            });
        }
    }

    // boundingbox is [south, north, west, east] as strings.
    let bbox = place["boundingbox"].as_array().and_then(|b| {
        let v: Vec<f64> = b
            .iter()
            .filter_map(|x| x.as_str().and_then(|s| s.parse().ok()))
            .collect();
        (v.len() == 4).then(|| GeoBounds {
            southwest: GeoPoint::new(v[2], v[0]),
            northeast: GeoPoint::new(v[3], v[1]),
        })
    });

    Ok(PlaceCandidate {
        place_name,
        text,
        address_number: address["house_number"].as_str().map(String::from),
        center: GeoPoint::new(lon, lat),
        relevance: place["importance"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
        context,
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nominatim_search_result() {
        let body = serde_json::json!([{
            "lat": "6.4281",
            "lon": "3.4219",
            "name": "Victoria Island",
            "display_name": "Victoria Island, Eti Osa, Lagos, Nigeria",
            "importance": 0.62,
            "boundingbox": ["6.41", "6.44", "3.39", "3.45"],
            "address": {
                "city": "Lagos",
                "state": "Lagos State",
                "country": "Nigeria",
                "country_code": "ng"
            }
        }]);
        let results = parse_response(&body).unwrap();
        let first = &results[0];
        assert!((first.center.lat - 6.4281).abs() < 1e-4);
        assert!((first.center.lng - 3.4219).abs() < 1e-4);
        assert_eq!(first.text, "Victoria Island");
        assert_eq!(first.context[0].kind(), "place");
        assert_eq!(first.context[2].short_code.as_deref(), Some("ng"));
        let bbox = first.bbox.unwrap();
        assert!((bbox.southwest.lng - 3.39).abs() < 1e-9);
        assert!((bbox.northeast.lat - 6.44).abs() < 1e-9);
    }

    #[test]
    fn parses_nominatim_empty() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_empty());
    }

    #[test]
    fn parses_reverse_object() {
        let body = serde_json::json!({
            "lat": "9.0765",
            "lon": "7.3986",
            "display_name": "Central Business District, Abuja, Nigeria"
        });
        let results = parse_response(&body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Central Business District");
    }

    #[test]
    fn reverse_error_is_empty() {
        let body = serde_json::json!({ "error": "Unable to geocode" });
        assert!(parse_response(&body).unwrap().is_empty());
    }
}
