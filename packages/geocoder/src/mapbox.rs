//! Mapbox-style places API client.
//!
//! Forward lookups hit `GET {base_url}/{query}.json` and reverse lookups
//! hit `GET {base_url}/{lng},{lat}.json`. Both return a `GeoJSON`
//! `FeatureCollection` whose features carry `center`, `place_name`,
//! `relevance`, an optional `bbox` and a `context` hierarchy.
//!
//! See <https://docs.mapbox.com/api/search/geocoding-v5/>

use std::time::Duration;

use async_trait::async_trait;
use rental_map_models::{GeoBounds, GeoPoint};

use crate::{ContextItem, ForwardQuery, GeocodeError, GeocodingProvider, PlaceCandidate};

/// HTTP client for a Mapbox-compatible geocoding endpoint.
#[derive(Debug, Clone)]
pub struct MapboxProvider {
    client: reqwest::Client,
    base_url: reqwest::Url,
    access_token: String,
}

impl MapboxProvider {
    /// Creates a client for `base_url` (e.g.
    /// `https://api.mapbox.com/geocoding/v5/mapbox.places`).
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Config`] if `base_url` is not a valid base
    /// URL, or [`GeocodeError::Http`] if the client can't be built.
    pub fn new(
        base_url: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, GeocodeError> {
        let base_url = reqwest::Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            GeocodeError::Config {
                message: format!("Invalid Mapbox base URL '{base_url}': {e}"),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GeocodeError::Config {
                message: format!("Mapbox base URL '{base_url}' cannot be a base"),
            });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            access_token: access_token.to_string(),
        })
    }

    fn endpoint(&self, segment: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(&format!("{segment}.json"));
        }
        url
    }

    async fn get(
        &self,
        url: reqwest::Url,
        params: &[(&str, String)],
    ) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        let resp = self
            .client
            .get(url)
            .query(&[("access_token", self.access_token.as_str())])
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
impl GeocodingProvider for MapboxProvider {
    fn id(&self) -> &str {
        "mapbox"
    }

    async fn forward(&self, query: &ForwardQuery) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        let url = self.endpoint(&query.text);
        let params = [
            ("country", query.country_code.clone()),
            ("limit", query.limit.to_string()),
            ("autocomplete", query.autocomplete.to_string()),
        ];
        self.get(url, &params).await
    }

    async fn reverse(&self, point: GeoPoint) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        let url = self.endpoint(&format!("{},{}", point.lng, point.lat));
        self.get(url, &[]).await
    }
}

/// Parses a places `FeatureCollection` response.
fn parse_response(body: &serde_json::Value) -> Result<Vec<PlaceCandidate>, GeocodeError> {
    let features = body
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| GeocodeError::Parse {
            message: "Mapbox response missing 'features' array".to_string(),
        })?;

    features.iter().map(parse_feature).collect()
}

fn parse_feature(feature: &serde_json::Value) -> Result<PlaceCandidate, GeocodeError> {
    let center = feature
        .get("center")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| GeocodeError::Parse {
            message: "Feature missing 'center'".to_string(),
        })?;

    if center.len() < 2 {
        return Err(GeocodeError::Parse {
            message: "center array has fewer than 2 elements".to_string(),
        });
    }

    let lng = center[0].as_f64().ok_or_else(|| GeocodeError::Parse {
        message: "longitude is not a number".to_string(),
    })?;
    let lat = center[1].as_f64().ok_or_else(|| GeocodeError::Parse {
        message: "latitude is not a number".to_string(),
    })?;

    let place_name = feature
        .get("place_name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();

    let text = feature
        .get("text")
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || place_name.split(',').next().unwrap_or_default().to_string(),
            String::from,
        );

    let relevance = feature
        .get("relevance")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let address_number = feature
        .get("address")
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    let context = feature
        .get("context")
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(ContextItem {
                        id: item.get("id")?.as_str()?.to_string(),
                        text: item.get("text")?.as_str()?.to_string(),
                        short_code: item
                            .get("short_code")
                            .and_then(serde_json::Value::as_str)
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let bbox = feature
        .get("bbox")
        .and_then(serde_json::Value::as_array)
        .and_then(|b| {
            let v: Vec<f64> = b.iter().filter_map(serde_json::Value::as_f64).collect();
            (v.len() == 4).then(|| GeoBounds {
                southwest: GeoPoint::new(v[0], v[1]),
                northeast: GeoPoint::new(v[2], v[3]),
            })
        });

    Ok(PlaceCandidate {
        place_name,
        text,
        address_number,
        center: GeoPoint::new(lng, lat),
        relevance,
        context,
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mapbox_feature() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "text": "Victoria Island",
                "place_name": "Victoria Island, Lagos, Nigeria",
                "center": [3.4219, 6.4281],
                "relevance": 0.95,
                "bbox": [3.39, 6.41, 3.45, 6.44],
                "context": [
                    { "id": "place.123", "text": "Lagos" },
                    { "id": "region.9", "text": "Lagos State", "short_code": "NG-LA" },
                    { "id": "country.1", "text": "Nigeria", "short_code": "ng" }
                ]
            }]
        });
        let results = parse_response(&body).unwrap();
        assert_eq!(results.len(), 1);
        let first = &results[0];
        assert!((first.center.lng - 3.4219).abs() < 1e-6);
        assert!((first.center.lat - 6.4281).abs() < 1e-6);
        assert!((first.relevance - 0.95).abs() < 1e-9);
        assert_eq!(first.text, "Victoria Island");
        assert_eq!(first.context.len(), 3);
        assert_eq!(first.context[2].kind(), "country");
        assert_eq!(first.context[2].short_code.as_deref(), Some("ng"));
        let bbox = first.bbox.unwrap();
        assert!((bbox.northeast.lng - 3.45).abs() < 1e-9);
    }

    #[test]
    fn parses_mapbox_empty() {
        let body = serde_json::json!({ "type": "FeatureCollection", "features": [] });
        assert!(parse_response(&body).unwrap().is_empty());
    }

    #[test]
    fn rejects_missing_features() {
        let body = serde_json::json!({ "message": "Not Authorized - Invalid Token" });
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_short_center() {
        let body = serde_json::json!({ "features": [{ "center": [3.4] }] });
        assert!(parse_response(&body).is_err());
    }

    #[test]
    fn text_defaults_to_first_place_name_segment() {
        let body = serde_json::json!({
            "features": [{ "center": [3.4, 6.4], "place_name": "Ikoyi, Lagos, Nigeria" }]
        });
        let results = parse_response(&body).unwrap();
        assert_eq!(results[0].text, "Ikoyi");
        assert!(results[0].relevance.abs() < f64::EPSILON);
    }

    #[test]
    fn endpoint_encodes_query() {
        let provider = MapboxProvider::new(
            "https://api.mapbox.com/geocoding/v5/mapbox.places/",
            "token",
            Duration::from_secs(5),
        )
        .unwrap();
        let url = provider.endpoint("12 Adeola Odeku St/Lagos");
        assert_eq!(
            url.path(),
            "/geocoding/v5/mapbox.places/12%20Adeola%20Odeku%20St%2FLagos.json"
        );
    }
}
