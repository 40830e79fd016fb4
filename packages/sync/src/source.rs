//! Where property records come from.
//!
//! Records are owned by a remote listing backend; the map only reads them.
//! [`HttpRecordSource`] talks to that backend, [`JsonFileRecordSource`]
//! serves a local JSON export (used by the CLI and in development).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rental_map_models::{BoundingBox, PropertyRecord};

use crate::SourceError;

/// A remote property-record source.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short identifier for logging.
    fn id(&self) -> &str;

    /// Records located inside `bounds`, plus records that have no
    /// coordinates yet (their location is only known once geocoded).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the records can't be fetched or parsed.
    async fn fetch_in_bounds(
        &self,
        bounds: &BoundingBox,
    ) -> Result<Vec<PropertyRecord>, SourceError>;

    /// Records modified after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the records can't be fetched or parsed.
    async fn fetch_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PropertyRecord>, SourceError>;
}

/// Reads a JSON array of records from disk on every call.
#[derive(Debug, Clone)]
pub struct JsonFileRecordSource {
    path: PathBuf,
}

impl JsonFileRecordSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<Vec<PropertyRecord>, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[async_trait]
impl RecordSource for JsonFileRecordSource {
    fn id(&self) -> &str {
        "json_file"
    }

    async fn fetch_in_bounds(
        &self,
        bounds: &BoundingBox,
    ) -> Result<Vec<PropertyRecord>, SourceError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.coordinates.is_none_or(|c| bounds.contains(&c)));
        Ok(records)
    }

    async fn fetch_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PropertyRecord>, SourceError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.updated_at.is_some_and(|t| t > since));
        Ok(records)
    }
}

/// Listing backend reachable over HTTP.
///
/// `GET {base_url}?bbox=west,south,east,north` and
/// `GET {base_url}?updatedSince=<RFC 3339>` both return a JSON array of
/// records.
#[derive(Debug, Clone)]
pub struct HttpRecordSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecordSource {
    /// Creates a source for the records endpoint at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
        }
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<Vec<PropertyRecord>, SourceError> {
        let records = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(records)
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    fn id(&self) -> &str {
        "http"
    }

    async fn fetch_in_bounds(
        &self,
        bounds: &BoundingBox,
    ) -> Result<Vec<PropertyRecord>, SourceError> {
        let bbox = format!(
            "{},{},{},{}",
            bounds.west, bounds.south, bounds.east, bounds.north
        );
        self.get(&[("bbox", bbox)]).await
    }

    async fn fetch_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PropertyRecord>, SourceError> {
        self.get(&[("updatedSince", since.to_rfc3339())]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = r#"[
        {
            "id": "p1",
            "address": "12 Adeola Odeku Street, Victoria Island",
            "coordinates": [3.4219, 6.4281],
            "price": 4500000,
            "propertyType": "apartment",
            "bedrooms": 3,
            "listingType": "rent",
            "updatedAt": "2026-01-05T10:00:00Z"
        },
        {
            "id": "p2",
            "address": "Plot 7, Maitama",
            "city": "Abuja",
            "coordinates": [7.4951, 9.0882],
            "price": 120000000,
            "propertyType": "duplex",
            "bedrooms": 5,
            "listingType": "sale"
        },
        {
            "id": "p3",
            "address": "4 Allen Avenue, Ikeja",
            "price": 35000,
            "propertyType": "studio",
            "bedrooms": 1,
            "listingType": "shortlet",
            "updatedAt": "2026-01-01T00:00:00Z"
        }
    ]"#;

    fn write_fixture(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rental_map_source_{name}_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, RECORDS).unwrap();
        path
    }

    #[tokio::test]
    async fn file_source_filters_by_bounds() {
        let path = write_fixture("bounds");
        let source = JsonFileRecordSource::new(&path);
        let lagos = BoundingBox::new(3.0, 6.2, 3.8, 6.8);

        let records = source.fetch_in_bounds(&lagos).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p3"]);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn file_source_filters_by_update_time() {
        let path = write_fixture("since");
        let source = JsonFileRecordSource::new(&path);
        let since = "2026-01-02T00:00:00Z".parse().unwrap();

        let records = source.fetch_updated_since(since).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "p1");
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let source = JsonFileRecordSource::new("/nonexistent/records.json");
        let err = source
            .fetch_in_bounds(&BoundingBox::new(0.0, 0.0, 1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
