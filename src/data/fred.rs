//! FRED (Federal Reserve Economic Data) API client
//!
//! This module fetches series metadata and observations from the FRED API and
//! maps them into `FetchedVintage` values. The series `last_updated` timestamp
//! is used as the vintage (publication) date.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{FetchedVintage, Fetcher, Observation, SeriesId};
use crate::error::FetchError;

/// Base URL for the FRED API
pub const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred";

/// Marker FRED uses for missing values
const MISSING_VALUE: &str = ".";

/// Client for fetching series data from the FRED API
#[derive(Debug, Clone)]
pub struct FredClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FredClient {
    /// Create a new FredClient for the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: FRED_BASE_URL.to_string(),
        }
    }

    /// Create a new FredClient with a custom HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Override the API base URL (used for testing against a mock server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch the publication timestamp of the current vintage of a series
    pub async fn fetch_last_updated(
        &self,
        series_id: &SeriesId,
    ) -> Result<DateTime<FixedOffset>, FetchError> {
        let url = format!("{}/series", self.base_url);
        let text = self.get_text(&url, &[("series_id", series_id.as_str())]).await?;
        let response: SeriesResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::Parse(e.to_string()))?;

        let series = response
            .seriess
            .first()
            .ok_or_else(|| FetchError::MissingField("seriess".to_string()))?;

        parse_last_updated(&series.last_updated)
    }

    /// Fetch all observations of the current vintage of a series
    pub async fn fetch_observations(
        &self,
        series_id: &SeriesId,
    ) -> Result<Vec<Observation>, FetchError> {
        let url = format!("{}/series/observations", self.base_url);
        let text = self.get_text(&url, &[("series_id", series_id.as_str())]).await?;
        let response: ObservationsResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::Parse(e.to_string()))?;

        response.observations.iter().map(parse_observation).collect()
    }

    /// Fetch the id of the FRED release a series belongs to
    pub async fn fetch_release_id(&self, series_id: &SeriesId) -> Result<u64, FetchError> {
        let url = format!("{}/series/release", self.base_url);
        let text = self.get_text(&url, &[("series_id", series_id.as_str())]).await?;
        let response: ReleasesResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::Parse(e.to_string()))?;

        response
            .releases
            .first()
            .map(|release| release.id)
            .ok_or_else(|| FetchError::MissingField("releases".to_string()))
    }

    /// Fetch the next scheduled release date of a series on or after `today`
    ///
    /// Returns `None` when FRED lists no upcoming date for the series' release.
    pub async fn fetch_next_release(
        &self,
        series_id: &SeriesId,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, FetchError> {
        let release_id = self.fetch_release_id(series_id).await?.to_string();
        let realtime_start = today.format("%Y-%m-%d").to_string();

        let url = format!("{}/release/dates", self.base_url);
        // Future dates carry no data yet, so they must be included explicitly
        let text = self
            .get_text(
                &url,
                &[
                    ("release_id", release_id.as_str()),
                    ("realtime_start", realtime_start.as_str()),
                    ("include_release_dates_with_no_data", "true"),
                    ("sort_order", "asc"),
                    ("limit", "1"),
                ],
            )
            .await?;
        let response: ReleaseDatesResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::Parse(e.to_string()))?;

        let Some(raw) = response.release_dates.first() else {
            debug!(series = %series_id, %release_id, "no scheduled release dates");
            return Ok(None);
        };
        let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
            .map_err(|_| FetchError::Parse(format!("invalid release date: {}", raw.date)))?;

        Ok((date >= today).then_some(date))
    }

    async fn get_text(&self, url: &str, params: &[(&str, &str)]) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .query(&[("api_key", self.api_key.as_str()), ("file_type", "json")])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error_message)
                .unwrap_or(text);
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl Fetcher for FredClient {
    async fn fetch(
        &self,
        series_id: &SeriesId,
        since: Option<NaiveDate>,
    ) -> Result<FetchedVintage, FetchError> {
        let last_updated = self.fetch_last_updated(series_id).await?;
        let vintage_date = last_updated.date_naive();
        let released_at = last_updated.with_timezone(&Utc);

        if let Some(since) = since {
            if vintage_date <= since {
                debug!(series = %series_id, %vintage_date, %since, "no release newer than cached vintage");
                return Ok(FetchedVintage::empty(vintage_date, released_at));
            }
        }

        let observations = self.fetch_observations(series_id).await?;
        debug!(series = %series_id, %vintage_date, count = observations.len(), "fetched observations");

        Ok(FetchedVintage {
            vintage_date,
            released_at,
            observations,
        })
    }

    async fn next_release(
        &self,
        series_id: &SeriesId,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, FetchError> {
        self.fetch_next_release(series_id, today).await
    }
}

/// Parse FRED's `last_updated` field (e.g., "2024-03-28 07:53:02-05")
///
/// Falls back to midnight UTC when only a date can be recovered.
fn parse_last_updated(value: &str) -> Result<DateTime<FixedOffset>, FetchError> {
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%#z") {
        return Ok(dt);
    }

    let date_part = value.get(..10).unwrap_or(value);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| FetchError::Parse(format!("invalid last_updated: {}", value)))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().fixed_offset())
}

/// Parse one FRED observation; "." denotes a missing value
fn parse_observation(raw: &RawObservation) -> Result<Observation, FetchError> {
    let period = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
        .map_err(|_| FetchError::Parse(format!("invalid observation date: {}", raw.date)))?;

    let value = match raw.value.trim() {
        MISSING_VALUE | "" => None,
        v => Some(
            v.parse::<f64>()
                .map_err(|_| FetchError::Parse(format!("invalid value on {}: {}", raw.date, v)))?,
        ),
    };

    Ok(Observation { period, value })
}

/// FRED `series` endpoint response
#[derive(Debug, Deserialize)]
struct SeriesResponse {
    seriess: Vec<SeriesInfo>,
}

/// Series metadata from FRED
#[derive(Debug, Deserialize)]
struct SeriesInfo {
    last_updated: String,
}

/// FRED `series/observations` endpoint response
#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<RawObservation>,
}

/// A single observation as returned by FRED
#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

/// FRED `series/release` endpoint response
#[derive(Debug, Deserialize)]
struct ReleasesResponse {
    releases: Vec<ReleaseInfo>,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    id: u64,
}

/// FRED `release/dates` endpoint response
#[derive(Debug, Deserialize)]
struct ReleaseDatesResponse {
    release_dates: Vec<RawReleaseDate>,
}

#[derive(Debug, Deserialize)]
struct RawReleaseDate {
    date: String,
}

/// Error payload returned by FRED on 4xx responses
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const SERIES_RESPONSE: &str = r#"{
        "realtime_start": "2024-04-01",
        "realtime_end": "2024-04-01",
        "seriess": [{
            "id": "GDP",
            "title": "Gross Domestic Product",
            "frequency": "Quarterly",
            "last_updated": "2024-03-28 07:53:02-05"
        }]
    }"#;

    const OBSERVATIONS_RESPONSE: &str = r#"{
        "realtime_start": "2024-04-01",
        "realtime_end": "2024-04-01",
        "count": 3,
        "observations": [
            {"realtime_start": "2024-04-01", "realtime_end": "2024-04-01", "date": "2023-07-01", "value": "27610.128"},
            {"realtime_start": "2024-04-01", "realtime_end": "2024-04-01", "date": "2023-10-01", "value": "."},
            {"realtime_start": "2024-04-01", "realtime_end": "2024-04-01", "date": "2024-01-01", "value": "28269.174"}
        ]
    }"#;

    fn gdp() -> SeriesId {
        SeriesId::new("GDP").unwrap()
    }

    #[test]
    fn test_parse_last_updated_with_hour_offset() {
        let dt = parse_last_updated("2024-03-28 07:53:02-05").unwrap();
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 28).unwrap());
        assert_eq!(
            dt.with_timezone(&Utc).to_rfc3339(),
            "2024-03-28T12:53:02+00:00"
        );
    }

    #[test]
    fn test_parse_last_updated_date_only() {
        let dt = parse_last_updated("2024-03-28").unwrap();
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 28).unwrap());
    }

    #[test]
    fn test_parse_last_updated_invalid() {
        assert!(parse_last_updated("yesterday").is_err());
    }

    #[test]
    fn test_parse_observation_missing_marker() {
        let raw = RawObservation {
            date: "2023-10-01".to_string(),
            value: ".".to_string(),
        };
        let obs = parse_observation(&raw).unwrap();
        assert!(obs.value.is_none());
    }

    #[test]
    fn test_parse_observation_invalid_value() {
        let raw = RawObservation {
            date: "2023-10-01".to_string(),
            value: "n/a".to_string(),
        };
        assert!(parse_observation(&raw).is_err());
    }

    #[tokio::test]
    async fn test_fetch_returns_vintage_from_last_updated() {
        let server = MockServer::start();
        let series_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/fred/series")
                .query_param("series_id", "GDP")
                .query_param("api_key", "test-key")
                .query_param("file_type", "json");
            then.status(200)
                .header("Content-Type", "application/json")
                .body(SERIES_RESPONSE);
        });
        let obs_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/fred/series/observations")
                .query_param("series_id", "GDP");
            then.status(200)
                .header("Content-Type", "application/json")
                .body(OBSERVATIONS_RESPONSE);
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let fetched = client.fetch(&gdp(), None).await.expect("fetch should succeed");

        series_mock.assert();
        obs_mock.assert();
        assert_eq!(fetched.vintage_date, NaiveDate::from_ymd_opt(2024, 3, 28).unwrap());
        assert_eq!(fetched.observations.len(), 3);
        assert_eq!(fetched.observations[0].value, Some(27610.128));
        assert_eq!(fetched.observations[1].value, None);
    }

    #[tokio::test]
    async fn test_fetch_skips_observations_when_not_newer_than_since() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/fred/series");
            then.status(200).body(SERIES_RESPONSE);
        });
        let obs_mock = server.mock(|when, then| {
            when.method(GET).path("/fred/series/observations");
            then.status(200).body(OBSERVATIONS_RESPONSE);
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let since = NaiveDate::from_ymd_opt(2024, 3, 28).unwrap();
        let fetched = client.fetch(&gdp(), Some(since)).await.unwrap();

        assert!(fetched.is_empty());
        obs_mock.assert_hits(0);
    }

    #[tokio::test]
    async fn test_fetch_maps_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/fred/series");
            then.status(400).body(
                r#"{"error_code":400,"error_message":"Bad Request. The series does not exist."}"#,
            );
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let err = client.fetch(&gdp(), None).await.unwrap_err();

        match err {
            FetchError::Status { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("does not exist"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_malformed_payload() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/fred/series");
            then.status(200).body("not json");
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let err = client.fetch(&gdp(), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_fetch_missing_series_entry() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/fred/series");
            then.status(200).body(r#"{"seriess": []}"#);
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let err = client.fetch(&gdp(), None).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingField(_)));
    }

    #[tokio::test]
    async fn test_fetch_next_release_reads_release_schedule() {
        let server = MockServer::start();
        let release_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/fred/series/release")
                .query_param("series_id", "GDP")
                .query_param("api_key", "test-key");
            then.status(200).body(
                r#"{"releases": [{"id": 53, "name": "Gross Domestic Product", "press_release": true}]}"#,
            );
        });
        let dates_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/fred/release/dates")
                .query_param("release_id", "53")
                .query_param("realtime_start", "2024-04-01")
                .query_param("include_release_dates_with_no_data", "true")
                .query_param("sort_order", "asc");
            then.status(200).body(
                r#"{"count": 1, "release_dates": [{"release_id": 53, "date": "2024-04-25"}]}"#,
            );
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let today = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let next = client.next_release(&gdp(), today).await.unwrap();

        release_mock.assert();
        dates_mock.assert();
        assert_eq!(next, NaiveDate::from_ymd_opt(2024, 4, 25));
    }

    #[tokio::test]
    async fn test_fetch_next_release_without_upcoming_dates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/fred/series/release");
            then.status(200).body(r#"{"releases": [{"id": 53}]}"#);
        });
        server.mock(|when, then| {
            when.method(GET).path("/fred/release/dates");
            then.status(200).body(r#"{"count": 0, "release_dates": []}"#);
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let today = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert_eq!(client.fetch_next_release(&gdp(), today).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_next_release_unknown_series() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/fred/series/release");
            then.status(400).body(
                r#"{"error_code":400,"error_message":"Bad Request. The series does not exist."}"#,
            );
        });

        let client = FredClient::new("test-key").with_base_url(server.url("/fred"));
        let today = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let err = client.fetch_next_release(&gdp(), today).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 400, .. }));
    }
}
