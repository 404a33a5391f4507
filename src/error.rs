//! Error types shared by the cache, the calendar and the fetch collaborators

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors that can occur when fetching a series from a remote source
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote answered with a non-success status
    #[error("Remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Failed to parse the response
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Missing expected field in response
    #[error("Missing expected field in response: {0}")]
    MissingField(String),
}

/// Errors surfaced by the vintage cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// No usable vintage exists for the request
    #[error(
        "No vintage of {series_id} available{}",
        .as_of.map(|d| format!(" as of {d}")).unwrap_or_default()
    )]
    NotFound {
        series_id: String,
        as_of: Option<NaiveDate>,
    },

    /// The remote source could not be reached and no cached answer exists
    #[error("Remote source unavailable for {series_id}: {reason}")]
    RemoteUnavailable { series_id: String, reason: String },

    /// A vintage with the same date but different observations is already stored
    #[error("Vintage {vintage_date} of {series_id} already stored with different observations")]
    DuplicateVintage {
        series_id: String,
        vintage_date: NaiveDate,
    },

    /// A vintage is not newer than the latest stored vintage
    #[error("Vintage {vintage_date} of {series_id} is not newer than latest {latest}")]
    StaleVintage {
        series_id: String,
        vintage_date: NaiveDate,
        latest: NaiveDate,
    },

    /// A persisted entry could not be decoded
    #[error("Corrupt cache entry {entry}: {reason}")]
    CorruptStore { entry: String, reason: String },

    /// Fetched observations violate the ordering invariants
    #[error("Invalid observations for {series_id}: {reason}")]
    InvalidObservations { series_id: String, reason: String },

    /// Series identifiers must be non-empty
    #[error("Invalid series id: {0:?}")]
    InvalidSeriesId(String),

    /// A release timestamp predates the last recorded release
    #[error("Release {timestamp} of {series_id} predates last recorded release {last}")]
    OutOfOrderRelease {
        series_id: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// The caller stopped waiting for a refresh
    #[error("Timed out waiting for {series_id} after {waited_ms}ms")]
    Timeout { series_id: String, waited_ms: u64 },

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding error while persisting
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Integrity errors reject a write but leave the store untouched
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            CacheError::DuplicateVintage { .. }
                | CacheError::StaleVintage { .. }
                | CacheError::InvalidObservations { .. }
                | CacheError::OutOfOrderRelease { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
