//! Core data models for fredcache
//!
//! This module contains the data types used throughout the cache for
//! representing series identifiers, observations, vintages and releases, plus
//! the `Fetcher` trait implemented by remote data sources.

pub mod fred;
pub mod indicators;

pub use fred::FredClient;
pub use indicators::{all_indicators, get_indicator, Indicator};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, FetchError};

/// Opaque identifier of a time series (e.g. `"GDP"`)
///
/// Guaranteed non-empty; surrounding whitespace is trimmed on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesId(String);

impl SeriesId {
    /// Creates a series id, rejecting empty or whitespace-only input
    pub fn new(id: impl Into<String>) -> Result<Self, CacheError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CacheError::InvalidSeriesId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SeriesId {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SeriesId::new(value)
    }
}

impl From<SeriesId> for String {
    fn from(id: SeriesId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SeriesId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SeriesId::new(s)
    }
}

/// A single data point of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Period the value refers to
    pub period: NaiveDate,
    /// Observed value, `None` when the source reports it as missing
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(period: NaiveDate, value: Option<f64>) -> Self {
        Self { period, value }
    }
}

/// An immutable snapshot of a series as published on `vintage_date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vintage {
    /// Series this vintage belongs to
    pub series_id: SeriesId,
    /// Publication date of this snapshot
    pub vintage_date: NaiveDate,
    /// When this vintage was fetched from the remote source
    pub fetched_at: DateTime<Utc>,
    /// Observations ordered by strictly increasing period
    pub observations: Vec<Observation>,
}

impl Vintage {
    pub fn new(
        series_id: SeriesId,
        vintage_date: NaiveDate,
        observations: Vec<Observation>,
    ) -> Self {
        Self {
            series_id,
            vintage_date,
            fetched_at: Utc::now(),
            observations,
        }
    }

    /// Overrides the fetch timestamp
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// True when both vintages hold the same key and observations
    ///
    /// `fetched_at` is bookkeeping and does not take part in the comparison.
    pub fn same_content(&self, other: &Vintage) -> bool {
        self.series_id == other.series_id
            && self.vintage_date == other.vintage_date
            && self.observations == other.observations
    }
}

/// A publication event for a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub series_id: SeriesId,
    pub released_at: DateTime<Utc>,
}

/// Raw result of a remote fetch, before validation by the merge policy
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedVintage {
    /// Publication date of the fetched snapshot
    pub vintage_date: NaiveDate,
    /// Exact publication timestamp, recorded in the release calendar
    pub released_at: DateTime<Utc>,
    /// Observations as returned by the source (not yet validated)
    pub observations: Vec<Observation>,
}

impl FetchedVintage {
    /// A fetch result signalling that nothing newer than `since` exists
    pub fn empty(vintage_date: NaiveDate, released_at: DateTime<Utc>) -> Self {
        Self {
            vintage_date,
            released_at,
            observations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Remote source of series data
///
/// Implementations return the complete observation sequence of the newest
/// vintage published after `since`, or an empty `FetchedVintage` when there is
/// nothing newer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        series_id: &SeriesId,
        since: Option<NaiveDate>,
    ) -> Result<FetchedVintage, FetchError>;

    /// The next scheduled release date on or after `today`, for sources that
    /// publish a release schedule
    async fn next_release(
        &self,
        _series_id: &SeriesId,
        _today: NaiveDate,
    ) -> Result<Option<NaiveDate>, FetchError> {
        Ok(None)
    }
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(
        &self,
        series_id: &SeriesId,
        since: Option<NaiveDate>,
    ) -> Result<FetchedVintage, FetchError> {
        (**self).fetch(series_id, since).await
    }

    async fn next_release(
        &self,
        series_id: &SeriesId,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, FetchError> {
        (**self).next_release(series_id, today).await
    }
}
