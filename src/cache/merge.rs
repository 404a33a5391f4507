//! Folding freshly fetched vintages into the store
//!
//! A fetched vintage is a complete, self-contained snapshot rather than a
//! diff. Merging only normalizes and validates it against the latest stored
//! vintage; earlier vintages are never touched.

use std::cmp::Ordering;

use chrono::Utc;

use crate::data::{FetchedVintage, Observation, SeriesId, Vintage};
use crate::error::{CacheError, Result};

/// What to do with a fetched vintage
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// A new vintage to store
    New(Vintage),
    /// The fetch returned the latest stored vintage again
    Unchanged,
    /// The fetch returned no observations
    NoData,
}

/// Validation rules applied to every fetched vintage
#[derive(Debug, Clone, Copy, Default)]
pub struct MergePolicy;

impl MergePolicy {
    pub fn new() -> Self {
        Self
    }

    /// Produces the vintage to store from a fetch result
    ///
    /// Fails with `InvalidObservations` when two observations share a period
    /// with different values, and with `StaleVintage` when the fetched vintage
    /// is not strictly newer than `latest` (unless it is identical to it).
    pub fn merge(
        &self,
        series_id: &SeriesId,
        latest: Option<&Vintage>,
        fetched: FetchedVintage,
    ) -> Result<MergeOutcome> {
        if fetched.is_empty() {
            return Ok(MergeOutcome::NoData);
        }

        let observations = normalize(series_id, fetched.observations)?;
        let candidate = Vintage {
            series_id: series_id.clone(),
            vintage_date: fetched.vintage_date,
            fetched_at: Utc::now(),
            observations,
        };

        if let Some(latest) = latest {
            match candidate.vintage_date.cmp(&latest.vintage_date) {
                Ordering::Greater => {}
                Ordering::Equal if candidate.same_content(latest) => {
                    return Ok(MergeOutcome::Unchanged);
                }
                _ => {
                    return Err(CacheError::StaleVintage {
                        series_id: series_id.to_string(),
                        vintage_date: candidate.vintage_date,
                        latest: latest.vintage_date,
                    });
                }
            }
        }

        Ok(MergeOutcome::New(candidate))
    }
}

/// Sorts by period, collapses exact duplicates and maps non-finite values to missing
fn normalize(series_id: &SeriesId, mut observations: Vec<Observation>) -> Result<Vec<Observation>> {
    for obs in &mut observations {
        obs.value = obs.value.filter(|v| v.is_finite());
    }
    observations.sort_by_key(|o| o.period);

    let mut out: Vec<Observation> = Vec::with_capacity(observations.len());
    for obs in observations {
        match out.last() {
            Some(prev) if prev.period == obs.period => {
                if prev.value != obs.value {
                    return Err(CacheError::InvalidObservations {
                        series_id: series_id.to_string(),
                        reason: format!("conflicting values for period {}", obs.period),
                    });
                }
            }
            _ => out.push(obs),
        }
    }
    Ok(out)
}
