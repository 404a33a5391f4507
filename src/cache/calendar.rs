//! Release calendar: when each series has been published
//!
//! Release timestamps are append-only per series. The next release is the
//! officially scheduled date when the source has published one, otherwise an
//! estimate from the median of recent inter-release gaps. The refresh
//! coordinator uses it to skip remote calls while no publication is expected.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::write_atomic;
use crate::data::{ReleaseRecord, SeriesId};
use crate::error::{CacheError, Result};

/// File name of the persisted calendar inside the cache directory
pub const RELEASE_DATES_FILE: &str = "release_dates_cache.json";

/// Number of recent gaps used for the next-release estimate
pub const DEFAULT_GAP_WINDOW: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "format_version")]
enum PersistedCalendar {
    #[serde(rename = "1")]
    V1 {
        releases: BTreeMap<SeriesId, Vec<DateTime<Utc>>>,
        #[serde(default)]
        scheduled: BTreeMap<SeriesId, NaiveDate>,
    },
}

#[derive(Debug, Default)]
struct CalendarState {
    releases: HashMap<SeriesId, Vec<DateTime<Utc>>>,
    /// Next release dates announced by the source
    scheduled: HashMap<SeriesId, NaiveDate>,
}

/// Known release timestamps per series
#[derive(Debug)]
pub struct ReleaseCalendar {
    /// Where the calendar is persisted; `None` keeps it in memory only
    path: Option<PathBuf>,
    gap_window: usize,
    state: Mutex<CalendarState>,
}

impl ReleaseCalendar {
    /// Opens the calendar stored in `<cache_dir>/release_dates_cache.json`
    ///
    /// A missing file yields an empty calendar; an unreadable one is logged
    /// and replaced on the next write.
    pub fn open(cache_dir: &Path, gap_window: usize) -> Self {
        let path = cache_dir.join(RELEASE_DATES_FILE);
        let state = match load(&path) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable release calendar");
                CalendarState::default()
            }
        };
        Self {
            path: Some(path),
            gap_window: gap_window.max(1),
            state: Mutex::new(state),
        }
    }

    /// Creates a calendar that is never persisted
    pub fn in_memory(gap_window: usize) -> Self {
        Self {
            path: None,
            gap_window: gap_window.max(1),
            state: Mutex::new(CalendarState::default()),
        }
    }

    /// Records a release of a series
    ///
    /// Returns `Ok(false)` when the exact timestamp is already known. Fails
    /// with `OutOfOrderRelease` when `timestamp` predates the last release.
    pub fn record_release(&self, series_id: &SeriesId, timestamp: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock();
        let entry = state.releases.entry(series_id.clone()).or_default();

        if entry.contains(&timestamp) {
            return Ok(false);
        }
        if let Some(&last) = entry.last() {
            if timestamp < last {
                return Err(CacheError::OutOfOrderRelease {
                    series_id: series_id.to_string(),
                    timestamp,
                    last,
                });
            }
        }

        entry.push(timestamp);
        if let Err(e) = self.persist(&state) {
            if let Some(entry) = state.releases.get_mut(series_id) {
                entry.pop();
            }
            return Err(e);
        }

        debug!(series = %series_id, %timestamp, "recorded release");
        Ok(true)
    }

    /// Records the officially scheduled next release date of a series
    pub fn set_scheduled_release(&self, series_id: &SeriesId, date: NaiveDate) -> Result<()> {
        let mut state = self.lock();
        let previous = state.scheduled.insert(series_id.clone(), date);
        if previous == Some(date) {
            return Ok(());
        }
        if let Err(e) = self.persist(&state) {
            match previous {
                Some(previous) => state.scheduled.insert(series_id.clone(), previous),
                None => state.scheduled.remove(series_id),
            };
            return Err(e);
        }

        debug!(series = %series_id, %date, "recorded scheduled release");
        Ok(())
    }

    /// The officially scheduled next release date, if one is known
    pub fn scheduled_release(&self, series_id: &SeriesId) -> Option<NaiveDate> {
        self.lock().scheduled.get(series_id).copied()
    }

    /// When the next release of a series is expected
    ///
    /// A scheduled date later than the last recorded release wins. Otherwise
    /// the estimate is the last release plus the median of the last
    /// `gap_window` gaps, or `None` with fewer than two recorded releases.
    pub fn next_expected_release(&self, series_id: &SeriesId) -> Option<DateTime<Utc>> {
        let state = self.lock();
        let timestamps = state
            .releases
            .get(series_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if let Some(date) = state.scheduled.get(series_id) {
            let scheduled = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
            if timestamps.last().map_or(true, |&last| scheduled > last) {
                return Some(scheduled);
            }
        }

        median_gap_estimate(timestamps, self.gap_window)
    }

    /// True when a new release is expected at `now`, or nothing is known yet
    pub fn is_due(&self, series_id: &SeriesId, now: DateTime<Utc>) -> bool {
        match self.next_expected_release(series_id) {
            Some(next) => now >= next,
            None => true,
        }
    }

    /// Recorded releases of a series, oldest first
    pub fn releases(&self, series_id: &SeriesId) -> Vec<ReleaseRecord> {
        self.lock()
            .releases
            .get(series_id)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .map(|&released_at| ReleaseRecord {
                        series_id: series_id.clone(),
                        released_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forgets every release and the schedule of a series. Returns the number
    /// of releases removed.
    pub fn reset(&self, series_id: &SeriesId) -> Result<usize> {
        let mut state = self.lock();
        let removed = state.releases.remove(series_id);
        let scheduled = state.scheduled.remove(series_id);
        if removed.is_none() && scheduled.is_none() {
            return Ok(0);
        }
        if let Err(e) = self.persist(&state) {
            if let Some(removed) = removed {
                state.releases.insert(series_id.clone(), removed);
            }
            if let Some(scheduled) = scheduled {
                state.scheduled.insert(series_id.clone(), scheduled);
            }
            return Err(e);
        }
        Ok(removed.map_or(0, |r| r.len()))
    }

    fn persist(&self, state: &CalendarState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = PersistedCalendar::V1 {
            releases: state
                .releases
                .iter()
                .filter(|(_, ts)| !ts.is_empty())
                .map(|(id, ts)| (id.clone(), ts.clone()))
                .collect(),
            scheduled: state
                .scheduled
                .iter()
                .map(|(id, date)| (id.clone(), *date))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        write_atomic(path, &bytes)
    }

    fn lock(&self) -> MutexGuard<'_, CalendarState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn median_gap_estimate(timestamps: &[DateTime<Utc>], gap_window: usize) -> Option<DateTime<Utc>> {
    if timestamps.len() < 2 {
        return None;
    }

    let start = timestamps.len().saturating_sub(gap_window + 1);
    let mut gaps: Vec<Duration> = timestamps[start..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect();
    gaps.sort();

    let mid = gaps.len() / 2;
    let median = if gaps.len() % 2 == 0 {
        (gaps[mid - 1] + gaps[mid]) / 2
    } else {
        gaps[mid]
    };

    timestamps.last().map(|&last| last + median)
}

fn load(path: &Path) -> Result<CalendarState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CalendarState::default()),
        Err(e) => return Err(e.into()),
    };

    let persisted: PersistedCalendar =
        serde_json::from_slice(&bytes).map_err(|e| CacheError::CorruptStore {
            entry: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let PersistedCalendar::V1 {
        releases,
        scheduled,
    } = persisted;
    Ok(CalendarState {
        releases: releases
            .into_iter()
            .map(|(id, mut ts)| {
                ts.sort();
                ts.dedup();
                (id, ts)
            })
            .collect(),
        scheduled: scheduled.into_iter().collect(),
    })
}
