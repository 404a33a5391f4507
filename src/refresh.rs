//! Refresh coordination between the vintage store and the remote source
//!
//! `RefreshCoordinator::get` answers point-in-time queries from the store and
//! falls back to a remote fetch when the cached answer does not satisfy the
//! caller's freshness policy. Fetches run in spawned tasks shared by every
//! waiter, so there is at most one remote call per series in flight and an
//! abandoned caller never cancels a fetch other callers depend on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use crate::cache::{MergeOutcome, MergePolicy, ReleaseCalendar, VintageStore};
use crate::data::{Fetcher, Observation, SeriesId, Vintage};
use crate::error::{CacheError, Result};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// How fresh a cached answer must be before it is served without a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessPolicy {
    /// Serve whatever is cached; never contact the remote source
    CachedOnly,
    /// Always try the remote source first
    Refresh,
    /// Serve cached data within the given limits
    ///
    /// `as_of_window` bounds the distance between the requested as-of date
    /// and the vintage date. `wall_clock` bounds the time since the series was
    /// last checked remotely; it is waived while the release calendar expects
    /// no new publication. Either limit may be disabled.
    MaxAge {
        as_of_window: Option<Duration>,
        wall_clock: Option<Duration>,
    },
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy::MaxAge {
            as_of_window: None,
            wall_clock: Some(Duration::hours(24)),
        }
    }
}

/// The answer to "series X as of date Y"
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The selected vintage
    pub vintage: Arc<Vintage>,
    /// The requested as-of date
    pub as_of: NaiveDate,
    /// Whether this is a fallback that does not satisfy the freshness policy
    pub is_stale: bool,
}

impl CacheEntry {
    pub fn vintage_date(&self) -> NaiveDate {
        self.vintage.vintage_date
    }

    pub fn observations(&self) -> &[Observation] {
        &self.vintage.observations
    }
}

/// Result of a completed refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new vintage was stored
    Stored(NaiveDate),
    /// The source returned the latest stored vintage again
    Unchanged,
    /// The source had nothing newer
    NoData,
    /// The fetched vintage failed validation and was discarded
    Rejected(String),
    /// The release calendar expects no new publication yet
    NotDue,
}

type SharedRefresh = Shared<BoxFuture<'static, std::result::Result<RefreshOutcome, String>>>;

struct Inner {
    store: Arc<VintageStore>,
    calendar: Arc<ReleaseCalendar>,
    fetcher: Arc<dyn Fetcher>,
    merge: MergePolicy,
    clock: Clock,
    in_flight: Mutex<HashMap<SeriesId, SharedRefresh>>,
    last_checked: Mutex<HashMap<SeriesId, DateTime<Utc>>>,
}

/// Removes the in-flight marker when a refresh task ends, even by panic
struct InFlightGuard {
    inner: Arc<Inner>,
    series_id: SeriesId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.series_id);
    }
}

/// Builder for `RefreshCoordinator`
pub struct CoordinatorBuilder {
    store: Arc<VintageStore>,
    calendar: Arc<ReleaseCalendar>,
    fetcher: Arc<dyn Fetcher>,
    clock: Clock,
}

impl CoordinatorBuilder {
    /// Overrides the clock (used by tests)
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RefreshCoordinator {
        RefreshCoordinator {
            inner: Arc::new(Inner {
                store: self.store,
                calendar: self.calendar,
                fetcher: self.fetcher,
                merge: MergePolicy::new(),
                clock: self.clock,
                in_flight: Mutex::new(HashMap::new()),
                last_checked: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Serves point-in-time views, refreshing from the remote source when needed
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.inner.store)
            .field("calendar", &self.inner.calendar)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<VintageStore>,
        calendar: Arc<ReleaseCalendar>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self::builder(store, calendar, fetcher).build()
    }

    pub fn builder(
        store: Arc<VintageStore>,
        calendar: Arc<ReleaseCalendar>,
        fetcher: Arc<dyn Fetcher>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            store,
            calendar,
            fetcher,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn store(&self) -> &Arc<VintageStore> {
        &self.inner.store
    }

    pub fn calendar(&self) -> &Arc<ReleaseCalendar> {
        &self.inner.calendar
    }

    /// Returns the series as it looked on `as_of`
    ///
    /// Serves the cached vintage when it satisfies `policy`; otherwise
    /// refreshes (joining an in-flight refresh if there is one) and looks the
    /// store up again. A vintage is returned with `is_stale = true` when the
    /// refresh failed or when even the refreshed store has nothing within the
    /// policy's limits; an error is returned only when nothing usable exists.
    pub async fn get(
        &self,
        series_id: &SeriesId,
        as_of: NaiveDate,
        policy: FreshnessPolicy,
    ) -> Result<CacheEntry> {
        let cached = self.inner.store.get_as_of(series_id, as_of).ok();

        if let Some(vintage) = &cached {
            if self.inner.is_fresh(vintage, as_of, policy) {
                debug!(series = %series_id, %as_of, vintage = %vintage.vintage_date, "cache hit");
                return Ok(CacheEntry {
                    vintage: Arc::clone(vintage),
                    as_of,
                    is_stale: false,
                });
            }
        }

        if policy == FreshnessPolicy::CachedOnly {
            return Err(CacheError::NotFound {
                series_id: series_id.to_string(),
                as_of: Some(as_of),
            });
        }

        let outcome = self.refresh_shared(series_id).await;

        match self.inner.store.get_as_of(series_id, as_of) {
            Ok(vintage) => {
                let confirmed = matches!(
                    outcome,
                    Ok(RefreshOutcome::Stored(_) | RefreshOutcome::Unchanged | RefreshOutcome::NoData)
                );
                // A confirmed refresh satisfies `Refresh`; age limits still apply
                let is_stale = !confirmed
                    || (policy != FreshnessPolicy::Refresh
                        && !self.inner.is_fresh(&vintage, as_of, policy));
                if is_stale {
                    warn!(series = %series_id, %as_of, vintage = %vintage.vintage_date, "serving stale vintage");
                }
                Ok(CacheEntry {
                    vintage,
                    as_of,
                    is_stale,
                })
            }
            Err(not_found) => match outcome {
                Err(reason) => Err(CacheError::RemoteUnavailable {
                    series_id: series_id.to_string(),
                    reason,
                }),
                Ok(_) => Err(not_found),
            },
        }
    }

    /// Like `get`, but gives up waiting after `timeout`
    ///
    /// A refresh started on behalf of this call keeps running and populates
    /// the cache for later callers.
    pub async fn get_with_timeout(
        &self,
        series_id: &SeriesId,
        as_of: NaiveDate,
        policy: FreshnessPolicy,
        timeout: std::time::Duration,
    ) -> Result<CacheEntry> {
        tokio::time::timeout(timeout, self.get(series_id, as_of, policy))
            .await
            .map_err(|_| CacheError::Timeout {
                series_id: series_id.to_string(),
                waited_ms: timeout.as_millis() as u64,
            })?
    }

    /// Refreshes a series from the remote source unconditionally
    pub async fn refresh(&self, series_id: &SeriesId) -> Result<RefreshOutcome> {
        self.refresh_shared(series_id)
            .await
            .map_err(|reason| CacheError::RemoteUnavailable {
                series_id: series_id.to_string(),
                reason,
            })
    }

    /// Refreshes several series concurrently
    ///
    /// Without `force`, series whose release calendar expects no new
    /// publication are skipped with `RefreshOutcome::NotDue`.
    pub async fn refresh_all(
        &self,
        series_ids: &[SeriesId],
        force: bool,
    ) -> Vec<(SeriesId, Result<RefreshOutcome>)> {
        let now = (self.inner.clock)();
        let tasks = series_ids.iter().map(|id| async move {
            if !force && !self.inner.calendar.is_due(id, now) {
                debug!(series = %id, "release not due; skipping");
                return (id.clone(), Ok(RefreshOutcome::NotDue));
            }
            (id.clone(), self.refresh(id).await)
        });
        join_all(tasks).await
    }

    /// Removes vintages older than `before`, keeping the most recent one
    pub fn evict(&self, series_id: &SeriesId, before: NaiveDate) -> Result<usize> {
        self.inner.store.evict(series_id, before)
    }

    /// Drops every cached vintage and release record of a series
    pub fn reset(&self, series_id: &SeriesId) -> Result<usize> {
        let removed = self.inner.store.reset(series_id)?;
        self.inner.calendar.reset(series_id)?;
        lock(&self.inner.last_checked).remove(series_id);
        Ok(removed)
    }

    /// Returns the in-flight refresh of a series, starting one if needed
    fn refresh_shared(&self, series_id: &SeriesId) -> SharedRefresh {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(existing) = in_flight.get(series_id) {
            debug!(series = %series_id, "joining in-flight refresh");
            return existing.clone();
        }

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            series_id: series_id.clone(),
        };
        let handle = tokio::spawn(async move {
            let outcome = guard.inner.fetch_and_store(&guard.series_id).await;
            drop(guard);
            outcome
        });

        let shared = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(format!("refresh task failed: {}", e)))
        }
        .boxed()
        .shared();

        in_flight.insert(series_id.clone(), shared.clone());
        shared
    }
}

impl Inner {
    fn is_fresh(&self, vintage: &Vintage, as_of: NaiveDate, policy: FreshnessPolicy) -> bool {
        match policy {
            FreshnessPolicy::CachedOnly => true,
            FreshnessPolicy::Refresh => false,
            FreshnessPolicy::MaxAge {
                as_of_window,
                wall_clock,
            } => {
                let within_as_of = as_of_window
                    .map_or(true, |window| as_of.signed_duration_since(vintage.vintage_date) <= window);
                let within_wall_clock = wall_clock.map_or(true, |max_age| {
                    let now = (self.clock)();
                    match self.last_checked(&vintage.series_id) {
                        Some(checked) if now - checked <= max_age => true,
                        _ => !self.calendar.is_due(&vintage.series_id, now),
                    }
                });
                within_as_of && within_wall_clock
            }
        }
    }

    /// When the series was last confirmed against the remote source
    fn last_checked(&self, series_id: &SeriesId) -> Option<DateTime<Utc>> {
        let fetched_at = self.store.latest(series_id).ok().map(|v| v.fetched_at);
        let checked = lock(&self.last_checked).get(series_id).copied();
        fetched_at.max(checked)
    }

    async fn fetch_and_store(
        &self,
        series_id: &SeriesId,
    ) -> std::result::Result<RefreshOutcome, String> {
        let latest = self.store.latest(series_id).ok();
        let since = latest.as_ref().map(|v| v.vintage_date);

        info!(series = %series_id, since = ?since, "fetching series");
        let fetched = match self.fetcher.fetch(series_id, since).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(series = %series_id, error = %e, "remote fetch failed");
                return Err(e.to_string());
            }
        };
        let released_at = fetched.released_at;

        let outcome = match self.merge.merge(series_id, latest.as_deref(), fetched) {
            Ok(MergeOutcome::New(vintage)) => {
                let vintage_date = vintage.vintage_date;
                match self.store.put(vintage.with_fetched_at((self.clock)())) {
                    Ok(_) => RefreshOutcome::Stored(vintage_date),
                    Err(e) if e.is_integrity_error() => {
                        error!(series = %series_id, error = %e, "rejected fetched vintage");
                        RefreshOutcome::Rejected(e.to_string())
                    }
                    Err(e) => {
                        error!(series = %series_id, error = %e, "failed to store vintage");
                        return Err(e.to_string());
                    }
                }
            }
            Ok(MergeOutcome::Unchanged) => RefreshOutcome::Unchanged,
            Ok(MergeOutcome::NoData) => RefreshOutcome::NoData,
            Err(e) => {
                error!(series = %series_id, error = %e, "rejected fetched vintage");
                RefreshOutcome::Rejected(e.to_string())
            }
        };

        if !matches!(outcome, RefreshOutcome::Rejected(_)) {
            lock(&self.last_checked).insert(series_id.clone(), (self.clock)());
        }
        if matches!(outcome, RefreshOutcome::Stored(_) | RefreshOutcome::Unchanged) {
            if let Err(e) = self.calendar.record_release(series_id, released_at) {
                warn!(series = %series_id, error = %e, "could not record release");
            }
        }
        if !matches!(outcome, RefreshOutcome::Rejected(_)) {
            self.update_schedule(series_id).await;
        }

        debug!(series = %series_id, outcome = ?outcome, "refresh finished");
        Ok(outcome)
    }

    /// Looks up the official next release once the known one has passed
    ///
    /// Failures only cost precision: the calendar falls back to its estimate.
    async fn update_schedule(&self, series_id: &SeriesId) {
        let today = (self.clock)().date_naive();
        if self
            .calendar
            .scheduled_release(series_id)
            .is_some_and(|scheduled| scheduled > today)
        {
            return;
        }

        match self.fetcher.next_release(series_id, today).await {
            Ok(Some(date)) => {
                if let Err(e) = self.calendar.set_scheduled_release(series_id, date) {
                    warn!(series = %series_id, error = %e, "could not record scheduled release");
                }
            }
            Ok(None) => debug!(series = %series_id, "no scheduled release published"),
            Err(e) => warn!(series = %series_id, error = %e, "release schedule lookup failed"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
