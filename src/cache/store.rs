//! Vintage store: `(series_id, vintage_date) -> observations`
//!
//! Vintages are held in memory per series behind their own `RwLock` and are
//! loaded lazily from the storage backend on first access. Writes to a series
//! are serialized by its write lock and become visible in memory only after
//! the backend has durably saved the new record.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::backend::{FsBackend, MemoryBackend, SeriesRecord, StorageBackend};
use crate::data::{SeriesId, Vintage};
use crate::error::{CacheError, Result};

type VintageMap = BTreeMap<NaiveDate, Arc<Vintage>>;
type SlotMap = HashMap<SeriesId, Arc<RwLock<SeriesSlot>>>;

/// Result of a successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The vintage was new and has been persisted
    Inserted,
    /// An identical vintage was already stored; nothing was written
    Unchanged,
}

/// In-memory view of one series
#[derive(Debug, Default)]
struct SeriesSlot {
    loaded: bool,
    /// Set by `reset` once the slot has left the map; writers must re-fetch
    retired: bool,
    vintages: VintageMap,
}

fn to_record(series_id: &SeriesId, vintages: &VintageMap) -> SeriesRecord {
    SeriesRecord {
        series_id: series_id.clone(),
        vintages: vintages.values().map(|v| (**v).clone()).collect(),
    }
}

/// Point-in-time store of series vintages
#[derive(Debug)]
pub struct VintageStore {
    backend: Arc<dyn StorageBackend>,
    slots: Mutex<SlotMap>,
}

impl VintageStore {
    /// Creates a store on top of the given backend
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store persisting under `<cache_dir>/vintages`
    pub fn open(cache_dir: &Path) -> Self {
        Self::with_backend(Arc::new(FsBackend::new(cache_dir)))
    }

    /// Creates an ephemeral store
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Stores a new vintage
    ///
    /// Non-finite values are stored as missing. Idempotent for an identical
    /// vintage. Fails with `DuplicateVintage` when the date is taken by
    /// different observations and with `StaleVintage` when the date is older
    /// than the latest stored vintage. On error the store is unchanged.
    pub fn put(&self, mut vintage: Vintage) -> Result<PutOutcome> {
        validate_periods(&vintage)?;
        for obs in &mut vintage.observations {
            obs.value = obs.value.filter(|v| v.is_finite());
        }

        let series_id = vintage.series_id.clone();
        self.with_slot_mut(&series_id, |slot| {
            if let Some(existing) = slot.vintages.get(&vintage.vintage_date) {
                if existing.same_content(&vintage) {
                    debug!(series = %series_id, vintage = %vintage.vintage_date, "identical vintage already stored");
                    return Ok(PutOutcome::Unchanged);
                }
                return Err(CacheError::DuplicateVintage {
                    series_id: series_id.to_string(),
                    vintage_date: vintage.vintage_date,
                });
            }

            if let Some((&latest, _)) = slot.vintages.last_key_value() {
                if vintage.vintage_date < latest {
                    return Err(CacheError::StaleVintage {
                        series_id: series_id.to_string(),
                        vintage_date: vintage.vintage_date,
                        latest,
                    });
                }
            }

            let mut record = to_record(&series_id, &slot.vintages);
            record.vintages.push(vintage.clone());
            self.backend.save(&record)?;

            info!(
                series = %series_id,
                vintage = %vintage.vintage_date,
                observations = vintage.observations.len(),
                "stored vintage"
            );
            slot.vintages.insert(vintage.vintage_date, Arc::new(vintage));
            Ok(PutOutcome::Inserted)
        })
    }

    /// Returns the vintage with the greatest `vintage_date <= as_of`
    pub fn get_as_of(&self, series_id: &SeriesId, as_of: NaiveDate) -> Result<Arc<Vintage>> {
        self.with_loaded(series_id, |slot| {
            slot.vintages
                .range(..=as_of)
                .next_back()
                .map(|(_, v)| Arc::clone(v))
        })
        .ok_or_else(|| CacheError::NotFound {
            series_id: series_id.to_string(),
            as_of: Some(as_of),
        })
    }

    /// Returns the most recent vintage of a series
    pub fn latest(&self, series_id: &SeriesId) -> Result<Arc<Vintage>> {
        self.with_loaded(series_id, |slot| {
            slot.vintages.last_key_value().map(|(_, v)| Arc::clone(v))
        })
        .ok_or_else(|| CacheError::NotFound {
            series_id: series_id.to_string(),
            as_of: None,
        })
    }

    /// Returns vintages with `from <= vintage_date <= to`, oldest first
    pub fn range(&self, series_id: &SeriesId, from: NaiveDate, to: NaiveDate) -> Vec<Arc<Vintage>> {
        if from > to {
            return Vec::new();
        }
        self.with_loaded(series_id, |slot| {
            slot.vintages
                .range(from..=to)
                .map(|(_, v)| Arc::clone(v))
                .collect()
        })
    }

    /// Returns the stored vintage dates of a series, oldest first
    pub fn vintage_dates(&self, series_id: &SeriesId) -> Vec<NaiveDate> {
        self.with_loaded(series_id, |slot| slot.vintages.keys().copied().collect())
    }

    /// Lists all series with at least one stored vintage
    pub fn series_ids(&self) -> Result<Vec<SeriesId>> {
        let mut ids = self.backend.list()?;
        let slots: Vec<_> = lock_slots(&self.slots)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        for (id, slot) in slots {
            if !read_lock(&slot).vintages.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Removes vintages older than `before`
    ///
    /// The most recent vintage of a series is always retained. Returns the
    /// number of vintages removed.
    pub fn evict(&self, series_id: &SeriesId, before: NaiveDate) -> Result<usize> {
        self.with_slot_mut(series_id, |slot| {
            let Some((&latest, _)) = slot.vintages.last_key_value() else {
                return Ok(0);
            };

            let mut remaining = slot.vintages.clone();
            remaining.retain(|&d, _| d >= before || d == latest);
            let removed = slot.vintages.len() - remaining.len();
            if removed == 0 {
                return Ok(0);
            }

            self.backend.save(&to_record(series_id, &remaining))?;
            slot.vintages = remaining;

            info!(series = %series_id, %before, removed, "evicted vintages");
            Ok(removed)
        })
    }

    /// Removes every vintage of a series. Returns the number removed.
    pub fn reset(&self, series_id: &SeriesId) -> Result<usize> {
        loop {
            let slot = self.slot(series_id);
            let mut guard = write_lock(&slot);
            if guard.retired {
                continue;
            }
            self.ensure_loaded(series_id, &mut guard)?;

            self.backend.remove(series_id)?;
            let removed = guard.vintages.len();
            guard.vintages.clear();
            guard.retired = true;

            let mut slots = lock_slots(&self.slots);
            if slots.get(series_id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                slots.remove(series_id);
            }
            drop(slots);

            info!(series = %series_id, removed, "reset series");
            return Ok(removed);
        }
    }

    /// Returns the slot of a series, creating an unloaded one if needed
    fn slot(&self, series_id: &SeriesId) -> Arc<RwLock<SeriesSlot>> {
        let mut slots = lock_slots(&self.slots);
        Arc::clone(slots.entry(series_id.clone()).or_default())
    }

    /// Runs `f` under the series' write lock with its vintages loaded
    ///
    /// A backend failure other than corruption is returned without marking
    /// the slot loaded, so a later write cannot replace history it never saw.
    fn with_slot_mut<R>(
        &self,
        series_id: &SeriesId,
        f: impl FnOnce(&mut SeriesSlot) -> Result<R>,
    ) -> Result<R> {
        loop {
            let slot = self.slot(series_id);
            let mut guard = write_lock(&slot);
            if guard.retired {
                continue;
            }
            self.ensure_loaded(series_id, &mut guard)?;
            return f(&mut guard);
        }
    }

    /// Runs `f` against a loaded view of a series
    ///
    /// Reads never fail: a series that cannot be loaded is seen as empty.
    fn with_loaded<R>(&self, series_id: &SeriesId, f: impl FnOnce(&SeriesSlot) -> R) -> R {
        let existing = lock_slots(&self.slots).get(series_id).cloned();
        let Some(slot) = existing else {
            return self.load_detached(series_id, f);
        };

        {
            let guard = read_lock(&slot);
            if guard.loaded {
                return f(&guard);
            }
        }
        let mut guard = write_lock(&slot);
        match self.ensure_loaded(series_id, &mut guard) {
            Ok(()) => f(&guard),
            Err(e) => {
                warn!(series = %series_id, error = %e, "cannot load series; reading as empty");
                f(&SeriesSlot::default())
            }
        }
    }

    /// Loads a series without a slot; only series with vintages get one
    fn load_detached<R>(&self, series_id: &SeriesId, f: impl FnOnce(&SeriesSlot) -> R) -> R {
        let mut slots = lock_slots(&self.slots);
        if slots.contains_key(series_id) {
            drop(slots);
            return self.with_loaded(series_id, f);
        }

        let mut loaded = SeriesSlot::default();
        if let Err(e) = self.ensure_loaded(series_id, &mut loaded) {
            warn!(series = %series_id, error = %e, "cannot load series; reading as empty");
            return f(&loaded);
        }
        let result = f(&loaded);
        if !loaded.vintages.is_empty() {
            slots.insert(series_id.clone(), Arc::new(RwLock::new(loaded)));
        }
        result
    }

    /// Loads a slot from the backend if it is not loaded yet
    ///
    /// A corrupt record counts as absent. Any other error leaves the slot
    /// unloaded.
    fn ensure_loaded(&self, series_id: &SeriesId, slot: &mut SeriesSlot) -> Result<()> {
        if slot.loaded {
            return Ok(());
        }
        match self.backend.load(series_id) {
            Ok(Some(record)) => {
                slot.vintages = record
                    .vintages
                    .into_iter()
                    .map(|v| (v.vintage_date, Arc::new(v)))
                    .collect();
                debug!(series = %series_id, vintages = slot.vintages.len(), "loaded series");
            }
            Ok(None) => {}
            Err(e @ CacheError::CorruptStore { .. }) => {
                warn!(series = %series_id, error = %e, "ignoring corrupt cache entry");
            }
            Err(e) => return Err(e),
        }
        slot.loaded = true;
        Ok(())
    }
}

/// Periods within a vintage must be strictly increasing
fn validate_periods(vintage: &Vintage) -> Result<()> {
    if let Some(w) = vintage
        .observations
        .windows(2)
        .find(|w| w[0].period >= w[1].period)
    {
        return Err(CacheError::InvalidObservations {
            series_id: vintage.series_id.to_string(),
            reason: format!("period {} is not after {}", w[1].period, w[0].period),
        });
    }
    Ok(())
}

fn lock_slots(slots: &Mutex<SlotMap>) -> std::sync::MutexGuard<'_, SlotMap> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_lock(slot: &RwLock<SeriesSlot>) -> RwLockReadGuard<'_, SeriesSlot> {
    slot.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock(slot: &RwLock<SeriesSlot>) -> RwLockWriteGuard<'_, SeriesSlot> {
    slot.write().unwrap_or_else(|e| e.into_inner())
}
