//! Cache module for storing series vintages and release dates to disk
//!
//! This module provides the point-in-time vintage store, its storage backends,
//! the release calendar and the merge policy applied to freshly fetched data.
//! Vintages are immutable once stored; revisions of a series always produce a
//! new vintage.

pub mod backend;
mod calendar;
mod merge;
mod store;

pub use backend::{FsBackend, MemoryBackend, SeriesRecord, StorageBackend};
pub use calendar::{ReleaseCalendar, DEFAULT_GAP_WINDOW, RELEASE_DATES_FILE};
pub use merge::{MergeOutcome, MergePolicy};
pub use store::{PutOutcome, VintageStore};
