//! fredcache library
//!
//! A point-in-time cache for FRED economic time series. Every revision of a
//! series is kept as an immutable vintage so a query can ask for the data as
//! it was known on any past date. The binary in `main.rs` is a thin CLI over
//! these modules; integration tests use them directly.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod refresh;

pub use cache::{MergePolicy, ReleaseCalendar, VintageStore};
pub use data::{FetchedVintage, Fetcher, Observation, SeriesId, Vintage};
pub use error::{CacheError, FetchError, Result};
pub use refresh::{CacheEntry, FreshnessPolicy, RefreshCoordinator, RefreshOutcome};
