//! Command-line interface parsing for fredcache
//!
//! This module handles parsing of CLI arguments using clap, including date
//! arguments, indicator-name resolution and the freshness flags of `get`.

use std::path::PathBuf;

use chrono::{Duration, NaiveDate};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::config::CacheConfig;
use crate::data::{get_indicator, SeriesId};
use crate::refresh::FreshnessPolicy;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The date is not in YYYY-MM-DD format
    #[error("Invalid date: '{0}'. Expected YYYY-MM-DD")]
    InvalidDate(String),

    /// The series argument is empty
    #[error("Invalid series: '{0}'")]
    InvalidSeries(String),

    /// The day count is negative or not a whole number
    #[error("Invalid number of days: '{0}'. Expected a non-negative whole number")]
    InvalidDays(String),

    /// `refresh` needs series names or --all
    #[error("No series given. Pass series ids or --all")]
    NoSeries,
}

/// fredcache - point-in-time cache for FRED economic time series
#[derive(Parser, Debug)]
#[command(name = "fredcache")]
#[command(about = "Point-in-time cache for FRED economic time series")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show a series as it looked on a given date
    Get(GetArgs),

    /// Fetch new vintages from FRED
    Refresh {
        /// Series ids or indicator names
        series: Vec<String>,
        /// Refresh every tracked indicator
        #[arg(long)]
        all: bool,
        /// Fetch even when no release is expected yet
        #[arg(long)]
        force: bool,
    },

    /// List stored vintage dates of a series
    Vintages { series: String },

    /// List recorded releases and the next expected one
    Releases { series: String },

    /// Remove vintages older than a date (the latest is always kept)
    Evict {
        series: String,
        #[arg(long, value_parser = parse_date_arg, value_name = "DATE")]
        before: NaiveDate,
    },

    /// Remove every cached vintage and release of a series
    Reset { series: String },

    /// List the tracked indicators
    Indicators,
}

/// Arguments of `get`
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Series id or indicator name
    pub series: String,

    /// Point-in-time date (defaults to today)
    #[arg(long, value_parser = parse_date_arg, value_name = "DATE")]
    pub as_of: Option<NaiveDate>,

    /// Never contact FRED
    #[arg(long, conflicts_with = "refresh")]
    pub cached_only: bool,

    /// Always contact FRED first
    #[arg(long)]
    pub refresh: bool,

    /// Maximum distance in days between the as-of date and the vintage
    #[arg(long, value_name = "DAYS", value_parser = parse_days_arg)]
    pub max_age_days: Option<i64>,

    /// Stop waiting for FRED after this many seconds
    #[arg(long, value_name = "SECS")]
    pub wait: Option<u64>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl GetArgs {
    /// Resolves the freshness policy from the flags and the config
    pub fn freshness_policy(&self, config: &CacheConfig) -> FreshnessPolicy {
        if self.cached_only {
            return FreshnessPolicy::CachedOnly;
        }
        if self.refresh {
            return FreshnessPolicy::Refresh;
        }
        match config.freshness_policy() {
            FreshnessPolicy::MaxAge {
                as_of_window,
                wall_clock,
            } => FreshnessPolicy::MaxAge {
                as_of_window: self.max_age_days.map(Duration::days).or(as_of_window),
                wall_clock,
            },
            other => other,
        }
    }
}

/// Parses a YYYY-MM-DD date argument
pub fn parse_date_arg(s: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| CliError::InvalidDate(s.to_string()))
}

/// Parses a non-negative day count
pub fn parse_days_arg(s: &str) -> Result<i64, CliError> {
    s.trim()
        .parse::<i64>()
        .ok()
        .filter(|&days| days >= 0 && Duration::try_days(days).is_some())
        .ok_or_else(|| CliError::InvalidDays(s.to_string()))
}

/// Resolves an indicator name or a raw series id
pub fn resolve_series(s: &str) -> Result<SeriesId, CliError> {
    let id = get_indicator(s).map(|i| i.series_id).unwrap_or(s);
    SeriesId::new(id).map_err(|_| CliError::InvalidSeries(s.to_string()))
}
