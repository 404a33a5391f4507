//! Configuration for fredcache
//!
//! Settings come from an optional TOML file, then the `FRED_API_KEY`
//! environment variable, then command-line flags (applied by the caller).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::cache::{ReleaseCalendar, VintageStore, DEFAULT_GAP_WINDOW};
use crate::data::fred::{FredClient, FRED_BASE_URL};
use crate::error::{CacheError, Result};
use crate::refresh::{FreshnessPolicy, RefreshCoordinator};

/// Environment variable holding the FRED API key
pub const API_KEY_ENV: &str = "FRED_API_KEY";

/// Name of the config file inside the config directory
const CONFIG_FILE: &str = "config.toml";

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where vintages and the release calendar are stored
    pub cache_dir: Option<PathBuf>,
    /// FRED API key
    pub fred_api_key: Option<String>,
    /// FRED API base URL
    pub fred_base_url: String,
    /// Maximum distance between the as-of date and the served vintage
    pub max_age_days: Option<i64>,
    /// Hours after which a series is re-checked when a release is due
    pub refresh_after_hours: Option<i64>,
    /// Number of recent release gaps used to predict the next release
    pub release_gap_window: usize,
    /// HTTP request timeout
    pub request_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            fred_api_key: None,
            fred_base_url: FRED_BASE_URL.to_string(),
            max_age_days: None,
            refresh_after_hours: Some(24),
            release_gap_window: DEFAULT_GAP_WINDOW,
            request_timeout_secs: 30,
        }
    }
}

impl CacheConfig {
    /// Loads the configuration
    ///
    /// An explicit `path` must exist. Without one, `config.toml` in the XDG
    /// config directory is used if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.fred_api_key = Some(key.trim().to_string());
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.release_gap_window == 0 {
            return Err(CacheError::Config(
                "release_gap_window must be at least 1".to_string(),
            ));
        }
        if matches!(self.max_age_days, Some(d) if d < 0) {
            return Err(CacheError::Config("max_age_days must not be negative".to_string()));
        }
        if matches!(self.refresh_after_hours, Some(h) if h < 0) {
            return Err(CacheError::Config(
                "refresh_after_hours must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the cache directory, defaulting to the XDG cache location
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", "fredcache")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .ok_or_else(|| CacheError::Config("cannot determine a cache directory".to_string()))
    }

    /// The freshness policy implied by the configured limits
    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::MaxAge {
            as_of_window: self.max_age_days.map(Duration::days),
            wall_clock: self.refresh_after_hours.map(Duration::hours),
        }
    }

    /// Builds a FRED client from the configured key, base URL and timeout
    pub fn fred_client(&self) -> Result<FredClient> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| CacheError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(FredClient::new(self.fred_api_key.clone().unwrap_or_default())
            .with_client(http)
            .with_base_url(self.fred_base_url.clone()))
    }

    /// Opens the store and calendar and wires them to a FRED client
    pub fn coordinator(&self) -> Result<RefreshCoordinator> {
        let cache_dir = self.resolve_cache_dir()?;
        let store = Arc::new(VintageStore::open(&cache_dir));
        let calendar = Arc::new(ReleaseCalendar::open(&cache_dir, self.release_gap_window));
        Ok(RefreshCoordinator::new(
            store,
            calendar,
            Arc::new(self.fred_client()?),
        ))
    }
}

/// `config.toml` in the XDG config directory
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "fredcache").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.fred_base_url, FRED_BASE_URL);
        assert_eq!(config.release_gap_window, DEFAULT_GAP_WINDOW);
        assert_eq!(config.refresh_after_hours, Some(24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CacheConfig::from_toml(
            r#"
            cache_dir = "/tmp/fredcache-test"
            max_age_days = 90
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/fredcache-test")));
        assert_eq!(config.max_age_days, Some(90));
        assert_eq!(config.release_gap_window, DEFAULT_GAP_WINDOW);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CacheConfig::from_toml("cache_dir = [").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_zero_gap_window_is_rejected() {
        let err = CacheConfig::from_toml("release_gap_window = 0").unwrap_err();
        assert!(err.to_string().contains("release_gap_window"));
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        assert!(CacheConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "refresh_after_hours = 6\n").unwrap();

        let config = CacheConfig::load(Some(&path)).unwrap();
        assert_eq!(config.refresh_after_hours, Some(6));
    }

    #[test]
    fn test_freshness_policy_from_config() {
        let config = CacheConfig {
            max_age_days: Some(30),
            refresh_after_hours: None,
            ..Default::default()
        };
        assert_eq!(
            config.freshness_policy(),
            FreshnessPolicy::MaxAge {
                as_of_window: Some(Duration::days(30)),
                wall_clock: None,
            }
        );
    }

    #[test]
    fn test_resolve_cache_dir_prefers_configured_dir() {
        let config = CacheConfig {
            cache_dir: Some(PathBuf::from("/var/cache/fred")),
            ..Default::default()
        };
        assert_eq!(config.resolve_cache_dir().unwrap(), PathBuf::from("/var/cache/fred"));
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Ok(dir) = CacheConfig::default().resolve_cache_dir() {
            assert!(dir.to_string_lossy().contains("fredcache"));
        }
        // Passes when no home directory exists (e.g., CI)
    }
}
