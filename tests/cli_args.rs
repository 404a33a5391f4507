//! Integration tests for the fredcache binary
//!
//! Runs the CLI against a temporary cache directory and, where a remote is
//! needed, a mock FRED server.

use std::path::Path;
use std::process::Command;

use httpmock::prelude::*;
use tempfile::TempDir;

const SERIES_RESPONSE: &str = r#"{
    "seriess": [
        {"id": "GDP", "title": "Gross Domestic Product", "last_updated": "2024-03-28 07:53:02-05"}
    ]
}"#;

const OBSERVATIONS_RESPONSE: &str = r#"{
    "observations": [
        {"date": "2023-07-01", "value": "27610.128"},
        {"date": "2023-10-01", "value": "27956.998"}
    ]
}"#;

/// Helper to run the CLI with given args against `cache_dir` and capture output
fn run_cli(cache_dir: &Path, config: &str, args: &[&str]) -> std::process::Output {
    let config_path = cache_dir.join("test-config.toml");
    std::fs::write(&config_path, config).expect("Failed to write config");

    Command::new(env!("CARGO_BIN_EXE_fredcache"))
        .arg("--config")
        .arg(&config_path)
        .arg("--cache-dir")
        .arg(cache_dir)
        .args(args)
        .env_remove("FRED_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute fredcache")
}

/// Config pointing at an address nothing listens on
fn offline_config() -> String {
    "fred_api_key = \"test-key\"\nfred_base_url = \"http://127.0.0.1:9/fred\"\nrequest_timeout_secs = 2\n"
        .to_string()
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = Command::new(env!("CARGO_BIN_EXE_fredcache"))
        .arg("--help")
        .output()
        .expect("Failed to execute fredcache");
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fredcache"), "Help should mention fredcache");
    assert!(stdout.contains("get"), "Help should list the get command");
    assert!(stdout.contains("refresh"), "Help should list the refresh command");
}

#[test]
fn test_invalid_as_of_prints_error_and_exits() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(temp_dir.path(), &offline_config(), &["get", "GDP", "--as-of", "yesterday"]);
    assert!(!output.status.success(), "Expected invalid date to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid date"), "Should explain the date error: {}", stderr);
}

#[test]
fn test_negative_max_age_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(
        temp_dir.path(),
        &offline_config(),
        &["get", "GDP", "--max-age-days=-5", "--cached-only"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid number of days"), "stderr: {}", stderr);
}

#[test]
fn test_indicators_lists_catalog() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(temp_dir.path(), &offline_config(), &["indicators"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("GDP"));
    assert!(stdout.contains("CPIAUCSL"));
    assert!(stdout.contains("T10Y2Y"));
}

#[test]
fn test_vintages_on_empty_cache() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(temp_dir.path(), &offline_config(), &["vintages", "GDP"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No vintages cached for GDP"), "stdout: {}", stdout);
}

#[test]
fn test_cached_only_miss_fails_without_network() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(
        temp_dir.path(),
        &offline_config(),
        &["get", "GDP", "--as-of", "2024-04-01", "--cached-only"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No vintage of GDP"), "stderr: {}", stderr);
}

#[test]
fn test_get_with_unreachable_remote_reports_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(temp_dir.path(), &offline_config(), &["get", "GDP", "--as-of", "2024-04-01"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Remote source unavailable"), "stderr: {}", stderr);
}

#[test]
fn test_refresh_without_series_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_cli(temp_dir.path(), &offline_config(), &["refresh"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No series given"), "stderr: {}", stderr);
}

#[test]
fn test_get_fetches_then_serves_from_cache() {
    let server = MockServer::start();
    let series_mock = server.mock(|when, then| {
        when.method(GET).path("/fred/series").query_param("series_id", "GDP");
        then.status(200)
            .header("Content-Type", "application/json")
            .body(SERIES_RESPONSE);
    });
    let obs_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/fred/series/observations")
            .query_param("series_id", "GDP");
        then.status(200)
            .header("Content-Type", "application/json")
            .body(OBSERVATIONS_RESPONSE);
    });

    let temp_dir = TempDir::new().unwrap();
    let config = format!(
        "fred_api_key = \"test-key\"\nfred_base_url = \"{}\"\n",
        server.url("/fred")
    );

    let output = run_cli(
        temp_dir.path(),
        &config,
        &["get", "GDP", "--as-of", "2024-04-01", "--json"],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    series_mock.assert_hits(1);
    obs_mock.assert_hits(1);

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["vintage_date"], "2024-03-28");
    assert_eq!(json["is_stale"], false);
    assert_eq!(json["observations"].as_array().unwrap().len(), 2);

    // Second process reads the persisted vintage without touching the server
    let output = run_cli(
        temp_dir.path(),
        &config,
        &["get", "GDP", "--as-of", "2024-04-01", "--cached-only"],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vintage 2024-03-28"), "stdout: {}", stdout);
    assert!(stdout.contains("2023-10-01\t27956.998"));
    series_mock.assert_hits(1);

    let output = run_cli(temp_dir.path(), &config, &["vintages", "GDP"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("2024-03-28"));

    let output = run_cli(temp_dir.path(), &config, &["releases", "GDP"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("2024-03-28T12:53:02"));

    let output = run_cli(temp_dir.path(), &config, &["reset", "GDP"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 1 vintage(s) of GDP"));

    let output = run_cli(temp_dir.path(), &config, &["vintages", "GDP"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("No vintages cached"));
}

#[test]
fn test_vintages_before_as_of_are_not_served() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/fred/series");
        then.status(200).body(SERIES_RESPONSE);
    });
    server.mock(|when, then| {
        when.method(GET).path("/fred/series/observations");
        then.status(200).body(OBSERVATIONS_RESPONSE);
    });
    let config = format!(
        "fred_api_key = \"test-key\"\nfred_base_url = \"{}\"\n",
        server.url("/fred")
    );

    let output = run_cli(temp_dir.path(), &config, &["refresh", "GDP"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Stored(2024-03-28)"));

    // The only vintage was published after this date
    let output = run_cli(
        temp_dir.path(),
        &config,
        &["get", "GDP", "--as-of", "2024-01-01", "--cached-only"],
    );
    assert!(!output.status.success());
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use fredcache::cli::{parse_date_arg, resolve_series, Cli, Command};

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["fredcache"]).is_err());
    }

    #[test]
    fn test_cli_refresh_all_force() {
        let cli = Cli::parse_from(["fredcache", "refresh", "--all", "--force"]);
        match cli.command {
            Command::Refresh { series, all, force } => {
                assert!(series.is_empty());
                assert!(all);
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_refresh_several_series() {
        let cli = Cli::parse_from(["fredcache", "refresh", "GDP", "UNRATE"]);
        match cli.command {
            Command::Refresh { series, .. } => assert_eq!(series, vec!["GDP", "UNRATE"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_date_arg_rejects_garbage() {
        assert!(parse_date_arg("2024-13-01").is_err());
    }

    #[test]
    fn test_resolve_series_case_insensitive_id() {
        assert_eq!(resolve_series("gdp").unwrap().as_str(), "GDP");
    }
}
