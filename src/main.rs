//! fredcache - point-in-time cache for FRED economic time series
//!
//! Command-line front end: parses arguments, loads the configuration and runs
//! one cache operation, printing the result to stdout.

use std::time::Duration as StdDuration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use serde_json::json;

use fredcache::cli::{resolve_series, Cli, CliError, Command, GetArgs};
use fredcache::config::CacheConfig;
use fredcache::data::all_indicators;
use fredcache::logging::init_cli_logger;
use fredcache::refresh::{CacheEntry, RefreshCoordinator};
use fredcache::SeriesId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_logger(cli.verbose);

    let mut config = CacheConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }

    match cli.command {
        Command::Indicators => {
            for indicator in all_indicators() {
                println!(
                    "{:<18} {:<32} {}",
                    indicator.series_id, indicator.name, indicator.description
                );
            }
        }
        Command::Get(args) => {
            let coordinator = config.coordinator()?;
            run_get(&coordinator, &config, &args).await?;
        }
        Command::Refresh { series, all, force } => {
            let coordinator = config.coordinator()?;
            let ids = refresh_targets(&series, all)?;
            let mut failed = 0;
            for (id, result) in coordinator.refresh_all(&ids, force).await {
                match result {
                    Ok(outcome) => println!("{id}: {outcome:?}"),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{id}: {e}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} series failed to refresh", ids.len());
            }
        }
        Command::Vintages { series } => {
            let coordinator = config.coordinator()?;
            let id = resolve_series(&series)?;
            let dates = coordinator.store().vintage_dates(&id);
            if dates.is_empty() {
                println!("No vintages cached for {id}");
            }
            for date in dates {
                println!("{date}");
            }
        }
        Command::Releases { series } => {
            let coordinator = config.coordinator()?;
            let id = resolve_series(&series)?;
            for release in coordinator.calendar().releases(&id) {
                println!("{}", release.released_at.to_rfc3339());
            }
            if let Some(scheduled) = coordinator.calendar().scheduled_release(&id) {
                println!("scheduled: {scheduled}");
            }
            match coordinator.calendar().next_expected_release(&id) {
                Some(next) => println!("next expected: {}", next.to_rfc3339()),
                None => println!("next expected: unknown"),
            }
        }
        Command::Evict { series, before } => {
            let coordinator = config.coordinator()?;
            let id = resolve_series(&series)?;
            let removed = coordinator.evict(&id, before)?;
            println!("Removed {removed} vintage(s) of {id} before {before}");
        }
        Command::Reset { series } => {
            let coordinator = config.coordinator()?;
            let id = resolve_series(&series)?;
            let removed = coordinator.reset(&id)?;
            println!("Removed {removed} vintage(s) of {id}");
        }
    }

    Ok(())
}

async fn run_get(
    coordinator: &RefreshCoordinator,
    config: &CacheConfig,
    args: &GetArgs,
) -> anyhow::Result<()> {
    let id = resolve_series(&args.series)?;
    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let policy = args.freshness_policy(config);

    let entry = match args.wait {
        Some(secs) => {
            coordinator
                .get_with_timeout(&id, as_of, policy, StdDuration::from_secs(secs))
                .await?
        }
        None => coordinator.get(&id, as_of, policy).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entry_json(&entry))?);
    } else {
        print_entry(&entry);
    }
    Ok(())
}

fn refresh_targets(series: &[String], all: bool) -> Result<Vec<SeriesId>, CliError> {
    if all {
        return all_indicators()
            .iter()
            .map(|i| resolve_series(i.series_id))
            .collect();
    }
    if series.is_empty() {
        return Err(CliError::NoSeries);
    }
    series.iter().map(|s| resolve_series(s)).collect()
}

fn entry_json(entry: &CacheEntry) -> serde_json::Value {
    json!({
        "series_id": entry.vintage.series_id,
        "as_of": entry.as_of,
        "vintage_date": entry.vintage_date(),
        "fetched_at": entry.vintage.fetched_at,
        "is_stale": entry.is_stale,
        "observations": entry.observations(),
    })
}

fn print_entry(entry: &CacheEntry) {
    let stale = if entry.is_stale { " (stale)" } else { "" };
    println!(
        "{} as of {}: vintage {}{}",
        entry.vintage.series_id,
        entry.as_of,
        entry.vintage_date(),
        stale
    );
    for obs in entry.observations() {
        match obs.value {
            Some(value) => println!("{}\t{}", obs.period, value),
            None => println!("{}\t.", obs.period),
        }
    }
}
