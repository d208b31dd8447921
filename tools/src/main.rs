//! recalc-runner: headless recalculation of facility remuneration snapshots.
//!
//! Usage:
//!   recalc-runner --db incentives.db --facility PHC-001 --month 2024-04
//!   recalc-runner --db incentives.db --all --threads 4
//!   recalc-runner --db incentives.db --check-config

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use incentive_core::{
    bulk::{self, CancelToken},
    config::EngineConfig,
    recalc::Recalculator,
    store::IncentiveStore,
    types::ReportingMonth,
};
use std::env;

#[derive(serde::Serialize)]
struct ConfigReport {
    indicators: usize,
    facility_types: usize,
    ceilings: usize,
    worker_allocations: usize,
    issues: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let threads = parse_arg(&args, "--threads", 1usize);
    let all = args.iter().any(|a| a == "--all");
    let check_config = args.iter().any(|a| a == "--check-config");
    let db = str_arg(&args, "--db").unwrap_or("incentives.db");
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");

    let config = EngineConfig::load(data_dir)
        .with_context(|| format!("loading configuration from {data_dir}"))?;

    if check_config {
        let report = ConfigReport {
            indicators: config.indicators.len(),
            facility_types: config.facility_types.len(),
            ceilings: config.ceilings.len(),
            worker_allocations: config.worker_allocations.len(),
            issues: config.validate().iter().map(|i| i.to_string()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut store = IncentiveStore::open(db).with_context(|| format!("opening {db}"))?;
    store.migrate()?;
    let recalc = Recalculator::new(&config);

    if all {
        let cancel = CancelToken::new();
        let report = bulk::recompute_all_parallel(&recalc, &mut store, threads, &cancel)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.failed.is_empty() {
            log::warn!("{} unit(s) failed", report.failed.len());
        }
        return Ok(());
    }

    let Some(facility_id) = str_arg(&args, "--facility") else {
        bail!("either --all or --facility <id> is required");
    };
    let month = match str_arg(&args, "--month") {
        Some(raw) => raw.parse::<ReportingMonth>()?,
        None => last_closed_month()?,
    };

    let outcome = recalc.recalculate(&mut store, facility_id, month)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// The month before the current one, the usual reporting period.
fn last_closed_month() -> Result<ReportingMonth> {
    let today = Utc::now().date_naive();
    Ok(ReportingMonth::new(today.year(), today.month())?.previous()?)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
