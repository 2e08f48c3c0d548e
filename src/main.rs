//! # finscrap
//!
//! Scrapes Indian financial news sites, merges each batch into the stored
//! per-source dataset without duplicating articles, and writes the result
//! to a local directory, an S3 bucket or an rclone remote.
//!
//! ## Features
//!
//! - Three sources: MoneyControl (business, economy, markets, trends),
//!   LiveMint (latest news) and Financial Express (eleven sections)
//! - URL-keyed merge, so reruns never duplicate an article
//! - Local, S3-compatible and rclone (e.g. MEGA) storage behind one trait
//! - Retry with capped exponential backoff, then a local fallback copy
//! - Timestamped history snapshots and quarantine of corrupt datasets
//! - CSV export with source, text and date filters
//! - Per-source status events to the log and an optional JSONL file
//!
//! ## Usage
//!
//! ```sh
//! finscrap scrape
//! finscrap --storage s3 schedule --hour 7
//! finscrap --storage rclone check
//! finscrap export --search rupee -o rupee.csv
//! finscrap info
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`) and goes to stderr.
//!
//! ## Architecture
//!
//! Each run walks the configured sources one after another. Per source:
//!
//! 1. **Fetching**: walk listing pages, pull each article body, drop
//!    empty articles where the source requires content
//! 2. **Merging**: read the stored dataset and fold the batch into it,
//!    keyed by URL
//! 3. **Persisting**: write the new latest version with retry, then a
//!    history snapshot
//! 4. **Fallback**: if the write still fails, or the stored dataset could
//!    not be read, keep the batch in the local fallback directory and
//!    report the source as degraded
//! 5. **Reporting**: emit a status event per source and a run summary;
//!    `scrape` exits non-zero unless every source succeeded

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod config;
mod credentials;
mod errors;
mod export;
mod merge;
mod models;
mod persist;
mod pipeline;
mod query;
mod retry;
mod scrapers;
mod status;
mod storage;
mod utils;

use cli::{Cli, Command};
use config::Config;
use credentials::EnvCredentials;
use models::Source;
use persist::PersistCoordinator;
use pipeline::{Orchestrator, RunOutcome, RunSummary};
use query::RecordFilter;
use retry::RetryPolicy;
use status::{FanoutSink, JobStatusSink, JsonlSink, TracingSink};
use storage::local::LocalBackend;
use storage::StorageBackend;
use utils::{ensure_writable_dir, next_daily_run, snapshot_stamp};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "finscrap starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = resolve_config(&args)?;
    let backend = storage::open_backend(&config, &EnvCredentials)?;

    match args.command {
        Command::Scrape { .. } => {
            let orchestrator = build_orchestrator(&config, backend).await;
            let summary = orchestrator.run().await;
            report(&summary);
            if summary.outcome != RunOutcome::AllSucceeded {
                return Err(format!(
                    "{} of {} sources failed",
                    summary.total_failed,
                    summary.reports.len()
                )
                .into());
            }
        }
        Command::Schedule { hour, .. } => {
            let orchestrator = build_orchestrator(&config, backend).await;
            loop {
                let summary = orchestrator.run().await;
                report(&summary);

                let now = Local::now().naive_local();
                let next = next_daily_run(now, hour);
                let wait = (next - now).to_std().unwrap_or_default();
                info!(%next, wait_secs = wait.as_secs(), "Next scheduled run");
                tokio::time::sleep(wait).await;
            }
        }
        Command::Export {
            source,
            search,
            from,
            to,
            output,
            truncate,
        } => {
            let criteria = RecordFilter {
                source,
                search,
                date_from: from,
                date_to: to,
            };
            run_export(backend.as_ref(), &criteria, output, truncate).await?;
        }
        Command::Info => {
            let info = backend.storage_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Check => check(backend.as_ref(), &config.fallback_dir).await?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Defaults, then the YAML file, then environment, then CLI flags.
fn resolve_config(args: &Cli) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env(&EnvCredentials);

    if let Some(kind) = args.storage {
        config.storage.backend = kind;
    }
    if let Some(dir) = &args.data_dir {
        config.storage.local.dir = dir.clone();
    }
    match &args.command {
        Command::Scrape { max_pages, sources } => {
            if let Some(n) = max_pages {
                config.fetch.max_pages = *n;
            }
            if !sources.is_empty() {
                config.sources = sources.clone();
            }
        }
        Command::Schedule {
            max_pages: Some(n), ..
        } => config.fetch.max_pages = *n,
        _ => {}
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    info!(
        backend = ?config.storage.backend,
        sources = ?config.sources,
        max_pages = config.fetch.max_pages,
        merge_policy = ?config.merge_policy,
        "Configuration resolved"
    );
    Ok(config)
}

async fn build_orchestrator(config: &Config, primary: Arc<dyn StorageBackend>) -> Orchestrator {
    if let Err(e) = primary.test_connection().await {
        warn!(
            backend = %primary.identity(),
            kind = %e.kind(),
            error = %e,
            "Storage backend check failed; writes will go to the fallback directory"
        );
    }
    if let Err(e) = ensure_writable_dir(&config.fallback_dir).await {
        warn!(
            path = %config.fallback_dir.display(),
            error = %e,
            "Fallback directory is not writable; failed writes may lose data"
        );
    }
    let fallback: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(&config.fallback_dir));
    let coordinator = PersistCoordinator::new(
        primary,
        fallback,
        RetryPolicy::from(&config.retry),
        config.storage.snapshots,
    );

    let mut sinks: Vec<Box<dyn JobStatusSink>> = vec![Box::new(TracingSink)];
    if let Some(path) = &config.status_log {
        sinks.push(Box::new(JsonlSink::new(path)));
    }

    Orchestrator::new(
        config,
        coordinator,
        Arc::new(FanoutSink(sinks)),
        pipeline::http_clients(config.fetch.timeout()),
    )
}

/// Check the primary backend and the fallback directory, logging both
/// results. Fails if either check fails.
#[instrument(level = "info", skip_all, fields(backend = %primary.identity()))]
async fn check(primary: &dyn StorageBackend, fallback_dir: &Path) -> Result<(), Box<dyn Error>> {
    let mut failures = Vec::new();
    match primary.test_connection().await {
        Ok(()) => info!("Storage backend OK"),
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "Storage backend check failed");
            failures.push(format!("{}: {e}", primary.identity()));
        }
    }
    match ensure_writable_dir(fallback_dir).await {
        Ok(()) => info!(path = %fallback_dir.display(), "Fallback directory OK"),
        Err(e) => {
            error!(path = %fallback_dir.display(), error = %e, "Fallback directory check failed");
            failures.push(format!("fallback {}: {e}", fallback_dir.display()));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; ").into())
    }
}

fn report(summary: &RunSummary) {
    for r in &summary.reports {
        info!(
            source = %r.source,
            status = ?r.status,
            fetched = r.fetched,
            new_records = r.new_records,
            total_records = r.total_records,
            elapsed_ms = r.elapsed_ms,
            error = r.error.as_deref().unwrap_or(""),
            fallback = r.fallback.as_deref().unwrap_or(""),
            "Source report"
        );
    }
}

#[instrument(level = "info", skip_all, fields(backend = %backend.identity()))]
async fn run_export(
    backend: &dyn StorageBackend,
    criteria: &RecordFilter,
    output: Option<std::path::PathBuf>,
    truncate: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let all = query::combine(backend.list_all(&Source::ALL).await?);
    let records = query::filter(&all, criteria);
    info!(total = all.len(), matched = records.len(), "Filtered records for export");

    let rows = match output {
        Some(path) if path.as_os_str() == "-" => {
            export::write_csv(io::stdout().lock(), &records, truncate)?
        }
        path => {
            let path = path.unwrap_or_else(|| {
                format!("finscrap_export_{}.csv", snapshot_stamp(Local::now().naive_local())).into()
            });
            let file = std::fs::File::create(&path)
                .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
            let rows = export::write_csv(BufWriter::new(file), &records, truncate)?;
            info!(path = %path.display(), "Wrote export");
            rows
        }
    };
    info!(rows, "Export complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RcloneConfig;
    use crate::storage::rclone::RcloneBackend;

    #[tokio::test]
    async fn test_check_passes_for_writable_local_setup() {
        let dir = tempfile::tempdir().unwrap();
        let primary = LocalBackend::new(dir.path().join("data"));
        check(&primary, &dir.path().join("fallback")).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_reports_each_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("fallback");
        std::fs::write(&blocked, "file, not dir").unwrap();
        let primary = RcloneBackend::new(RcloneConfig {
            config_file: dir.path().join("missing.conf"),
            ..RcloneConfig::default()
        });

        let err = check(&primary, &blocked).await.unwrap_err().to_string();
        assert!(err.contains("rclone:mega:finscrap"), "got {err}");
        assert!(err.contains("fallback"), "got {err}");
    }
}
