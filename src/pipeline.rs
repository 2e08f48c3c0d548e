//! Runs fetch → merge → persist for each configured source, one source at
//! a time, and reports how each one ended.
//!
//! Per source:
//!
//! ```text
//! Idle → Fetching → Merging → Persisting → Succeeded
//!           │          │           │
//!           └──────────┴───────────┴────→ Failed
//! ```
//!
//! A source whose data only reached the fallback backend is reported as
//! [`SourceStatus::Degraded`], which counts as a failure in the summary.

use crate::config::Config;
use crate::errors::{ErrorKind, FetchError};
use crate::merge::{self, MergePolicy};
use crate::models::{Record, Source};
use crate::persist::{FallbackStatus, PersistCoordinator};
use crate::scrapers::http::{HttpPageClient, PageClient};
use crate::scrapers::{self, Fetcher, SourceProfile};
use crate::status::JobStatusSink;
use crate::utils::snapshot_stamp;
use chrono::{Local, NaiveDateTime};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Fetching,
    Merging,
    Persisting,
    Succeeded,
    Failed,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceState::Idle => "idle",
            SourceState::Fetching => "fetching",
            SourceState::Merging => "merging",
            SourceState::Persisting => "persisting",
            SourceState::Succeeded => "succeeded",
            SourceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded,
    /// Data is safe in the fallback backend, but the primary write failed.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: Source,
    pub status: SourceStatus,
    /// State in which the source failed.
    pub failed_in: Option<SourceState>,
    pub fetched: usize,
    pub new_records: usize,
    pub total_records: usize,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub fallback: Option<String>,
    pub elapsed_ms: u64,
}

impl SourceReport {
    fn new(source: Source) -> Self {
        Self {
            source,
            status: SourceStatus::Failed,
            failed_in: None,
            fetched: 0,
            new_records: 0,
            total_records: 0,
            error_kind: None,
            error: None,
            fallback: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    AllSucceeded,
    PartialSuccess,
    TotalFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<SourceReport>,
    pub total_new: usize,
    pub total_failed: usize,
    pub outcome: RunOutcome,
}

impl RunSummary {
    fn from_reports(reports: Vec<SourceReport>) -> Self {
        let total_new = reports.iter().map(|r| r.new_records).sum();
        let total_failed = reports.iter().filter(|r| !r.is_success()).count();
        let outcome = if total_failed == 0 {
            RunOutcome::AllSucceeded
        } else if total_failed == reports.len() {
            RunOutcome::TotalFailure
        } else {
            RunOutcome::PartialSuccess
        };
        Self {
            reports,
            total_new,
            total_failed,
            outcome,
        }
    }
}

/// Builds the page client used for one source.
pub type ClientFactory =
    Box<dyn Fn(&SourceProfile) -> Result<Arc<dyn PageClient>, FetchError> + Send + Sync>;

/// Real HTTP clients honouring each profile's politeness settings.
pub fn http_clients(timeout: Duration) -> ClientFactory {
    Box::new(move |profile: &SourceProfile| {
        let client = HttpPageClient::new(&profile.politeness, timeout)?;
        Ok(Arc::new(client) as Arc<dyn PageClient>)
    })
}

pub struct Orchestrator {
    sources: Vec<Source>,
    max_pages: u32,
    merge_policy: MergePolicy,
    coordinator: PersistCoordinator,
    sink: Arc<dyn JobStatusSink>,
    clients: ClientFactory,
}

/// Tracks one source through its states, logging each transition.
struct Progress {
    source: Source,
    state: SourceState,
}

impl Progress {
    fn to(&mut self, next: SourceState) {
        debug!(source = %self.source, from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        coordinator: PersistCoordinator,
        sink: Arc<dyn JobStatusSink>,
        clients: ClientFactory,
    ) -> Self {
        Self {
            sources: config.sources.clone(),
            max_pages: config.fetch.max_pages,
            merge_policy: config.merge_policy,
            coordinator,
            sink,
            clients,
        }
    }

    /// Run every configured source once, in order.
    ///
    /// A failing source never stops the others.
    ///
    /// # Returns
    ///
    /// One [`SourceReport`] per source and the overall [`RunOutcome`].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let summary = orchestrator.run().await;
    /// if summary.outcome != RunOutcome::AllSucceeded {
    ///     eprintln!("{} sources failed", summary.total_failed);
    /// }
    /// ```
    #[instrument(level = "info", skip_all, fields(sources = self.sources.len(), max_pages = self.max_pages))]
    pub async fn run(&self) -> RunSummary {
        let now = Local::now().naive_local();
        let stamp = snapshot_stamp(now);
        info!(%stamp, backend = %self.coordinator.primary().identity(), "Pipeline run starting");

        let mut reports = Vec::with_capacity(self.sources.len());
        for &source in &self.sources {
            reports.push(self.run_source(source, &stamp, now).await);
        }

        let summary = RunSummary::from_reports(reports);
        self.sink
            .aggregate(summary.reports.len() - summary.total_failed, summary.total_failed);
        info!(
            total_new = summary.total_new,
            total_failed = summary.total_failed,
            outcome = ?summary.outcome,
            "Pipeline run finished"
        );
        summary
    }

    /// Fetch, merge and persist one source.
    ///
    /// # Arguments
    ///
    /// * `source` - The site to scrape
    /// * `stamp` - Run stamp shared by snapshots and quarantine names
    /// * `now` - Scrape time stamped on new records
    ///
    /// # Returns
    ///
    /// The source's report. Failures are recorded in it, with the state
    /// they happened in, rather than returned as errors.
    #[instrument(level = "info", skip_all, fields(%source))]
    pub async fn run_source(&self, source: Source, stamp: &str, now: NaiveDateTime) -> SourceReport {
        let t0 = Instant::now();
        let mut report = SourceReport::new(source);
        let mut progress = Progress {
            source,
            state: SourceState::Idle,
        };
        self.sink.started(source);

        // Fetching
        progress.to(SourceState::Fetching);
        let records = match self.fetch(source).await {
            Ok(records) => records,
            Err(e) => {
                return self.fail(report, &mut progress, ErrorKind::Fetch, e.to_string(), None, t0);
            }
        };
        report.fetched = records.len();
        info!(fetched = records.len(), "Fetched articles");

        // Merging
        progress.to(SourceState::Merging);
        let existing = match self.coordinator.read_existing(source, stamp).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, "Could not read stored dataset; stashing batch in fallback");
                let fallback = self.coordinator.stash(source, records, stamp, now).await;
                return self.fail(report, &mut progress, e.kind(), e.to_string(), Some(fallback), t0);
            }
        };
        let had_existing = existing.is_some();
        let outcome = merge::merge(existing, records, self.merge_policy, now);
        report.new_records = outcome.new_records;
        report.total_records = outcome.dataset.len();
        info!(
            new_records = outcome.new_records,
            replaced = outcome.replaced,
            skipped = outcome.skipped,
            total = outcome.dataset.len(),
            "Merged batch into dataset"
        );

        // Persisting
        progress.to(SourceState::Persisting);
        if outcome.new_records == 0 && outcome.replaced == 0 {
            info!(had_existing, "Dataset unchanged; nothing to write");
        } else if let Err(e) = self
            .coordinator
            .persist(source, &outcome.dataset, stamp, now)
            .await
        {
            let kind = e.source_error.kind();
            let message = e.source_error.to_string();
            report.new_records = 0;
            return self.fail(report, &mut progress, kind, message, Some(e.fallback), t0);
        }

        progress.to(SourceState::Succeeded);
        report.status = SourceStatus::Succeeded;
        report.elapsed_ms = t0.elapsed().as_millis() as u64;
        self.sink.succeeded(source, report.new_records);
        report
    }

    async fn fetch(&self, source: Source) -> Result<Vec<Record>, FetchError> {
        let profile = scrapers::profile(source);
        let client = (self.clients)(&profile)?;
        let fetcher = Fetcher::new(profile, client, self.max_pages)?;
        let require_content = profile.require_content;
        let records = fetcher
            .fetch()
            .filter(|r| {
                let keep = !require_content || !r.content.trim().is_empty();
                if !keep {
                    debug!(url = %r.url, "Dropping article without content");
                }
                std::future::ready(keep)
            })
            .collect::<Vec<_>>()
            .await;
        Ok(records)
    }

    fn fail(
        &self,
        mut report: SourceReport,
        progress: &mut Progress,
        kind: ErrorKind,
        message: String,
        fallback: Option<FallbackStatus>,
        t0: Instant,
    ) -> SourceReport {
        report.status = match &fallback {
            Some(status) if status.is_written() => SourceStatus::Degraded,
            _ => SourceStatus::Failed,
        };
        report.failed_in = Some(progress.state);
        progress.to(SourceState::Failed);
        report.error_kind = Some(kind.to_string());
        report.error = Some(message.clone());
        report.fallback = fallback.as_ref().map(ToString::to_string);
        report.elapsed_ms = t0.elapsed().as_millis() as u64;
        warn!(
            source = %report.source,
            state = %report.failed_in.unwrap_or(SourceState::Failed),
            %kind,
            status = ?report.status,
            "Source failed"
        );
        self.sink.failed(report.source, kind, &message);
        report
    }
}
