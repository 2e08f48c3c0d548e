//! Retry and fallback around the primary storage backend.
//!
//! Reads and writes go through the [`RetryPolicy`]. When a write still
//! fails (retries exhausted, or a non-retryable error on the first try), the
//! dataset is merged into the local fallback backend and the original error
//! is returned anyway: a returned error does not mean data was lost, and a
//! fallback write never counts as success.

use crate::errors::StorageError;
use crate::merge::{self, MergePolicy};
use crate::models::{Dataset, Record, Source};
use crate::retry::RetryPolicy;
use crate::storage::{StorageBackend, StorageLocator, Version};
use chrono::NaiveDateTime;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// What happened to the data after the primary write gave up.
#[derive(Debug)]
pub enum FallbackStatus {
    /// Merged into the fallback backend; `records` is its new total.
    Written { locator: StorageLocator, records: usize },
    Failed(StorageError),
}

impl FallbackStatus {
    pub fn is_written(&self) -> bool {
        matches!(self, FallbackStatus::Written { .. })
    }
}

impl fmt::Display for FallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackStatus::Written { locator, records } => {
                write!(f, "saved {records} records to fallback {locator}")
            }
            FallbackStatus::Failed(e) => write!(f, "fallback also failed: {e}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{source_error} ({fallback})")]
pub struct PersistError {
    pub source_error: StorageError,
    pub fallback: FallbackStatus,
}

pub struct PersistCoordinator {
    primary: Arc<dyn StorageBackend>,
    fallback: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
    snapshots: bool,
}

impl PersistCoordinator {
    pub fn new(
        primary: Arc<dyn StorageBackend>,
        fallback: Arc<dyn StorageBackend>,
        policy: RetryPolicy,
        snapshots: bool,
    ) -> Self {
        Self {
            primary,
            fallback,
            policy,
            snapshots,
        }
    }

    pub fn primary(&self) -> &Arc<dyn StorageBackend> {
        &self.primary
    }

    /// Load the stored dataset for `source`. `Ok(None)` means there is
    /// nothing usable: first run, or a corrupt payload that has been
    /// quarantined.
    ///
    /// # Arguments
    ///
    /// * `source` - Whose dataset to load
    /// * `stamp` - Run stamp, used to name a quarantined copy
    ///
    /// # Errors
    ///
    /// Anything other than `NotFound` or `Corrupt` after retries, such as
    /// [`StorageError::Unauthenticated`]. A login failure must never be
    /// mistaken for a first run, or the next write would replace the
    /// stored history with one batch.
    #[instrument(level = "info", skip_all, fields(%source, backend = %self.primary.identity()))]
    pub async fn read_existing(
        &self,
        source: Source,
        stamp: &str,
    ) -> Result<Option<Dataset>, StorageError> {
        let primary = &self.primary;
        match self.policy.run("read", || primary.read(source)).await {
            Ok(dataset) => Ok(Some(dataset)),
            Err(StorageError::NotFound(locator)) => {
                info!(%locator, "No stored dataset; first run for this source");
                Ok(None)
            }
            Err(StorageError::Corrupt { locator, reason }) => {
                error!(%locator, %reason, "Stored dataset is corrupt; merging as if absent");
                preserve_corrupt(primary.as_ref(), source, stamp).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Write `dataset` as the new latest version, plus a history snapshot
    /// when enabled. Snapshot failures are logged only.
    ///
    /// # Errors
    ///
    /// When the primary write still fails after retries, the dataset is
    /// stashed in the fallback first. The returned [`PersistError`] holds
    /// the primary's last error and whether the fallback copy landed.
    #[instrument(level = "info", skip_all, fields(%source, records = dataset.len()))]
    pub async fn persist(
        &self,
        source: Source,
        dataset: &Dataset,
        stamp: &str,
        now: NaiveDateTime,
    ) -> Result<(), PersistError> {
        let primary = &self.primary;
        if let Err(source_error) = self.policy.run("write", || primary.write(source, dataset)).await {
            error!(kind = %source_error.kind(), error = %source_error, "Primary write failed; using fallback");
            let fallback = self.stash(source, dataset.records().to_vec(), stamp, now).await;
            return Err(PersistError {
                source_error,
                fallback,
            });
        }

        if self.snapshots {
            if let Err(e) = primary.write_snapshot(source, dataset, stamp).await {
                warn!(%stamp, error = %e, "Snapshot write failed");
            }
        }
        Ok(())
    }

    /// Merge `records` into whatever the fallback already holds for
    /// `source` (last write wins), so earlier degraded runs are kept.
    ///
    /// # Returns
    ///
    /// Where the records ended up. Never fails outright: a fallback that
    /// cannot be written is reported as [`FallbackStatus`], and logged.
    #[instrument(level = "info", skip_all, fields(%source, records = records.len(), fallback = %self.fallback.identity()))]
    pub async fn stash(
        &self,
        source: Source,
        records: Vec<Record>,
        stamp: &str,
        now: NaiveDateTime,
    ) -> FallbackStatus {
        let fallback = &self.fallback;
        let existing = match self.policy.run("fallback read", || fallback.read(source)).await {
            Ok(dataset) => Some(dataset),
            Err(StorageError::NotFound(_)) => None,
            Err(StorageError::Corrupt { locator, reason }) => {
                error!(%locator, %reason, "Fallback dataset is corrupt");
                preserve_corrupt(fallback.as_ref(), source, stamp).await;
                None
            }
            Err(e) => {
                error!(error = %e, "Fallback read failed; data not saved");
                return FallbackStatus::Failed(e);
            }
        };

        let merged = merge::merge(existing, records, MergePolicy::LastWriteWins, now);
        match self
            .policy
            .run("fallback write", || fallback.write(source, &merged.dataset))
            .await
        {
            Ok(()) => {
                let locator = fallback.locator(source, Version::Latest);
                warn!(%locator, total = merged.dataset.len(), added = merged.new_records, "Saved dataset to fallback");
                FallbackStatus::Written {
                    locator,
                    records: merged.dataset.len(),
                }
            }
            Err(e) => {
                error!(error = %e, "Fallback write failed; data not saved");
                FallbackStatus::Failed(e)
            }
        }
    }
}

async fn preserve_corrupt(backend: &dyn StorageBackend, source: Source, stamp: &str) {
    if let Err(e) = backend.quarantine(source, stamp).await {
        error!(%source, error = %e, "Could not preserve corrupt dataset; it will be overwritten");
    }
}
