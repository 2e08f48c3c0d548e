//! Durable keyed storage: one CSV dataset per source.
//!
//! Every transport implements [`StorageBackend`]; the merge engine and the
//! orchestrator only ever see the trait, so switching from local files to an
//! object store or an rclone remote is a configuration change.
//!
//! | Backend | Module | Transport |
//! |---------|--------|-----------|
//! | Local filesystem | [`local`] | `tokio::fs`, temp-file + rename |
//! | S3-compatible object store | [`s3`] | REST API with SigV4 signing |
//! | rclone remote (e.g. MEGA) | [`rclone`] | `rclone` subprocess |
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── moneycontrol_news_data.csv              # latest, authoritative
//! └── history/moneycontrol/
//!     └── moneycontrol_news_20240115_070000.csv   # audit snapshot
//! ```

pub mod codec;
pub mod local;
#[cfg(test)]
pub(crate) mod memory;
pub mod rclone;
pub mod s3;

use crate::config::{BackendKind, Config};
use crate::credentials::CredentialProvider;
use crate::errors::StorageError;
use crate::models::{Dataset, Source};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which copy of a source's dataset a locator points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Latest,
    /// Historical snapshot identified by a `YYYYmmdd_HHMMSS` stamp.
    Snapshot(String),
}

/// Backend-specific address of a dataset (a path, a bucket key, a remote
/// path). Opaque to everything above the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocator {
    pub source: Source,
    pub version: Version,
    pub path: String,
}

impl StorageLocator {
    pub fn new(source: Source, version: Version, path: impl Into<String>) -> Self {
        Self {
            source,
            version,
            path: path.into(),
        }
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// File name of a dataset, shared by all backends.
pub fn dataset_file_name(source: Source, version: &Version) -> String {
    match version {
        Version::Latest => format!("{}_news_data.csv", source.slug()),
        Version::Snapshot(stamp) => format!("{}_news_{}.csv", source.slug(), stamp),
    }
}

/// One stored object as reported by [`StorageBackend::stored_files`].
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub bytes: u64,
    pub modified: Option<String>,
}

/// Diagnostic summary returned by [`StorageBackend::storage_info`].
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub backend: String,
    pub record_count: usize,
    pub byte_size: u64,
    pub files: Vec<StoredFile>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable identity, e.g. `local:.data/csv_storage` or `s3://bucket/prefix`.
    fn identity(&self) -> String;

    fn locator(&self, source: Source, version: Version) -> StorageLocator;

    /// Load the authoritative dataset. `NotFound` means first run.
    async fn read(&self, source: Source) -> Result<Dataset, StorageError>;

    /// Replace the authoritative dataset in one step.
    async fn write(&self, source: Source, dataset: &Dataset) -> Result<(), StorageError>;

    /// Write a timestamped audit copy. Never read back automatically.
    async fn write_snapshot(
        &self,
        source: Source,
        dataset: &Dataset,
        stamp: &str,
    ) -> Result<(), StorageError>;

    /// Move an undecodable latest payload aside so the next write does not
    /// destroy it.
    async fn quarantine(&self, source: Source, stamp: &str) -> Result<(), StorageError>;

    /// Every object the backend holds (latest and history).
    async fn stored_files(&self) -> Result<Vec<StoredFile>, StorageError>;

    /// Cheapest call that proves credentials and reachability, without
    /// touching any dataset.
    ///
    /// # Errors
    ///
    /// The same classification as every other operation: a rejected login
    /// is [`StorageError::Unauthenticated`], an unreachable service is
    /// [`StorageError::TransientIo`].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let backend = storage::open_backend(&config, &EnvCredentials)?;
    /// backend.test_connection().await?;
    /// ```
    async fn test_connection(&self) -> Result<(), StorageError> {
        self.stored_files().await.map(|_| ())
    }

    /// Load every source's dataset, skipping sources with nothing stored.
    async fn list_all(&self, sources: &[Source]) -> Result<BTreeMap<Source, Dataset>, StorageError> {
        let mut all = BTreeMap::new();
        for &source in sources {
            match self.read(source).await {
                Ok(dataset) => {
                    all.insert(source, dataset);
                }
                Err(StorageError::NotFound(locator)) => {
                    info!(%source, %locator, "No dataset stored yet");
                }
                Err(e @ StorageError::Corrupt { .. }) => {
                    error!(%source, error = %e, "Skipping corrupt dataset in aggregate view");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }

    async fn storage_info(&self) -> Result<StorageInfo, StorageError> {
        let files = self.stored_files().await?;
        let byte_size = files.iter().map(|f| f.bytes).sum();
        let record_count = self
            .list_all(&Source::ALL)
            .await?
            .values()
            .map(Dataset::len)
            .sum();
        Ok(StorageInfo {
            backend: self.identity(),
            record_count,
            byte_size,
            files,
        })
    }
}

/// Build the primary backend selected by the configuration.
///
/// # Errors
///
/// Propagates a backend constructor failure. Nothing is contacted here;
/// use [`StorageBackend::test_connection`] for that.
pub fn open_backend(
    config: &Config,
    credentials: &dyn CredentialProvider,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config.storage.backend {
        BackendKind::Local => Arc::new(local::LocalBackend::new(&config.storage.local.dir)),
        BackendKind::S3 => Arc::new(s3::S3Backend::new(config.storage.s3.clone(), credentials)?),
        BackendKind::Rclone => Arc::new(rclone::RcloneBackend::new(config.storage.rclone.clone())),
    };
    info!(backend = %backend.identity(), "Opened storage backend");
    if config.storage.backend != BackendKind::Local && config.fallback_dir == config.storage.local.dir {
        warn!(dir = %config.fallback_dir.display(), "Fallback directory is shared with the local data directory");
    }
    Ok(backend)
}
