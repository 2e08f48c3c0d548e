//! Local filesystem backend.
//!
//! Also serves as the fallback backend: it needs no credentials and no
//! network, so it is the one transport expected to work when the others
//! don't.
//!
//! Writes go to a hidden temp file in the target directory which is then
//! renamed over the dataset, so an interrupted run leaves either the old or
//! the new file, never a truncated one.

use crate::errors::StorageError;
use crate::models::{Dataset, Source};
use crate::storage::{
    codec, dataset_file_name, StorageBackend, StorageLocator, StoredFile, Version,
};
use crate::utils::ensure_writable_dir;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    dir: PathBuf,
}

impl LocalBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, source: Source, version: &Version) -> PathBuf {
        let name = dataset_file_name(source, version);
        match version {
            Version::Latest => self.dir.join(name),
            Version::Snapshot(_) => self.dir.join("history").join(source.slug()).join(name),
        }
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn identity(&self) -> String {
        format!("local:{}", self.dir.display())
    }

    fn locator(&self, source: Source, version: Version) -> StorageLocator {
        let path = self.path_for(source, &version);
        StorageLocator::new(source, version, path.display().to_string())
    }

    #[instrument(level = "info", skip_all, fields(%source))]
    async fn read(&self, source: Source) -> Result<Dataset, StorageError> {
        let locator = self.locator(source, Version::Latest);
        let bytes = match fs::read(&locator.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(locator));
            }
            Err(e) => return Err(e.into()),
        };
        let dataset = codec::decode(&bytes, &locator)?;
        info!(records = dataset.len(), path = %locator, "Loaded local dataset");
        Ok(dataset)
    }

    #[instrument(level = "info", skip_all, fields(%source, records = dataset.len()))]
    async fn write(&self, source: Source, dataset: &Dataset) -> Result<(), StorageError> {
        let path = self.path_for(source, &Version::Latest);
        let bytes = codec::encode(dataset)?;
        self.write_atomic(&path, &bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "Wrote local dataset");
        Ok(())
    }

    async fn write_snapshot(
        &self,
        source: Source,
        dataset: &Dataset,
        stamp: &str,
    ) -> Result<(), StorageError> {
        let path = self.path_for(source, &Version::Snapshot(stamp.to_string()));
        let bytes = codec::encode(dataset)?;
        self.write_atomic(&path, &bytes).await?;
        debug!(path = %path.display(), "Wrote local snapshot");
        Ok(())
    }

    async fn quarantine(&self, source: Source, stamp: &str) -> Result<(), StorageError> {
        let path = self.path_for(source, &Version::Latest);
        let target = path.with_extension(format!("csv.corrupt-{stamp}"));
        fs::copy(&path, &target).await?;
        error!(from = %path.display(), to = %target.display(), "Preserved corrupt dataset");
        Ok(())
    }

    async fn stored_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = Vec::new();
        let mut pending = vec![self.dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                    continue;
                }
                let name = path
                    .strip_prefix(&self.dir)
                    .unwrap_or(&path)
                    .display()
                    .to_string();
                let modified = meta
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string());
                files.push(StoredFile {
                    name,
                    bytes: meta.len(),
                    modified,
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Creates the directory if needed and checks it accepts new files.
    async fn test_connection(&self) -> Result<(), StorageError> {
        ensure_writable_dir(&self.dir).await?;
        Ok(())
    }
}
