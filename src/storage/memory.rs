//! In-memory backend with scripted failures, for tests.

use crate::errors::{ErrorKind, StorageError};
use crate::models::{Dataset, Source};
use crate::storage::{
    codec, dataset_file_name, StorageBackend, StorageLocator, StoredFile, Version,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
pub(crate) struct MemoryBackend {
    data: Mutex<HashMap<Source, Dataset>>,
    raw: Mutex<HashMap<Source, Vec<u8>>>,
    read_failures: Mutex<VecDeque<ErrorKind>>,
    write_failures: Mutex<VecDeque<ErrorKind>>,
    pub reads: AtomicU32,
    pub writes: AtomicU32,
    pub snapshots: Mutex<Vec<(Source, String)>>,
    pub quarantined: Mutex<Vec<Source>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(source: Source, dataset: Dataset) -> Self {
        let backend = Self::new();
        backend.put(source, dataset);
        backend
    }

    pub fn put(&self, source: Source, dataset: Dataset) {
        self.data.lock().unwrap().insert(source, dataset);
    }

    /// Store bytes that will be decoded on read (e.g. a corrupt payload).
    pub fn put_raw(&self, source: Source, bytes: &[u8]) {
        self.raw.lock().unwrap().insert(source, bytes.to_vec());
    }

    pub fn get(&self, source: Source) -> Option<Dataset> {
        self.data.lock().unwrap().get(&source).cloned()
    }

    pub fn fail_reads(&self, kind: ErrorKind, times: usize) {
        self.read_failures.lock().unwrap().extend(std::iter::repeat_n(kind, times));
    }

    pub fn fail_writes(&self, kind: ErrorKind, times: usize) {
        self.write_failures.lock().unwrap().extend(std::iter::repeat_n(kind, times));
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn scripted(&self, queue: &Mutex<VecDeque<ErrorKind>>, locator: StorageLocator) -> Option<StorageError> {
        let kind = queue.lock().unwrap().pop_front()?;
        Some(match kind {
            ErrorKind::Unauthenticated => StorageError::Unauthenticated("scripted".into()),
            ErrorKind::NotFound => StorageError::NotFound(locator),
            ErrorKind::TransientIo => StorageError::TransientIo("scripted".into()),
            ErrorKind::Corrupt => StorageError::Corrupt {
                locator,
                reason: "scripted".into(),
            },
            ErrorKind::Backend | ErrorKind::Fetch => StorageError::Backend("scripted".into()),
        })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn identity(&self) -> String {
        "memory".to_string()
    }

    fn locator(&self, source: Source, version: Version) -> StorageLocator {
        let name = dataset_file_name(source, &version);
        StorageLocator::new(source, version, format!("memory:{name}"))
    }

    async fn read(&self, source: Source) -> Result<Dataset, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let locator = self.locator(source, Version::Latest);
        if let Some(e) = self.scripted(&self.read_failures, locator.clone()) {
            return Err(e);
        }
        if let Some(bytes) = self.raw.lock().unwrap().get(&source) {
            return codec::decode(bytes, &locator);
        }
        self.get(source).ok_or(StorageError::NotFound(locator))
    }

    async fn write(&self, source: Source, dataset: &Dataset) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let locator = self.locator(source, Version::Latest);
        if let Some(e) = self.scripted(&self.write_failures, locator) {
            return Err(e);
        }
        self.raw.lock().unwrap().remove(&source);
        self.put(source, dataset.clone());
        Ok(())
    }

    async fn write_snapshot(
        &self,
        source: Source,
        _dataset: &Dataset,
        stamp: &str,
    ) -> Result<(), StorageError> {
        self.snapshots.lock().unwrap().push((source, stamp.to_string()));
        Ok(())
    }

    async fn quarantine(&self, source: Source, _stamp: &str) -> Result<(), StorageError> {
        self.quarantined.lock().unwrap().push(source);
        Ok(())
    }

    async fn stored_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .keys()
            .map(|source| StoredFile {
                name: dataset_file_name(*source, &Version::Latest),
                bytes: 0,
                modified: None,
            })
            .collect())
    }
}
