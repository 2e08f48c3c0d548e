//! Job-status events emitted by the orchestrator.
//!
//! | Event kind | When |
//! |------------|------|
//! | `source.started` | a source begins fetching |
//! | `source.succeeded` | the source's dataset reached the primary backend |
//! | `source.failed` | anything else, including a fallback write |
//! | `run.completed` | aggregate over all sources |
//!
//! [`TracingSink`] is always installed; [`JsonlSink`] additionally appends
//! one JSON object per event to a file for an external job tracker.

use crate::errors::ErrorKind;
use crate::models::Source;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};

pub trait JobStatusSink: Send + Sync {
    fn started(&self, source: Source);
    fn succeeded(&self, source: Source, new_records: usize);
    fn failed(&self, source: Source, kind: ErrorKind, message: &str);
    fn aggregate(&self, succeeded: usize, failed: usize);
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl JobStatusSink for TracingSink {
    fn started(&self, source: Source) {
        info!(event_kind = "source.started", %source, "Source started");
    }

    fn succeeded(&self, source: Source, new_records: usize) {
        info!(event_kind = "source.succeeded", %source, new_records, "Source succeeded");
    }

    fn failed(&self, source: Source, kind: ErrorKind, message: &str) {
        error!(event_kind = "source.failed", %source, %kind, detail = message, "Source failed");
    }

    fn aggregate(&self, succeeded: usize, failed: usize) {
        if failed == 0 {
            info!(event_kind = "run.completed", succeeded, failed, "Run completed");
        } else {
            warn!(event_kind = "run.completed", succeeded, failed, "Run completed with failures");
        }
    }
}

/// Appends events as JSON lines. I/O failures are logged and swallowed; a
/// broken status log never fails a run.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append<T: Serialize>(&self, event: &T) {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = serde_json::to_string(event)
            .map_err(std::io::Error::other)
            .and_then(|line| {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                writeln!(file, "{line}")
            });
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Could not append status event");
        }
    }

    fn event(&self, kind: &str, body: serde_json::Value) -> serde_json::Value {
        let mut event = json!({
            "event_kind": kind,
            "at": Utc::now().to_rfc3339(),
        });
        if let (Some(map), serde_json::Value::Object(extra)) = (event.as_object_mut(), body) {
            map.extend(extra);
        }
        event
    }
}

impl JobStatusSink for JsonlSink {
    fn started(&self, source: Source) {
        self.append(&self.event("source.started", json!({ "source": source })));
    }

    fn succeeded(&self, source: Source, new_records: usize) {
        self.append(&self.event(
            "source.succeeded",
            json!({ "source": source, "new_records": new_records }),
        ));
    }

    fn failed(&self, source: Source, kind: ErrorKind, message: &str) {
        self.append(&self.event(
            "source.failed",
            json!({ "source": source, "error_kind": kind.to_string(), "message": message }),
        ));
    }

    fn aggregate(&self, succeeded: usize, failed: usize) {
        self.append(&self.event(
            "run.completed",
            json!({ "succeeded": succeeded, "failed": failed }),
        ));
    }
}

/// Forwards every event to each inner sink.
pub struct FanoutSink(pub Vec<Box<dyn JobStatusSink>>);

impl JobStatusSink for FanoutSink {
    fn started(&self, source: Source) {
        self.0.iter().for_each(|s| s.started(source));
    }

    fn succeeded(&self, source: Source, new_records: usize) {
        self.0.iter().for_each(|s| s.succeeded(source, new_records));
    }

    fn failed(&self, source: Source, kind: ErrorKind, message: &str) {
        self.0.iter().for_each(|s| s.failed(source, kind, message));
    }

    fn aggregate(&self, succeeded: usize, failed: usize) {
        self.0.iter().for_each(|s| s.aggregate(succeeded, failed));
    }
}
