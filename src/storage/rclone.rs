//! rclone-backed storage for remotes such as MEGA.
//!
//! Every operation shells out to the `rclone` binary with an explicit
//! `--config`, bounded by a timeout:
//!
//! - read: `rclone cat <remote>:<folder>/<file>`
//! - write/snapshot: `rclone rcat <path>` with the CSV on stdin
//! - quarantine: `rclone copyto <latest> <quarantine>`
//! - listing: `rclone lsjson -R --files-only <remote>:<folder>`
//! - connection check: `rclone lsd <remote>:`
//!
//! Exit codes and stderr are mapped onto [`StorageError`] by
//! [`classify_exit`].

use crate::config::RcloneConfig;
use crate::errors::StorageError;
use crate::models::{Dataset, Source};
use crate::storage::{
    codec, dataset_file_name, StorageBackend, StorageLocator, StoredFile, Version,
};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, error, info, instrument, warn};

/// Login and permission failures. MEGA reports a failed login as
/// "couldn't login: Object (typically, node or user) not found", so this
/// must be checked before any not-found wording.
static AUTH_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)couldn.?t login|\blogin\b|authenticat|unauthori[sz]ed|\bauth\b|credential|password|access denied|\b40[13]\b",
    )
    .expect("static regex is valid")
});

const NOT_FOUND_MARKERS: [&str; 3] = ["not found", "doesn't exist", "does not exist"];

#[derive(Debug, Clone)]
pub struct RcloneBackend {
    config: RcloneConfig,
}

impl RcloneBackend {
    /// The binary and config file are not checked until the first call.
    pub fn new(config: RcloneConfig) -> Self {
        Self { config }
    }

    fn root(&self) -> String {
        format!("{}:{}", self.config.remote, self.config.folder.trim_matches('/'))
    }

    fn remote_path(&self, source: Source, version: &Version) -> String {
        let name = dataset_file_name(source, version);
        match version {
            Version::Latest => format!("{}/{}", self.root(), name),
            Version::Snapshot(_) => format!("{}/history/{}/{}", self.root(), source.slug(), name),
        }
    }

    fn quarantine_path(&self, source: Source, stamp: &str) -> String {
        format!(
            "{}/quarantine/{}_news_data_{}.csv",
            self.root(),
            source.slug(),
            stamp
        )
    }

    /// Full argument list for one rclone sub-command.
    fn command_args(&self, op: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = op.iter().map(|s| s.to_string()).collect();
        args.push("--config".to_string());
        args.push(self.config.config_file.display().to_string());
        args
    }

    /// Run rclone, feeding `stdin` if given, and return stdout.
    #[instrument(level = "debug", skip_all, fields(op = op.first().copied().unwrap_or_default()))]
    async fn run(
        &self,
        op: &[&str],
        stdin: Option<Vec<u8>>,
        locator: &StorageLocator,
    ) -> Result<Vec<u8>, StorageError> {
        if tokio::fs::metadata(&self.config.config_file).await.is_err() {
            return Err(StorageError::Unauthenticated(format!(
                "rclone config not found at {}",
                self.config.config_file.display()
            )));
        }

        let args = self.command_args(op);
        let t0 = Instant::now();
        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StorageError::Backend(format!(
                    "failed to start {}: {e}",
                    self.config.binary.display()
                ))
            })?;

        // A child that exits early closes its stdin; the exit status and
        // stderr explain why, so a failed write is only remembered here.
        let child_stdin = child.stdin.take();
        let exchange = async move {
            let mut write_error = None;
            if let (Some(mut pipe), Some(payload)) = (child_stdin, stdin) {
                if let Err(e) = feed(&mut pipe, &payload).await {
                    debug!(error = %e, bytes = payload.len(), "rclone stopped reading stdin");
                    write_error = Some(e);
                }
            }
            child.wait_with_output().await.map(|output| (output, write_error))
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let (output, write_error) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => return Err(StorageError::TransientIo(format!("rclone I/O: {e}"))),
            Err(_) => {
                return Err(StorageError::TransientIo(format!(
                    "rclone {} timed out after {}s",
                    args.first().map(String::as_str).unwrap_or_default(),
                    self.config.timeout_secs
                )));
            }
        };

        debug!(
            status = ?output.status.code(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "rclone finished"
        );
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_exit(output.status.code(), &stderr, locator));
        }
        match write_error {
            Some(e) => Err(StorageError::TransientIo(format!(
                "rclone exited cleanly without reading the whole upload for {locator}: {e}"
            ))),
            None => Ok(output.stdout),
        }
    }
}

/// Write the whole payload, then close the pipe so rclone sees EOF.
async fn feed(pipe: &mut ChildStdin, payload: &[u8]) -> io::Result<()> {
    pipe.write_all(payload).await?;
    pipe.shutdown().await
}

#[async_trait]
impl StorageBackend for RcloneBackend {
    fn identity(&self) -> String {
        format!("rclone:{}", self.root())
    }

    fn locator(&self, source: Source, version: Version) -> StorageLocator {
        let path = self.remote_path(source, &version);
        StorageLocator::new(source, version, path)
    }

    #[instrument(level = "info", skip_all, fields(%source))]
    async fn read(&self, source: Source) -> Result<Dataset, StorageError> {
        let locator = self.locator(source, Version::Latest);
        let bytes = self.run(&["cat", &locator.path], None, &locator).await?;
        let dataset = codec::decode(&bytes, &locator)?;
        info!(records = dataset.len(), %locator, "Downloaded dataset via rclone");
        Ok(dataset)
    }

    #[instrument(level = "info", skip_all, fields(%source, records = dataset.len()))]
    async fn write(&self, source: Source, dataset: &Dataset) -> Result<(), StorageError> {
        let locator = self.locator(source, Version::Latest);
        let bytes = codec::encode(dataset)?;
        let size = bytes.len();
        self.run(&["rcat", &locator.path], Some(bytes), &locator).await?;
        info!(%locator, bytes = size, "Uploaded dataset via rclone");
        Ok(())
    }

    async fn write_snapshot(
        &self,
        source: Source,
        dataset: &Dataset,
        stamp: &str,
    ) -> Result<(), StorageError> {
        let locator = self.locator(source, Version::Snapshot(stamp.to_string()));
        let bytes = codec::encode(dataset)?;
        self.run(&["rcat", &locator.path], Some(bytes), &locator).await?;
        debug!(%locator, "Uploaded snapshot via rclone");
        Ok(())
    }

    async fn quarantine(&self, source: Source, stamp: &str) -> Result<(), StorageError> {
        let locator = self.locator(source, Version::Latest);
        let target = self.quarantine_path(source, stamp);
        self.run(&["copyto", &locator.path, &target], None, &locator).await?;
        error!(from = %locator, to = %target, "Preserved corrupt dataset on remote");
        Ok(())
    }

    async fn stored_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let root = self.root();
        let locator = StorageLocator::new(Source::MoneyControl, Version::Latest, root.clone());
        let stdout = match self
            .run(&["lsjson", "-R", "--files-only", &root], None, &locator)
            .await
        {
            Ok(stdout) => stdout,
            Err(StorageError::NotFound(_)) => {
                warn!(%root, "Remote folder does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        parse_lsjson(&stdout)
    }

    /// `rclone lsd <remote>:` lists the top level, which needs a working
    /// login but no particular folder.
    async fn test_connection(&self) -> Result<(), StorageError> {
        let remote = format!("{}:", self.config.remote);
        let locator = StorageLocator::new(Source::MoneyControl, Version::Latest, remote.clone());
        self.run(&["lsd", &remote], None, &locator).await?;
        info!(%remote, "rclone remote reachable");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedEntry {
    path: String,
    #[serde(default)]
    size: i64,
    mod_time: Option<String>,
    #[serde(default)]
    is_dir: bool,
}

fn parse_lsjson(stdout: &[u8]) -> Result<Vec<StoredFile>, StorageError> {
    let entries: Vec<ListedEntry> = serde_json::from_slice(stdout).map_err(|e| {
        StorageError::Backend(format!(
            "unparsable lsjson output ({e}): {}",
            truncate_for_log(&String::from_utf8_lossy(stdout), 300)
        ))
    })?;
    let mut files: Vec<StoredFile> = entries
        .into_iter()
        .filter(|e| !e.is_dir && e.path.ends_with(".csv"))
        .map(|e| StoredFile {
            name: e.path,
            bytes: e.size.max(0) as u64,
            modified: e.mod_time,
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Map an rclone exit status onto the storage taxonomy.
///
/// rclone documents 3 (directory not found), 4 (file not found),
/// 5 (temporary error) and 7 (fatal error). Anything unrecognized is
/// treated as transient. `None` means the process was killed by a signal.
///
/// Checks run in this order:
/// 1. login or permission wording on any exit code is `Unauthenticated`
/// 2. exit 3 or 4 is `NotFound`
/// 3. not-found wording is `NotFound` only when stderr names the target
/// 4. the remaining codes
pub fn classify_exit(code: Option<i32>, stderr: &str, locator: &StorageLocator) -> StorageError {
    let lowered = stderr.to_lowercase();
    let detail = truncate_for_log(stderr.trim(), 300);
    match code {
        Some(code) if AUTH_FAILURE.is_match(stderr) => {
            StorageError::Unauthenticated(format!("rclone exit {code} for {locator}: {detail}"))
        }
        Some(3) | Some(4) => StorageError::NotFound(locator.clone()),
        _ if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) && names_target(&lowered, locator) => {
            StorageError::NotFound(locator.clone())
        }
        Some(5) => StorageError::TransientIo(format!("rclone exit 5 for {locator}: {detail}")),
        Some(code @ (1 | 7)) => {
            StorageError::Backend(format!("rclone exit {code} for {locator}: {detail}"))
        }
        Some(code) => StorageError::TransientIo(format!("rclone exit {code} for {locator}: {detail}")),
        None => StorageError::TransientIo(format!("rclone terminated by signal for {locator}: {detail}")),
    }
}

/// Whether lowercased stderr mentions the locator's path or its file name.
fn names_target(lowered: &str, locator: &StorageLocator) -> bool {
    let path = locator.path.to_lowercase();
    let file = path.rsplit(['/', ':']).next().unwrap_or_default();
    lowered.contains(&path) || (!file.is_empty() && lowered.contains(file))
}
