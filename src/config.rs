//! Runtime configuration.
//!
//! Built from defaults, an optional YAML file, a handful of environment
//! variables kept compatible with older deployments, and finally CLI flags
//! (applied in `main`). The resulting [`Config`] is passed explicitly to the
//! orchestrator; nothing is cached globally.

use crate::credentials::CredentialProvider;
use crate::merge::MergePolicy;
use crate::models::Source;
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub fallback_dir: PathBuf,
    pub merge_policy: MergePolicy,
    pub retry: RetryConfig,
    pub fetch: FetchConfig,
    pub sources: Vec<Source>,
    /// Optional JSON-lines file receiving job-status events.
    pub status_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            fallback_dir: PathBuf::from(".data/fallback"),
            merge_policy: MergePolicy::default(),
            retry: RetryConfig::default(),
            fetch: FetchConfig::default(),
            sources: Source::ALL.to_vec(),
            status_log: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    S3,
    Rclone,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Also write timestamped history snapshots.
    pub snapshots: bool,
    pub local: LocalConfig,
    pub s3: S3Config,
    pub rclone: RcloneConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            snapshots: true,
            local: LocalConfig::default(),
            s3: S3Config::default(),
            rclone: RcloneConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".data/csv_storage"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub environment: String,
    /// MinIO, LocalStack and friends. Uses path-style addressing.
    pub endpoint_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            prefix: "finscrap".to_string(),
            environment: "development".to_string(),
            endpoint_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RcloneConfig {
    pub binary: PathBuf,
    pub remote: String,
    pub folder: String,
    pub config_file: PathBuf,
    pub timeout_secs: u64,
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("rclone"),
            remote: "mega".to_string(),
            folder: "finscrap".to_string(),
            config_file: PathBuf::from(".secrets/rclone/rclone.conf"),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_pages: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_pages: 3,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load from an optional YAML file, falling back to defaults.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
                let config: Config = serde_yaml::from_str(&text)
                    .map_err(|e| format!("failed to parse config {}: {e}", path.display()))?;
                info!(path = %path.display(), "Loaded configuration file");
                config
            }
            None => Config::default(),
        };
        Ok(config)
    }

    /// Overlay deployment variables understood by earlier releases.
    pub fn apply_env(&mut self, env: &dyn CredentialProvider) {
        if let Some(bucket) = env.non_empty("AWS_S3_BUCKET") {
            self.storage.s3.bucket = bucket;
        }
        if let Some(region) = env.non_empty("AWS_DEFAULT_REGION") {
            self.storage.s3.region = region;
        }
        if let Some(prefix) = env.non_empty("AWS_S3_PREFIX") {
            self.storage.s3.prefix = prefix;
        }
        if let Some(environment) = env.non_empty("ENVIRONMENT") {
            self.storage.s3.environment = environment;
        }
        if let Some(endpoint) = env.non_empty("AWS_ENDPOINT_URL") {
            self.storage.s3.endpoint_url = Some(endpoint);
        }
        if let Some(folder) = env.non_empty("MEGA_UPLOAD_FOLDER") {
            self.storage.rclone.folder = folder;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".into());
        }
        if self.fetch.max_pages == 0 {
            return Err("fetch.max_pages must be >= 1".into());
        }
        if self.sources.is_empty() {
            return Err("at least one source must be configured".into());
        }
        if self.storage.backend == BackendKind::S3 && self.storage.s3.bucket.trim().is_empty() {
            return Err("storage.s3.bucket (or AWS_S3_BUCKET) is required for the s3 backend".into());
        }
        Ok(())
    }
}
