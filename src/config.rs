//! Configuration types for convertd

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for [`ConversionService`](crate::ConversionService)
///
/// Every section has working defaults, so `Config::default()` runs a complete
/// in-memory service backed by a filesystem blob store under `./data`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where task records and file contents live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Submission limits and the accepted target formats
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Worker pool sizing and claim leases
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Backoff applied when a conversion attempt is retried
    #[serde(default)]
    pub retry: RetryConfig,

    /// How long artifacts and finished task records are kept
    #[serde(default)]
    pub retention: RetentionConfig,

    /// External conversion tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// API and external server integration
    #[serde(default)]
    pub server: ServerIntegrationConfig,
}

impl Config {
    /// Check settings that serde defaults cannot guard against
    pub fn validate(&self) -> Result<()> {
        if self.workers.count == 0 {
            return Err(config_error("workers.count must be at least 1", "workers.count"));
        }
        if self.workers.max_attempts == 0 {
            return Err(config_error(
                "workers.max_attempts must be at least 1",
                "workers.max_attempts",
            ));
        }
        if self.workers.claim_timeout.is_zero() {
            return Err(config_error(
                "workers.claim_timeout must be greater than zero",
                "workers.claim_timeout",
            ));
        }
        if self.limits.max_upload_bytes == 0 {
            return Err(config_error(
                "limits.max_upload_bytes must be greater than zero",
                "limits.max_upload_bytes",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "retry.backoff_multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if let Some(base) = &self.server.api.public_base_url {
            url::Url::parse(base).map_err(|e| {
                config_error(
                    format!("invalid public base URL '{base}': {e}"),
                    "server.api.public_base_url",
                )
            })?;
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Task store backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStoreKind {
    /// Records live in process memory and are lost on restart
    #[default]
    Memory,
    /// Records live in a SQLite database at `storage.database_path`
    Sqlite,
}

/// Blob store backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStoreKind {
    /// Files are written under `storage.data_dir`
    #[default]
    Filesystem,
    /// Bytes are kept in process memory
    Memory,
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Task store backend (default: memory)
    #[serde(default)]
    pub task_store: TaskStoreKind,

    /// Blob store backend (default: filesystem)
    #[serde(default)]
    pub blob_store: BlobStoreKind,

    /// SQLite database path, used by the sqlite task store (default: "./convertd.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root directory for uploaded inputs and produced artifacts (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            task_store: TaskStoreKind::default(),
            blob_store: BlobStoreKind::default(),
            database_path: default_database_path(),
            data_dir: default_data_dir(),
        }
    }
}

/// Submission limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted upload size in bytes (default: 100 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Accepted target formats
    ///
    /// When `None`, every output format of the built-in catalog is accepted.
    #[serde(default)]
    pub supported_formats: Option<Vec<String>>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            supported_formats: None,
        }
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops (default: 4)
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Lease length of a claim; also bounds a single conversion attempt (default: 300 seconds)
    #[serde(default = "default_claim_timeout", with = "duration_serde")]
    pub claim_timeout: Duration,

    /// Claims allowed per task before it fails with max_retries_exceeded (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Idle poll interval in milliseconds (default: 250)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// How often expired claims are reaped (default: 5 seconds)
    #[serde(default = "default_reap_interval", with = "duration_serde")]
    pub reap_interval: Duration,

    /// How long shutdown waits for in-flight conversions (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            claim_timeout: default_claim_timeout(),
            max_attempts: default_max_attempts(),
            poll_interval: default_poll_interval(),
            reap_interval: default_reap_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Retry configuration for failed conversion attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Artifact and task record retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// How long an artifact stays downloadable after completion (default: 1 hour)
    #[serde(default = "default_artifact_ttl", with = "duration_serde")]
    pub artifact_ttl: Duration,

    /// How often the retention sweeper runs (default: 60 seconds)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Purge terminal task records this long after they finished (None = keep forever)
    #[serde(default, with = "optional_duration_serde")]
    pub task_ttl: Option<Duration>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            artifact_ttl: default_artifact_ttl(),
            sweep_interval: default_sweep_interval(),
            task_ttl: None,
        }
    }
}

/// External tool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ImageMagick (`magick` or `convert`)
    #[serde(default)]
    pub imagemagick_path: Option<PathBuf>,

    /// Path to LibreOffice (`soffice`)
    #[serde(default)]
    pub libreoffice_path: Option<PathBuf>,

    /// Path to ffmpeg
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Search PATH for tools that are not configured explicitly (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Scratch directory for tool input and output files (default: "./data/work")
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            imagemagick_path: None,
            libreoffice_path: None,
            ffmpeg_path: None,
            search_path: true,
            work_dir: default_work_dir(),
        }
    }
}

/// API and external server integration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerIntegrationConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:3001)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Externally visible base URL used to build absolute download URLs
    ///
    /// When unset, status responses carry path-relative download URLs.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_base_url: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./convertd.db")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./data/work")
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_worker_count() -> usize {
    4
}

fn default_claim_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_artifact_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3001))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond variant for sub-second intervals
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
