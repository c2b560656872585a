use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub limits: UploadLimits,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("fileflip.db")
}

/// Filesystem layout for uploads and finished results.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Where uploaded source files are staged.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Where completed conversion outputs are kept for download.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Parent directory for per-attempt scratch workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            results_dir: default_results_dir(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("data/results")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("data/work")
}

/// Admission control: per-tier quotas and the global ceiling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionConfig {
    /// Length of the quota window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Requests per window for anonymous callers.
    #[serde(default = "default_anonymous_quota")]
    pub anonymous_quota: u32,
    /// Requests per window for registered callers.
    #[serde(default = "default_registered_quota")]
    pub registered_quota: u32,
    /// Requests per window for premium callers (absent = unlimited).
    #[serde(default)]
    pub premium_quota: Option<u32>,
    /// Global ceiling across all callers, requests per minute.
    #[serde(default = "default_global_per_minute")]
    pub global_per_minute: u32,
    /// API keys recognized as registered tier.
    #[serde(default)]
    pub registered_keys: Vec<String>,
    /// API keys recognized as premium tier.
    #[serde(default)]
    pub premium_keys: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            anonymous_quota: default_anonymous_quota(),
            registered_quota: default_registered_quota(),
            premium_quota: None,
            global_per_minute: default_global_per_minute(),
            registered_keys: Vec::new(),
            premium_keys: Vec::new(),
        }
    }
}

fn default_window_secs() -> u64 {
    3600
}

fn default_anonymous_quota() -> u32 {
    20
}

fn default_registered_quota() -> u32 {
    200
}

fn default_global_per_minute() -> u32 {
    600
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker slots.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// How often an idle worker polls the queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum execution attempts per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Hard timeout for a single attempt (seconds).
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// Base delay for exponential backoff (seconds).
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    /// Cap on the backoff delay (seconds).
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    /// Ceiling on job starts per minute, independent of concurrency.
    #[serde(default = "default_starts_per_minute")]
    pub starts_per_minute: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            starts_per_minute: default_starts_per_minute(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout() -> u64 {
    300
}

fn default_backoff_base() -> u64 {
    2
}

fn default_backoff_max() -> u64 {
    60
}

fn default_starts_per_minute() -> u32 {
    60
}

/// Per-family upload size caps in bytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadLimits {
    #[serde(default = "default_document_max")]
    pub document_max_bytes: u64,
    #[serde(default = "default_spreadsheet_max")]
    pub spreadsheet_max_bytes: u64,
    #[serde(default = "default_media_max")]
    pub media_max_bytes: u64,
    #[serde(default = "default_archive_max")]
    pub archive_max_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            document_max_bytes: default_document_max(),
            spreadsheet_max_bytes: default_spreadsheet_max(),
            media_max_bytes: default_media_max(),
            archive_max_bytes: default_archive_max(),
        }
    }
}

fn default_document_max() -> u64 {
    25 * 1024 * 1024
}

fn default_spreadsheet_max() -> u64 {
    25 * 1024 * 1024
}

fn default_media_max() -> u64 {
    500 * 1024 * 1024
}

fn default_archive_max() -> u64 {
    100 * 1024 * 1024
}

/// Paths of the external conversion binaries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// LibreOffice binary for document and spreadsheet conversion.
    #[serde(default = "default_soffice")]
    pub soffice_path: PathBuf,
    /// FFmpeg binary for image, audio, and video conversion.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary used for media duration probes.
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            soffice_path: default_soffice(),
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
        }
    }
}

fn default_soffice() -> PathBuf {
    PathBuf::from("soffice")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

/// Sanitized config for API responses (API keys redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub admission: SanitizedAdmissionConfig,
    pub workers: WorkerConfig,
    pub limits: UploadLimits,
    pub tools: ToolsConfig,
}

/// Sanitized admission config (key material hidden, only counts shown)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAdmissionConfig {
    pub window_secs: u64,
    pub anonymous_quota: u32,
    pub registered_quota: u32,
    pub premium_quota: Option<u32>,
    pub global_per_minute: u32,
    pub registered_keys_configured: usize,
    pub premium_keys_configured: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            admission: SanitizedAdmissionConfig {
                window_secs: config.admission.window_secs,
                anonymous_quota: config.admission.anonymous_quota,
                registered_quota: config.admission.registered_quota,
                premium_quota: config.admission.premium_quota,
                global_per_minute: config.admission.global_per_minute,
                registered_keys_configured: config.admission.registered_keys.len(),
                premium_keys_configured: config.admission.premium_keys.len(),
            },
            workers: config.workers.clone(),
            limits: config.limits.clone(),
            tools: config.tools.clone(),
        }
    }
}
