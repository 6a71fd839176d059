use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub watcher: WatcherConfig,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub versioning: VersioningConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Whether `reject` also removes the source file from the download
    /// directory. Removal failures are logged, never fatal.
    #[serde(default = "default_true")]
    pub delete_source_on_reject: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory watched for finished downloads.
    pub download_dir: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Files smaller than this after settling are ignored (samples,
    /// subtitle sidecars, aborted downloads).
    #[serde(default = "default_min_file_size_mb")]
    pub min_file_size_mb: u64,
    /// Quiescence window: a file whose size is unchanged across this
    /// interval is considered fully downloaded.
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

impl WatcherConfig {
    pub fn min_file_size_bytes(&self) -> u64 {
        self.min_file_size_mb * 1024 * 1024
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Destination directory on the archive share. Never created by the
    /// daemon: a missing mount must surface as unreachable, not be papered
    /// over with a local directory.
    pub root_dir: PathBuf,
    #[serde(default = "default_true")]
    pub verify_reachable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_command")]
    pub command: String,
    #[serde(default = "default_resolver_args")]
    pub args: Vec<String>,
    #[serde(default = "default_resolver_timeout_secs")]
    pub timeout_secs: u64,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            command: default_resolver_command(),
            args: default_resolver_args(),
            timeout_secs: default_resolver_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Suffix template inserted before the extension; `{number}` is
    /// replaced with the version number.
    #[serde(default = "default_suffix_format")]
    pub suffix_format: String,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suffix_format: default_suffix_format(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on concurrently running transfers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl TransferConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size_bytes(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// The configured path, or the per-user default.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

fn default_true() -> bool {
    true
}

fn default_min_file_size_mb() -> u64 {
    500
}

fn default_quiet_period_secs() -> u64 {
    30
}

fn default_extensions() -> Vec<String> {
    [".mkv", ".mp4", ".avi", ".m4v", ".mov", ".wmv", ".flv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude() -> Vec<String> {
    ["*.part", "*.tmp", "*.downloading"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_resolver_command() -> String {
    "mnamer".to_string()
}

fn default_resolver_args() -> Vec<String> {
    ["--batch", "--media", "movie", "--no-cache"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_resolver_timeout_secs() -> u64 {
    60
}

fn default_suffix_format() -> String {
    ".v{number}".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.9
}

fn default_chunk_size_bytes() -> usize {
    1024 * 1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_workers() -> usize {
    num_cpus::get().min(4)
}
