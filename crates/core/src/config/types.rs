use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
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
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ferry.db")
}

/// Where job records live.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    /// Records are lost on restart.
    Memory,
}

/// Job execution settings: retries, deadlines and pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Acquisition attempts per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Overall deadline measured from job creation.
    #[serde(default = "default_per_job_timeout_ms")]
    pub per_job_timeout_ms: u64,
    /// Bound on a single agent fetch (resolution plus transfer).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Jobs accepted but not yet running. Submissions beyond this are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Scratch space for in-flight downloads.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// How long shutdown waits for running jobs.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// First path component of every stored artifact key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl JobsConfig {
    pub fn per_job_timeout(&self) -> Duration {
        Duration::from_millis(self.per_job_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            per_job_timeout_ms: default_per_job_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            queue_capacity: default_queue_capacity(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            work_dir: default_work_dir(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_per_job_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_fetch_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_worker_pool_size() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    32
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("ferry")
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_key_prefix() -> String {
    "downloads".to_string()
}

/// Artifact validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatorConfig {
    /// Files smaller than this are rejected outright.
    #[serde(default = "default_min_artifact_bytes")]
    pub min_artifact_bytes: u64,
    #[serde(default)]
    pub container: ContainerKind,
    /// Reject mp4 files whose `moov` box comes after the media data.
    #[serde(default)]
    pub require_faststart: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_artifact_bytes: default_min_artifact_bytes(),
            container: ContainerKind::default(),
            require_faststart: false,
        }
    }
}

fn default_min_artifact_bytes() -> u64 {
    64 * 1024
}

/// Expected container format of acquired artifacts.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    #[default]
    Mp4,
    /// Size check only.
    Any,
}

/// Acquisition agent configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub backend: AgentBackend,
    #[serde(default)]
    pub command: CommandAgentConfig,
    #[serde(default)]
    pub http: HttpAgentConfig,
}

/// Available acquisition backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    /// External extractor CLI (yt-dlp compatible).
    #[default]
    Command,
    /// Plain HTTP GET of the reference URL.
    Http,
}

/// External extractor settings.
///
/// `args` is a template: `{reference}` and `{output}` are substituted per fetch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandAgentConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_command_args")]
    pub args: Vec<String>,
    /// Netscape cookies file handed to the extractor.
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

impl Default for CommandAgentConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_command_args(),
            cookies_file: None,
        }
    }
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_command_args() -> Vec<String> {
    [
        "--no-playlist",
        "--no-progress",
        "-f",
        "bestvideo+bestaudio/best",
        "--merge-output-format",
        "mp4",
        "--postprocessor-args",
        "ffmpeg:-movflags +faststart",
        "-o",
        "{output}",
        "--",
        "{reference}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Direct HTTP agent settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpAgentConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,
}

impl Default for HttpAgentConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("ferry/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> u32 {
    15
}

/// Blob storage configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub filesystem: FsStorageConfig,
    /// Required when backend = "http".
    #[serde(default)]
    pub http: Option<HttpStorageConfig>,
}

/// Available storage backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FsStorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// When set, locations are `<public_base_url>/<key>` instead of file paths.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for FsStorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Object store reachable over HTTP PUT.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpStorageConfig {
    /// Base URL; objects are written to `<url>/<key>`.
    pub url: String,
    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u32,
}

fn default_storage_timeout() -> u32 {
    300
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
    pub validator: ValidatorConfig,
    pub agent: SanitizedAgentConfig,
    pub storage: SanitizedStorageConfig,
}

/// Agent config without the cookies path
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAgentConfig {
    pub backend: AgentBackend,
    pub program: String,
    pub cookies_configured: bool,
    pub user_agent: String,
}

/// Storage config with the token hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub backend: StorageBackend,
    pub root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub token_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            jobs: config.jobs.clone(),
            validator: config.validator.clone(),
            agent: SanitizedAgentConfig {
                backend: config.agent.backend,
                program: config.agent.command.program.clone(),
                cookies_configured: config.agent.command.cookies_file.is_some(),
                user_agent: config.agent.http.user_agent.clone(),
            },
            storage: SanitizedStorageConfig {
                backend: config.storage.backend,
                root: config.storage.filesystem.root.clone(),
                public_base_url: config.storage.filesystem.public_base_url.clone(),
                url: config.storage.http.as_ref().map(|h| h.url.clone()),
                token_configured: config
                    .storage
                    .http
                    .as_ref()
                    .and_then(|h| h.token.as_ref())
                    .is_some_and(|t| !t.is_empty()),
            },
        }
    }
}
