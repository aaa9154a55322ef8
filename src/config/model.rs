//! Configuration data structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Redis broker connection settings.
    pub redis: RedisConfig,

    /// SQLite database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Admin HTTP server settings.
    pub admin: AdminConfig,

    /// Library and upstream resolution settings.
    pub library: LibraryConfig,

    /// Process-wide timeout constants, read once at start.
    #[serde(default)]
    pub timings: Timings,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server hostname.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis server port.
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis database number.
    #[serde(default)]
    pub db: u8,

    /// Optional Redis password.
    #[serde(default)]
    pub password: Option<String>,
}

/// SQLite database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the database file holding tasks, videos and channels.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// Admin HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Address for the admin server to listen on.
    #[serde(default = "default_admin_bind")]
    pub bind: String,

    /// Bearer token required for admin calls.
    pub token: String,
}

/// Library catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Known remote storages completed streams may live on.
    pub storages: Vec<StorageConfig>,

    /// Upstream content network API used for channel resolution.
    #[serde(default = "default_resolver_api")]
    pub resolver_api: String,
}

/// A logical remote storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Logical storage name referenced by worker results.
    pub name: String,

    /// Public endpoint serving the storage contents.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Process-wide timeout constants. Injectable for tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timings {
    /// How long a single wait for worker idle signals blocks.
    #[serde(default = "default_worker_wait_ms")]
    pub worker_wait_ms: u64,

    /// How long a single request pick from the intake blocks.
    #[serde(default = "default_request_pick_ms")]
    pub request_pick_ms: u64,

    /// Interval between sweeper passes.
    #[serde(default = "default_request_sweep_secs")]
    pub request_sweep_secs: u64,

    /// How long a single wait for worker progress or status blocks.
    #[serde(default = "default_worker_status_ms")]
    pub worker_status_ms: u64,

    /// How long the fabric waits for a worker status round-trip.
    #[serde(default = "default_worker_status_timeout_secs")]
    pub worker_status_timeout_secs: u64,

    /// Expected interval between worker heartbeats.
    #[serde(default = "default_request_heartbeat_secs")]
    pub request_heartbeat_secs: u64,

    /// Base interval after which a silent task is considered stale.
    #[serde(default = "default_request_timeout_base_secs")]
    pub request_timeout_base_secs: u64,

    /// Silence window after which the task observer logs a warning.
    #[serde(default = "default_request_silence_secs")]
    pub request_silence_secs: u64,
}

impl Timings {
    pub fn worker_wait(&self) -> Duration {
        Duration::from_millis(self.worker_wait_ms)
    }

    pub fn request_pick(&self) -> Duration {
        Duration::from_millis(self.request_pick_ms)
    }

    pub fn request_sweep(&self) -> Duration {
        Duration::from_secs(self.request_sweep_secs)
    }

    pub fn worker_status(&self) -> Duration {
        Duration::from_millis(self.worker_status_ms)
    }

    pub fn worker_status_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_status_timeout_secs)
    }

    pub fn request_heartbeat(&self) -> Duration {
        Duration::from_secs(self.request_heartbeat_secs)
    }

    pub fn request_timeout_base(&self) -> Duration {
        Duration::from_secs(self.request_timeout_base_secs)
    }

    pub fn request_silence(&self) -> Duration {
        Duration::from_secs(self.request_silence_secs)
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            worker_wait_ms: default_worker_wait_ms(),
            request_pick_ms: default_request_pick_ms(),
            request_sweep_secs: default_request_sweep_secs(),
            worker_status_ms: default_worker_status_ms(),
            worker_status_timeout_secs: default_worker_status_timeout_secs(),
            request_heartbeat_secs: default_request_heartbeat_secs(),
            request_timeout_base_secs: default_request_timeout_base_secs(),
            request_silence_secs: default_request_silence_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

// Default value functions

fn default_redis_host() -> String {
    "redis".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_database_path() -> PathBuf {
    PathBuf::from("conductor.sqlite")
}

fn default_admin_bind() -> String {
    "0.0.0.0:18080".to_string()
}

fn default_resolver_api() -> String {
    "https://api.na-backend.odysee.com/api/v1/proxy".to_string()
}

fn default_worker_wait_ms() -> u64 {
    1000
}

fn default_request_pick_ms() -> u64 {
    500
}

fn default_request_sweep_secs() -> u64 {
    10
}

fn default_worker_status_ms() -> u64 {
    300
}

fn default_worker_status_timeout_secs() -> u64 {
    10
}

fn default_request_heartbeat_secs() -> u64 {
    10
}

fn default_request_timeout_base_secs() -> u64 {
    60
}

fn default_request_silence_secs() -> u64 {
    300
}
