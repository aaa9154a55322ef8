//! Error types for the transcoding control plane.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task queue error: {0}")]
    TaskQueue(#[from] TaskQueueError),

    #[error("Fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Admin server error: {0}")]
    Admin(#[from] AdminError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Config validation failed: {0}")]
    Invalid(String),
}

/// Persistent task queue errors.
#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// A non-terminal task already exists for this source hash.
    #[error("duplicate task for sd hash {sd_hash}")]
    DuplicateTask { sd_hash: String },

    #[error("task not found: {id}")]
    NotFound { id: String },

    #[error("unknown task status '{0}'")]
    UnknownStatus(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Broker transport and message errors.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("Failed to connect to broker at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(String),

    /// The in-memory side of a worker channel is gone.
    #[error("worker channel closed")]
    WorkerGone,
}

/// Library catalog errors.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("stream not found")]
    StreamNotFound,

    /// A stream with the same sd hash but a different manifest is already recorded.
    #[error("duplicate remote stream for sd hash {sd_hash}")]
    DuplicateStream { sd_hash: String },

    #[error("unknown remote storage '{name}'")]
    StorageUnknown { name: String },

    #[error("duplicate channel: {message}")]
    DuplicateChannel { message: String },

    #[error("remote stream has no manifest")]
    MissingManifest,

    #[error("unknown channel priority '{0}'")]
    UnknownPriority(String),

    #[error("manifest serialization failed: {0}")]
    SerializationFailed(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Upstream channel resolution errors.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("channel not found")]
    ChannelNotFound,

    #[error("resolve request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("unexpected resolve response: {0}")]
    BadResponse(String),
}

/// Admin HTTP server errors.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Failed to bind admin server to '{addr}': {message}")]
    BindFailed { addr: String, message: String },

    #[error("Admin server failed: {0}")]
    Serve(String),
}
