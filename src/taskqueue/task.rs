//! Persistent task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transcoding task tracked from dispatch to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier assigned at dispatch (ULID).
    pub tid: String,

    /// Content digest of the source stream. Unique among live tasks.
    pub sd_hash: String,

    /// Opaque source content URL.
    pub url: String,

    /// Worker the task was assigned to. Empty until dispatch.
    pub worker_id: Option<String>,

    /// Current lifecycle state.
    pub status: TaskStatus,

    /// Timestamp when the task was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp when the task was last updated.
    pub updated_at: DateTime<Utc>,

    /// Timestamp of the last worker heartbeat.
    pub last_heartbeat: DateTime<Utc>,

    /// Serialized payload sent to the worker, kept for restoration.
    pub payload: String,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is recorded but no payload has been sent yet.
    Pending,
    /// Payload was delivered to a worker inbox.
    Dispatched,
    /// Worker events have been observed.
    Running,
    /// Stream was ingested into the library.
    Completed,
    /// Task failed permanently.
    Failed,
    /// The sweeper declared the task stale.
    TimedOut,
}

impl TaskStatus {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "dispatched" => Some(Self::Dispatched),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// Terminal states are never swept or restored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
