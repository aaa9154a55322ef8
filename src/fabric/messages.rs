//! Wire messages and per-task event channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::FabricError;
use crate::library::RemoteStream;
use crate::taskqueue::Task;

/// Worker idle signal published on the work-requests queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgWorkRequest {
    pub worker_id: String,
    pub capacity: u32,
    pub available: u32,
}

/// Payload delivered to a worker inbox. The schema is pinned, the dispatcher
/// stores it verbatim for restoration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgTranscodingTask {
    pub url: String,
    pub sd_hash: String,
    pub tid: String,
}

/// Progress report published by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgWorkerProgress {
    pub percent: f32,
    pub stage: String,
}

/// Heartbeat published by a worker on its status queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgWorkerHeartbeat {
    pub worker_id: String,
    pub ts: DateTime<Utc>,
}

/// Terminal payload published by a worker on its result queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgWorkerResult {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub remote_stream: Option<RemoteStream>,
}

/// Task-scoped error event.
#[derive(Debug)]
pub struct TaskError {
    pub message: String,
}

/// Task-scoped success event. The ack fires only after the library commit,
/// letting the fabric drop the broker message.
#[derive(Debug)]
pub struct TaskSuccess {
    pub stream: RemoteStream,
    pub ack: Option<oneshot::Sender<()>>,
}

/// In-memory handle over a task during its live phase. Event receivers are
/// owned by the state machine; the fabric holds the matching senders.
pub struct ActiveTask {
    pub tid: String,
    pub worker_id: String,
    /// True when reconstructed from persistent state after a restart.
    pub restored: bool,
    /// Original payload, present on restored tasks for re-delivery.
    pub ex_payload: Option<MsgTranscodingTask>,
    payload_tx: mpsc::Sender<MsgTranscodingTask>,
    pub progress: mpsc::Receiver<MsgWorkerProgress>,
    pub heartbeats: mpsc::Receiver<MsgWorkerHeartbeat>,
    pub errors: mpsc::Receiver<TaskError>,
    pub success: mpsc::Receiver<TaskSuccess>,
}

/// Fabric-side halves of an active task's channels.
pub struct ActiveTaskHandles {
    pub payload: mpsc::Receiver<MsgTranscodingTask>,
    pub progress: mpsc::Sender<MsgWorkerProgress>,
    pub heartbeats: mpsc::Sender<MsgWorkerHeartbeat>,
    pub errors: mpsc::Sender<TaskError>,
    pub success: mpsc::Sender<TaskSuccess>,
}

impl ActiveTask {
    /// Opens a fresh active task with wired channels.
    pub fn open(tid: &str, worker_id: &str) -> (ActiveTask, ActiveTaskHandles) {
        let (payload_tx, payload_rx) = mpsc::channel(1);
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (success_tx, success_rx) = mpsc::channel(1);

        let at = ActiveTask {
            tid: tid.to_string(),
            worker_id: worker_id.to_string(),
            restored: false,
            ex_payload: None,
            payload_tx,
            progress: progress_rx,
            heartbeats: heartbeat_rx,
            errors: error_rx,
            success: success_rx,
        };
        let handles = ActiveTaskHandles {
            payload: payload_rx,
            progress: progress_tx,
            heartbeats: heartbeat_tx,
            errors: error_tx,
            success: success_tx,
        };
        (at, handles)
    }

    /// Reconstructs an active task from a persisted record. The stored
    /// payload must parse and the task must carry its worker assignment.
    pub fn restore(task: &Task) -> Result<(ActiveTask, ActiveTaskHandles), FabricError> {
        let worker_id = task.worker_id.as_deref().ok_or_else(|| {
            FabricError::ConsumeFailed(format!("restored task {} has no worker", task.tid))
        })?;
        let payload: MsgTranscodingTask = serde_json::from_str(&task.payload)
            .map_err(|e| FabricError::SerializationFailed(e.to_string()))?;

        let (mut at, handles) = Self::open(&task.tid, worker_id);
        at.restored = true;
        at.ex_payload = Some(payload);
        Ok((at, handles))
    }

    /// Delivers a payload to the worker inbox.
    pub async fn send_payload(&self, payload: &MsgTranscodingTask) -> Result<(), FabricError> {
        self.payload_tx
            .send(payload.clone())
            .await
            .map_err(|_| FabricError::WorkerGone)
    }
}
