//! Redis-backed RPC fabric between the conductor and remote workers.
//!
//! Workers announce idle capacity on a shared list; each task owns a payload
//! inbox plus progress, status and result lists. Terminal payloads are moved
//! to a per-task processing list and removed only after the durable side
//! effect, giving at-least-once delivery with idempotent completion.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::messages::{
    ActiveTask, ActiveTaskHandles, MsgTranscodingTask, MsgWorkRequest, MsgWorkerHeartbeat,
    MsgWorkerProgress, MsgWorkerResult, TaskError, TaskSuccess,
};
use crate::config::Timings;
use crate::error::FabricError;
use crate::metrics::Metrics;
use crate::taskqueue::{TaskStatus, TaskStore};

const WORK_REQUESTS_KEY: &str = "work:requests";

/// Consecutive broker failures tolerated before a task consumer gives up.
const MAX_CONSUME_FAILURES: u32 = 5;
const MAX_PUBLISH_ATTEMPTS: u32 = 3;

fn payload_key(tid: &str) -> String {
    format!("task:{tid}:out")
}

fn progress_key(tid: &str) -> String {
    format!("task:{tid}:progress")
}

fn status_key(tid: &str) -> String {
    format!("task:{tid}:status")
}

fn result_key(tid: &str) -> String {
    format!("task:{tid}:result")
}

fn result_processing_key(tid: &str) -> String {
    format!("task:{tid}:result:processing")
}

fn retry_delay(failures: u32) -> Duration {
    Duration::from_millis(250u64.saturating_mul(1 << failures.min(5)))
}

/// Bridges the dispatcher to remote workers over Redis lists.
#[derive(Clone)]
pub struct RedisFabric {
    connection: ConnectionManager,
    store: TaskStore,
    timings: Timings,
    metrics: Arc<Metrics>,
}

impl RedisFabric {
    /// Connects to the broker.
    pub async fn new(
        redis_url: &str,
        store: TaskStore,
        timings: Timings,
        metrics: Arc<Metrics>,
    ) -> Result<Self, FabricError> {
        let client = redis::Client::open(redis_url).map_err(|e| FabricError::ConnectionFailed {
            url: redis_url.to_string(),
            message: e.to_string(),
        })?;
        let connection =
            client
                .get_connection_manager()
                .await
                .map_err(|e| FabricError::ConnectionFailed {
                    url: redis_url.to_string(),
                    message: e.to_string(),
                })?;
        Ok(Self {
            connection,
            store,
            timings,
            metrics,
        })
    }

    /// Starts consuming worker idle signals and returns the stream of active
    /// tasks. When `restore` is set, live tasks from the queue are synthesized
    /// into restored active tasks first so their observers resume without
    /// re-dispatching.
    pub async fn start_consuming(
        &self,
        stop: CancellationToken,
        restore: bool,
    ) -> Result<mpsc::Receiver<ActiveTask>, FabricError> {
        let (tx, rx) = mpsc::channel(16);

        if restore {
            self.restore_tasks(&tx, &stop).await?;
        }

        let fabric = self.clone();
        let stop_consumer = stop.clone();
        tokio::spawn(async move {
            fabric.consume_work_requests(tx, stop_consumer).await;
        });

        Ok(rx)
    }

    /// Synthesizes active tasks for every live task row. Unacked terminal
    /// payloads are returned to their result list first.
    async fn restore_tasks(
        &self,
        tx: &mpsc::Sender<ActiveTask>,
        stop: &CancellationToken,
    ) -> Result<(), FabricError> {
        let tasks = self
            .store
            .list_restorable()
            .await
            .map_err(|e| FabricError::ConsumeFailed(e.to_string()))?;

        for task in tasks {
            match ActiveTask::restore(&task) {
                Ok((at, handles)) => {
                    self.requeue_unacked(&task.tid).await;
                    self.spawn_pumps(&task.tid, handles, stop.clone());
                    info!(tid = %at.tid, wid = %at.worker_id, "restored task");
                    if tx.send(at).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(tid = %task.tid, error = %e, "dropping unrestorable task");
                    let _ = self.store.update_status(&task.tid, TaskStatus::Failed).await;
                }
            }
        }
        Ok(())
    }

    /// Emits exactly one active task per worker idle message.
    async fn consume_work_requests(self, tx: mpsc::Sender<ActiveTask>, stop: CancellationToken) {
        info!("consuming work requests");
        let mut conn = self.connection.clone();
        let wait = self.timings.worker_wait().as_secs_f64();
        let mut failures: u32 = 0;

        loop {
            if stop.is_cancelled() {
                break;
            }

            let popped: Result<Option<(String, String)>, redis::RedisError> =
                conn.blpop(WORK_REQUESTS_KEY, wait).await;
            match popped {
                Ok(Some((_, raw))) => {
                    failures = 0;
                    let req: MsgWorkRequest = match serde_json::from_str(&raw) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "malformed work request");
                            continue;
                        }
                    };
                    self.metrics
                        .observe_worker(&req.worker_id, req.capacity, req.available);
                    debug!(
                        wid = %req.worker_id,
                        capacity = req.capacity,
                        available = req.available,
                        "worker requested work"
                    );

                    let tid = Ulid::new().to_string();
                    let (at, handles) = ActiveTask::open(&tid, &req.worker_id);
                    self.spawn_pumps(&tid, handles, stop.clone());
                    if tx.send(at).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSUME_FAILURES {
                        // A dead broker takes the whole fabric down with it.
                        error!(error = %e, "broker unreachable, shutting down fabric");
                        stop.cancel();
                        break;
                    }
                    warn!(error = %e, failures, "work request consumption failed");
                    tokio::time::sleep(retry_delay(failures)).await;
                }
            }
        }
        info!("work request consumer stopped");
    }

    /// Wires a task's channels to its broker lists.
    fn spawn_pumps(&self, tid: &str, handles: ActiveTaskHandles, stop: CancellationToken) {
        let ActiveTaskHandles {
            payload,
            progress,
            heartbeats,
            errors,
            success,
        } = handles;

        self.spawn_payload_forwarder(tid, payload, errors.clone());

        let fabric = self.clone();
        let tid = tid.to_string();
        tokio::spawn(async move {
            fabric
                .pump_events(tid, progress, heartbeats, errors, success, stop)
                .await;
        });
    }

    /// Forwards dispatcher payloads onto the worker inbox with bounded retry.
    fn spawn_payload_forwarder(
        &self,
        tid: &str,
        mut payload: mpsc::Receiver<MsgTranscodingTask>,
        errors: mpsc::Sender<TaskError>,
    ) {
        let mut conn = self.connection.clone();
        let key = payload_key(tid);
        let tid = tid.to_string();

        tokio::spawn(async move {
            while let Some(msg) = payload.recv().await {
                let raw = match serde_json::to_string(&msg) {
                    Ok(r) => r,
                    Err(e) => {
                        error!(tid = %tid, error = %e, "payload serialization failed");
                        let _ = errors
                            .send(TaskError {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                let mut attempt: u32 = 0;
                loop {
                    match conn.rpush::<_, _, ()>(&key, &raw).await {
                        Ok(()) => {
                            debug!(tid = %tid, "payload delivered");
                            break;
                        }
                        Err(e) if attempt + 1 < MAX_PUBLISH_ATTEMPTS => {
                            attempt += 1;
                            warn!(tid = %tid, error = %e, attempt, "payload publish retry");
                            tokio::time::sleep(retry_delay(attempt)).await;
                        }
                        Err(e) => {
                            error!(tid = %tid, error = %e, "payload publish failed");
                            let _ = errors
                                .send(TaskError {
                                    message: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Forwards worker events into the task's channels until a terminal
    /// payload arrives or the transport gives up. Dropping the senders closes
    /// the channels, which the state machine observes as worker loss.
    async fn pump_events(
        self,
        tid: String,
        progress: mpsc::Sender<MsgWorkerProgress>,
        heartbeats: mpsc::Sender<MsgWorkerHeartbeat>,
        errors: mpsc::Sender<TaskError>,
        success: mpsc::Sender<TaskSuccess>,
        stop: CancellationToken,
    ) {
        let mut conn = self.connection.clone();
        let status_wait = self.timings.worker_status().as_secs_f64();
        let pick_wait = self.timings.request_pick().as_secs_f64();
        let result = result_key(&tid);
        let processing = result_processing_key(&tid);
        let live_keys = [progress_key(&tid), status_key(&tid)];
        let mut failures: u32 = 0;

        loop {
            if stop.is_cancelled() {
                return;
            }

            // Terminal payload first, moved aside until the post-commit ack.
            let moved: Result<Option<String>, redis::RedisError> = conn
                .blmove(
                    &result,
                    &processing,
                    Direction::Left,
                    Direction::Right,
                    pick_wait,
                )
                .await;
            match moved {
                Ok(Some(raw)) => {
                    self.deliver_result(&tid, raw, &mut conn, &processing, &errors, &success)
                        .await;
                    return;
                }
                Ok(None) => {
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSUME_FAILURES {
                        error!(tid = %tid, error = %e, "task consumer failed");
                        let _ = errors
                            .send(TaskError {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                    tokio::time::sleep(retry_delay(failures)).await;
                    continue;
                }
            }

            let popped: Result<Option<(String, String)>, redis::RedisError> =
                conn.blpop(&live_keys[..], status_wait).await;
            match popped {
                Ok(Some((key, raw))) => {
                    failures = 0;
                    if key.ends_with(":progress") {
                        match serde_json::from_str::<MsgWorkerProgress>(&raw) {
                            Ok(p) => {
                                let _ = progress.send(p).await;
                            }
                            Err(e) => warn!(tid = %tid, error = %e, "malformed progress message"),
                        }
                    } else {
                        match serde_json::from_str::<MsgWorkerHeartbeat>(&raw) {
                            Ok(h) => {
                                let _ = heartbeats.send(h).await;
                            }
                            Err(e) => warn!(tid = %tid, error = %e, "malformed status message"),
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSUME_FAILURES {
                        error!(tid = %tid, error = %e, "task consumer failed");
                        let _ = errors
                            .send(TaskError {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                    tokio::time::sleep(retry_delay(failures)).await;
                }
            }
        }
    }

    /// Routes a terminal payload. Successful results are only removed from
    /// the broker after the observer acknowledges the library commit.
    async fn deliver_result(
        &self,
        tid: &str,
        raw: String,
        conn: &mut ConnectionManager,
        processing: &str,
        errors: &mpsc::Sender<TaskError>,
        success: &mpsc::Sender<TaskSuccess>,
    ) {
        let msg: MsgWorkerResult = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(tid = %tid, error = %e, "malformed result message");
                let _ = self.drop_processed(conn, processing, &raw).await;
                let _ = errors
                    .send(TaskError {
                        message: format!("malformed result: {e}"),
                    })
                    .await;
                return;
            }
        };

        if let Some(message) = msg.error {
            let _ = self.drop_processed(conn, processing, &raw).await;
            let _ = errors.send(TaskError { message }).await;
            return;
        }

        let Some(stream) = msg.remote_stream else {
            let _ = self.drop_processed(conn, processing, &raw).await;
            let _ = errors
                .send(TaskError {
                    message: "result carries neither stream nor error".to_string(),
                })
                .await;
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if success
            .send(TaskSuccess {
                stream,
                ack: Some(ack_tx),
            })
            .await
            .is_err()
        {
            return;
        }

        if ack_rx.await.is_ok() {
            if let Err(e) = self.drop_processed(conn, processing, &raw).await {
                warn!(tid = %tid, error = %e, "result ack failed");
            }
        } else {
            debug!(tid = %tid, "result left unacked for redelivery");
        }
    }

    async fn drop_processed(
        &self,
        conn: &mut ConnectionManager,
        processing: &str,
        raw: &str,
    ) -> Result<(), redis::RedisError> {
        conn.lrem::<_, _, i64>(processing, 1, raw).await?;
        Ok(())
    }

    /// Returns unacked terminal payloads to the result list. Best effort.
    async fn requeue_unacked(&self, tid: &str) {
        let mut conn = self.connection.clone();
        let processing = result_processing_key(tid);
        let result = result_key(tid);
        loop {
            let moved: Result<Option<String>, redis::RedisError> = conn
                .lmove(&processing, &result, Direction::Left, Direction::Right)
                .await;
            match moved {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    warn!(tid = %tid, error = %e, "failed to requeue unacked results");
                    break;
                }
            }
        }
    }
}
