//! Task dispatcher and per-task state machines.
//!
//! One coordinator loop couples the incoming request stream to worker
//! capacity: an idle worker surfaces as an [`ActiveTask`], the dispatcher
//! picks the first non-duplicate request, records the assignment and sends
//! the payload. Each dispatched task is then observed by its own state
//! machine until a terminal event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::request::TranscodingRequest;
use crate::error::{AppError, FabricError, TaskQueueError};
use crate::fabric::{ActiveTask, MsgTranscodingTask, TaskSuccess};
use crate::library::Library;
use crate::metrics::Metrics;
use crate::taskqueue::{TaskStatus, TaskStore};

/// Couples the request stream to worker capacity.
pub struct Dispatcher {
    store: TaskStore,
    library: Arc<Library>,
    metrics: Arc<Metrics>,
    silence_window: Duration,
}

impl Dispatcher {
    pub fn new(
        store: TaskStore,
        library: Arc<Library>,
        metrics: Arc<Metrics>,
        silence_window: Duration,
    ) -> Self {
        Self {
            store,
            library,
            metrics,
            silence_window,
        }
    }

    /// Runs the coordinator loop until the active task stream ends or stop
    /// fires. In-flight requests are left untouched on shutdown.
    pub async fn run(
        &self,
        mut active_tasks: mpsc::Receiver<ActiveTask>,
        mut requests: mpsc::Receiver<TranscodingRequest>,
        stop: CancellationToken,
    ) {
        info!("task dispatcher started");
        loop {
            tokio::select! {
                maybe_at = active_tasks.recv() => {
                    let Some(at) = maybe_at else {
                        info!("task dispatcher: active task stream closed");
                        return;
                    };
                    if let Err(e) = self.handle(at, &mut requests, &stop).await {
                        error!(error = %e, "task dispatch failed");
                    }
                }
                _ = stop.cancelled() => {
                    info!("task dispatcher: quit");
                    return;
                }
            }
        }
    }

    /// Assigns work to one presented worker slot and spawns its observer.
    async fn handle(
        &self,
        mut at: ActiveTask,
        requests: &mut mpsc::Receiver<TranscodingRequest>,
        stop: &CancellationToken,
    ) -> Result<(), AppError> {
        if at.restored {
            if let Some(payload) = at.ex_payload.clone() {
                info!(tid = %at.tid, wid = %at.worker_id, "dispatcher: restored task");
                at.send_payload(&payload).await?;
                self.spawn_observer(at, stop);
                return Ok(());
            }
        }

        info!(tid = %at.tid, wid = %at.worker_id, "dispatcher: new task");
        let payload = loop {
            let req = tokio::select! {
                maybe = requests.recv() => match maybe {
                    Some(r) => r,
                    None => return Ok(()),
                },
                _ = stop.cancelled() => return Ok(()),
            };

            // A live row for the same hash makes this candidate a duplicate.
            match self.store.get_by_sd_hash(&req.sd_hash).await {
                Ok(_) => {
                    info!(sd_hash = %req.sd_hash, "dispatcher: duplicate request, rejected");
                    req.reject();
                    continue;
                }
                Err(TaskQueueError::NotFound { .. }) => {}
                Err(e) => {
                    req.reject();
                    return Err(e.into());
                }
            }

            let payload = MsgTranscodingTask {
                url: req.uri.clone(),
                sd_hash: req.sd_hash.clone(),
                tid: at.tid.clone(),
            };
            let stored = serde_json::to_string(&payload)
                .map_err(|e| FabricError::SerializationFailed(e.to_string()))?;

            match self
                .store
                .create(
                    &at.tid,
                    &req.sd_hash,
                    &req.uri,
                    Some(&at.worker_id),
                    &stored,
                )
                .await
            {
                Ok(_) => break payload,
                Err(TaskQueueError::DuplicateTask { sd_hash }) => {
                    // Lost the race to a parallel dispatch.
                    info!(sd_hash = %sd_hash, "dispatcher: duplicate task, rejected");
                    req.reject();
                    continue;
                }
                Err(e) => {
                    req.reject();
                    return Err(e.into());
                }
            }
        };

        debug!(tid = %at.tid, wid = %at.worker_id, url = %payload.url, "dispatcher: sending payload");
        at.send_payload(&payload).await?;
        self.metrics.requests_published.inc();

        self.spawn_observer(at, stop);
        Ok(())
    }

    fn spawn_observer(&self, at: ActiveTask, stop: &CancellationToken) {
        let store = self.store.clone();
        let library = self.library.clone();
        let metrics = self.metrics.clone();
        let silence_window = self.silence_window;
        let stop = stop.clone();
        tokio::spawn(async move {
            manage_task(at, store, library, metrics, silence_window, stop).await;
        });
    }
}

/// Observes a single task until a terminal event.
///
/// Progress keeps the task running and re-arms the silence timer. Heartbeats
/// persist the liveness timestamp. Errors and malformed successes terminate
/// the task as failed. A valid success is ingested into the library and only
/// then acknowledged towards the broker. Silence past the window logs a
/// warning but stays non-fatal; hard timeouts belong to the sweeper. Stop
/// abandons observation without touching persistent state so restoration can
/// pick the task up again.
pub async fn manage_task(
    mut at: ActiveTask,
    store: TaskStore,
    library: Arc<Library>,
    metrics: Arc<Metrics>,
    silence_window: Duration,
    stop: CancellationToken,
) {
    let tid = at.tid.clone();
    let wid = at.worker_id.clone();
    metrics.inc_running(&wid);
    info!(tid = %tid, wid = %wid, restored = at.restored, "managing task");

    if let Err(e) = store.update_status(&tid, TaskStatus::Running).await {
        warn!(tid = %tid, error = %e, "failed to mark task running");
    }

    loop {
        tokio::select! {
            maybe = at.progress.recv() => match maybe {
                Some(p) => {
                    info!(tid = %tid, wid = %wid, percent = p.percent, stage = %p.stage, "progress received");
                }
                None => {
                    warn!(tid = %tid, wid = %wid, "worker channels closed, abandoning task");
                    break;
                }
            },
            maybe = at.heartbeats.recv() => match maybe {
                Some(hb) => {
                    metrics.inc_heartbeats(&wid);
                    if let Err(e) = store.heartbeat(&tid, hb.ts).await {
                        warn!(tid = %tid, error = %e, "failed to record heartbeat");
                    }
                }
                None => {
                    warn!(tid = %tid, wid = %wid, "worker channels closed, abandoning task");
                    break;
                }
            },
            maybe = at.errors.recv() => match maybe {
                Some(e) => {
                    error!(tid = %tid, wid = %wid, err = %e.message, "task errored");
                    metrics.inc_errors(&wid);
                    if let Err(e) = store.update_status(&tid, TaskStatus::Failed).await {
                        warn!(tid = %tid, error = %e, "failed to mark task failed");
                    }
                    break;
                }
                None => {
                    warn!(tid = %tid, wid = %wid, "worker channels closed, abandoning task");
                    break;
                }
            },
            maybe = at.success.recv() => match maybe {
                Some(done) => {
                    handle_success(done, &tid, &wid, &store, &library, &metrics).await;
                    break;
                }
                None => {
                    warn!(tid = %tid, wid = %wid, "worker channels closed, abandoning task");
                    break;
                }
            },
            _ = tokio::time::sleep(silence_window) => {
                warn!(tid = %tid, wid = %wid, "timed out waiting for worker status");
            }
            _ = stop.cancelled() => {
                debug!(tid = %tid, wid = %wid, "observation abandoned");
                break;
            }
        }
    }

    metrics.dec_running(&wid);
}

/// Terminal success handling: ingest, persist, acknowledge.
async fn handle_success(
    done: TaskSuccess,
    tid: &str,
    wid: &str,
    store: &TaskStore,
    library: &Library,
    metrics: &Metrics,
) {
    let stream = done.stream;
    if stream.manifest.is_none() {
        error!(tid = %tid, wid = %wid, sd_hash = %stream.sd_hash, "remote stream missing manifest");
        metrics.inc_errors(wid);
        if let Err(e) = store.update_status(tid, TaskStatus::Failed).await {
            warn!(tid = %tid, error = %e, "failed to mark task failed");
        }
        return;
    }

    let url = stream.url();
    match library.add_remote_stream(stream).await {
        Ok(()) => {
            info!(tid = %tid, wid = %wid, url = ?url, "added remote stream");
            if let Err(e) = store.update_status(tid, TaskStatus::Completed).await {
                warn!(tid = %tid, error = %e, "failed to mark task completed");
            }
            if let Some(ack) = done.ack {
                let _ = ack.send(());
            }
            metrics.inc_done(wid);
        }
        Err(e) => {
            error!(tid = %tid, wid = %wid, error = %e, "error adding remote stream");
            metrics.inc_errors(wid);
            if let Err(e) = store.update_status(tid, TaskStatus::Failed).await {
                warn!(tid = %tid, error = %e, "failed to mark task failed");
            }
        }
    }
}
