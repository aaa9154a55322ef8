//! Periodic sweep of stale tasks.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Timings;
use crate::error::TaskQueueError;
use crate::metrics::Metrics;
use crate::taskqueue::TaskStore;

/// Declares hard timeouts on tasks whose heartbeat went silent. A timed out
/// hash becomes eligible again on the next worker-idle arrival.
pub struct Sweeper {
    store: TaskStore,
    metrics: Arc<Metrics>,
    timings: Timings,
}

impl Sweeper {
    pub fn new(store: TaskStore, metrics: Arc<Metrics>, timings: Timings) -> Self {
        Self {
            store,
            metrics,
            timings,
        }
    }

    /// Runs sweep passes until stop fires.
    pub async fn run(&self, stop: CancellationToken) {
        info!("task sweeper started");
        let mut ticker = tokio::time::interval(self.timings.request_sweep());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "sweep failed");
                    }
                }
                _ = stop.cancelled() => {
                    info!("task sweeper stopped");
                    return;
                }
            }
        }
    }

    /// Marks tasks silent past the timeout window as timed out. Idempotent; a
    /// concurrently arriving heartbeat re-arms the task instead. Returns the
    /// number of tasks swept.
    pub async fn sweep_once(&self) -> Result<usize, TaskQueueError> {
        let window = self.timings.request_timeout_base() + self.timings.request_heartbeat();
        let cutoff =
            Utc::now() - TimeDelta::from_std(window).unwrap_or_else(|_| TimeDelta::zero());

        let stale = self.store.list_stale(cutoff).await?;
        let mut swept = 0;
        for task in stale {
            if self.store.mark_timed_out(&task.tid, cutoff).await? > 0 {
                let worker = task.worker_id.as_deref().unwrap_or("unassigned");
                warn!(
                    tid = %task.tid,
                    wid = %worker,
                    sd_hash = %task.sd_hash,
                    last_heartbeat = %task.last_heartbeat,
                    "task timed out"
                );
                self.metrics.inc_retries(worker);
                swept += 1;
            }
        }
        Ok(swept)
    }
}
