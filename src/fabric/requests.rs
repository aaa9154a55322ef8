//! Upstream request intake over a Redis list.
//!
//! Producers push `{uri, sd_hash}` records onto the intake list. Records are
//! surfaced one at a time as [`TranscodingRequest`] values; a rejected
//! request returns to the head of the list so ordering is preserved.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Timings;
use crate::dispatch::request::{is_valid_sd_hash, TranscodingRequest};
use crate::error::FabricError;

const REQUESTS_KEY: &str = "requests:incoming";
const REJECTED_KEY: &str = "requests:rejected";

/// Intake record pushed by upstream producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgTranscodingRequest {
    pub uri: String,
    pub sd_hash: String,
}

/// Consumes the intake list and exposes it as a lazy request stream.
#[derive(Clone)]
pub struct RequestIntake {
    connection: ConnectionManager,
    timings: Timings,
}

impl RequestIntake {
    pub async fn new(redis_url: &str, timings: Timings) -> Result<Self, FabricError> {
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
            timings,
        })
    }

    /// Starts the intake loop. The returned channel holds at most one request
    /// so upstream consumption is throttled by the dispatcher's pulls.
    pub fn start(&self, stop: CancellationToken) -> mpsc::Receiver<TranscodingRequest> {
        let (tx, rx) = mpsc::channel(1);
        let intake = self.clone();
        tokio::spawn(async move {
            intake.consume(tx, stop).await;
        });
        rx
    }

    async fn consume(self, tx: mpsc::Sender<TranscodingRequest>, stop: CancellationToken) {
        info!("consuming transcoding requests");
        let mut conn = self.connection.clone();
        let wait = self.timings.request_pick().as_secs_f64();

        loop {
            if stop.is_cancelled() {
                return;
            }

            let popped: Result<Option<(String, String)>, redis::RedisError> =
                conn.blpop(REQUESTS_KEY, wait).await;
            let raw = match popped {
                Ok(Some((_, raw))) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "request intake read failed");
                    tokio::time::sleep(self.timings.request_pick()).await;
                    continue;
                }
            };

            let msg: MsgTranscodingRequest = match serde_json::from_str(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "malformed transcoding request");
                    let _ = conn.rpush::<_, _, ()>(REJECTED_KEY, &raw).await;
                    continue;
                }
            };
            if !is_valid_sd_hash(&msg.sd_hash) {
                warn!(sd_hash = %msg.sd_hash, "invalid sd hash, request dropped");
                let _ = conn.rpush::<_, _, ()>(REJECTED_KEY, &raw).await;
                continue;
            }

            let (request, reject_rx) = TranscodingRequest::new(&msg.uri, &msg.sd_hash);

            // A rejected request goes back to the head of the intake list.
            let mut reject_conn = self.connection.clone();
            tokio::spawn(async move {
                if reject_rx.await.is_ok() {
                    if let Err(e) = reject_conn.lpush::<_, _, ()>(REQUESTS_KEY, &raw).await {
                        warn!(error = %e, "failed to return rejected request");
                    }
                }
            });

            if tx.send(request).await.is_err() {
                return;
            }
        }
    }
}
