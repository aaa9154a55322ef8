//! Incoming transcoding requests.

use tokio::sync::oneshot;

/// A transcoding request observed from the upstream producer. Immutable once
/// constructed; rejection hands it back to its origin queue.
#[derive(Debug)]
pub struct TranscodingRequest {
    /// Opaque content URL.
    pub uri: String,
    /// Hex content digest, the primary identity for deduplication.
    pub sd_hash: String,
    reject_tx: Option<oneshot::Sender<()>>,
}

impl TranscodingRequest {
    /// Creates a request with a rejection side channel. The receiver fires
    /// when the dispatcher declines the request.
    pub fn new(uri: &str, sd_hash: &str) -> (Self, oneshot::Receiver<()>) {
        let (reject_tx, reject_rx) = oneshot::channel();
        (
            Self {
                uri: uri.to_string(),
                sd_hash: sd_hash.to_string(),
                reject_tx: Some(reject_tx),
            },
            reject_rx,
        )
    }

    /// Creates a request with no origin to return to.
    pub fn detached(uri: &str, sd_hash: &str) -> Self {
        Self {
            uri: uri.to_string(),
            sd_hash: sd_hash.to_string(),
            reject_tx: None,
        }
    }

    /// Returns the request to its origin queue.
    pub fn reject(mut self) {
        if let Some(tx) = self.reject_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Checks the 40-hex-character content digest format.
pub fn is_valid_sd_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
