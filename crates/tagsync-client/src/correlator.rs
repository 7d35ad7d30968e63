//! Request/reply correlation.
//!
//! Each outbound request is stamped with a fresh [`CorrelationId`] and parked
//! as a pending oneshot until the inbound dispatcher delivers the frame
//! carrying the same id. Pending requests have no deadline of their own; see
//! [`PendingReply::wait`] for the opt-in timeout.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tagsync_core::{CorrelationId, Request, Result, SyncError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Pending request waiting for its reply.
type PendingTx = oneshot::Sender<Result<Value>>;

/// Matches outbound requests to inbound replies.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<CorrelationId, PendingTx>>,
    /// Writer for the open channel. `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Correlator {
    /// Create a correlator with no channel attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route outbound frames to `writer` from now on.
    pub(crate) fn attach(&self, writer: mpsc::UnboundedSender<String>) {
        *self.outbound.lock() = Some(writer);
    }

    /// Stop routing outbound frames. Later sends fail with `NotConnected`.
    pub(crate) fn detach(&self) {
        *self.outbound.lock() = None;
    }

    /// Stamp `request`, register it as pending, and hand it to the channel.
    ///
    /// Fails with [`SyncError::NotConnected`] without writing anything when
    /// no channel is attached.
    pub fn send(&self, request: &Request) -> Result<PendingReply> {
        let outbound = self.outbound.lock();
        let writer = outbound.as_ref().ok_or(SyncError::NotConnected)?;

        let mut pending = self.pending.lock();
        let mut id = CorrelationId::new();
        while pending.contains_key(&id) {
            id = CorrelationId::new();
        }
        let text = request.encode(&id)?;

        let (tx, rx) = oneshot::channel();
        let _ = pending.insert(id.clone(), tx);
        if writer.send(text).is_err() {
            let _ = pending.remove(&id);
            return Err(SyncError::NotConnected);
        }
        trace!(correlation_id = %id, kind = request.kind(), "request sent");
        Ok(PendingReply { id, rx })
    }

    /// Deliver a reply. Returns `false` if no request is pending under `id`.
    pub fn resolve(&self, id: &CorrelationId, outcome: std::result::Result<Value, Value>) -> bool {
        let Some(tx) = self.pending.lock().remove(id) else {
            return false;
        };
        let result = outcome.map_err(|payload| SyncError::Rejected { payload });
        // The caller may have stopped waiting; the reply is still consumed.
        let _ = tx.send(result);
        true
    }

    /// Drop the pending entry for `id` without resolving it.
    pub fn forget(&self, id: &CorrelationId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Reject every pending request with the error built by `error`.
    /// Returns how many were rejected.
    pub fn fail_all(&self, error: impl Fn() -> SyncError) -> usize {
        let drained: Vec<PendingTx> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(error()));
        }
        if count > 0 {
            debug!(count, "rejected pending requests");
        }
        count
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A sent request awaiting its reply.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    /// The correlation id stamped on the request.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the reply, optionally bounded by `timeout`.
    ///
    /// On timeout the pending entry is dropped from `correlator`, so a late
    /// reply is ignored.
    pub async fn wait(self, correlator: &Correlator, timeout: Option<Duration>) -> Result<Value> {
        let Some(limit) = timeout else {
            return self.rx.await.unwrap_or(Err(SyncError::Disconnected));
        };
        match tokio::time::timeout(limit, self.rx).await {
            Ok(reply) => reply.unwrap_or(Err(SyncError::Disconnected)),
            Err(_) => {
                let _ = correlator.forget(&self.id);
                Err(SyncError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}
