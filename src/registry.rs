//! Request registry: id allocation and response correlation.
//!
//! Every in-flight request owns a `oneshot` sender stored under its id. The
//! stdout reader fulfils it when the matching response arrives, in whatever
//! order responses come back. When the session ends, every remaining entry is
//! failed with the terminal error and the registry refuses new entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use super::diagnostics::{Diagnostic, SharedSink};
use super::errors::ClientError;
use super::types::InboundMessage;

/// Outcome delivered to a waiting caller.
pub type Completion = Result<Value, ClientError>;

/// A request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    pub issued_at: Instant,
    tx: oneshot::Sender<Completion>,
}

#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<u64, PendingRequest>,
    /// Set once by `fail_all`; later registrations fail with this error.
    closed: Option<ClientError>,
}

/// Id allocator plus pending-request map for one session.
pub struct RequestRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
    sink: SharedSink,
}

impl RequestRegistry {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState::default()),
            sink,
        }
    }

    /// Next request id. Starts at 1 and is never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a pending entry for `id` and return the handle to await.
    ///
    /// Fails with the terminal error if the registry has already been closed.
    pub fn register(
        &self,
        id: u64,
        method: &str,
    ) -> Result<oneshot::Receiver<Completion>, ClientError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone());
        }
        state.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                issued_at: Instant::now(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Drop a pending entry without completing it (failed send, timeout).
    pub fn remove(&self, id: u64) -> bool {
        self.lock().pending.remove(&id).is_some()
    }

    /// Route an inbound message to its pending request.
    ///
    /// Returns `true` if a waiting request was completed. Messages that
    /// correlate to nothing are reported to the diagnostic sink and dropped.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        let (id, outcome) = match message {
            InboundMessage::Response { id, outcome } => (id, outcome),
            InboundMessage::Notification { method } | InboundMessage::Request { method } => {
                self.sink.report(Diagnostic::IgnoredMessage {
                    method: Some(method),
                });
                return false;
            }
            InboundMessage::Other => {
                self.sink.report(Diagnostic::IgnoredMessage { method: None });
                return false;
            }
        };

        let Some(pending) = self.lock().pending.remove(&id) else {
            self.sink.report(Diagnostic::UnmatchedResponse { id });
            return false;
        };

        tracing::trace!(
            id,
            method = %pending.method,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "response dispatched"
        );

        // The caller may have stopped waiting; that is not an error here.
        let _ = pending.tx.send(outcome.map_err(ClientError::from));
        true
    }

    /// Fail every pending request with `reason`, empty the map, and refuse
    /// further registrations. Calling it again only fails entries registered
    /// in between (there are none once closed), so it is idempotent.
    pub fn fail_all(&self, reason: ClientError) -> usize {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.tx.send(Err(reason.clone()));
        }
        if count > 0 {
            tracing::debug!(count, reason = %reason, "failed pending requests");
        }
        count
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// The terminal error, once the registry has been closed.
    pub fn closed_reason(&self) -> Option<ClientError> {
        self.lock().closed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
