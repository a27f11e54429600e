//! Diagnostic sink for non-fatal events.
//!
//! Malformed lines, unmatched responses, and the child's stderr never reach a
//! caller as errors. They are reported here instead. The default sink writes
//! them to `tracing`.

use std::sync::{Arc, Mutex};

/// A non-fatal event observed while talking to the child process.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A stdout line that was not valid JSON. The line was discarded.
    MalformedLine { line: String, reason: String },
    /// A response whose id is not pending (late, duplicate, or unknown).
    UnmatchedResponse { id: u64 },
    /// A server-initiated request or notification, or an unrecognized shape.
    IgnoredMessage { method: Option<String> },
    /// One line of the child's stderr.
    Stderr { line: String },
}

/// Receiver for [`Diagnostic`] events.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    /// Label for the child process, attached to every event.
    pub server: String,
}

impl TracingSink {
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
        }
    }
}

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::MalformedLine { line, reason } => {
                tracing::warn!(
                    server = %self.server,
                    line = %truncate(&line, 200),
                    reason = %reason,
                    "discarding malformed line from server stdout"
                );
            }
            Diagnostic::UnmatchedResponse { id } => {
                tracing::debug!(server = %self.server, id, "no pending request for response");
            }
            Diagnostic::IgnoredMessage { method } => {
                tracing::debug!(server = %self.server, method = ?method, "ignoring server message");
            }
            Diagnostic::Stderr { line } => {
                tracing::info!(target: "stderr", server = %self.server, "{line}");
            }
        }
    }
}

/// Keeps every diagnostic in memory. Useful for callers that surface
/// diagnostics in their own UI, and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of malformed-line reports.
    pub fn malformed_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|d| matches!(d, Diagnostic::MalformedLine { .. }))
            .count()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(diagnostic);
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
