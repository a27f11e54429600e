//! Client error types.
//!
//! Every variant maps onto one of four failure classes (see [`ErrorClass`]).
//! Only transport-class errors are fatal to a session; the others are scoped
//! to a single request or absorbed at the decode step.

use thiserror::Error;

/// Coarse failure class of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The child process could not be spawned, has exited, or was closed.
    Transport,
    /// An inbound line could not be understood.
    Protocol,
    /// The server answered a request with a JSON-RPC `error` object.
    Rpc,
    /// The tool ran but reported `isError`.
    Tool,
    /// Local failures: configuration, argument validation, opt-in timeouts.
    Local,
}

/// Errors that can occur during client operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server process failed to start.
    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed {
        command: String,
        reason: String,
    },

    /// The server process exited (any exit status).
    #[error("server process exited ({status})")]
    ProcessExited {
        status: String,
    },

    /// A write was attempted against a session that is no longer live.
    #[error("server process is not running")]
    ProcessDead,

    /// The session was closed by the caller.
    #[error("session closed")]
    SessionClosed,

    /// Reading from or writing to the child's pipes failed.
    #[error("i/o error: {reason}")]
    Io {
        reason: String,
    },

    /// A line or message could not be interpreted.
    #[error("protocol error: {reason}")]
    Protocol {
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("rpc error [{code}]: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The tool result envelope carried `isError: true`.
    #[error("tool '{tool}' failed: {message}")]
    Tool {
        tool: String,
        message: String,
    },

    /// A request exceeded the configured timeout.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        timeout_ms: u64,
    },

    /// Arguments for a named wrapper did not serialize to a JSON object.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// Configuration error (unreadable file, bad YAML, missing command).
    #[error("config error: {reason}")]
    Config {
        reason: String,
    },
}

impl ClientError {
    /// The failure class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::SpawnFailed { .. }
            | ClientError::ProcessExited { .. }
            | ClientError::ProcessDead
            | ClientError::SessionClosed
            | ClientError::Io { .. } => ErrorClass::Transport,
            ClientError::Protocol { .. } => ErrorClass::Protocol,
            ClientError::Rpc { .. } => ErrorClass::Rpc,
            ClientError::Tool { .. } => ErrorClass::Tool,
            ClientError::Timeout { .. }
            | ClientError::InvalidArguments { .. }
            | ClientError::Config { .. } => ErrorClass::Local,
        }
    }

    /// Whether this error ends the session it came from.
    pub fn is_transport(&self) -> bool {
        self.class() == ErrorClass::Transport
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io {
            reason: e.to_string(),
        }
    }
}
