//! Tool client: the public entry point.
//!
//! A [`ToolClient`] owns at most one [`Session`]. The session is created on
//! the first call and reused by every later call; it is never respawned.
//! Share the client behind an `Arc` to issue calls from several tasks.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;

use super::config::ClientConfig;
use super::diagnostics::{SharedSink, TracingSink};
use super::envelope::unwrap_tool_result;
use super::errors::ClientError;
use super::session::Session;
use super::types::{methods, CallToolParams, InitializeResult};

/// High-level client for invoking tools on a stdio JSON-RPC server.
pub struct ToolClient {
    config: ClientConfig,
    sink: SharedSink,
    session: OnceCell<Session>,
    /// Set by `close`. Checked under the lock so a session spawned
    /// concurrently with `close` is always stopped by one side.
    closed: Mutex<bool>,
}

impl ToolClient {
    /// Create a client that logs diagnostics through `tracing`.
    ///
    /// Nothing is spawned until the first call.
    pub fn new(config: ClientConfig) -> Self {
        let sink: SharedSink = Arc::new(TracingSink::new(&config.command));
        Self::with_sink(config, sink)
    }

    /// Create a client that reports diagnostics to `sink`.
    pub fn with_sink(config: ClientConfig, sink: SharedSink) -> Self {
        Self {
            config,
            sink,
            session: OnceCell::new(),
            closed: Mutex::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The session, spawning the server on first use.
    ///
    /// A spawn failure is returned to the caller that triggered it and leaves
    /// no session behind, so a later call tries again.
    pub async fn session(&self) -> Result<&Session, ClientError> {
        if self.is_closed() {
            return Err(ClientError::SessionClosed);
        }
        let session = self
            .session
            .get_or_try_init(|| Session::start(self.config.clone(), Arc::clone(&self.sink)))
            .await?;

        // `close` may have run while the session was being spawned and seen
        // no session to stop.
        if self.is_closed() {
            session.close().await;
            return Err(ClientError::SessionClosed);
        }
        Ok(session)
    }

    /// Invoke `name` with `arguments` and return the unwrapped result.
    ///
    /// `arguments` must be a JSON object; `null` is sent as `{}`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        let arguments = match arguments {
            Value::Null => Value::Object(serde_json::Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(ClientError::InvalidArguments {
                    tool: name.to_string(),
                    reason: format!("arguments must be a JSON object, got {other}"),
                })
            }
        };
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| ClientError::InvalidArguments {
            tool: name.to_string(),
            reason: e.to_string(),
        })?;

        let session = self.session().await?;
        session.ensure_initialized().await?;

        let raw = session.request(methods::TOOLS_CALL, Some(params)).await?;
        unwrap_tool_result(name, raw)
    }

    /// Whether a session exists and its server is running.
    pub fn is_live(&self) -> bool {
        self.session.get().is_some_and(Session::is_live)
    }

    /// The server's handshake reply, once a call has completed the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.session.get().and_then(Session::server_info)
    }

    /// Stop the server. Pending calls fail with [`ClientError::SessionClosed`]
    /// and later calls are rejected without spawning anything.
    pub async fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        if let Some(session) = self.session.get() {
            session.close().await;
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Named wrappers ──────────────────────────────────────────────────

    /// `get_info`: describe the server.
    pub async fn get_info(&self) -> Result<Value, ClientError> {
        self.call_named("get_info", &serde_json::Map::new()).await
    }

    /// `echo`: return `message`, optionally repeated.
    pub async fn echo(&self, args: &EchoArgs) -> Result<Value, ClientError> {
        self.call_named("echo", args).await
    }

    /// Call `tool_prefix + tool` with arguments that must serialize to an object.
    async fn call_named<A: Serialize>(&self, tool: &str, args: &A) -> Result<Value, ClientError> {
        let name = format!("{}{tool}", self.config.tool_prefix);
        let arguments = serde_json::to_value(args).map_err(|e| ClientError::InvalidArguments {
            tool: name.clone(),
            reason: e.to_string(),
        })?;
        self.call_tool(&name, arguments).await
    }
}

/// Arguments for [`ToolClient::echo`].
#[derive(Debug, Clone, Serialize)]
pub struct EchoArgs {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
}

impl EchoArgs {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            repeat: None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
