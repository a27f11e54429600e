//! One live conversation with a tool server.
//!
//! A [`Session`] ties the supervisor, the request registry, and the
//! handshake together. The `initialize` round trip runs at most once per
//! session, in a task the session owns: concurrent first callers all await
//! that one task, a caller giving up does not restart it, and its outcome
//! (success or failure) is kept for the rest of the session.

use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::task::AbortHandle;

use super::codec::{encode_notification, encode_request};
use super::config::ClientConfig;
use super::diagnostics::SharedSink;
use super::errors::ClientError;
use super::lifecycle::ProcessSupervisor;
use super::registry::RequestRegistry;
use super::types::{
    methods, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
};

/// Where the session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    Initializing,
    Initialized,
    /// The handshake failed; the session will not try again.
    Failed,
}

/// A spawned tool server plus the state needed to talk to it.
pub struct Session {
    link: Arc<Link>,
    handshake: OnceLock<HandshakeTask>,
}

/// The handshake task, started by the first caller of `ensure_initialized`.
struct HandshakeTask {
    done: Shared<BoxFuture<'static, Result<(), ClientError>>>,
    abort: AbortHandle,
}

/// Everything the handshake task shares with the session.
struct Link {
    config: ClientConfig,
    registry: Arc<RequestRegistry>,
    supervisor: ProcessSupervisor,
    /// Written once by the handshake task.
    outcome: OnceLock<Result<InitializeResult, ClientError>>,
}

impl Session {
    /// Validate `config` and spawn the server. No traffic is sent yet.
    pub async fn start(config: ClientConfig, sink: SharedSink) -> Result<Self, ClientError> {
        config.validate()?;

        let registry = Arc::new(RequestRegistry::new(Arc::clone(&sink)));
        let supervisor = ProcessSupervisor::start(&config, Arc::clone(&registry), sink)?;

        Ok(Self {
            link: Arc::new(Link {
                config,
                registry,
                supervisor,
                outcome: OnceLock::new(),
            }),
            handshake: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.link.config
    }

    /// Whether the server process is still running.
    pub fn is_live(&self) -> bool {
        self.link.supervisor.is_live()
    }

    pub fn pid(&self) -> Option<u32> {
        self.link.supervisor.pid()
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.link.registry.pending_count()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        match self.link.outcome.get() {
            Some(Ok(_)) => HandshakeState::Initialized,
            Some(Err(_)) => HandshakeState::Failed,
            None if self.handshake.get().is_some() => HandshakeState::Initializing,
            None => HandshakeState::Uninitialized,
        }
    }

    /// The server's `initialize` reply, once the handshake has succeeded.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.link.outcome.get().and_then(|outcome| outcome.as_ref().ok())
    }

    /// Run the handshake if it hasn't run yet, or wait for the one in flight.
    ///
    /// Dropping the returned future stops waiting but leaves the handshake
    /// running; the next caller picks up the same attempt.
    pub async fn ensure_initialized(&self) -> Result<(), ClientError> {
        if let Some(outcome) = self.link.outcome.get() {
            return outcome.as_ref().map(|_| ()).map_err(Clone::clone);
        }
        let task = self.handshake.get_or_init(|| self.spawn_handshake());
        task.done.clone().await
    }

    fn spawn_handshake(&self) -> HandshakeTask {
        let link = Arc::clone(&self.link);
        let handle = tokio::spawn(async move {
            let outcome = link.handshake().await;
            let done = outcome.as_ref().map(|_| ()).map_err(Clone::clone);
            let _ = link.outcome.set(outcome);
            done
        });
        let abort = handle.abort_handle();
        let done = async move {
            handle
                .await
                .unwrap_or_else(|_| Err(ClientError::SessionClosed))
        }
        .boxed()
        .shared();
        HandshakeTask { done, abort }
    }

    /// Send a request and wait for its response.
    ///
    /// The pending entry is registered before the line is written, so a fast
    /// reply can never arrive unmatched. The entry is removed if the write
    /// fails, the optional timeout fires, or the caller drops this future.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.link.request(method, params).await
    }

    /// Send a notification. Nothing is registered; no reply is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.link.notify(method, params).await
    }

    /// Stop the server and fail everything still pending. Safe to call twice.
    pub async fn close(&self) {
        self.link
            .supervisor
            .shutdown(self.link.config.shutdown_timeout_duration())
            .await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The handshake task holds the supervisor, and with it the child.
        if let Some(task) = self.handshake.get() {
            task.abort.abort();
        }
    }
}

impl Link {
    async fn handshake(&self) -> Result<InitializeResult, ClientError> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.config.capabilities.clone(),
            client_info: self.config.client_info.clone(),
        };
        let params = serde_json::to_value(&params).map_err(|e| ClientError::Protocol {
            reason: format!("failed to serialize initialize params: {e}"),
        })?;

        let result = match self.request(methods::INITIALIZE, Some(params)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "handshake failed");
                return Err(e);
            }
        };

        let info = serde_json::from_value::<InitializeResult>(result).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "unrecognized initialize result; keeping defaults");
            InitializeResult::default()
        });

        self.notify(methods::INITIALIZED, None).await?;

        tracing::info!(
            server = ?info.server_info.as_ref().and_then(|s| s.name.as_deref()),
            protocol_version = ?info.protocol_version,
            "session initialized"
        );
        Ok(info)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let id = self.registry.next_id();
        let rx = self.registry.register(id, method)?;
        let _pending = PendingGuard {
            registry: &self.registry,
            id,
        };

        let line = encode_request(&JsonRpcRequest::new(id, method, params))?;
        self.supervisor.write(&line).await?;
        tracing::debug!(id, method, "request sent");

        let completion = match self.config.request_timeout_duration() {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                ClientError::Timeout {
                    method: method.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => rx.await,
        };

        // A dropped sender only happens when the registry was torn down.
        completion.unwrap_or_else(|_| Err(self.terminal_error()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let line = encode_notification(&JsonRpcNotification::new(method, params))?;
        self.supervisor.write(&line).await?;
        tracing::debug!(method, "notification sent");
        Ok(())
    }

    fn terminal_error(&self) -> ClientError {
        self.registry
            .closed_reason()
            .unwrap_or(ClientError::ProcessDead)
    }
}

/// Removes a request's pending entry when the request stops waiting.
///
/// After a response has been dispatched the entry is already gone and the
/// removal is a no-op.
struct PendingGuard<'a> {
    registry: &'a RequestRegistry,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::diagnostics::{Diagnostic, MemorySink};

    /// Run `script` under `sh -c` as a stand-in server.
    fn scripted(script: &str) -> ClientConfig {
        ClientConfig::new("sh")
            .args(["-c", script])
            .shutdown_timeout(Duration::from_millis(200))
    }

    const INIT_THEN_ECHO: &str = r#"
        read -r _init
        printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","serverInfo":{"name":"sh"}}}\n'
        read -r _initialized
        read -r _call
        printf '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"pong"}]}}\n'
        cat >/dev/null
    "#;

    #[tokio::test]
    async fn test_handshake_then_request() {
        let session = Session::start(scripted(INIT_THEN_ECHO), Arc::new(MemorySink::new()))
            .await
            .unwrap();
        assert_eq!(session.handshake_state(), HandshakeState::Uninitialized);

        session.ensure_initialized().await.unwrap();
        assert_eq!(session.handshake_state(), HandshakeState::Initialized);
        let info = session.server_info().unwrap();
        assert_eq!(info.protocol_version.as_deref(), Some("2025-06-18"));

        let raw = session
            .request("tools/call", Some(json!({"name": "ping", "arguments": {}})))
            .await
            .unwrap();
        assert_eq!(raw["content"][0]["text"], "pong");
        assert_eq!(session.pending_count(), 0);

        session.close().await;
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn test_abandoned_handshake_is_not_repeated() {
        let script = r#"
            read -r _init
            sleep 0.3
            printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18"}}\n'
            read -r next
            case "$next" in
                *'"initialize"'*) echo "second initialize" >&2 ;;
            esac
            cat >/dev/null
        "#;
        let sink = Arc::new(MemorySink::new());
        let session = Session::start(scripted(script), sink.clone()).await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), session.ensure_initialized()).await;
        assert!(abandoned.is_err());
        assert_eq!(session.handshake_state(), HandshakeState::Initializing);

        tokio::time::timeout(Duration::from_secs(5), session.ensure_initialized())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.handshake_state(), HandshakeState::Initialized);
        assert_eq!(session.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.close().await;
        let entries = sink.entries();
        assert!(!entries.iter().any(|d| matches!(d, Diagnostic::UnmatchedResponse { .. })));
        assert!(!entries.contains(&Diagnostic::Stderr {
            line: "second initialize".into()
        }));
    }

    #[tokio::test]
    async fn test_handshake_rpc_error_is_terminal() {
        let script = r#"
            read -r _init
            printf '{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"unsupported version"}}\n'
            cat >/dev/null
        "#;
        let session = Session::start(scripted(script), Arc::new(MemorySink::new()))
            .await
            .unwrap();

        let first = session.ensure_initialized().await.unwrap_err();
        assert!(matches!(first, ClientError::Rpc { code: -32600, .. }));
        assert_eq!(session.handshake_state(), HandshakeState::Failed);

        // No second initialize is attempted; the stored failure is returned.
        let second = tokio::time::timeout(Duration::from_secs(1), session.ensure_initialized())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(second, ClientError::Rpc { code: -32600, .. }));
        session.close().await;
    }

    #[tokio::test]
    async fn test_exit_during_handshake_fails_fast() {
        let script = "read -r _init; exit 3";
        let session = Session::start(scripted(script), Arc::new(MemorySink::new()))
            .await
            .unwrap();

        let err = session.ensure_initialized().await.unwrap_err();
        assert!(err.is_transport(), "got {err:?}");

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            session.request("tools/call", None),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_request_timeout_removes_pending() {
        let config = scripted("cat >/dev/null").request_timeout(Duration::from_millis(50));
        let session = Session::start(config, Arc::new(MemorySink::new()))
            .await
            .unwrap();

        let err = session.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(session.pending_count(), 0);
        assert!(session.is_live());
        session.close().await;
    }

    #[tokio::test]
    async fn test_dropped_request_leaves_nothing_pending() {
        let session = Session::start(scripted("cat >/dev/null"), Arc::new(MemorySink::new()))
            .await
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), session.request("tools/call", None))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(session.pending_count(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_rejects_later_requests() {
        let session = Session::start(scripted("cat >/dev/null"), Arc::new(MemorySink::new()))
            .await
            .unwrap();
        session.close().await;
        session.close().await;

        let err = session.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, ClientError::SessionClosed));
        let err = session.notify("notifications/cancelled", None).await.unwrap_err();
        assert!(matches!(err, ClientError::ProcessDead));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_spawn() {
        let err = Session::start(ClientConfig::new(""), Arc::new(MemorySink::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config { .. }));
    }
}
