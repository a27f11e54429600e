//! Server process lifecycle management.
//!
//! Spawns the tool server, pumps its stdout into the request registry,
//! forwards its stderr to the diagnostic sink, and watches for exit. Once the
//! process is gone the session is marked dead and every pending request is
//! failed, so nothing waits on a process that can no longer answer.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::codec::decode_stream;
use super::config::ClientConfig;
use super::diagnostics::{Diagnostic, SharedSink};
use super::errors::ClientError;
use super::registry::RequestRegistry;
use super::types::InboundMessage;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long to keep reading stdout after the process exits, so responses it
/// wrote just before exiting still reach their callers.
const STDOUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

// ─── ProcessSupervisor ───────────────────────────────────────────────────────

/// Owns the child process and its pipes.
///
/// Dropping the supervisor kills the child.
pub struct ProcessSupervisor {
    command: String,
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    live: Arc<AtomicBool>,
    /// `Some(status)` once the process has exited.
    exit_rx: watch::Receiver<Option<String>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    registry: Arc<RequestRegistry>,
}

impl ProcessSupervisor {
    /// Spawn the configured command with piped stdin/stdout/stderr.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &ClientConfig,
        registry: Arc<RequestRegistry>,
        sink: SharedSink,
    ) -> Result<Self, ClientError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ClientError::SpawnFailed {
            command: config.command.clone(),
            reason: e.to_string(),
        })?;

        let pipes = take_pipes(&mut child, &config.command);
        let (stdin, stdout, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };

        let pid = child.id();
        tracing::info!(
            command = %config.command,
            args = ?config.args,
            pid = ?pid,
            "spawned tool server"
        );

        let live = Arc::new(AtomicBool::new(true));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        let reader = tokio::spawn(pump_stdout(stdout, Arc::clone(&registry), Arc::clone(&sink)));
        tokio::spawn(forward_stderr(stderr, sink));
        tokio::spawn(watch_exit(
            child,
            reader,
            kill_rx,
            Arc::clone(&live),
            Arc::clone(&registry),
            exit_tx,
        ));

        Ok(Self {
            command: config.command.clone(),
            pid,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            live,
            exit_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
            registry,
        })
    }

    /// Whether the child is still running and accepting writes.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status description once the process has exited.
    pub fn exit_status(&self) -> Option<String> {
        self.exit_rx.borrow().clone()
    }

    /// Write one encoded line to the child's stdin.
    ///
    /// Fails fast with [`ClientError::ProcessDead`] once the session is no
    /// longer live. Writes are serialized so lines never interleave.
    pub async fn write(&self, line: &str) -> Result<(), ClientError> {
        if !self.is_live() {
            return Err(ClientError::ProcessDead);
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ClientError::ProcessDead)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the session: fail pending requests, close stdin, wait for the
    /// process to exit, and force-kill it after `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let was_live = self.live.swap(false, Ordering::AcqRel);
        self.registry.fail_all(ClientError::SessionClosed);

        // EOF on stdin asks a stdio server to stop. A write blocked on a full
        // pipe holds the stdin lock, so taking it counts against `grace` too.
        let mut exit_rx = self.exit_rx.clone();
        let stopped = async {
            self.stdin.lock().await.take();
            let _ = exit_rx.wait_for(Option::is_some).await;
        };
        let exited = tokio::time::timeout(grace, stopped).await.is_ok();

        if !exited {
            tracing::warn!(
                command = %self.command,
                pid = ?self.pid,
                grace_ms = grace.as_millis() as u64,
                "tool server did not stop within grace period, killing"
            );
            let kill = self.kill_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(tx) = kill {
                let _ = tx.send(());
            }
            let _ = exit_rx.wait_for(Option::is_some).await;
        }

        if was_live {
            tracing::info!(command = %self.command, status = ?self.exit_status(), "tool server stopped");
        }
    }
}

fn take_pipes(
    child: &mut Child,
    command: &str,
) -> Result<(ChildStdin, ChildStdout, ChildStderr), ClientError> {
    let missing = |pipe: &str| ClientError::SpawnFailed {
        command: command.to_string(),
        reason: format!("failed to capture {pipe}"),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    Ok((stdin, stdout, stderr))
}

// ─── Background Tasks ────────────────────────────────────────────────────────

/// Decode stdout and hand every message to the registry until EOF.
async fn pump_stdout(stdout: ChildStdout, registry: Arc<RequestRegistry>, sink: SharedSink) {
    let messages = decode_stream(stdout, sink);
    futures::pin_mut!(messages);

    while let Some(value) = messages.next().await {
        registry.dispatch(InboundMessage::classify(value));
    }
    tracing::debug!("tool server stdout closed");
}

/// Forward stderr line by line. Never parsed as protocol.
async fn forward_stderr(stderr: ChildStderr, sink: SharedSink) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if !line.is_empty() {
                    sink.report(Diagnostic::Stderr {
                        line: line.to_string(),
                    });
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading tool server stderr");
                break;
            }
        }
    }
}

/// Wait for the process to exit (or for a kill request), then tear down.
async fn watch_exit(
    mut child: Child,
    reader: JoinHandle<()>,
    kill_rx: oneshot::Receiver<()>,
    live: Arc<AtomicBool>,
    registry: Arc<RequestRegistry>,
    exit_tx: watch::Sender<Option<String>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Either an explicit kill or the supervisor was dropped.
        _ = kill_rx => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("unknown status: {e}"),
    };

    live.store(false, Ordering::Release);

    if tokio::time::timeout(STDOUT_DRAIN_GRACE, reader).await.is_err() {
        tracing::debug!("stdout still open after exit; not waiting further");
    }

    let failed = registry.fail_all(ClientError::ProcessExited {
        status: status.clone(),
    });
    tracing::info!(status = %status, failed, "tool server exited");

    let _ = exit_tx.send(Some(status));
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    fn parts() -> (Arc<RequestRegistry>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Arc::new(RequestRegistry::new(sink.clone())), sink)
    }

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let (registry, sink) = parts();
        let config = ClientConfig::new("/definitely/not/a/real/command-xyz");
        let err = ProcessSupervisor::start(&config, registry, sink).err().unwrap();
        match err {
            ClientError::SpawnFailed { command, .. } => {
                assert_eq!(command, "/definitely/not/a/real/command-xyz");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_fails_pending_and_blocks_writes() {
        let (registry, sink) = parts();
        let config = ClientConfig::new("true");
        let supervisor = ProcessSupervisor::start(&config, Arc::clone(&registry), sink).unwrap();

        let rx = registry.register(registry.next_id(), "tools/call");
        let mut exit_rx = supervisor.exit_rx.clone();
        let _ = exit_rx.wait_for(Option::is_some).await;

        assert!(!supervisor.is_live());
        assert!(supervisor.exit_status().is_some());
        assert!(matches!(
            supervisor.write("{}\n").await,
            Err(ClientError::ProcessDead)
        ));

        // Registered either before the exit (failed by fail_all) or after
        // (rejected at registration); both are transport errors.
        let err = match rx {
            Ok(rx) => rx.await.unwrap().unwrap_err(),
            Err(e) => e,
        };
        assert!(err.is_transport());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_forwarded() {
        let (registry, sink) = parts();
        let config = ClientConfig::new("sh").args(["-c", "echo oops >&2"]);
        let supervisor = ProcessSupervisor::start(&config, registry, sink.clone()).unwrap();
        let mut exit_rx = supervisor.exit_rx.clone();
        let _ = exit_rx.wait_for(Option::is_some).await;

        for _ in 0..50 {
            if !sink.entries().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(sink.entries().contains(&Diagnostic::Stderr {
            line: "oops".into()
        }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_stops_cat() {
        let (registry, sink) = parts();
        let supervisor =
            ProcessSupervisor::start(&ClientConfig::new("cat"), Arc::clone(&registry), sink)
                .unwrap();
        assert!(supervisor.is_live());

        supervisor.shutdown(Duration::from_secs(2)).await;
        assert!(!supervisor.is_live());
        assert!(supervisor.exit_status().is_some());
        assert!(matches!(
            registry.closed_reason(),
            Some(ClientError::SessionClosed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_unresponsive_process() {
        let (registry, sink) = parts();
        // Ignores stdin entirely, so only the kill path can stop it.
        let config = ClientConfig::new("sleep").arg("30");
        let supervisor = ProcessSupervisor::start(&config, registry, sink).unwrap();

        let started = std::time::Instant::now();
        supervisor.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(supervisor.exit_status().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_child_behind_blocked_write() {
        let (registry, sink) = parts();
        // Never reads stdin, so a large write fills the pipe and blocks.
        let config = ClientConfig::new("sleep").arg("1000");
        let supervisor = Arc::new(ProcessSupervisor::start(&config, registry, sink).unwrap());

        let writer = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move {
                let line = format!("{}\n", "x".repeat(1024 * 1024));
                supervisor.write(&line).await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let closed = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.shutdown(Duration::from_millis(100)),
        )
        .await;
        assert!(closed.is_ok(), "shutdown must not wait on a blocked write");
        assert!(supervisor.exit_status().is_some());

        let write = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(write.unwrap_err().is_transport());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_responses_written_before_exit_are_delivered() {
        let (registry, sink) = parts();
        let rx = registry.register(registry.next_id(), "tools/call").unwrap();
        let config = ClientConfig::new("sh").args([
            "-c",
            r#"printf '{"jsonrpc":"2.0","id":1,"result":{"done":true}}\n'"#,
        ]);
        let _supervisor = ProcessSupervisor::start(&config, registry, sink).unwrap();

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!({"done": true}));
    }
}
