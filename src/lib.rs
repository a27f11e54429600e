//! JSON-RPC 2.0 tool client over a child process's stdio.
//!
//! This crate handles:
//! - Spawning a tool server process and supervising its pipes
//! - Newline-delimited JSON framing in both directions
//! - Correlating concurrent requests with out-of-order responses by id
//! - A single coalesced `initialize` handshake per session
//! - Normalizing the heterogeneous `tools/call` result envelope
//!
//! ```no_run
//! use stdio_rpc_client::{ClientConfig, ToolClient};
//!
//! # async fn run() -> Result<(), stdio_rpc_client::ClientError> {
//! let client = ToolClient::new(ClientConfig::new("my-tool-server").arg("--stdio"));
//! let value = client
//!     .call_tool("search", serde_json::json!({"query": "rust"}))
//!     .await?;
//! println!("{value}");
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod envelope;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod types;

// Re-exports for convenience
pub use client::{EchoArgs, ToolClient};
pub use config::{load_client_config, ClientConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use envelope::{unwrap_tool_result, ToolResultEnvelope};
pub use errors::{ClientError, ErrorClass};
pub use session::{HandshakeState, Session};

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies (for example
/// `"stdio_rpc_client=info,warn"`). stdout is left alone so binaries can use
/// it for output. Does nothing if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
}
