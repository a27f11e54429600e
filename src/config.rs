//! Client configuration.
//!
//! Everything the client needs is passed in explicitly through
//! [`ClientConfig`]: the command to spawn, handshake fields, and timeouts.
//! It can be built in code or loaded from a YAML file with `${VAR}` /
//! `${VAR:-default}` interpolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::errors::ClientError;
use super::types::ClientInfo;

// ─── Defaults ────────────────────────────────────────────────────────────────

/// Protocol version announced in `initialize` when none is configured.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Grace period between closing stdin and force-killing the child.
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

fn default_capabilities() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

// ─── ClientConfig ────────────────────────────────────────────────────────────

/// How to launch the tool server and what to tell it during the handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Program to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child (inherits the rest).
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Passed through to the server verbatim. Must be a JSON object.
    #[serde(default = "default_capabilities")]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: ClientInfo,
    /// Prefix applied by the named wrappers (e.g. `"demo_"` → `demo_get_info`).
    /// `call_tool` never applies it.
    #[serde(default)]
    pub tool_prefix: String,
    /// Per-request timeout. `None` waits until the response or process exit.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl ClientConfig {
    /// Configuration for `command` with every other field at its default.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            protocol_version: default_protocol_version(),
            capabilities: default_capabilities(),
            client_info: ClientInfo::default(),
            tool_prefix: String::new(),
            request_timeout_ms: None,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn client_info(mut self, name: &str, version: &str) -> Self {
        self.client_info = ClientInfo {
            name: name.to_string(),
            version: version.to_string(),
        };
        self
    }

    pub fn tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = prefix.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub(crate) fn request_timeout_duration(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.command.trim().is_empty() {
            return Err(ClientError::Config {
                reason: "command must not be empty".into(),
            });
        }
        if !self.capabilities.is_object() {
            return Err(ClientError::Config {
                reason: "capabilities must be a JSON object".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load, interpolate, parse, and validate a YAML configuration file.
pub fn load_client_config(path: &Path) -> Result<ClientConfig, ClientError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ClientError::Config {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let config = parse_client_config(&raw)?;
    tracing::debug!(path = %path.display(), command = %config.command, "loaded client config");
    Ok(config)
}

/// Parse configuration from a YAML string (after env-var interpolation).
pub fn parse_client_config(raw: &str) -> Result<ClientConfig, ClientError> {
    let interpolated = interpolate_env_vars(raw);
    let config: ClientConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ClientError::Config {
            reason: format!("failed to parse config: {e}"),
        })?;
    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
