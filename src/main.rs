//! `toolcall`: invoke one tool on a stdio JSON-RPC server and print the result.
//!
//! ```text
//! toolcall --config server.yaml search '{"query":"rust"}'
//! toolcall --command my-server --arg --stdio get_info
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use stdio_rpc_client::{init_tracing, load_client_config, ClientConfig, ToolClient};

#[derive(Debug, Parser)]
#[command(name = "toolcall", version, about = "Call a tool on a stdio JSON-RPC server")]
struct Cli {
    /// YAML client configuration.
    #[arg(long, conflicts_with = "command")]
    config: Option<PathBuf>,

    /// Server program to spawn (instead of --config).
    #[arg(long)]
    command: Option<String>,

    /// Argument for the server program; repeatable.
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Fail the call if no response arrives within this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Tool name.
    tool: String,

    /// Tool arguments as a JSON object.
    arguments: Option<String>,
}

impl Cli {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match (&self.config, &self.command) {
            (Some(path), _) => load_client_config(path)?,
            (None, Some(command)) => ClientConfig::new(command.clone()),
            (None, None) => bail!("either --config or --command is required"),
        };
        config.args.extend(self.args.iter().cloned());
        if let Some(ms) = self.timeout_ms {
            config = config.request_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("stdio_rpc_client=info,warn");
    let cli = Cli::parse();

    let config = cli.client_config()?;
    let arguments = match &cli.arguments {
        Some(raw) => serde_json::from_str(raw).context("tool arguments are not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let client = ToolClient::new(config);
    let result = client.call_tool(&cli.tool, arguments).await;
    client.close().await;

    let value = result.with_context(|| format!("tool '{}' failed", cli.tool))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
