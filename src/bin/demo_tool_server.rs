//! `demo-tool-server`: a small stdio JSON-RPC tool server.
//!
//! Handy for trying the client by hand and used by the integration tests.
//! Requests are handled concurrently, so delayed tools answer out of order.
//!
//! Tools:
//! - `get_info` → json content describing the server and its counters
//! - `echo {message, repeat?}` → text content
//! - `raw {result}` → `result` sent back verbatim as the tool result
//! - `sleep {ms, value}` → json content `value` after `ms` milliseconds
//! - `fail {message}` → `isError` envelope
//! - `rpc_error {code?, message}` → JSON-RPC error response
//! - `garbage {value}` → writes a non-JSON line, then json content `value`
//! - `stderr {line}` → writes `line` to stderr, then json content `true`
//! - `exit {code?}` → exits without answering
//! - `hang` → never answers

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

#[derive(Debug, Parser)]
#[command(name = "demo-tool-server", version)]
struct Args {
    /// Delay the `initialize` response by this many milliseconds.
    #[arg(long, default_value_t = 0)]
    init_delay_ms: u64,

    /// Answer `initialize` with a JSON-RPC error.
    #[arg(long)]
    fail_init: bool,

    /// Tool names must carry this prefix (e.g. `demo_echo`).
    #[arg(long, default_value = "")]
    prefix: String,
}

#[derive(Debug, Default)]
struct Counters {
    initialize_requests: u64,
    initialized_notifications: u64,
    tool_calls: u64,
}

struct Server {
    args: Args,
    counters: std::sync::Mutex<Counters>,
    stdout: Mutex<Stdout>,
}

impl Server {
    async fn send(&self, message: Value) {
        self.send_raw(&format!("{message}\n")).await;
    }

    async fn send_raw(&self, text: &str) {
        let mut out = self.stdout.lock().await;
        let _ = out.write_all(text.as_bytes()).await;
        let _ = out.flush().await;
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[tokio::main]
async fn main() {
    let server = Arc::new(Server {
        args: Args::parse(),
        counters: std::sync::Mutex::new(Counters::default()),
        stdout: Mutex::new(tokio::io::stdout()),
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("demo-tool-server: ignoring unparseable line");
            continue;
        };
        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message.get("id").cloned();

        match (method.as_str(), id) {
            ("notifications/initialized", None) => {
                server.counters().initialized_notifications += 1;
            }
            (_, None) => {}
            ("initialize", Some(id)) => {
                server.counters().initialize_requests += 1;
                tokio::spawn(answer_initialize(Arc::clone(&server), id));
            }
            ("tools/call", Some(id)) => {
                let ready = {
                    let mut counters = server.counters();
                    counters.tool_calls += 1;
                    counters.initialized_notifications > 0
                };
                if !ready {
                    server
                        .send(error(id, -32002, "tools/call before notifications/initialized"))
                        .await;
                    continue;
                }
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                tokio::spawn(call_tool(Arc::clone(&server), id, params));
            }
            (other, Some(id)) => {
                server
                    .send(error(id, -32601, &format!("method not found: {other}")))
                    .await;
            }
        }
    }
}

async fn answer_initialize(server: Arc<Server>, id: Value) {
    if server.args.init_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(server.args.init_delay_ms)).await;
    }
    let reply = if server.args.fail_init {
        error(id, -32600, "initialization refused")
    } else {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2025-06-18",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "demo-tool-server", "version": env!("CARGO_PKG_VERSION")}
            }
        })
    };
    server.send(reply).await;
}

async fn call_tool(server: Arc<Server>, id: Value, params: Value) {
    let full_name = params["name"].as_str().unwrap_or_default();
    let args = &params["arguments"];

    let Some(name) = full_name.strip_prefix(server.args.prefix.as_str()) else {
        server
            .send(error(id, -32601, &format!("unknown tool: {full_name}")))
            .await;
        return;
    };

    let result = match name {
        "get_info" => {
            let info = {
                let c = server.counters();
                json!({
                    "name": "demo-tool-server",
                    "initialize_requests": c.initialize_requests,
                    "initialized_notifications": c.initialized_notifications,
                    "tool_calls": c.tool_calls,
                })
            };
            json_content(info)
        }
        "echo" => {
            let message = args["message"].as_str().unwrap_or_default();
            let repeat = args["repeat"].as_u64().unwrap_or(1) as usize;
            json!({"content": [{"type": "text", "text": message.repeat(repeat)}]})
        }
        "raw" => args["result"].clone(),
        "sleep" => {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            json_content(args["value"].clone())
        }
        "fail" => json!({
            "isError": true,
            "content": [{"type": "text", "text": args["message"].as_str().unwrap_or("failed")}]
        }),
        "rpc_error" => {
            let code = args["code"].as_i64().unwrap_or(-32000);
            let message = args["message"].as_str().unwrap_or("rpc error");
            server.send(error(id, code, message)).await;
            return;
        }
        "garbage" => {
            server.send_raw("this line is not json {\n").await;
            json_content(args["value"].clone())
        }
        "stderr" => {
            let line = args["line"].as_str().unwrap_or_default();
            let mut err = tokio::io::stderr();
            let _ = err.write_all(format!("{line}\n").as_bytes()).await;
            let _ = err.flush().await;
            json_content(json!(true))
        }
        "exit" => {
            let code = args["code"].as_i64().unwrap_or(0) as i32;
            std::process::exit(code);
        }
        "hang" => return,
        _ => {
            server
                .send(error(id, -32601, &format!("unknown tool: {full_name}")))
                .await;
            return;
        }
    };

    server
        .send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        .await;
}

fn json_content(value: Value) -> Value {
    json!({"content": [{"type": "json", "json": value}]})
}

fn error(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}
