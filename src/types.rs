//! Shared types for the client.
//!
//! JSON-RPC 2.0 message types and the handshake/tool-call payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ClientError;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id; never answered).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
///
/// Only `message` is needed to build a useful error; `code` defaults to 0
/// when a server omits it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Build an error object from whatever the server put in `error`.
    fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RpcErrorObject>(value.clone()) {
            Ok(obj) => obj,
            Err(_) => RpcErrorObject {
                code: error_codes::INTERNAL_ERROR,
                message: match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                data: None,
            },
        }
    }
}

impl From<RpcErrorObject> for ClientError {
    fn from(e: RpcErrorObject) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// A decoded inbound message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A response correlating to one of our request ids.
    Response {
        id: u64,
        outcome: Result<Value, RpcErrorObject>,
    },
    /// A server-initiated notification.
    Notification { method: String },
    /// A server-initiated request. This client never answers them.
    Request { method: String },
    /// Anything else (no recognizable id/method shape).
    Other,
}

impl InboundMessage {
    /// Classify a parsed JSON value.
    ///
    /// A response carries an integer `id` and no `method`. If it has neither
    /// `result` nor `error` it is treated as an internal error reply so the
    /// waiting caller still completes.
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut obj) = value else {
            return InboundMessage::Other;
        };

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            return if obj.contains_key("id") {
                InboundMessage::Request { method }
            } else {
                InboundMessage::Notification { method }
            };
        }

        let Some(id) = obj.get("id").and_then(Value::as_u64) else {
            return InboundMessage::Other;
        };

        let outcome = if let Some(err) = obj.remove("error").filter(|e| !e.is_null()) {
            Err(RpcErrorObject::from_value(err))
        } else if let Some(result) = obj.remove("result") {
            Ok(result)
        } else {
            Err(RpcErrorObject {
                code: error_codes::INTERNAL_ERROR,
                message: "response missing both result and error".into(),
                data: None,
            })
        };

        InboundMessage::Response { id, outcome }
    }
}

// ─── Handshake & Tool Payloads ───────────────────────────────────────────────

/// Client identity sent in `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// `initialize` response payload. Parsed leniently; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// `tools/call` request parameters.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

// ─── Method Names ────────────────────────────────────────────────────────────

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_omits_missing_params() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let n = JsonRpcNotification::new(methods::INITIALIZED, None);
        let v = serde_json::to_value(&n).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["method"], "notifications/initialized");
    }

    #[test]
    fn test_initialize_params_are_camel_case() {
        let params = InitializeParams {
            protocol_version: "2025-06-18".into(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: "c".into(),
                version: "1".into(),
            },
        };
        let v = serde_json::to_value(&params).unwrap();
        assert_eq!(v["protocolVersion"], "2025-06-18");
        assert_eq!(v["clientInfo"]["name"], "c");
    }

    #[test]
    fn test_classify_success_response() {
        let msg = InboundMessage::classify(json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}}));
        assert_eq!(
            msg,
            InboundMessage::Response {
                id: 3,
                outcome: Ok(json!({"ok": true}))
            }
        );
    }

    #[test]
    fn test_classify_null_result_is_success() {
        let msg = InboundMessage::classify(json!({"id": 4, "result": null}));
        assert_eq!(
            msg,
            InboundMessage::Response {
                id: 4,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_classify_error_response() {
        let msg = InboundMessage::classify(json!({
            "id": 2,
            "error": {"code": -32601, "message": "Method not found"}
        }));
        match msg {
            InboundMessage::Response { id, outcome: Err(e) } => {
                assert_eq!(id, 2);
                assert_eq!(e.code, -32601);
                assert_eq!(e.message, "Method not found");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_error_without_code() {
        let msg = InboundMessage::classify(json!({"id": 9, "error": {"message": "nope"}}));
        match msg {
            InboundMessage::Response { outcome: Err(e), .. } => {
                assert_eq!(e.code, 0);
                assert_eq!(e.message, "nope");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_missing_result_and_error() {
        let msg = InboundMessage::classify(json!({"id": 5}));
        match msg {
            InboundMessage::Response { outcome: Err(e), .. } => {
                assert_eq!(e.code, error_codes::INTERNAL_ERROR);
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_server_messages() {
        assert_eq!(
            InboundMessage::classify(json!({"method": "notifications/progress"})),
            InboundMessage::Notification {
                method: "notifications/progress".into()
            }
        );
        assert_eq!(
            InboundMessage::classify(json!({"id": 1, "method": "ping"})),
            InboundMessage::Request {
                method: "ping".into()
            }
        );
    }

    #[test]
    fn test_classify_unrecognized_shapes() {
        assert_eq!(InboundMessage::classify(json!([1, 2])), InboundMessage::Other);
        assert_eq!(InboundMessage::classify(json!({"id": "abc", "result": 1})), InboundMessage::Other);
        assert_eq!(InboundMessage::classify(json!({"hello": "world"})), InboundMessage::Other);
    }

    #[test]
    fn test_initialize_result_lenient() {
        let r: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2025-06-18",
            "serverInfo": {"name": "demo", "version": "0.1"}
        }))
        .unwrap();
        assert_eq!(r.protocol_version.as_deref(), Some("2025-06-18"));
        assert_eq!(r.server_info.unwrap().name.as_deref(), Some("demo"));

        let empty: InitializeResult = serde_json::from_value(json!({})).unwrap();
        assert!(empty.server_info.is_none());
    }
}
