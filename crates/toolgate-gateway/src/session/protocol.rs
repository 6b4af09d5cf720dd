//! Minimal JSON-RPC surface for the transport bridge
//!
//! The bridge only needs to classify inbound messages (request vs.
//! notification, initialization vs. everything else) and produce
//! well-formed error responses. Full protocol semantics live in the
//! engine behind the `ProtocolEngine` seam.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the session identifier.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// JSON-RPC request id (number or string).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// Standard JSON-RPC error codes used by the bridge.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const INTERNAL_ERROR: i64 = -32603;

/// Whether a message body is an `initialize` request.
pub fn is_initialize(body: &Value) -> bool {
    body.get("method")
        .and_then(|m| m.as_str())
        .map(|m| m == "initialize")
        .unwrap_or(false)
}

/// Whether a message body is a notification (no `id` member).
pub fn is_notification(body: &Value) -> bool {
    body.get("id").is_none()
}

/// Extract the method name for logging.
pub fn method_name(body: &Value) -> Option<&str> {
    body.get("method").and_then(|m| m.as_str())
}

/// Extract the request id, when present.
pub fn request_id(body: &Value) -> Option<RequestId> {
    body.get("id")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Build a JSON-RPC error response object.
pub fn error_response(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}
