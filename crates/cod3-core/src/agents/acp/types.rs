//! JSON types for the Agent Client Protocol (ACP).
//!
//! # Protocol Overview
//!
//! ACP is JSON-RPC 2.0, one message per line over the agent's stdio. The
//! client drives the session; the agent streams progress back as
//! notifications and calls back into the client for permissions and files.
//!
//! ```text
//! Client → Agent: initialize request (client capabilities)
//! Agent → Client: initialize response (protocol version)
//! Client → Agent: session/new request (cwd)
//! Agent → Client: session/new response (sessionId)
//! Client → Agent: session/prompt request
//! Agent → Client: session/update notifications (streaming)
//! Agent → Client: session/request_permission request (tool approval)
//! Agent → Client: fs/read_text_file, fs/write_text_file requests
//! Agent → Client: session/prompt response (stopReason)
//! Client → Agent: session/cancel notification (stop)
//! ```

use crate::approval::PermissionOption;
use serde::Deserialize;
use serde_json::{json, Value};

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC "invalid params".
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "internal error".
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC message from the agent.
///
/// The variant order matters for `#[serde(untagged)]`: a server request has
/// both `id` and `method`, so it must be tried before a response (only `id`)
/// and a notification (only `method`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    ServerRequest(JsonRpcServerRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// A request the agent sends to the client.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcServerRequest {
    pub method: String,
    pub id: Value,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Body of a `session/update` notification (`params.update`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    /// "agent_message_chunk", "tool_call", "tool_call_update", "plan", ...
    #[serde(rename = "sessionUpdate")]
    pub session_update: Option<String>,

    /// Alternative location for the type field.
    #[serde(rename = "type")]
    pub update_type: Option<String>,

    /// A content block for message chunks, a list of blocks for tool calls.
    #[serde(default)]
    pub content: Option<Value>,

    #[serde(rename = "toolCallId")]
    #[serde(default)]
    pub tool_call_id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    /// "execute", "edit", "read", "search", ...
    #[serde(default)]
    pub kind: Option<String>,

    /// "pending", "in_progress", "completed", "failed".
    #[serde(default)]
    pub status: Option<String>,

    #[serde(rename = "rawInput")]
    #[serde(default)]
    pub raw_input: Option<Value>,

    #[serde(default)]
    pub input: Option<Value>,

    #[serde(rename = "rawOutput")]
    #[serde(default)]
    pub raw_output: Option<Value>,

    #[serde(default)]
    pub output: Option<Value>,
}

impl SessionUpdate {
    pub fn get_type(&self) -> Option<&str> {
        self.session_update
            .as_deref()
            .or(self.update_type.as_deref())
    }

    pub fn get_input(&self) -> Option<&Value> {
        self.raw_input.as_ref().or(self.input.as_ref())
    }

    pub fn get_output(&self) -> Option<&Value> {
        self.raw_output.as_ref().or(self.output.as_ref())
    }
}

/// Tool call described in a permission request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionToolCall {
    #[serde(rename = "toolCallId")]
    #[serde(default)]
    pub tool_call_id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub kind: Option<String>,

    #[serde(rename = "rawInput")]
    #[serde(default)]
    pub raw_input: Option<Value>,
}

/// Params of `session/request_permission`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tool_call: PermissionToolCall,
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// Params of `fs/read_text_file`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileParams {
    pub path: String,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Params of `fs/write_text_file`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileParams {
    pub path: String,
    pub content: String,
}

// ============================================================================
// Outgoing messages
// ============================================================================

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

pub fn result_response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": { "readTextFile": true, "writeTextFile": true },
            "terminal": false
        }
    })
}

pub fn new_session_params(cwd: &str) -> Value {
    json!({ "cwd": cwd, "mcpServers": [] })
}

pub fn prompt_params(session_id: &str, text: &str) -> Value {
    json!({
        "sessionId": session_id,
        "prompt": [{ "type": "text", "text": text }]
    })
}

pub fn cancel_params(session_id: &str) -> Value {
    json!({ "sessionId": session_id })
}

/// Result of `session/request_permission`. `None` answers `cancelled`.
pub fn permission_outcome(option_id: Option<&str>) -> Value {
    match option_id {
        Some(id) => json!({ "outcome": { "outcome": "selected", "optionId": id } }),
        None => json!({ "outcome": { "outcome": "cancelled" } }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::PermissionOptionKind;

    mod incoming {
        use super::*;

        #[test]
        fn parse_notification() {
            let json = r#"{"jsonrpc":"2.0","method":"session/update","params":{"update":{"sessionUpdate":"agent_message_chunk"}}}"#;
            let msg: JsonRpcMessage = serde_json::from_str(json).unwrap();
            assert!(matches!(msg, JsonRpcMessage::Notification(_)));
        }

        #[test]
        fn parse_server_request() {
            let json = r#"{"jsonrpc":"2.0","method":"session/request_permission","id":0,"params":{}}"#;
            let msg: JsonRpcMessage = serde_json::from_str(json).unwrap();
            assert!(matches!(msg, JsonRpcMessage::ServerRequest(_)));
        }

        #[test]
        fn parse_response_and_error() {
            let msg: JsonRpcMessage =
                serde_json::from_str(r#"{"id":1,"result":{"sessionId":"sess-123"}}"#).unwrap();
            assert!(matches!(msg, JsonRpcMessage::Response(r) if r.result.is_some()));

            let msg: JsonRpcMessage = serde_json::from_str(
                r#"{"id":2,"error":{"code":-32000,"message":"auth required"}}"#,
            )
            .unwrap();
            let JsonRpcMessage::Response(resp) = msg else {
                panic!("expected response");
            };
            assert_eq!(resp.error.unwrap().message, "auth required");
        }

        #[test]
        fn session_update_fields() {
            let json = r#"{"sessionUpdate":"tool_call","toolCallId":"tc-1","title":"Run ls","kind":"execute","status":"pending","rawInput":{"command":"ls"}}"#;
            let update: SessionUpdate = serde_json::from_str(json).unwrap();
            assert_eq!(update.get_type(), Some("tool_call"));
            assert_eq!(update.tool_call_id.as_deref(), Some("tc-1"));
            assert!(update.get_input().is_some());
            assert!(update.get_output().is_none());
        }

        #[test]
        fn session_update_type_and_input_fallbacks() {
            let update: SessionUpdate =
                serde_json::from_str(r#"{"type":"tool_call","input":{"a":1},"output":"ok"}"#)
                    .unwrap();
            assert_eq!(update.get_type(), Some("tool_call"));
            assert!(update.get_input().is_some());
            assert_eq!(update.get_output(), Some(&json!("ok")));
        }

        #[test]
        fn permission_params() {
            let json = r#"{"sessionId":"s","toolCall":{"toolCallId":"tc-2","title":"Edit file","rawInput":{"path":"a.txt"}},"options":[{"optionId":"allow","name":"Allow","kind":"allow_once"}]}"#;
            let params: RequestPermissionParams = serde_json::from_str(json).unwrap();
            assert_eq!(params.tool_call.tool_call_id.as_deref(), Some("tc-2"));
            assert_eq!(params.options[0].kind, PermissionOptionKind::AllowOnce);
        }

        #[test]
        fn fs_params() {
            let read: ReadTextFileParams =
                serde_json::from_str(r#"{"sessionId":"s","path":"/p/a","line":3,"limit":10}"#)
                    .unwrap();
            assert_eq!((read.line, read.limit), (Some(3), Some(10)));
            let write: WriteTextFileParams =
                serde_json::from_str(r#"{"sessionId":"s","path":"/p/a","content":"x"}"#).unwrap();
            assert_eq!(write.content, "x");
        }
    }

    mod outgoing {
        use super::*;

        #[test]
        fn initialize_advertises_fs() {
            let msg = request(0, "initialize", initialize_params());
            assert_eq!(msg["jsonrpc"], "2.0");
            assert_eq!(msg["params"]["protocolVersion"], 1);
            assert_eq!(msg["params"]["clientCapabilities"]["fs"]["writeTextFile"], true);
        }

        #[test]
        fn permission_outcomes() {
            assert_eq!(
                permission_outcome(Some("allow-once")),
                json!({"outcome": {"outcome": "selected", "optionId": "allow-once"}})
            );
            assert_eq!(
                permission_outcome(None),
                json!({"outcome": {"outcome": "cancelled"}})
            );
        }

        #[test]
        fn error_response_keeps_id_type() {
            let msg = error_response(&json!("req-7"), METHOD_NOT_FOUND, "Method not supported");
            assert_eq!(msg["id"], "req-7");
            assert_eq!(msg["error"]["code"], -32601);
        }
    }
}
