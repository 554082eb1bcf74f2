//! Wire shapes for MCP over streamable HTTP.
//!
//! Only what the client sends or reads is modelled: the JSON-RPC envelope,
//! the initialize handshake, paged `tools/list` and `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision that introduced streamable HTTP.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Unknown method; servers also answer an unknown tool name with it.
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// An outgoing message. Without an id it is a notification.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> Envelope<'a> {
    pub fn request(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params,
        }
    }
}

/// An incoming message. Server notifications interleaved in an event
/// stream have no id.
#[derive(Debug, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Reply {
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// `initialize` params. The client offers no capabilities of its own.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": "swarm", "version": env!("CARGO_PKG_VERSION")},
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// A tool advertised by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// One page of `tools/list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPage {
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// `tools/list` params; the first page has none.
pub fn list_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| json!({ "cursor": c }))
}

/// `tools/call` params. Arguments are left out rather than sent as null.
pub fn call_params(name: &str, arguments: Option<Value>) -> Value {
    let mut params = Map::new();
    params.insert("name".into(), Value::String(name.to_string()));
    if let Some(arguments) = arguments {
        params.insert("arguments".into(), arguments);
    }
    Value::Object(params)
}

/// Content item in a tool result. Binary payloads stay base64.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resources and links; tools surface neither.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    is_error: bool,
}

impl CallToolResult {
    /// Text items joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First binary item as `(mime, base64)`.
    pub fn media(&self) -> Option<(&str, &str)> {
        self.content.iter().find_map(|c| match c {
            ToolContent::Image { data, mime_type } | ToolContent::Audio { data, mime_type } => {
                Some((mime_type.as_str(), data.as_str()))
            }
            _ => None,
        })
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_has_no_id() {
        let request = serde_json::to_value(Envelope::request(3, "tools/list", None)).unwrap();
        assert_eq!(request, json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}));

        let note = serde_json::to_value(Envelope::notification("notifications/initialized", None))
            .unwrap();
        assert_eq!(note, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    #[test]
    fn test_error_reply() {
        let json = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such tool"}}"#;
        let reply: Reply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.id, Some(1));
        assert_eq!(reply.into_result().unwrap_err().code, METHOD_NOT_FOUND);
    }

    #[test]
    fn test_call_params_omit_missing_arguments() {
        assert_eq!(call_params("ping", None), json!({"name": "ping"}));
        assert_eq!(
            call_params("echo", Some(json!({"text": "hi"}))),
            json!({"name": "echo", "arguments": {"text": "hi"}})
        );
        assert_eq!(list_params(None), None);
    }

    #[test]
    fn test_call_tool_result() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "line 1"},
                {"type": "resource_link", "uri": "file:///a.txt", "name": "a.txt"},
                {"type": "image", "data": "iVBOR", "mimeType": "image/png"},
                {"type": "text", "text": "line 2"}
            ]
        }"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_error());
        assert_eq!(result.content[1], ToolContent::Other);
        assert_eq!(result.text(), "line 1\nline 2");
        assert_eq!(result.media(), Some(("image/png", "iVBOR")));
    }
}
