//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! The wire types consumed by the debugging client: the JSON-RPC envelope
//! plus the MCP surface it reflects (tools, resources, prompts, server
//! capabilities). Struct fields are `camelCase` on the wire; all `Option`
//! fields omit their key from JSON when `None`.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The MCP protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Request the list of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Request the list of available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read the contents of a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Request the list of available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Retrieve a rendered prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";

/// Server notification: the tool list changed.
pub const NOTIFICATION_TOOLS_CHANGED: &str = "notifications/tools/list_changed";
/// Server notification: the resource list changed.
pub const NOTIFICATION_RESOURCES_CHANGED: &str = "notifications/resources/list_changed";
/// Server notification: the prompt list changed.
pub const NOTIFICATION_PROMPTS_CHANGED: &str = "notifications/prompts/list_changed";

// ---------------------------------------------------------------------------
// JSON-RPC envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier echoed in the response.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Builds a request with a string id.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: serde_json::Value::String(id.into()),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Builds a notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Identifier of the request being answered.
    pub id: serde_json::Value,
    /// Successful result; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any inbound JSON-RPC message: a response to one of our requests or a
/// server notification.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Response carrying an id we issued.
    Response(JsonRpcResponse),
    /// Server-initiated notification.
    Notification(JsonRpcNotification),
}

impl InboundMessage {
    /// Classifies a serialized inbound message.
    ///
    /// Anything with an `id` is treated as a response; anything else with
    /// a `method` is a notification.
    pub fn parse(raw: &str) -> Option<InboundMessage> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        if value.get("id").map(|id| !id.is_null()).unwrap_or(false)
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            serde_json::from_value(value).ok().map(InboundMessage::Response)
        } else if value.get("method").is_some() {
            serde_json::from_value(value)
                .ok()
                .map(InboundMessage::Notification)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision the client proposes.
    pub protocol_version: String,
    /// Client capability flags (currently empty for this client).
    pub capabilities: serde_json::Value,
    /// Client name/version.
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server selected.
    pub protocol_version: String,
    /// Server capability flags.
    pub capabilities: ServerCapabilities,
    /// Server name/version.
    pub server_info: Implementation,
    /// Optional usage instructions from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A name/version pair identifying one side of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// Server capability flags from `initialize`.
///
/// Individual capability objects are kept as raw JSON; the debugging
/// client only tests for presence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Resource support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Prompt support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    /// Logging support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the tool's arguments.
    pub input_schema: serde_json::Value,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// The tools, in server order.
    pub tools: Vec<Tool>,
    /// Pagination cursor, when more pages exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks produced by the tool, kept as raw JSON.
    pub content: Vec<serde_json::Value>,
    /// True when the tool reports a domain-level failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A resource exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// The resources, in server order.
    pub resources: Vec<McpResource>,
    /// Pagination cursor, when more pages exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Content entries (text or blob), kept as raw JSON.
    pub contents: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// A prompt template exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arguments the prompt accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// One argument of a prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// The prompts, in server order.
    pub prompts: Vec<Prompt>,
    /// Pagination cursor, when more pages exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Description of the rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered messages, kept as raw JSON.
    pub messages: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Envelope serialization
    // -----------------------------------------------------------------------

    #[test]
    fn test_request_serializes_with_id_and_method() {
        let request = JsonRpcRequest::new("req-1", METHOD_TOOLS_LIST, None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["method"], "tools/list");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcNotification::new(METHOD_INITIALIZED, None);
        let json = serde_json::to_value(&notification).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_response_with_error_deserializes() {
        let raw = r#"{"jsonrpc":"2.0","id":"req-1","error":{"code":-32601,"message":"no such method"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32601);
    }

    // -----------------------------------------------------------------------
    // InboundMessage classification
    // -----------------------------------------------------------------------

    #[test]
    fn test_inbound_classifies_response() {
        let raw = r#"{"jsonrpc":"2.0","id":"req-1","result":{}}"#;
        assert!(matches!(
            InboundMessage::parse(raw),
            Some(InboundMessage::Response(_))
        ));
    }

    #[test]
    fn test_inbound_classifies_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#;
        assert!(matches!(
            InboundMessage::parse(raw),
            Some(InboundMessage::Notification(_))
        ));
    }

    #[test]
    fn test_inbound_rejects_garbage() {
        assert!(InboundMessage::parse("not json").is_none());
        assert!(InboundMessage::parse(r#"{"jsonrpc":"2.0"}"#).is_none());
    }

    #[test]
    fn test_inbound_server_request_with_id_is_not_a_response() {
        // A server-initiated request has an id and a method but no
        // result/error; it must not be misrouted as a response.
        let raw = r#"{"jsonrpc":"2.0","id":7,"method":"roots/list"}"#;
        assert!(matches!(
            InboundMessage::parse(raw),
            Some(InboundMessage::Notification(_))
        ));
    }

    // -----------------------------------------------------------------------
    // MCP payloads
    // -----------------------------------------------------------------------

    #[test]
    fn test_tool_deserializes_camel_case_schema() {
        let raw = r#"{"name":"echo","description":"Echo","inputSchema":{"type":"object"}}"#;
        let tool: Tool = serde_json::from_str(raw).unwrap();
        assert_eq!(tool.name, "echo");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_initialize_result_deserializes() {
        let raw = r#"{
            "protocolVersion": "2025-11-25",
            "capabilities": { "tools": {}, "prompts": {} },
            "serverInfo": { "name": "demo", "version": "1.0.0" }
        }"#;
        let result: InitializeResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert!(result.capabilities.tools.is_some());
        assert!(result.capabilities.resources.is_none());
        assert_eq!(result.server_info.name, "demo");
    }

    #[test]
    fn test_list_tools_result_with_cursor() {
        let raw = r#"{"tools":[],"nextCursor":"page-2"}"#;
        let result: ListToolsResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.next_cursor.as_deref(), Some("page-2"));
    }
}
