//! Typed payloads for the remote tool protocol methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version literal exchanged during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names of the remote tool protocol.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const PING: &str = "ping";
    pub const CANCELLED: &str = "notifications/cancelled";
}

/// Identity of the connecting client, sent in `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Identity of the serving peer, returned from `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
    #[serde(default)]
    pub capabilities: Value,
}

/// Tool-related capability flags advertised by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolCapabilities {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

/// Descriptor of one remotely hosted tool, as listed by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// One content item inside a tool-call result.
///
/// Known kinds are `text`, `image`, and `resource`; unknown kinds are
/// carried through untouched so newer peers do not break older consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl ContentItem {
    pub const TEXT: &'static str = "text";
    pub const IMAGE: &'static str = "image";
    pub const RESOURCE: &'static str = "resource";

    /// A plain text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Self::TEXT.to_string(),
            text: Some(text.into()),
            data: None,
            mime_type: None,
            uri: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// A single-text success result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
        }
    }

    /// A single-text error result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListPromptsResult {
    pub prompts: Vec<PromptDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_params_wire_names() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: ClientInfo {
                name: "toolgate".to_string(),
                version: "0.1.0".to_string(),
            },
            capabilities: json!({}),
        };
        let v = serde_json::to_value(&params).unwrap();
        assert_eq!(v["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(v["clientInfo"]["name"], "toolgate");
    }

    #[test]
    fn test_tool_descriptor_input_schema_rename() {
        let raw = json!({
            "name": "echo",
            "description": "Echo text back",
            "inputSchema": {"type": "object", "properties": {}}
        });
        let desc: ToolDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(desc.name, "echo");
        assert_eq!(desc.input_schema["type"], "object");
    }

    #[test]
    fn test_call_result_is_error_defaults_false() {
        let raw = json!({"content": [{"type": "text", "text": "ok"}]});
        let result: CallToolResult = serde_json::from_value(raw).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].text.as_deref(), Some("ok"));
    }

    #[test]
    fn test_content_item_roundtrip_unknown_kind() {
        let raw = json!({"type": "audio", "data": "AAAA", "mimeType": "audio/wav"});
        let item: ContentItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.kind, "audio");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn test_server_capabilities_list_changed() {
        let caps = ServerCapabilities {
            tools: Some(ToolCapabilities {
                list_changed: false,
            }),
        };
        let v = serde_json::to_value(&caps).unwrap();
        assert_eq!(v["tools"]["listChanged"], false);
    }
}
