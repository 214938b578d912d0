//! Remote tool protocol server: exposes a local registry over one
//! transport.
//!
//! The server runs a single message loop: receive, parse, dispatch, and for
//! requests marshal the response back out. Notifications produce no
//! response; unparseable input is answered with a parse-error response
//! carrying a null id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use toolgate_protocol::{
    error_codes, methods, parse_message, CallToolParams, CallToolResult, ContentItem,
    InitializeParams, InitializeResult, JsonRpcMessage, ProtocolError, RpcNotification,
    RpcRequest, RpcResponse, ServerCapabilities, ServerInfo, ToolCapabilities, ToolDescriptor,
    PROTOCOL_VERSION,
};
use toolgate_tools::{ToolContext, ToolError, ToolRegistry};
use toolgate_transport::{Transport, TransportError};

/// Errors terminating the server loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A remote tool protocol server over one transport.
pub struct RemoteServer {
    transport: Arc<dyn Transport>,
    registry: Arc<ToolRegistry>,
    server_info: ServerInfo,
    /// When set, tools are exposed as `<prefix>_<name>` and incoming call
    /// names are stripped of the prefix before lookup.
    name_prefix: Option<String>,
    exec_ctx: ToolContext,
    initialized: AtomicBool,
    ctx: CancellationToken,
}

impl RemoteServer {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            transport,
            registry,
            server_info: ServerInfo {
                name: "toolgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            name_prefix: None,
            exec_ctx: ToolContext::new("remote", "remote"),
            initialized: AtomicBool::new(false),
            ctx: CancellationToken::new(),
        }
    }

    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.server_info = info;
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn with_exec_context(mut self, ctx: ToolContext) -> Self {
        self.exec_ctx = ctx;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Runs the message loop until the transport closes or the server is
    /// shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        loop {
            let bytes = match self.transport.receive(&self.ctx).await {
                Ok(bytes) => bytes,
                Err(TransportError::Cancelled) | Err(TransportError::Closed) => break,
                Err(e) => {
                    warn!(error = %e, "server receive failed");
                    break;
                }
            };
            if let Some(response) = self.handle_bytes(&bytes).await {
                let out = match JsonRpcMessage::Response(response).to_bytes() {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize response");
                        continue;
                    }
                };
                match self.transport.send(&self.ctx, &out).await {
                    Ok(()) => {}
                    Err(TransportError::Cancelled) | Err(TransportError::Closed) => break,
                    Err(e) => warn!(error = %e, "failed to send response"),
                }
            }
        }
        Ok(())
    }

    /// Stops the loop and closes the transport. Idempotent.
    pub async fn close(&self) {
        self.ctx.cancel();
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
    }

    async fn handle_bytes(&self, bytes: &[u8]) -> Option<RpcResponse> {
        match parse_message(bytes) {
            Ok(JsonRpcMessage::Request(request)) => Some(self.dispatch(request).await),
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(notification);
                None
            }
            Ok(JsonRpcMessage::Response(_)) => {
                debug!("ignoring unexpected response message");
                None
            }
            Err(ProtocolError::Parse(message)) => Some(RpcResponse::error(
                None,
                error_codes::PARSE_ERROR,
                message,
            )),
            Err(ProtocolError::Invalid(message)) => Some(RpcResponse::error(
                None,
                error_codes::INVALID_REQUEST,
                message,
            )),
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();

        if request.method != methods::INITIALIZE && !self.is_initialized() {
            return RpcResponse::error(
                Some(id),
                error_codes::SERVER_NOT_INITIALIZED,
                "server not initialized",
            );
        }

        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request),
            methods::TOOLS_LIST => RpcResponse::success(id, self.handle_tools_list()),
            methods::TOOLS_CALL => self.handle_tools_call(request).await,
            methods::PING => RpcResponse::success(id, json!({})),
            other => RpcResponse::error(
                Some(id),
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            ),
        }
    }

    fn handle_initialize(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let params: InitializeParams = match request
            .params
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                return RpcResponse::error(
                    Some(id),
                    error_codes::INVALID_PARAMS,
                    "invalid initialize params",
                )
            }
        };

        if params.protocol_version != PROTOCOL_VERSION {
            return RpcResponse::error(
                Some(id),
                error_codes::INVALID_PARAMS,
                format!(
                    "unsupported protocol version '{}' (supported: {})",
                    params.protocol_version, PROTOCOL_VERSION
                ),
            );
        }

        self.initialized.store(true, Ordering::SeqCst);
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            server_info: self.server_info.clone(),
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities {
                    list_changed: false,
                }),
            },
        };
        RpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }

    fn handle_tools_list(&self) -> Value {
        let tools: Vec<ToolDescriptor> = self
            .registry
            .list()
            .into_iter()
            .filter_map(|name| self.registry.get(&name))
            .map(|tool| {
                let mut schema = tool.parameters_schema();
                if let Some(obj) = schema.as_object_mut() {
                    obj.entry("type").or_insert_with(|| json!("object"));
                } else {
                    schema = json!({"type": "object"});
                }
                ToolDescriptor {
                    name: self.exposed_name(tool.name()),
                    description: tool.description().to_string(),
                    input_schema: schema,
                }
            })
            .collect();
        json!({ "tools": tools })
    }

    fn exposed_name(&self, name: &str) -> String {
        match &self.name_prefix {
            Some(prefix) => format!("{}_{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn local_name<'a>(&self, name: &'a str) -> &'a str {
        match &self.name_prefix {
            Some(prefix) => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .unwrap_or(name),
            None => name,
        }
    }

    async fn handle_tools_call(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let params: CallToolParams = match request.params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => {
                return RpcResponse::error(
                    Some(id),
                    error_codes::INVALID_PARAMS,
                    "invalid tools/call params",
                )
            }
        };
        if params.name.is_empty() {
            return RpcResponse::error(
                Some(id),
                error_codes::INVALID_PARAMS,
                "tool name must not be empty",
            );
        }

        let name = self.local_name(&params.name).to_string();
        let arguments = params.arguments.unwrap_or_else(|| json!({}));

        match self.registry.execute(&name, arguments, &self.exec_ctx).await {
            Ok(result) => {
                let wire = CallToolResult {
                    content: vec![ContentItem::text(result.content)],
                    is_error: result.is_error,
                };
                RpcResponse::success(id, serde_json::to_value(wire).unwrap_or_default())
            }
            Err(ToolError::NotFound(name)) => RpcResponse::error(
                Some(id),
                error_codes::TOOL_NOT_FOUND,
                format!("tool not found: {}", name),
            ),
            Err(ToolError::InvalidArgs(message)) => {
                RpcResponse::error(Some(id), error_codes::INVALID_PARAMS, message)
            }
            Err(e) => RpcResponse::error(
                Some(id),
                error_codes::TOOL_EXECUTION_FAILED,
                e.to_string(),
            ),
        }
    }

    fn handle_notification(&self, notification: RpcNotification) {
        match notification.method.as_str() {
            // Accepted without side effects.
            methods::INITIALIZED | methods::CANCELLED => {}
            other => debug!(method = %other, "dropping unknown notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use toolgate_protocol::RequestId;
    use toolgate_tools::builtins::EchoTool;

    struct NullTransport;

    #[async_trait::async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _: &CancellationToken, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&self, _: &CancellationToken) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Closed)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn server() -> RemoteServer {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(EchoTool)).unwrap();
        RemoteServer::new(Arc::new(NullTransport), registry)
    }

    fn initialize_request(version: &str) -> RpcRequest {
        RpcRequest::with_id(
            RequestId::Number(1),
            methods::INITIALIZE,
            Some(json!({
                "protocolVersion": version,
                "clientInfo": {"name": "test", "version": "0"},
                "capabilities": {}
            })),
        )
    }

    async fn initialized_server() -> RemoteServer {
        let server = server();
        let response = server.dispatch(initialize_request(PROTOCOL_VERSION)).await;
        assert!(response.error.is_none());
        server
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let server = server();
        let response = server.dispatch(initialize_request(PROTOCOL_VERSION)).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert!(server.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_rejects_wrong_version() {
        let server = server();
        let response = server.dispatch(initialize_request("1999-01-01")).await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
        assert!(!server.is_initialized());
    }

    #[tokio::test]
    async fn test_methods_gated_before_initialize() {
        let server = server();
        for method in [methods::TOOLS_LIST, methods::TOOLS_CALL, methods::PING] {
            let request = RpcRequest::with_id(RequestId::Number(2), method, Some(json!({})));
            let response = server.dispatch(request).await;
            assert_eq!(
                response.error.unwrap().code,
                error_codes::SERVER_NOT_INITIALIZED
            );
        }
    }

    #[tokio::test]
    async fn test_tools_list_ensures_object_schema() {
        let server = initialized_server().await;
        let request = RpcRequest::with_id(RequestId::Number(3), methods::TOOLS_LIST, None);
        let response = server.dispatch(request).await;
        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_tools_list_applies_prefix() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(EchoTool)).unwrap();
        let server = RemoteServer::new(Arc::new(NullTransport), registry)
            .with_name_prefix("util");
        server.dispatch(initialize_request(PROTOCOL_VERSION)).await;

        let request = RpcRequest::with_id(RequestId::Number(3), methods::TOOLS_LIST, None);
        let response = server.dispatch(request).await;
        assert_eq!(response.result.unwrap()["tools"][0]["name"], "util_echo");

        // Calls arrive under the exposed name and are stripped for lookup.
        let call = RpcRequest::with_id(
            RequestId::Number(4),
            methods::TOOLS_CALL,
            Some(json!({"name": "util_echo", "arguments": {"text": "hi"}})),
        );
        let response = server.dispatch(call).await;
        assert_eq!(
            response.result.unwrap()["content"][0]["text"],
            "hi"
        );
    }

    #[tokio::test]
    async fn test_tools_call_success() {
        let server = initialized_server().await;
        let request = RpcRequest::with_id(
            RequestId::Number(4),
            methods::TOOLS_CALL,
            Some(json!({"name": "echo", "arguments": {"text": "hello"}})),
        );
        let response = server.dispatch(request).await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_tools_call_empty_name() {
        let server = initialized_server().await;
        let request = RpcRequest::with_id(
            RequestId::Number(5),
            methods::TOOLS_CALL,
            Some(json!({"name": "", "arguments": {}})),
        );
        let response = server.dispatch(request).await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool() {
        let server = initialized_server().await;
        let request = RpcRequest::with_id(
            RequestId::Number(6),
            methods::TOOLS_CALL,
            Some(json!({"name": "ghost", "arguments": {}})),
        );
        let response = server.dispatch(request).await;
        assert_eq!(response.error.unwrap().code, error_codes::TOOL_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = initialized_server().await;
        let request = RpcRequest::with_id(RequestId::Number(7), "nope/nothing", None);
        let response = server.dispatch(request).await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ping() {
        let server = initialized_server().await;
        let request = RpcRequest::with_id(RequestId::Number(8), methods::PING, None);
        let response = server.dispatch(request).await;
        assert_eq!(response.result.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_parse_error_gets_null_id_response() {
        let server = server();
        let response = server.handle_bytes(b"{garbage").await.unwrap();
        assert!(response.id.is_none());
        assert_eq!(response.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_notifications_produce_no_response() {
        let server = initialized_server().await;
        let bytes =
            br#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{}}"#;
        assert!(server.handle_bytes(bytes).await.is_none());
        let bytes = br#"{"jsonrpc":"2.0","method":"notifications/unknown"}"#;
        assert!(server.handle_bytes(bytes).await.is_none());
    }
}
