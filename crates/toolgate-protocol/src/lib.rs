//! # toolgate-protocol
//!
//! JSON-RPC 2.0 wire messages for the remote tool protocol.
//!
//! This crate defines the message model shared by the remote client and
//! server: requests, notifications, responses, error objects, and the typed
//! payloads for the protocol methods (`initialize`, `tools/list`,
//! `tools/call`, `prompts/list`, `prompts/get`, `ping`).
//!
//! Messages are plain JSON objects carrying `"jsonrpc": "2.0"`. The role of
//! a message is determined purely by which fields are present:
//!
//! - a `method` together with an `id` is a [`RpcRequest`],
//! - a `method` without an `id` is a [`RpcNotification`],
//! - an `id` with exactly one of `result` / `error` is a [`RpcResponse`].

pub mod message;
pub mod types;

pub use message::{
    error_codes, next_request_id, parse_message, JsonRpcMessage, ProtocolError, RequestId,
    RpcError, RpcNotification, RpcRequest, RpcResponse,
};
pub use types::{
    methods, CallToolParams, CallToolResult, ClientInfo, ContentItem, GetPromptParams,
    InitializeParams, InitializeResult, ListPromptsResult, ListToolsResult, PromptDescriptor,
    ServerCapabilities, ServerInfo, ToolCapabilities, ToolDescriptor, PROTOCOL_VERSION,
};
