//! JSON-RPC 2.0 message framing: requests, notifications, responses, errors.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Standard and extension JSON-RPC 2.0 error codes.
pub mod error_codes {
    /// Parse error - invalid JSON
    pub const PARSE_ERROR: i64 = -32700;
    /// Invalid request - missing required fields or wrong version
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal server error
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Requested tool is not registered (protocol extension)
    pub const TOOL_NOT_FOUND: i64 = -32001;
    /// Tool execution failed (protocol extension)
    pub const TOOL_EXECUTION_FAILED: i64 = -32002;
    /// Request received before `initialize` completed (protocol extension)
    pub const SERVER_NOT_INITIALIZED: i64 = -32003;
}

// Process-wide allocator for outbound request ids. Starts at 1 so that id 0
// never appears on the wire.
static REQUEST_ID_COUNTER: AtomicI64 = AtomicI64::new(1);

/// Allocates the next outbound request id from the process-wide counter.
pub fn next_request_id() -> RequestId {
    RequestId::Number(REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Error type for wire-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The bytes were not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),
    /// The JSON was well-formed but is not a valid JSON-RPC 2.0 message.
    #[error("invalid message: {0}")]
    Invalid(String),
}

/// A request id: a 64-bit integer or a string.
///
/// Outbound ids are always integers allocated from a process-wide counter.
/// Inbound ids accept both integer and floating-point JSON numbers, coerced
/// into the integer space, since some peers serialize numeric ids as floats.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Number(n) => serializer.serialize_i64(*n),
            RequestId::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RequestId::from_value(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid request id: {}", value)))
    }
}

impl RequestId {
    /// Reads an id out of a JSON value, coercing float ids into integers.
    pub fn from_value(value: &Value) -> Option<RequestId> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(RequestId::Number(i))
                } else {
                    n.as_f64().map(|f| RequestId::Number(f as i64))
                }
            }
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 request: has both `method` and `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Creates a request with a freshly allocated id.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::with_id(next_request_id(), method, params)
    }

    pub fn with_id(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification: has `method` but no `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response: has `id` and exactly one of `result` / `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: String,
    /// `None` only for parse-error responses where the request id is unknown.
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Create a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError::new(code, message)),
        }
    }

    /// Create an error response carrying structured data.
    pub fn error_with_data(
        id: Option<RequestId>,
        code: i64,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError::new(code, message).with_data(data)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The three-way union of wire messages.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(RpcRequest),
    Notification(RpcNotification),
    Response(RpcResponse),
}

impl JsonRpcMessage {
    /// Serializes the message to its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let result = match self {
            JsonRpcMessage::Request(r) => serde_json::to_vec(r),
            JsonRpcMessage::Notification(n) => serde_json::to_vec(n),
            JsonRpcMessage::Response(r) => serde_json::to_vec(r),
        };
        result.map_err(|e| ProtocolError::Invalid(e.to_string()))
    }
}

impl From<RpcRequest> for JsonRpcMessage {
    fn from(r: RpcRequest) -> Self {
        JsonRpcMessage::Request(r)
    }
}

impl From<RpcNotification> for JsonRpcMessage {
    fn from(n: RpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

impl From<RpcResponse> for JsonRpcMessage {
    fn from(r: RpcResponse) -> Self {
        JsonRpcMessage::Response(r)
    }
}

/// Parses one wire message, classifying it by the fields present.
///
/// Fails with [`ProtocolError::Parse`] for non-JSON input and
/// [`ProtocolError::Invalid`] when the JSON is not a request, notification,
/// or response of the `"2.0"` dialect. Requests with non-structured `params`
/// (anything but an object or array) are rejected.
pub fn parse_message(bytes: &[u8]) -> Result<JsonRpcMessage, ProtocolError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Parse(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::Invalid("message is not a JSON object".to_string()))?;

    match obj.get("jsonrpc").and_then(|v| v.as_str()) {
        Some("2.0") => {}
        Some(other) => {
            return Err(ProtocolError::Invalid(format!(
                "unsupported jsonrpc version '{}'",
                other
            )))
        }
        None => {
            return Err(ProtocolError::Invalid(
                "missing 'jsonrpc' field".to_string(),
            ))
        }
    }

    let params = match obj.get("params") {
        None | Some(Value::Null) => None,
        Some(p) if p.is_object() || p.is_array() => Some(p.clone()),
        Some(_) => {
            return Err(ProtocolError::Invalid(
                "'params' must be an object or array".to_string(),
            ))
        }
    };

    // A literal `"id": null` appears on parse-error responses; it counts
    // as an id-bearing field with no usable value.
    let id_field = obj.get("id");
    let id = match id_field {
        Some(Value::Null) | None => None,
        Some(v) => Some(RequestId::from_value(v).ok_or_else(|| {
            ProtocolError::Invalid(format!("invalid request id: {}", v))
        })?),
    };
    let method = obj.get("method").and_then(|v| v.as_str());

    match (method, id) {
        (Some(method), Some(id)) => Ok(JsonRpcMessage::Request(RpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        })),
        (Some(method), None) => Ok(JsonRpcMessage::Notification(RpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        })),
        (None, id) if id_field.is_some() => {
            let result = obj.get("result").cloned();
            let error = match obj.get("error") {
                Some(e) => Some(
                    serde_json::from_value::<RpcError>(e.clone())
                        .map_err(|e| ProtocolError::Invalid(format!("invalid error object: {}", e)))?,
                ),
                None => None,
            };
            if result.is_some() == error.is_some() {
                return Err(ProtocolError::Invalid(
                    "response must carry exactly one of 'result' or 'error'".to_string(),
                ));
            }
            Ok(JsonRpcMessage::Response(RpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result,
                error,
            }))
        }
        _ => Err(ProtocolError::Invalid(
            "message is neither a request, notification, nor response".to_string(),
        )),
    }
}
