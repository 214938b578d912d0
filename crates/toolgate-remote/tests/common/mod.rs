//! Shared mock transport for integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use toolgate_protocol::{
    methods, parse_message, JsonRpcMessage, RpcRequest, RpcResponse, ToolDescriptor,
    PROTOCOL_VERSION,
};
use toolgate_transport::{ClientTransport, Transport, TransportError};

type Responder = Box<dyn Fn(&RpcRequest) -> Option<RpcResponse> + Send + Sync>;

/// A scripted in-memory peer.
///
/// Requests the responder answers are echoed straight back onto the
/// incoming queue; everything else is recorded and left for the test to
/// answer via [`MockServerTransport::inject`].
pub struct MockServerTransport {
    incoming_tx: mpsc::UnboundedSender<Vec<u8>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    requests: Mutex<Vec<RpcRequest>>,
    responder: Responder,
    started: AtomicBool,
    closed: AtomicBool,
}

impl MockServerTransport {
    pub fn new(responder: Responder) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            incoming_tx: tx,
            incoming: tokio::sync::Mutex::new(rx),
            requests: Mutex::new(Vec::new()),
            responder,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// A peer that answers the connect handshake and advertises `tools`.
    /// Any other request is left unanswered for the test to handle.
    pub fn with_tools(tools: Vec<ToolDescriptor>) -> Self {
        Self::new(Box::new(move |request| {
            handshake_response(request, &tools)
        }))
    }

    /// Requests observed so far, in send order.
    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Delivers one raw message to the client, as the peer would.
    pub fn inject(&self, response: RpcResponse) {
        let bytes = JsonRpcMessage::Response(response).to_bytes().unwrap();
        let _ = self.incoming_tx.send(bytes);
    }
}

/// Standard handshake answers shared by the scripted peers.
pub fn handshake_response(
    request: &RpcRequest,
    tools: &[ToolDescriptor],
) -> Option<RpcResponse> {
    let id = request.id.clone();
    match request.method.as_str() {
        methods::INITIALIZE => Some(RpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "mock", "version": "1.0"},
                "capabilities": {"tools": {"listChanged": false}}
            }),
        )),
        methods::TOOLS_LIST => Some(RpcResponse::success(id, json!({ "tools": tools }))),
        methods::PROMPTS_LIST => Some(RpcResponse::success(id, json!({"prompts": []}))),
        methods::PING => Some(RpcResponse::success(id, json!({}))),
        _ => None,
    }
}

#[async_trait]
impl Transport for MockServerTransport {
    async fn send(&self, _cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match parse_message(message) {
            Ok(JsonRpcMessage::Request(request)) => {
                self.requests.lock().unwrap().push(request.clone());
                if let Some(response) = (self.responder)(&request) {
                    self.inject(response);
                }
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Other(e.to_string())),
        }
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.incoming.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            message = rx.recv() => message.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ClientTransport for MockServerTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.started.store(true, Ordering::SeqCst);
        // Starting again models a reconnect: the peer is reachable anew.
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Descriptor helper.
pub fn tool(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: format!("{} tool", name),
        input_schema: json!({"type": "object", "properties": {}}),
    }
}
