//! Remote tool protocol client.
//!
//! One [`RemoteClient`] owns one connection: it performs the handshake,
//! caches server metadata and the tool/prompt lists, and correlates
//! outbound requests with inbound responses through a pending table of
//! single-slot completion channels keyed by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use toolgate_config::{ServerConfig, TransportKind};
use toolgate_protocol::{
    methods, next_request_id, parse_message, CallToolParams, CallToolResult, ClientInfo,
    GetPromptParams, InitializeParams, InitializeResult, JsonRpcMessage, ListPromptsResult,
    ListToolsResult, PromptDescriptor, ProtocolError, RequestId, RpcError, RpcNotification,
    RpcRequest, ServerInfo, ToolDescriptor, PROTOCOL_VERSION,
};
use toolgate_transport::{
    ClientTransport, HttpSseClientTransport, PlainHttpTransport, StdioClientTransport,
    StdioCommand, TransportError,
};

use crate::reconnect::{is_connection_error, ReconnectHooks, ReconnectPolicy};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by the remote client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client not connected")]
    NotConnected,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("rpc error {0}")]
    Rpc(RpcError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("reconnect failed: {0}")]
    ReconnectFailed(String),
    #[error("{0}")]
    Other(String),
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Connection settings for one remote server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub transport: TransportKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub url: Option<String>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&ServerConfig> for ClientConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            transport: config.transport,
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            url: config.url.clone(),
            request_timeout: config
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Default)]
struct ClientState {
    state: Option<ConnectionState>,
    last_error: Option<String>,
    server_info: Option<ServerInfo>,
    tools: Vec<ToolDescriptor>,
    prompts: Vec<PromptDescriptor>,
}

type PendingTable = Arc<Mutex<HashMap<RequestId, oneshot::Sender<toolgate_protocol::RpcResponse>>>>;

struct Connection {
    transport: Arc<dyn ClientTransport>,
    token: CancellationToken,
    receive_task: JoinHandle<()>,
}

/// A client for one remote tool server.
pub struct RemoteClient {
    config: ClientConfig,
    /// Transport supplied at construction; used for every (re)connect.
    /// When absent, a fresh transport is built from the config per connect.
    fixed_transport: Option<Arc<dyn ClientTransport>>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    state: Mutex<ClientState>,
    pending: PendingTable,
    reconnect_enabled: AtomicBool,
    hooks: Mutex<Option<Arc<dyn ReconnectHooks>>>,
}

impl RemoteClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            fixed_transport: None,
            connection: tokio::sync::Mutex::new(None),
            state: Mutex::new(ClientState::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reconnect_enabled: AtomicBool::new(true),
            hooks: Mutex::new(None),
        }
    }

    /// A client bound to an externally supplied transport. Mainly used by
    /// tests and embedders with custom pipes.
    pub fn with_transport(name: impl Into<String>, transport: Arc<dyn ClientTransport>) -> Self {
        let mut client = Self::new(ClientConfig::new(name));
        client.fixed_transport = Some(transport);
        client
    }

    /// Overrides the per-request timeout. Only meaningful before `connect`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Overrides the reconnect backoff policy. Only meaningful before
    /// `connect`.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.config.transport
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_state().state.unwrap_or(ConnectionState::Disconnected)
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.lock_state().server_info.clone()
    }

    /// Tool list cached at connect (or the last explicit `list_tools`).
    pub fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.lock_state().tools.clone()
    }

    pub fn cached_prompts(&self) -> Vec<PromptDescriptor> {
        self.lock_state().prompts.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        self.lock_state().state = Some(state);
    }

    fn set_error(&self, message: impl Into<String>) {
        let mut guard = self.lock_state();
        guard.state = Some(ConnectionState::Error);
        guard.last_error = Some(message.into());
    }

    fn build_transport(&self) -> Result<Arc<dyn ClientTransport>, ClientError> {
        if let Some(fixed) = &self.fixed_transport {
            return Ok(Arc::clone(fixed));
        }
        match self.config.transport {
            TransportKind::Stdio => {
                let command = self.config.command.clone().ok_or_else(|| {
                    ClientError::Other("stdio transport requires a command".to_string())
                })?;
                let mut cmd = StdioCommand::new(command)
                    .with_args(self.config.args.clone())
                    .with_env(self.config.env.clone());
                if let Some(dir) = &self.config.working_dir {
                    cmd = cmd.with_working_dir(dir);
                }
                Ok(Arc::new(StdioClientTransport::new(cmd)))
            }
            TransportKind::HttpSse => {
                let url = self.config.url.clone().ok_or_else(|| {
                    ClientError::Other("http+sse transport requires a url".to_string())
                })?;
                Ok(Arc::new(HttpSseClientTransport::new(url)))
            }
            TransportKind::Http => {
                let url = self.config.url.clone().ok_or_else(|| {
                    ClientError::Other("http transport requires a url".to_string())
                })?;
                Ok(Arc::new(PlainHttpTransport::new(url)))
            }
        }
    }

    /// Establishes the connection and performs the handshake.
    ///
    /// On success the server info and tool list are cached. Any failure
    /// closes the transport and leaves the client in the error state.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.teardown().await;
        self.set_state(ConnectionState::Connecting);

        let transport = match self.build_transport() {
            Ok(t) => t,
            Err(e) => {
                self.set_error(e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = transport.start().await {
            self.set_error(e.to_string());
            return Err(e.into());
        }

        let token = CancellationToken::new();
        let receive_task = self.spawn_receive_loop(Arc::clone(&transport), token.clone());
        *self.connection.lock().await = Some(Connection {
            transport,
            token,
            receive_task,
        });

        match self.handshake(cancel).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                self.set_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: ClientInfo {
                name: "toolgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: json!({}),
        };
        let result = self
            .call(cancel, methods::INITIALIZE, Some(serde_json::to_value(&params).unwrap_or_default()))
            .await?;
        // Any server version is accepted; newer versions are not rejected.
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Other(format!("invalid initialize result: {}", e)))?;
        self.lock_state().server_info = Some(init.server_info);

        self.notify(cancel, methods::INITIALIZED, None).await?;

        // The tool list is the point of the connection; failure is fatal.
        self.list_tools(cancel).await?;

        // Prompt support is optional.
        if let Err(e) = self.list_prompts(cancel).await {
            debug!(server = %self.config.name, error = %e, "prompts/list failed, continuing");
            self.lock_state().prompts.clear();
        }
        Ok(())
    }

    fn spawn_receive_loop(
        &self,
        transport: Arc<dyn ClientTransport>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let server = self.config.name.clone();
        tokio::spawn(async move {
            loop {
                let bytes = match transport.receive(&token).await {
                    Ok(bytes) => bytes,
                    Err(TransportError::Cancelled) => break,
                    Err(e) => {
                        debug!(server = %server, error = %e, "receive loop ending");
                        break;
                    }
                };
                match parse_message(&bytes) {
                    Ok(JsonRpcMessage::Response(response)) => {
                        let Some(id) = response.id.clone() else {
                            debug!(server = %server, "dropping response without id");
                            continue;
                        };
                        let slot = pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                        match slot {
                            // Best-effort: if the caller is gone the
                            // response is dropped.
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                debug!(server = %server, id = %id, "response for unknown request")
                            }
                        }
                    }
                    Ok(JsonRpcMessage::Notification(n)) => {
                        debug!(server = %server, method = %n.method, "ignoring notification");
                    }
                    Ok(JsonRpcMessage::Request(r)) => {
                        debug!(server = %server, method = %r.method, "ignoring server request");
                    }
                    Err(e) => {
                        warn!(server = %server, error = %e, "discarding unparseable message");
                    }
                }
            }
            // Wake every waiter still parked on this connection.
            pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
        })
    }

    /// Sends one request and waits for the correlated response.
    pub async fn call(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        let transport = {
            let connection = self.connection.lock().await;
            let connection = connection.as_ref().ok_or(ClientError::NotConnected)?;
            Arc::clone(&connection.transport)
        };

        let id = next_request_id();
        let request = RpcRequest::with_id(id.clone(), method, params);
        let bytes = JsonRpcMessage::Request(request).to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);

        if let Err(e) = transport.send(cancel, &bytes).await {
            self.remove_pending(&id);
            return Err(e.into());
        }

        let response = tokio::select! {
            response = rx => match response {
                Ok(response) => response,
                Err(_) => {
                    self.remove_pending(&id);
                    return Err(ClientError::ConnectionClosed);
                }
            },
            _ = tokio::time::sleep(self.config.request_timeout) => {
                self.remove_pending(&id);
                return Err(ClientError::Timeout(self.config.request_timeout));
            }
            _ = cancel.cancelled() => {
                self.remove_pending(&id);
                return Err(ClientError::Cancelled);
            }
        };

        match response.error {
            Some(error) => Err(ClientError::Rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    fn remove_pending(&self, id: &RequestId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Sends a notification; no response is expected.
    pub async fn notify(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        let transport = {
            let connection = self.connection.lock().await;
            let connection = connection.as_ref().ok_or(ClientError::NotConnected)?;
            Arc::clone(&connection.transport)
        };
        let bytes = JsonRpcMessage::Notification(RpcNotification::new(method, params)).to_bytes()?;
        transport.send(cancel, &bytes).await.map_err(Into::into)
    }

    /// Fetches and caches the server's tool list.
    pub async fn list_tools(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolDescriptor>, ClientError> {
        let result = self.call(cancel, methods::TOOLS_LIST, None).await?;
        let listed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Other(format!("invalid tools/list result: {}", e)))?;
        self.lock_state().tools = listed.tools.clone();
        Ok(listed.tools)
    }

    /// Invokes one remote tool by its server-local name.
    pub async fn call_tool(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ClientError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let result = self
            .call(
                cancel,
                methods::TOOLS_CALL,
                Some(serde_json::to_value(&params).unwrap_or_default()),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Other(format!("invalid tools/call result: {}", e)))
    }

    /// Fetches and caches the server's prompt list.
    pub async fn list_prompts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PromptDescriptor>, ClientError> {
        let result = self.call(cancel, methods::PROMPTS_LIST, None).await?;
        let listed: ListPromptsResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Other(format!("invalid prompts/list result: {}", e)))?;
        self.lock_state().prompts = listed.prompts.clone();
        Ok(listed.prompts)
    }

    pub async fn get_prompt(
        &self,
        cancel: &CancellationToken,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ClientError> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.call(
            cancel,
            methods::PROMPTS_GET,
            Some(serde_json::to_value(&params).unwrap_or_default()),
        )
        .await
    }

    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.call(cancel, methods::PING, None).await.map(|_| ())
    }

    /// Enables or disables automatic reconnection at runtime.
    pub fn set_reconnect_enabled(&self, enabled: bool) {
        self.reconnect_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_reconnect_hooks(&self, hooks: Arc<dyn ReconnectHooks>) {
        *self.hooks.lock().unwrap_or_else(|e| e.into_inner()) = Some(hooks);
    }

    fn hooks(&self) -> Option<Arc<dyn ReconnectHooks>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Runs the reconnect loop under the configured backoff policy.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let policy = self.config.reconnect.clone();
        let hooks = self.hooks();
        let mut attempt: u32 = 0;
        let mut last_error = "no attempts made".to_string();

        while policy.should_retry(attempt) {
            if let Some(hooks) = &hooks {
                hooks.on_reconnecting(attempt);
            }
            match self.connect(cancel).await {
                Ok(()) => {
                    if let Some(hooks) = &hooks {
                        hooks.on_reconnected();
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        server = %self.config.name,
                        attempt,
                        error = %last_error,
                        "reconnect attempt failed"
                    );
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(policy.next_delay(attempt as i32)) => {}
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            }
            attempt += 1;
        }

        if let Some(hooks) = &hooks {
            hooks.on_reconnect_failed(&last_error);
        }
        Err(ClientError::ReconnectFailed(last_error))
    }

    /// Calls, and on a connection-type failure reconnects once and retries.
    pub async fn call_with_reconnect(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        match self.call(cancel, method, params.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if self.reconnect_enabled.load(Ordering::SeqCst)
                && is_connection_error(&e.to_string()) =>
            {
                debug!(server = %self.config.name, error = %e, "connection error, reconnecting");
                self.reconnect(cancel).await?;
                self.call(cancel, method, params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn teardown(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.token.cancel();
            if let Err(e) = connection.transport.close().await {
                debug!(server = %self.config.name, error = %e, "transport close failed");
            }
            connection.receive_task.abort();
        }
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let mut state = self.lock_state();
        state.state = Some(ConnectionState::Disconnected);
    }

    /// Closes the connection and resets the state to disconnected.
    pub async fn close(&self) {
        self.teardown().await;
    }
}
