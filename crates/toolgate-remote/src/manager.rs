//! Lifecycle manager for a fleet of remote clients.
//!
//! Tools from a client named `S` are advertised as `S_<tool>`; the split is
//! at the first `_`, so server names must not contain underscores (config
//! validation enforces this).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use toolgate_config::{ServerConfig, TransportKind};
use toolgate_protocol::{CallToolResult, ToolDescriptor};

use crate::client::{ClientConfig, ClientError, ConnectionState, RemoteClient};

/// Errors surfaced by the manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid tool name format: {0}")]
    InvalidToolName(String),
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("server already registered: {0}")]
    DuplicateServer(String),
    #[error("all connections failed: {0}")]
    AllConnectionsFailed(String),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One row of [`ServerManager::list_servers`].
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub name: String,
    pub state: ConnectionState,
    pub transport_kind: TransportKind,
    pub tool_count: usize,
    pub prompt_count: usize,
    pub last_error: Option<String>,
}

/// Owns the name-to-client map.
#[derive(Default)]
pub struct ServerManager {
    clients: RwLock<HashMap<String, Arc<RemoteClient>>>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RemoteClient>>> {
        self.clients.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a server definition. Names must be present, unique, and
    /// free of `_`.
    pub fn add_server(&self, config: &ServerConfig) -> Result<Arc<RemoteClient>, ManagerError> {
        if config.name.is_empty() {
            return Err(ManagerError::InvalidServerName(
                "server name is required".to_string(),
            ));
        }
        if config.name.contains('_') {
            return Err(ManagerError::InvalidServerName(format!(
                "'{}' must not contain '_'",
                config.name
            )));
        }
        let client = Arc::new(RemoteClient::new(ClientConfig::from(config)));
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if clients.contains_key(&config.name) {
            return Err(ManagerError::DuplicateServer(config.name.clone()));
        }
        clients.insert(config.name.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Registers an already constructed client (e.g. one with a custom
    /// transport). Same naming rules as [`Self::add_server`].
    pub fn add_client(&self, client: Arc<RemoteClient>) -> Result<(), ManagerError> {
        let name = client.name().to_string();
        if name.is_empty() {
            return Err(ManagerError::InvalidServerName(
                "server name is required".to_string(),
            ));
        }
        if name.contains('_') {
            return Err(ManagerError::InvalidServerName(format!(
                "'{}' must not contain '_'",
                name
            )));
        }
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if clients.contains_key(&name) {
            return Err(ManagerError::DuplicateServer(name));
        }
        clients.insert(name, client);
        Ok(())
    }

    /// Connects every registered client in parallel.
    ///
    /// Individual failures are logged and tolerated; the call errors only
    /// when every connection failed.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let clients: Vec<Arc<RemoteClient>> = self.read().values().cloned().collect();
        if clients.is_empty() {
            return Ok(());
        }

        let attempts = clients.iter().map(|client| {
            let client = Arc::clone(client);
            let cancel = cancel.clone();
            async move {
                let result = client.connect(&cancel).await;
                (client.name().to_string(), result)
            }
        });

        let mut failures = Vec::new();
        let mut connected = 0usize;
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    info!(server = %name, "connected");
                    connected += 1;
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "connection failed");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if connected == 0 {
            return Err(ManagerError::AllConnectionsFailed(failures.join("; ")));
        }
        Ok(())
    }

    /// Connects one server by name.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<(), ManagerError> {
        let client = self
            .get_client(name)
            .ok_or_else(|| ManagerError::UnknownServer(name.to_string()))?;
        client.connect(cancel).await.map_err(Into::into)
    }

    /// Disconnects one server by name, keeping it registered.
    pub async fn disconnect(&self, name: &str) -> Result<(), ManagerError> {
        let client = self
            .get_client(name)
            .ok_or_else(|| ManagerError::UnknownServer(name.to_string()))?;
        client.close().await;
        Ok(())
    }

    /// Removes a server from the live set, closing its connection.
    pub async fn remove(&self, name: &str) -> Result<(), ManagerError> {
        let client = {
            self.clients
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(name)
                .ok_or_else(|| ManagerError::UnknownServer(name.to_string()))?
        };
        client.close().await;
        Ok(())
    }

    pub fn get_client(&self, name: &str) -> Option<Arc<RemoteClient>> {
        self.read().get(name).cloned()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Status snapshot of every registered server.
    pub fn list_servers(&self) -> Vec<ServerStatus> {
        self.read()
            .values()
            .map(|client| ServerStatus {
                name: client.name().to_string(),
                state: client.state(),
                transport_kind: client.transport_kind(),
                tool_count: client.cached_tools().len(),
                prompt_count: client.cached_prompts().len(),
                last_error: client.last_error(),
            })
            .collect()
    }

    /// Splits a prefixed tool name at the first `_` into server and tool.
    ///
    /// `S_my_tool` resolves to server `S` and tool `my_tool`; names without
    /// an underscore (or with an empty half) are invalid.
    pub fn split_tool_name(prefixed: &str) -> Result<(&str, &str), ManagerError> {
        match prefixed.split_once('_') {
            Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
            _ => Err(ManagerError::InvalidToolName(prefixed.to_string())),
        }
    }

    /// Aggregates the tools of every connected client, rewriting each name
    /// to its prefixed form.
    pub fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        let clients: Vec<Arc<RemoteClient>> = self.read().values().cloned().collect();
        let mut tools = Vec::new();
        for client in clients {
            if client.state() != ConnectionState::Connected {
                continue;
            }
            for mut tool in client.cached_tools() {
                tool.name = format!("{}_{}", client.name(), tool.name);
                tools.push(tool);
            }
        }
        tools
    }

    /// Dispatches a prefixed tool call to the owning client.
    pub async fn call_tool(
        &self,
        cancel: &CancellationToken,
        prefixed_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ManagerError> {
        let (server, tool) = Self::split_tool_name(prefixed_name)?;
        let client = self
            .get_client(server)
            .ok_or_else(|| ManagerError::UnknownServer(server.to_string()))?;
        client
            .call_tool(cancel, tool, arguments)
            .await
            .map_err(Into::into)
    }

    /// Closes every client. The set stays registered for a later `start`.
    pub async fn close_all(&self) {
        let clients: Vec<Arc<RemoteClient>> = self.read().values().cloned().collect();
        for client in clients {
            client.close().await;
        }
    }
}
