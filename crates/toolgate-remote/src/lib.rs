//! # toolgate-remote
//!
//! The remote half of the tool-execution control plane: a JSON-RPC client
//! for tool-providing servers, a server exposing a local registry over the
//! same wire protocol, a manager for a fleet of clients with prefixed tool
//! naming, and the bridge that projects remote tools into a local
//! [`ToolRegistry`](toolgate_tools::ToolRegistry).

pub mod bridge;
pub mod client;
pub mod manager;
pub mod reconnect;
pub mod server;

pub use bridge::{BridgeError, ToolBridge};
pub use client::{ClientConfig, ClientError, ConnectionState, RemoteClient};
pub use manager::{ManagerError, ServerManager, ServerStatus};
pub use reconnect::{ReconnectHooks, ReconnectPolicy};
pub use server::RemoteServer;
