//! Integration tests for the bridge and the multi-server manager.

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{handshake_response, tool, MockServerTransport};
use toolgate_protocol::{methods, RpcResponse};
use toolgate_remote::{ConnectionState, ManagerError, RemoteClient, ServerManager, ToolBridge};
use toolgate_tools::{ToolContext, ToolRegistry};

/// A peer that lists `tools` and answers tools/call by echoing the called
/// name.
fn echoing_peer(tools: Vec<toolgate_protocol::ToolDescriptor>) -> Arc<MockServerTransport> {
    Arc::new(MockServerTransport::new(Box::new(move |request| {
        if request.method == methods::TOOLS_CALL {
            let name = request.params.as_ref().unwrap()["name"]
                .as_str()
                .unwrap_or("")
                .to_string();
            return Some(RpcResponse::success(
                request.id.clone(),
                json!({
                    "content": [{"type": "text", "text": format!("called {}", name)}],
                    "isError": false
                }),
            ));
        }
        handshake_response(request, &tools)
    })))
}

async fn connected_client(name: &str, transport: Arc<MockServerTransport>) -> Arc<RemoteClient> {
    let client = Arc::new(RemoteClient::with_transport(name, transport));
    client.connect(&CancellationToken::new()).await.unwrap();
    client
}

#[tokio::test]
async fn test_bridge_registers_prefixed_tools_and_routes_originals() {
    let client = connected_client(
        "test-server",
        echoing_peer(vec![tool("tool1"), tool("tool2")]),
    )
    .await;

    let registry = Arc::new(ToolRegistry::new());
    let bridge = ToolBridge::new(Arc::clone(&registry));
    let added = bridge.register(Arc::clone(&client)).unwrap();
    assert_eq!(added.len(), 2);
    assert!(registry.get("test-server_tool1").is_some());
    assert!(registry.get("test-server_tool2").is_some());

    // Executing through the registry sends the ORIGINAL name on the wire.
    let result = registry
        .execute("test-server_tool1", json!({}), &ToolContext::default())
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content, "called tool1");

    bridge.unregister("test-server");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_bridge_rollback_on_conflict() {
    let client = connected_client("srv", echoing_peer(vec![tool("a"), tool("b")])).await;

    let registry = Arc::new(ToolRegistry::new());
    // Pre-register a colliding name so the second adapter registration
    // fails.
    let colliding = connected_client("srv", echoing_peer(vec![tool("b")])).await;
    let bridge = ToolBridge::new(Arc::clone(&registry));
    bridge.register(Arc::clone(&colliding)).unwrap();
    assert!(registry.get("srv_b").is_some());

    let err = bridge.register(Arc::clone(&client)).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("srv_b"), "unexpected error: {}", message);
    // Rollback removed the half-registered 'srv_a'.
    assert!(registry.get("srv_a").is_none());
    assert!(registry.get("srv_b").is_some());
}

#[tokio::test]
async fn test_bridge_refresh_swaps_tool_set() {
    let registry = Arc::new(ToolRegistry::new());
    let bridge = ToolBridge::new(Arc::clone(&registry));

    let before = connected_client("srv", echoing_peer(vec![tool("old")])).await;
    bridge.register(Arc::clone(&before)).unwrap();
    assert!(registry.get("srv_old").is_some());

    let after = connected_client("srv", echoing_peer(vec![tool("new")])).await;
    bridge.refresh(after).unwrap();
    assert!(registry.get("srv_old").is_none());
    assert!(registry.get("srv_new").is_some());
}

#[tokio::test]
async fn test_manager_prefixed_aggregation_and_dispatch() {
    let manager = ServerManager::new();
    let files = connected_client("files", echoing_peer(vec![tool("read")])).await;
    let search = connected_client("search", echoing_peer(vec![tool("query")])).await;
    manager.add_client(Arc::clone(&files)).unwrap();
    manager.add_client(Arc::clone(&search)).unwrap();

    let mut names: Vec<String> = manager
        .get_all_tools()
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["files_read", "search_query"]);

    let cancel = CancellationToken::new();
    let result = manager
        .call_tool(&cancel, "files_read", json!({"path": "x"}))
        .await
        .unwrap();
    assert_eq!(result.content[0].text.as_deref(), Some("called read"));

    let err = manager
        .call_tool(&cancel, "nounderscore", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidToolName(_)));
}

#[tokio::test]
async fn test_manager_excludes_disconnected_clients() {
    let manager = ServerManager::new();
    let files = connected_client("files", echoing_peer(vec![tool("read")])).await;
    manager.add_client(Arc::clone(&files)).unwrap();
    assert_eq!(manager.get_all_tools().len(), 1);

    manager.disconnect("files").await.unwrap();
    assert_eq!(files.state(), ConnectionState::Disconnected);
    assert!(manager.get_all_tools().is_empty());

    let statuses = manager.list_servers();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].name, "files");
    assert_eq!(statuses[0].state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_manager_start_tolerates_partial_failure() {
    let manager = ServerManager::new();

    // One healthy peer and one that refuses the handshake.
    let healthy = Arc::new(RemoteClient::with_transport(
        "good",
        echoing_peer(vec![tool("read")]),
    ));
    let broken_transport = Arc::new(MockServerTransport::new(Box::new(|request| {
        Some(RpcResponse::error(
            Some(request.id.clone()),
            toolgate_protocol::error_codes::INTERNAL_ERROR,
            "refusing",
        ))
    })));
    let broken = Arc::new(RemoteClient::with_transport("bad", broken_transport));

    manager.add_client(healthy).unwrap();
    manager.add_client(broken).unwrap();

    let cancel = CancellationToken::new();
    manager.start(&cancel).await.unwrap();

    let connected: Vec<String> = manager
        .list_servers()
        .into_iter()
        .filter(|s| s.state == ConnectionState::Connected)
        .map(|s| s.name)
        .collect();
    assert_eq!(connected, vec!["good"]);
}

#[tokio::test]
async fn test_manager_start_fails_when_every_connection_fails() {
    let manager = ServerManager::new();
    let broken_transport = Arc::new(MockServerTransport::new(Box::new(|request| {
        Some(RpcResponse::error(
            Some(request.id.clone()),
            toolgate_protocol::error_codes::INTERNAL_ERROR,
            "refusing",
        ))
    })));
    let broken = Arc::new(RemoteClient::with_transport("bad", broken_transport));
    manager.add_client(broken).unwrap();

    let cancel = CancellationToken::new();
    let err = manager.start(&cancel).await.unwrap_err();
    assert!(matches!(err, ManagerError::AllConnectionsFailed(_)));
}
