//! Bridge projecting remote tools into a local registry.
//!
//! For every tool a connected client advertises, the bridge registers an
//! adapter under `<client>_<tool>`. Executing the adapter forwards to the
//! client with the original unprefixed name and translates the wire result
//! back into a [`ToolResult`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use toolgate_protocol::{CallToolResult, ContentItem};
use toolgate_tools::{Tool, ToolContext, ToolRegistry, ToolResult};

use crate::client::RemoteClient;

/// Errors of bridge registration.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to register '{name}': {message}")]
    Registration { name: String, message: String },
    #[error("invalid input schema for '{name}': {message}")]
    InvalidSchema { name: String, message: String },
}

/// A registry adapter for one remote tool.
pub struct RemoteToolAdapter {
    client: Arc<RemoteClient>,
    /// Name under which the tool is advertised locally.
    prefixed_name: String,
    /// Name sent on the wire.
    original_name: String,
    description: String,
    parameters: Value,
}

impl RemoteToolAdapter {
    fn new(
        client: Arc<RemoteClient>,
        original_name: String,
        description: String,
        input_schema: Value,
    ) -> Self {
        let prefixed_name = format!("{}_{}", client.name(), original_name);
        Self {
            client,
            prefixed_name,
            original_name,
            description,
            parameters: input_schema,
        }
    }
}

#[async_trait]
impl Tool for RemoteToolAdapter {
    fn name(&self) -> &str {
        &self.prefixed_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let cancel = CancellationToken::new();
        match self
            .client
            .call_tool(&cancel, &self.original_name, params)
            .await
        {
            Ok(result) => Ok(translate_result(result)),
            // Transport failures surface as error results rather than
            // bubbling out of the execution layer.
            Err(e) => Ok(ToolResult::error(format!(
                "remote call failed: {}",
                e
            ))),
        }
    }
}

/// Converts a wire result into a local [`ToolResult`].
fn translate_result(result: CallToolResult) -> ToolResult {
    if result.is_error {
        let message = result
            .content
            .iter()
            .find_map(|item| {
                (item.kind == ContentItem::TEXT).then(|| item.text.clone()).flatten()
            })
            .or_else(|| result.content.first().map(render_item))
            .unwrap_or_else(|| "remote tool reported an error".to_string());
        return ToolResult::error(message);
    }

    let text: Vec<String> = result
        .content
        .iter()
        .map(|item| match item.kind.as_str() {
            ContentItem::TEXT => item.text.clone().unwrap_or_default(),
            _ => render_item(item),
        })
        .collect();
    ToolResult::success(text.join("\n"))
}

/// Conventional rendering for non-text content.
fn render_item(item: &ContentItem) -> String {
    match item.kind.as_str() {
        ContentItem::IMAGE => format!(
            "[image: {}]",
            item.mime_type.as_deref().unwrap_or("unknown")
        ),
        ContentItem::RESOURCE => {
            format!("[resource: {}]", item.uri.as_deref().unwrap_or("unknown"))
        }
        _ => serde_json::to_string(item).unwrap_or_else(|_| "[unrenderable content]".to_string()),
    }
}

/// Registers remote tools into a local registry, per client, with rollback
/// on partial failure.
pub struct ToolBridge {
    registry: Arc<ToolRegistry>,
    /// Names registered per client, for unregister and refresh.
    registered: Mutex<HashMap<String, Vec<String>>>,
}

impl ToolBridge {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            registered: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an adapter for every tool the client currently advertises.
    ///
    /// Registration is transactional: if any adapter fails to register, the
    /// ones already added for this client are rolled back.
    pub fn register(&self, client: Arc<RemoteClient>) -> Result<Vec<String>, BridgeError> {
        let mut added: Vec<String> = Vec::new();
        for descriptor in client.cached_tools() {
            let schema = if descriptor.input_schema.is_object() {
                descriptor.input_schema.clone()
            } else {
                json!({"type": "object", "properties": {}})
            };
            let adapter = Arc::new(RemoteToolAdapter::new(
                Arc::clone(&client),
                descriptor.name.clone(),
                descriptor.description.clone(),
                schema,
            ));
            let name = adapter.name().to_string();
            if let Err(e) = self.registry.register(adapter) {
                for name in &added {
                    self.registry.unregister(name);
                }
                return Err(BridgeError::Registration {
                    name,
                    message: e.to_string(),
                });
            }
            added.push(name);
        }

        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client.name().to_string(), added.clone());
        debug!(client = %client.name(), count = added.len(), "bridged remote tools");
        Ok(added)
    }

    /// Removes every adapter registered for the named client.
    pub fn unregister(&self, client_name: &str) {
        let names = self
            .registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(client_name);
        if let Some(names) = names {
            for name in names {
                self.registry.unregister(&name);
            }
        }
    }

    /// Re-registers the client's current tool set, swapping out the old
    /// adapters.
    pub fn refresh(&self, client: Arc<RemoteClient>) -> Result<Vec<String>, BridgeError> {
        self.unregister(client.name());
        self.register(client)
    }

    /// Names currently bridged for the given client.
    pub fn bridged_tools(&self, client_name: &str) -> Vec<String> {
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(client_name)
            .cloned()
            .unwrap_or_default()
    }
}
