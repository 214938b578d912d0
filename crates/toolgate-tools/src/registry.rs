//! Concurrent registries for tools and tool factories.
//!
//! The registry stores tools as `Arc<dyn Tool>` keyed by name behind a
//! readers-writer lock, so it can be shared as `Arc<ToolRegistry>` across
//! the gate, the remote server, and the bridge; reads never block reads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::patterns::matches_pattern;
use crate::{Tool, ToolContext, ToolError, ToolResult};

type ToolMap = HashMap<String, Arc<dyn Tool>>;

/// A registry that stores and manages tools by name.
///
/// Registration is unique-keyed: registering a second tool under an
/// existing name fails with [`ToolError::AlreadyExists`]; replacement is
/// unregister followed by register.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<ToolMap>,
}

impl ToolRegistry {
    /// Creates a new empty `ToolRegistry`.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ToolMap> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ToolMap> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a tool under its own name.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(ToolError::InvalidArgs(
                "tool name must not be empty".to_string(),
            ));
        }
        let mut tools = self.write();
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyExists(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Removes a tool by name. Returns `true` if it was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// Retrieves a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().get(name).cloned()
    }

    /// Returns all registered tool names. Order is unspecified.
    pub fn list(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Looks up and executes a tool.
    ///
    /// Unknown names fail with [`ToolError::NotFound`]; a failure raised by
    /// the tool body is wrapped in [`ToolError::ExecutionFailed`].
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(params, ctx)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }

    /// Retains only tools matched by the pattern list.
    ///
    /// A tool is kept when at least one non-`!` pattern matches its name and
    /// no `!`-prefixed pattern matches. Patterns support `*` wildcards
    /// anchored over the full name.
    pub fn filter(&self, patterns: &[String]) {
        let keep: Vec<&str> = patterns
            .iter()
            .filter(|p| !p.starts_with('!'))
            .map(|p| p.as_str())
            .collect();
        let drop: Vec<&str> = patterns
            .iter()
            .filter_map(|p| p.strip_prefix('!'))
            .collect();

        self.write().retain(|name, _| {
            let kept = keep.iter().any(|p| matches_pattern(name, p));
            let dropped = drop.iter().any(|p| matches_pattern(name, p));
            kept && !dropped
        });
    }

    /// Serializes every tool into the provider function-call format:
    /// `{"type": "function", "function": {name, description, parameters}}`.
    pub fn to_provider_tools(&self) -> Vec<Value> {
        self.read()
            .values()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema(),
                    }
                })
            })
            .collect()
    }
}

impl Clone for ToolRegistry {
    /// Shallow clone: the new registry has its own map but shares tool
    /// instances with the original.
    fn clone(&self) -> Self {
        Self {
            tools: RwLock::new(self.read().clone()),
        }
    }
}

/// A factory producing a tool from a JSON configuration value.
pub type ToolFactory =
    Arc<dyn Fn(Value) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync + 'static>;

/// A registry of named tool factories, with the same naming and
/// concurrency rules as [`ToolRegistry`].
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, ToolFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, factory: ToolFactory) -> Result<(), ToolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ToolError::InvalidArgs(
                "factory name must not be empty".to_string(),
            ));
        }
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        if factories.contains_key(&name) {
            return Err(ToolError::AlreadyExists(name));
        }
        factories.insert(name, factory);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    /// Instantiates a tool through the named factory.
    pub fn create(&self, name: &str, config: Value) -> Result<Arc<dyn Tool>, ToolError> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        factory(config)
    }

    pub fn list(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}
