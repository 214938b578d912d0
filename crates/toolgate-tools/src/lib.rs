//! # toolgate-tools
//!
//! Tool abstractions, the concurrent tool registry, the policy engine, and
//! the approval workflow that together gate every tool invocation.
//!
//! ## Core Types
//!
//! - [`Tool`]: The async trait all tools implement.
//! - [`ToolContext`]: Context information passed to tool execution.
//! - [`ToolResult`]: The result returned by tool execution.
//! - [`ToolRegistry`]: Concurrent name-to-tool map with unique keys.
//! - [`PolicyEngine`](policy::PolicyEngine): allow / deny / approve / warn
//!   verdicts for a [`ToolCall`](policy::ToolCall).
//! - [`ApprovalManager`](approval::ApprovalManager): suspends an invocation
//!   until a human decision or timeout.
//! - [`ToolGate`](gate::ToolGate): the pipeline wiring policy, approval, and
//!   dispatch together.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod approval;
pub mod audit;
pub mod builtins;
pub mod gate;
pub mod patterns;
pub mod policy;
pub mod registry;
pub mod script;

pub use approval::{
    ApprovalBroadcaster, ApprovalDecision, ApprovalError, ApprovalManager, ApprovalRequest,
    ApprovalResult, AuditSink,
};
pub use gate::{GateError, ToolGate};
pub use policy::{Policy, PolicyEngine, PolicyVerdict, ToolCall};
pub use registry::{FactoryRegistry, ToolRegistry};
pub use script::{ScriptHost, ScriptTool};

/// Typed failures of the tool layer.
///
/// Runtime failures inside a tool body are not raised through this type;
/// they come back as [`ToolResult`]s with `is_error` set. These variants
/// cover registry misuse and the execution layer's own faults.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("tool timed out: {0}")]
    Timeout(String),
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The textual content returned to the caller.
    pub content: String,
    /// Indicates whether the tool call resulted in an error.
    pub is_error: bool,
    /// Optional structured metadata for internal use.
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    /// Creates a successful result with the given content.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    /// Creates an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            metadata: None,
        }
    }

    /// Sets the metadata and returns the updated result.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Context information passed to tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// The unique identifier of the agent executing the tool.
    pub agent_id: String,
    /// The session the invocation belongs to.
    pub session_id: String,
    /// Optional workspace directory the tool should operate in.
    pub workspace_path: Option<PathBuf>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            workspace_path: None,
        }
    }

    pub fn with_workspace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }
}

/// The contract every tool fulfills, whether built-in, script-hosted, or a
/// remote adapter.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique, machine-readable name of this tool.
    fn name(&self) -> &str;

    /// A human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// The JSON schema describing the tool's parameters. The top-level
    /// `type` is always `object`.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Executes the tool with the given parameters and context.
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult>;
}
