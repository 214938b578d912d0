//! Adapter exposing user-authored script tools through the [`Tool`] trait.
//!
//! The embedded script sandbox is an external collaborator; this module
//! only defines the seam ([`ScriptHost`]) and the thin tool wrapper that
//! forwards execution to it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::{Tool, ToolContext, ToolResult};

/// Executes a named user script with JSON arguments.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn run_script(
        &self,
        script_name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult>;
}

/// A registry-visible tool backed by a script in the host sandbox.
pub struct ScriptTool {
    name: String,
    description: String,
    parameters: Value,
    host: Arc<dyn ScriptHost>,
}

impl ScriptTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        host: Arc<dyn ScriptHost>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            host,
        }
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        match self.host.run_script(&self.name, params, ctx).await {
            Ok(result) => Ok(result),
            Err(e) => Ok(ToolResult::error(format!("script failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct RecordingHost;

    #[async_trait]
    impl ScriptHost for RecordingHost {
        async fn run_script(
            &self,
            script_name: &str,
            args: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult> {
            if script_name == "boom" {
                anyhow::bail!("interpreter crashed");
            }
            Ok(ToolResult::success(format!("{}:{}", script_name, args)))
        }
    }

    #[tokio::test]
    async fn test_script_tool_forwards_to_host() {
        let tool = ScriptTool::new(
            "my_script",
            "a user script",
            json!({"type": "object"}),
            Arc::new(RecordingHost),
        );
        let result = tool
            .execute(json!({"x": 1}), &ToolContext::default())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.starts_with("my_script:"));
    }

    #[tokio::test]
    async fn test_host_failure_becomes_error_result() {
        let tool = ScriptTool::new(
            "boom",
            "always fails",
            json!({"type": "object"}),
            Arc::new(RecordingHost),
        );
        let result = tool.execute(json!({}), &ToolContext::default()).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("interpreter crashed"));
    }
}
