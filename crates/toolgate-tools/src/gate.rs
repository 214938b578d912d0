//! The invocation gate: policy check, approval wait, then dispatch.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::approval::{ApprovalDecision, ApprovalError, ApprovalManager};
use crate::audit;
use crate::policy::{PolicyEngine, ToolCall};
use crate::{ToolContext, ToolError, ToolRegistry, ToolResult};

/// Failures surfaced by the gate before or instead of tool output.
///
/// Runtime failures inside the tool body are not raised; they come back as
/// error [`ToolResult`]s.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("policy denied: {reason}")]
    PolicyDenied {
        reason: String,
        matched_rules: Vec<String>,
    },
    #[error("approval request timed out")]
    ApprovalTimeout,
    #[error("approval rejected: {0}")]
    ApprovalRejected(String),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Gates every tool invocation through the policy engine and, when the
/// verdict asks for it, the approval workflow, before dispatching to the
/// registry.
pub struct ToolGate {
    registry: Arc<ToolRegistry>,
    engine: Arc<PolicyEngine>,
    approvals: Option<Arc<ApprovalManager>>,
}

impl ToolGate {
    pub fn new(registry: Arc<ToolRegistry>, engine: Arc<PolicyEngine>) -> Self {
        Self {
            registry,
            engine,
            approvals: None,
        }
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Runs one gated invocation.
    ///
    /// The call's raw argument string is what the policy engine sees; an
    /// approver may substitute modified arguments before execution.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        mut call: ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResult, GateError> {
        let verdict = self.engine.check(&call);
        for warning in &verdict.warnings {
            warn!(tool = %call.name, warning = %warning, "policy warning");
        }

        if !verdict.allowed {
            let reason = verdict
                .denial_reason
                .clone()
                .unwrap_or_else(|| "denied by policy".to_string());
            audit::log_policy_decision(&call.name, &call.agent_id, false, Some(&reason));
            return Err(GateError::PolicyDenied {
                reason,
                matched_rules: verdict.matched_rules,
            });
        }
        audit::log_policy_decision(&call.name, &call.agent_id, true, None);

        if verdict.require_approval {
            let reason = verdict
                .approval_reason
                .as_deref()
                .unwrap_or("approval required");
            let Some(approvals) = &self.approvals else {
                return Err(GateError::PolicyDenied {
                    reason: "approval required but the approval workflow is disabled"
                        .to_string(),
                    matched_rules: verdict.matched_rules,
                });
            };
            let result = approvals.request_approval(cancel, &call, reason).await?;
            match result.decision {
                ApprovalDecision::Timeout => return Err(GateError::ApprovalTimeout),
                ApprovalDecision::Rejected => {
                    return Err(GateError::ApprovalRejected(
                        result.message.unwrap_or_else(|| "rejected".to_string()),
                    ))
                }
                ApprovalDecision::Approved => {
                    if let Some(modified) = result.modified_arguments {
                        call.arguments = modified;
                    }
                }
            }
        }

        let params: Value = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.arguments)
                .map_err(|e| ToolError::InvalidArgs(format!("argument JSON: {}", e)))?
        };

        let result = match self.registry.execute(&call.name, params, ctx).await {
            Ok(result) => result,
            // Runtime failures come back as error results; registry misuse
            // (unknown tool, bad arguments) stays typed.
            Err(ToolError::ExecutionFailed(message)) => ToolResult::error(message),
            Err(other) => return Err(other.into()),
        };
        audit::log_tool_execution(&call.name, &call.agent_id, &call.session_id, result.is_error);
        Ok(result)
    }
}
