//! Structured audit logging for security-relevant events.
//!
//! All events log under `target: "audit"` so hosts can route them to a
//! dedicated sink. Two reference [`AuditSink`] implementations are
//! provided: one that forwards to these tracing events and an in-memory
//! sink for tests.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::approval::{ApprovalRequest, ApprovalResult, AuditSink};

/// Log a policy decision for a tool invocation.
pub fn log_policy_decision(tool_name: &str, agent_id: &str, allowed: bool, reason: Option<&str>) {
    if allowed {
        info!(
            target: "audit",
            event = "policy_allowed",
            tool_name = tool_name,
            agent_id = agent_id,
            "Policy allowed tool call"
        );
    } else {
        warn!(
            target: "audit",
            event = "policy_denied",
            tool_name = tool_name,
            agent_id = agent_id,
            reason = reason.unwrap_or(""),
            "Policy denied tool call"
        );
    }
}

/// Log a tool execution.
pub fn log_tool_execution(tool_name: &str, agent_id: &str, session_id: &str, is_error: bool) {
    info!(
        target: "audit",
        event = "tool_execution",
        tool_name = tool_name,
        agent_id = agent_id,
        session_id = session_id,
        is_error = is_error,
        "Tool executed"
    );
}

/// Log an approval request being raised.
pub fn log_approval_request(request: &ApprovalRequest) {
    info!(
        target: "audit",
        event = "approval_requested",
        request_id = %request.id,
        tool_name = %request.tool_name,
        agent_id = %request.agent_id,
        reason = %request.reason,
        "Approval requested"
    );
}

/// Log the resolution of an approval request.
pub fn log_approval_decision(request: &ApprovalRequest, result: &ApprovalResult) {
    let decision = match result.decision {
        crate::approval::ApprovalDecision::Approved => "approved",
        crate::approval::ApprovalDecision::Rejected => "rejected",
        crate::approval::ApprovalDecision::Timeout => "timeout",
    };
    info!(
        target: "audit",
        event = "approval_decision",
        request_id = %request.id,
        tool_name = %request.tool_name,
        decision = decision,
        approved_by = result.approved_by.as_deref().unwrap_or(""),
        "Approval workflow completed"
    );
}

/// Redact sensitive information from a value before logging it.
pub fn redact_sensitive(value: &str) -> String {
    if value.is_empty() {
        return "<empty>".to_string();
    }
    let lowered = value.to_lowercase();
    if lowered.contains("password") || lowered.contains("token") {
        return "******".to_string();
    }
    if value.len() > 64 {
        format!("{}...", &value[..64])
    } else {
        value.to_string()
    }
}

/// An [`AuditSink`] that forwards to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_request(&self, request: &ApprovalRequest) -> anyhow::Result<()> {
        log_approval_request(request);
        Ok(())
    }

    fn log_decision(
        &self,
        request: &ApprovalRequest,
        result: &ApprovalResult,
    ) -> anyhow::Result<()> {
        log_approval_decision(request, result);
        Ok(())
    }
}

/// One recorded audit entry of the in-memory sink.
#[derive(Debug, Clone)]
pub enum AuditEntry {
    Request(ApprovalRequest),
    Decision(ApprovalRequest, ApprovalResult),
}

/// An [`AuditSink`] that records entries in memory; useful in tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn log_request(&self, request: &ApprovalRequest) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AuditEntry::Request(request.clone()));
        Ok(())
    }

    fn log_decision(
        &self,
        request: &ApprovalRequest,
        result: &ApprovalResult,
    ) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AuditEntry::Decision(request.clone(), result.clone()));
        Ok(())
    }
}
