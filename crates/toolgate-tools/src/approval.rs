//! Approval workflow for gated tool invocations.
//!
//! The [`ApprovalManager`] suspends an invocation until a human decision
//! arrives through the host's notification channel, the per-request timer
//! fires, the caller cancels, or the manager shuts down. Every exit path
//! removes the pending entry and stops the timer; delivery to waiters and
//! callbacks into the notifier and audit log happen outside the table lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::policy::ToolCall;

/// Errors of the approval workflow.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request timed out")]
    Timeout,
    #[error("approval rejected: {0}")]
    Rejected(String),
    #[error("approval request not found: {0}")]
    RequestNotFound(String),
    #[error("maximum pending approvals exceeded ({0})")]
    MaxPendingExceeded(usize),
}

/// A suspended tool invocation awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    /// Raw argument JSON of the suspended call.
    pub arguments: String,
    pub reason: String,
    pub session_id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// How a pending request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Timeout,
}

/// The outcome delivered to the suspended caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub approved: bool,
    pub message: Option<String>,
    pub approved_by: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub decision: ApprovalDecision,
    /// When present, the human edited the call; the caller must substitute
    /// these arguments before executing.
    pub modified_arguments: Option<String>,
}

impl ApprovalResult {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            approved: false,
            message: Some(message.into()),
            approved_by: None,
            decided_at: Utc::now(),
            decision: ApprovalDecision::Rejected,
            modified_arguments: None,
        }
    }

    fn timeout() -> Self {
        Self {
            approved: false,
            message: Some("approval request timed out".to_string()),
            approved_by: None,
            decided_at: Utc::now(),
            decision: ApprovalDecision::Timeout,
            modified_arguments: None,
        }
    }
}

/// The host's channel for reaching human approvers.
///
/// The manager publishes two envelope types: `approval_request` with the
/// full [`ApprovalRequest`] as payload, and `approval_resolved` with
/// `{id, approved, approved_by, decided_at}`.
pub trait ApprovalBroadcaster: Send + Sync {
    fn broadcast_all(&self, message_type: &str, payload: serde_json::Value)
        -> anyhow::Result<()>;
}

/// The audit-log contract consumed by the manager. Sink persistence is the
/// host's concern.
pub trait AuditSink: Send + Sync {
    fn log_request(&self, request: &ApprovalRequest) -> anyhow::Result<()>;
    fn log_decision(&self, request: &ApprovalRequest, result: &ApprovalResult)
        -> anyhow::Result<()>;
}

struct PendingEntry {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalResult>,
    timer: JoinHandle<()>,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingEntry>>>;

/// Coordinates pending approval requests.
pub struct ApprovalManager {
    timeout: Duration,
    max_pending: usize,
    pending: PendingTable,
    notifier: Option<Arc<dyn ApprovalBroadcaster>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ApprovalManager {
    /// Default time a request may stay pending.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_PENDING: usize = 100;

    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            timeout,
            max_pending,
            pending: Arc::new(Mutex::new(HashMap::new())),
            notifier: None,
            audit: None,
        }
    }

    /// Builds a manager from its configuration form. Validation has
    /// already rejected non-positive timeouts.
    pub fn from_config(config: &toolgate_config::ApprovalConfig) -> Self {
        Self::new(
            Duration::from_secs(config.timeout_seconds.max(1) as u64),
            config.max_pending,
        )
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ApprovalBroadcaster>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Snapshot of all currently pending requests.
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        self.lock_pending()
            .values()
            .map(|entry| entry.request.clone())
            .collect()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Suspends the call until a decision, the timeout, or cancellation.
    ///
    /// Cancellation removes the pending entry before returning a rejected
    /// result with message `request cancelled`.
    pub async fn request_approval(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        reason: &str,
    ) -> Result<ApprovalResult, ApprovalError> {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            reason: reason.to_string(),
            session_id: call.session_id.clone(),
            agent_id: call.agent_id.clone(),
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(self.timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        };
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.len() >= self.max_pending {
                return Err(ApprovalError::MaxPendingExceeded(self.max_pending));
            }
            let timer = self.spawn_timer(id.clone());
            pending.insert(
                id.clone(),
                PendingEntry {
                    request: request.clone(),
                    responder: tx,
                    timer,
                },
            );
        }

        // Outside the lock: neither the notifier nor the audit log may
        // block or fail the approval path.
        self.notify("approval_request", || {
            serde_json::to_value(&request).unwrap_or_default()
        });
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_request(&request) {
                warn!(request_id = %id, error = %e, "audit log_request failed");
            }
        }

        tokio::select! {
            result = rx => match result {
                Ok(result) => Ok(result),
                // The manager was dropped mid-wait.
                Err(_) => Ok(ApprovalResult::rejected("manager closed")),
            },
            _ = cancel.cancelled() => {
                if let Some(entry) = self.lock_pending().remove(&id) {
                    entry.timer.abort();
                }
                debug!(request_id = %id, "approval wait cancelled by caller");
                Ok(ApprovalResult::rejected("request cancelled"))
            }
        }
    }

    /// Resolves a pending request with the human's decision.
    pub fn handle_response(
        &self,
        id: &str,
        approved: bool,
        message: Option<String>,
        modified_arguments: Option<String>,
    ) -> Result<(), ApprovalError> {
        let entry = self
            .lock_pending()
            .remove(id)
            .ok_or_else(|| ApprovalError::RequestNotFound(id.to_string()))?;
        entry.timer.abort();

        let result = ApprovalResult {
            approved,
            message,
            approved_by: Some("user".to_string()),
            decided_at: Utc::now(),
            decision: if approved {
                ApprovalDecision::Approved
            } else {
                ApprovalDecision::Rejected
            },
            modified_arguments,
        };

        self.record_resolution(&entry.request, &result);
        if entry.responder.send(result).is_err() {
            debug!(request_id = %id, "approval waiter gone before delivery");
        }
        Ok(())
    }

    /// Rejects every pending request with `manager closed` and clears the
    /// table.
    pub fn close(&self) {
        let drained: Vec<PendingEntry> = {
            let mut pending = self.lock_pending();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.timer.abort();
            let result = ApprovalResult::rejected("manager closed");
            self.record_resolution(&entry.request, &result);
            let _ = entry.responder.send(result);
        }
    }

    fn spawn_timer(&self, id: String) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let notifier = self.notifier.clone();
        let audit = self.audit.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            let Some(entry) = entry else { return };

            let result = ApprovalResult::timeout();
            if let Some(audit) = &audit {
                if let Err(e) = audit.log_decision(&entry.request, &result) {
                    warn!(request_id = %id, error = %e, "audit log_decision failed");
                }
            }
            if let Some(notifier) = &notifier {
                let payload = resolution_payload(&entry.request.id, &result);
                if let Err(e) = notifier.broadcast_all("approval_resolved", payload) {
                    warn!(request_id = %id, error = %e, "approval notifier failed");
                }
            }
            let _ = entry.responder.send(result);
        })
    }

    fn record_resolution(&self, request: &ApprovalRequest, result: &ApprovalResult) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_decision(request, result) {
                warn!(request_id = %request.id, error = %e, "audit log_decision failed");
            }
        }
        self.notify("approval_resolved", || {
            resolution_payload(&request.id, result)
        });
    }

    fn notify(&self, message_type: &str, payload: impl FnOnce() -> serde_json::Value) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.broadcast_all(message_type, payload()) {
                warn!(message_type, error = %e, "approval notifier failed");
            }
        }
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT, Self::DEFAULT_MAX_PENDING)
    }
}

fn resolution_payload(id: &str, result: &ApprovalResult) -> serde_json::Value {
    json!({
        "id": id,
        "approved": result.approved,
        "approved_by": result.approved_by,
        "decided_at": result.decided_at,
    })
}
