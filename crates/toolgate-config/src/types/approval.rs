use serde::{Deserialize, Serialize};

/// Approval workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Master switch for the approval workflow.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How long a request may stay pending before it times out.
    /// Signed so a negative value is reported by validation instead of
    /// failing the parse.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,
    /// Maximum number of simultaneously pending requests.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_seconds() -> i64 {
    300
}

fn default_max_pending() -> usize {
    100
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: default_timeout_seconds(),
            max_pending: default_max_pending(),
        }
    }
}
