//! Core configuration types.

mod approval;
mod policy;
mod servers;

pub use approval::ApprovalConfig;
pub use policy::{DangerousOpConfig, ParamRuleConfig, ToolPolicyConfig};
pub use servers::{ServerConfig, TransportKind};

use serde::{Deserialize, Serialize};

/// Root configuration for the tool-execution control plane.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolgateConfig {
    /// Tool policy rules
    #[serde(default)]
    pub tool_policy: ToolPolicyConfig,
    /// Approval workflow settings
    #[serde(default)]
    pub approval: ApprovalConfig,
    /// Remote tool server definitions
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}
