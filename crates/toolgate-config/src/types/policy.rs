use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Tool policy configuration.
///
/// Severity and action fields are kept as strings here and validated
/// semantically, so that a single load reports every violation instead of
/// failing on the first unknown variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    /// When true, tools not matched by any list are allowed.
    #[serde(default = "default_true")]
    pub default_allow: bool,
    /// When true, every allowed call still requires human approval.
    #[serde(default)]
    pub require_approval: bool,
    /// Patterns of tools that may run (`*` wildcard, `group:<name>` refs).
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Patterns of tools that are always blocked.
    #[serde(default)]
    pub blocklist: Vec<String>,
    /// Argument-content rules for dangerous operations.
    #[serde(default)]
    pub dangerous_ops: Vec<DangerousOpConfig>,
    /// Per-tool parameter constraints, keyed by tool name.
    #[serde(default)]
    pub param_rules: HashMap<String, ParamRuleConfig>,
    /// Reserved for the output-scrubbing subsystem; not evaluated here.
    #[serde(default)]
    pub scrub_rules: Vec<String>,
    /// Reserved for the circuit-breaker subsystem; not evaluated here.
    #[serde(default)]
    pub circuit_breaker_threshold: Option<u32>,
    /// Budget for one regex evaluation, in milliseconds.
    #[serde(default = "default_regex_timeout_ms")]
    pub regex_timeout_ms: u64,
}

fn default_regex_timeout_ms() -> u64 {
    100
}

impl Default for ToolPolicyConfig {
    fn default() -> Self {
        Self {
            default_allow: true,
            require_approval: false,
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            dangerous_ops: Vec::new(),
            param_rules: HashMap::new(),
            scrub_rules: Vec::new(),
            circuit_breaker_threshold: None,
            regex_timeout_ms: default_regex_timeout_ms(),
        }
    }
}

/// One dangerous-operation rule.
///
/// At least one of `tool` and `pattern` must be present; `severity` must be
/// one of `low`/`medium`/`high`/`critical` and `action` one of
/// `block`/`approve`/`warn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DangerousOpConfig {
    /// Tool name pattern this rule applies to (`*` wildcard).
    #[serde(default)]
    pub tool: Option<String>,
    /// Regex matched against the raw argument string.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub message: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_action() -> String {
    "warn".to_string()
}

/// Parameter constraints for one tool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParamRuleConfig {
    /// Maximum length of the raw argument string.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Regex the raw argument string must match.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Regexes that must not match the raw argument string.
    #[serde(default)]
    pub forbidden: Vec<String>,
    /// Directory prefixes filesystem paths must stay within. Supports `~`
    /// and `$WORKSPACE`.
    #[serde(default)]
    pub path_prefix: Vec<String>,
}
