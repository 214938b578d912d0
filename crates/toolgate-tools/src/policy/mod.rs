//! Tool policy evaluation.
//!
//! The engine evaluates a [`ToolCall`] against a [`Policy`] in a fixed
//! order: blocklist, allowlist, dangerous-operation rules, parameter rules,
//! then the global approval flag. Evaluation is deterministic; the order of
//! dangerous rules in the policy is significant because a `block` match
//! stops evaluation.
//!
//! # Policy Semantics
//!
//! - **Blocklist**: tools matching any blocklist pattern are always denied.
//! - **Allowlist**: consulted only when `default_allow` is false; an empty
//!   allowlist then denies every tool.
//! - **Dangerous ops**: regex rules over the raw argument string that can
//!   block, require approval, or attach a warning.
//! - **Param rules**: per-tool length, shape, and filesystem-path limits.

pub mod paths;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::patterns::{expand_groups, matches_pattern, normalize};
use toolgate_config::ToolPolicyConfig;

/// Compiled regexes larger than this are rejected outright.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// One tool invocation as seen by the policy engine.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    /// Raw argument JSON, exactly as supplied by the agent.
    pub arguments: String,
    pub session_id: String,
    pub agent_id: String,
    pub workspace_path: Option<PathBuf>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
            session_id: String::new(),
            agent_id: String::new(),
            workspace_path: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }
}

/// Risk severity attached to a dangerous-operation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// What a matching dangerous-operation rule does to the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Approve,
    Warn,
}

impl RuleAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(RuleAction::Block),
            "approve" => Some(RuleAction::Approve),
            "warn" => Some(RuleAction::Warn),
            _ => None,
        }
    }
}

/// A dangerous-operation rule. At least one of `tool` and `pattern` is set.
#[derive(Debug, Clone)]
pub struct DangerousRule {
    /// Tool name pattern this rule applies to (`*` wildcard).
    pub tool: Option<String>,
    /// Regex matched against the raw argument string.
    pub pattern: Option<String>,
    pub severity: Severity,
    pub action: RuleAction,
    pub message: String,
}

/// Parameter constraints for one tool.
#[derive(Debug, Clone, Default)]
pub struct ParamRule {
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub forbidden: Vec<String>,
    pub path_prefix: Vec<String>,
}

/// The complete rule set evaluated for every invocation.
#[derive(Debug, Clone)]
pub struct Policy {
    pub default_allow: bool,
    pub require_approval: bool,
    pub allowlist: Vec<String>,
    pub blocklist: Vec<String>,
    pub dangerous_ops: Vec<DangerousRule>,
    pub param_rules: HashMap<String, ParamRule>,
    /// Budget for one regex evaluation. The engine compiles to a
    /// linear-time engine so this is informational, but it stays surfaced
    /// for sinks that enforce it.
    pub regex_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl Policy {
    /// A policy that allows everything.
    pub fn permissive() -> Self {
        Self {
            default_allow: true,
            require_approval: false,
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            dangerous_ops: Vec::new(),
            param_rules: HashMap::new(),
            regex_timeout: Duration::from_millis(100),
        }
    }

    /// Builds a policy from its configuration form.
    ///
    /// Configuration is validated separately at load time; anything that
    /// still slips through degrades instead of failing: unknown severities
    /// become `medium` and unknown actions become `warn`.
    pub fn from_config(config: &ToolPolicyConfig) -> Self {
        let dangerous_ops = config
            .dangerous_ops
            .iter()
            .map(|op| {
                let severity = Severity::parse(&op.severity).unwrap_or_else(|| {
                    warn!(severity = %op.severity, "unknown severity, treating as medium");
                    Severity::Medium
                });
                let action = RuleAction::parse(&op.action).unwrap_or_else(|| {
                    warn!(action = %op.action, "unknown action, degrading to warn");
                    RuleAction::Warn
                });
                DangerousRule {
                    tool: op.tool.clone(),
                    pattern: op.pattern.clone(),
                    severity,
                    action,
                    message: op.message.clone(),
                }
            })
            .collect();

        let param_rules = config
            .param_rules
            .iter()
            .map(|(tool, rule)| {
                (
                    normalize(tool),
                    ParamRule {
                        max_length: rule.max_length,
                        pattern: rule.pattern.clone(),
                        forbidden: rule.forbidden.clone(),
                        path_prefix: rule.path_prefix.clone(),
                    },
                )
            })
            .collect();

        Self {
            default_allow: config.default_allow,
            require_approval: config.require_approval,
            allowlist: config.allowlist.clone(),
            blocklist: config.blocklist.clone(),
            dangerous_ops,
            param_rules,
            regex_timeout: Duration::from_millis(config.regex_timeout_ms),
        }
    }
}

/// The outcome of policy evaluation for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub require_approval: bool,
    pub approval_reason: Option<String>,
    pub warnings: Vec<String>,
    pub denial_reason: Option<String>,
    pub matched_rules: Vec<String>,
}

impl PolicyVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            require_approval: false,
            approval_reason: None,
            warnings: Vec::new(),
            denial_reason: None,
            matched_rules: Vec::new(),
        }
    }

    fn deny(mut self, reason: impl Into<String>) -> Self {
        self.allowed = false;
        self.denial_reason = Some(reason.into());
        self
    }
}

/// Evaluates calls against one policy, memoizing compiled regexes.
pub struct PolicyEngine {
    policy: Policy,
    /// Compiled-pattern cache; `None` marks a pattern that failed to
    /// compile so the failure is logged once.
    regex_cache: DashMap<String, Option<Regex>>,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            regex_cache: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Evaluates one call. Deterministic: the same policy and call always
    /// produce the same verdict.
    pub fn check(&self, call: &ToolCall) -> PolicyVerdict {
        let name = normalize(&call.name);
        let mut verdict = PolicyVerdict::allow();

        // 1. Blocklist always wins.
        let blocklist = expand_groups(&self.policy.blocklist);
        if let Some(pattern) = blocklist.iter().find(|p| matches_pattern(&name, p)) {
            verdict.matched_rules.push(format!("blocklist:{}", pattern));
            return verdict.deny(format!("tool '{}' is in blocklist", call.name));
        }

        // 2. Allowlist, unless the policy allows by default. An empty
        // allowlist denies everything.
        if !self.policy.default_allow {
            let allowlist = expand_groups(&self.policy.allowlist);
            if !allowlist.iter().any(|p| matches_pattern(&name, p)) {
                return verdict.deny(format!("tool '{}' is not in allowlist", call.name));
            }
        }

        // 3. Dangerous-operation rules, in policy order.
        for rule in &self.policy.dangerous_ops {
            if let Some(tool) = &rule.tool {
                if !matches_pattern(&name, tool) {
                    continue;
                }
            }
            if let Some(pattern) = &rule.pattern {
                if !self.regex_matches(pattern, &call.arguments) {
                    continue;
                }
            }

            verdict.matched_rules.push(rule.message.clone());
            match rule.action {
                RuleAction::Block => {
                    return verdict.deny(rule.message.clone());
                }
                RuleAction::Approve => {
                    verdict.require_approval = true;
                    if verdict.approval_reason.is_none() {
                        verdict.approval_reason = Some(rule.message.clone());
                    }
                }
                RuleAction::Warn => {
                    verdict.warnings.push(rule.message.clone());
                }
            }
        }

        // 4. Per-tool parameter rules.
        if let Some(rule) = self.policy.param_rules.get(&name) {
            if let Err(reason) = self.check_params(call, rule) {
                verdict.matched_rules.push(format!("param_rule:{}", name));
                return verdict.deny(reason);
            }
        }

        // 5. Global approval flag.
        if self.policy.require_approval && !verdict.require_approval {
            verdict.require_approval = true;
            verdict.approval_reason = Some("global approval required".to_string());
        }

        verdict
    }

    fn check_params(&self, call: &ToolCall, rule: &ParamRule) -> Result<(), String> {
        if let Some(max) = rule.max_length {
            if call.arguments.len() > max {
                return Err(format!(
                    "arguments exceed maximum length of {} bytes",
                    max
                ));
            }
        }

        if let Some(pattern) = &rule.pattern {
            if !self.regex_matches(pattern, &call.arguments) {
                return Err("arguments do not match the required pattern".to_string());
            }
        }

        for pattern in &rule.forbidden {
            if self.regex_matches(pattern, &call.arguments) {
                return Err(format!("arguments match forbidden pattern '{}'", pattern));
            }
        }

        if !rule.path_prefix.is_empty() {
            paths::check_path_prefixes(
                &call.arguments,
                &rule.path_prefix,
                call.workspace_path.as_deref(),
            )?;
        }

        Ok(())
    }

    /// Matches a memoized regex against user-controlled text.
    ///
    /// Patterns compile to a linear-time engine with a bounded program
    /// size, so pathological inputs cannot stall the caller. A pattern that
    /// fails to compile degrades to "does not match".
    fn regex_matches(&self, pattern: &str, text: &str) -> bool {
        if let Some(cached) = self.regex_cache.get(pattern) {
            return cached
                .as_ref()
                .map(|re| re.is_match(text))
                .unwrap_or(false);
        }

        let compiled = regex::RegexBuilder::new(pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build();
        let compiled = match compiled {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern, error = %e, "regex failed to compile, treating as no-match");
                None
            }
        };
        let matched = compiled
            .as_ref()
            .map(|re| re.is_match(text))
            .unwrap_or(false);
        self.regex_cache.insert(pattern.to_string(), compiled);
        matched
    }
}
