//! Semantic validation of the configuration.
//!
//! All violations are collected rather than failing fast, so users can fix
//! several issues in one pass.

use std::collections::HashSet;
use std::fmt;

use crate::types::{ToolgateConfig, TransportKind};

const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];
const ACTIONS: [&str; 3] = ["block", "approve", "warn"];

/// A validation failure with the offending field path.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The path to the invalid field (e.g., "approval.timeout_seconds")
    pub path: String,
    /// A human-readable error message
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn push(errors: &mut Vec<ValidationError>, path: impl Into<String>, message: impl Into<String>) {
    errors.push(ValidationError {
        path: path.into(),
        message: message.into(),
    });
}

fn check_regex(errors: &mut Vec<ValidationError>, path: String, pattern: &str) {
    if let Err(e) = regex::Regex::new(pattern) {
        push(errors, path, format!("invalid regex: {}", e));
    }
}

impl ToolgateConfig {
    /// Validate semantic rules across the entire configuration.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        self.validate_policy(&mut errors);
        self.validate_approval(&mut errors);
        self.validate_servers(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_policy(&self, errors: &mut Vec<ValidationError>) {
        for (i, op) in self.tool_policy.dangerous_ops.iter().enumerate() {
            let base = format!("tool_policy.dangerous_ops[{}]", i);

            if op.tool.is_none() && op.pattern.is_none() {
                push(
                    errors,
                    base.clone(),
                    "at least one of 'tool' and 'pattern' is required",
                );
            }
            if !SEVERITIES.contains(&op.severity.as_str()) {
                push(
                    errors,
                    format!("{}.severity", base),
                    format!(
                        "unknown severity '{}' (expected one of {})",
                        op.severity,
                        SEVERITIES.join("/")
                    ),
                );
            }
            if !ACTIONS.contains(&op.action.as_str()) {
                push(
                    errors,
                    format!("{}.action", base),
                    format!(
                        "unknown action '{}' (expected one of {})",
                        op.action,
                        ACTIONS.join("/")
                    ),
                );
            }
            if let Some(pattern) = &op.pattern {
                check_regex(errors, format!("{}.pattern", base), pattern);
            }
        }

        for (tool, rule) in &self.tool_policy.param_rules {
            let base = format!("tool_policy.param_rules.{}", tool);
            if let Some(pattern) = &rule.pattern {
                check_regex(errors, format!("{}.pattern", base), pattern);
            }
            for (i, pattern) in rule.forbidden.iter().enumerate() {
                check_regex(errors, format!("{}.forbidden[{}]", base, i), pattern);
            }
        }
    }

    fn validate_approval(&self, errors: &mut Vec<ValidationError>) {
        if self.approval.timeout_seconds <= 0 {
            push(
                errors,
                "approval.timeout_seconds",
                format!(
                    "timeout must be positive, got {}",
                    self.approval.timeout_seconds
                ),
            );
        }
        if self.approval.max_pending == 0 {
            push(errors, "approval.max_pending", "must be at least 1");
        }
    }

    fn validate_servers(&self, errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            let base = format!("servers[{}]", i);

            if server.name.is_empty() {
                push(errors, format!("{}.name", base), "server name is required");
            } else {
                if server.name.contains('_') {
                    push(
                        errors,
                        format!("{}.name", base),
                        "server names must not contain '_' (it separates the tool prefix)",
                    );
                }
                if !seen.insert(server.name.clone()) {
                    push(
                        errors,
                        format!("{}.name", base),
                        format!("duplicate server name '{}'", server.name),
                    );
                }
            }

            match server.transport {
                TransportKind::Stdio => {
                    if server.command.as_deref().unwrap_or("").is_empty() {
                        push(
                            errors,
                            format!("{}.command", base),
                            "stdio servers require a command",
                        );
                    }
                }
                TransportKind::HttpSse | TransportKind::Http => {
                    if server.url.as_deref().unwrap_or("").is_empty() {
                        push(
                            errors,
                            format!("{}.url", base),
                            "http servers require a url",
                        );
                    }
                }
            }

            if server.request_timeout_secs == Some(0) {
                push(
                    errors,
                    format!("{}.request_timeout_secs", base),
                    "timeout must be positive",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DangerousOpConfig, ServerConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(ToolgateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_dangerous_op_requires_tool_or_pattern() {
        let mut config = ToolgateConfig::default();
        config.tool_policy.dangerous_ops.push(DangerousOpConfig {
            tool: None,
            pattern: None,
            severity: "high".to_string(),
            action: "block".to_string(),
            message: "x".to_string(),
        });
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("at least one")));
    }

    #[test]
    fn test_unknown_severity_and_action_rejected() {
        let mut config = ToolgateConfig::default();
        config.tool_policy.dangerous_ops.push(DangerousOpConfig {
            tool: Some("shell".to_string()),
            pattern: None,
            severity: "catastrophic".to_string(),
            action: "explode".to_string(),
            message: String::new(),
        });
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].path.contains("severity"));
        assert!(errors[1].path.contains("action"));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let mut config = ToolgateConfig::default();
        config.tool_policy.dangerous_ops.push(DangerousOpConfig {
            tool: Some("shell".to_string()),
            pattern: Some("(unclosed".to_string()),
            severity: "low".to_string(),
            action: "warn".to_string(),
            message: String::new(),
        });
        let errors = config.validate().unwrap_err();
        assert!(errors[0].message.contains("invalid regex"));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let mut config = ToolgateConfig::default();
        config.approval.timeout_seconds = -5;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].path, "approval.timeout_seconds");
    }

    #[test]
    fn test_server_name_rules() {
        let mut config = ToolgateConfig::default();
        config.servers.push(ServerConfig {
            name: "my_server".to_string(),
            command: Some("srv".to_string()),
            ..Default::default()
        });
        config.servers.push(ServerConfig {
            name: String::new(),
            command: Some("srv".to_string()),
            ..Default::default()
        });
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("must not contain '_'")));
        assert!(errors.iter().any(|e| e.message.contains("required")));
    }

    #[test]
    fn test_stdio_server_requires_command() {
        let mut config = ToolgateConfig::default();
        config.servers.push(ServerConfig {
            name: "files".to_string(),
            ..Default::default()
        });
        let errors = config.validate().unwrap_err();
        assert!(errors[0].path.ends_with("command"));
    }
}
