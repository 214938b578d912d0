//! Configuration file loading.

use std::path::Path;

use crate::types::ToolgateConfig;
use crate::validation::ValidationError;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Loads and validates a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ToolgateConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    load_config_str(&raw)
}

/// Parses and validates configuration from a TOML string.
pub fn load_config_str(raw: &str) -> Result<ToolgateConfig, ConfigError> {
    let config: ToolgateConfig = toml::from_str(raw)?;
    config.validate().map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportKind;

    #[test]
    fn test_load_full_config() {
        let raw = r#"
            [tool_policy]
            default_allow = false
            require_approval = false
            allowlist = ["shell", "group:fs"]
            blocklist = ["dangerous_*"]

            [[tool_policy.dangerous_ops]]
            tool = "shell"
            pattern = "rm\\s+-rf"
            severity = "critical"
            action = "block"
            message = "recursive delete is prohibited"

            [tool_policy.param_rules.read_file]
            max_length = 4096
            path_prefix = ["$WORKSPACE", "/tmp"]

            [approval]
            enabled = true
            timeout_seconds = 120
            max_pending = 8

            [[servers]]
            name = "files"
            transport = "stdio"
            command = "file-server"
            args = ["--root", "/data"]

            [[servers]]
            name = "search"
            transport = "http+sse"
            url = "http://localhost:9000/rpc"
        "#;

        let config = load_config_str(raw).unwrap();
        assert!(!config.tool_policy.default_allow);
        assert_eq!(config.tool_policy.allowlist.len(), 2);
        assert_eq!(config.tool_policy.dangerous_ops[0].severity, "critical");
        assert_eq!(
            config.tool_policy.param_rules["read_file"].path_prefix,
            vec!["$WORKSPACE", "/tmp"]
        );
        assert_eq!(config.approval.timeout_seconds, 120);
        assert_eq!(config.servers[1].transport, TransportKind::HttpSse);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert!(config.tool_policy.default_allow);
        assert_eq!(config.approval.timeout_seconds, 300);
        assert_eq!(config.approval.max_pending, 100);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_invalid_config_reports_all_errors() {
        let raw = r#"
            [approval]
            timeout_seconds = -1
            max_pending = 0
        "#;
        let err = load_config_str(raw).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.toml");
        std::fs::write(&path, "[approval]\ntimeout_seconds = 60\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.approval.timeout_seconds, 60);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = load_config_str("not [valid").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
