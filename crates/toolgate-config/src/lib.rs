//! # toolgate-config
//!
//! Configuration loading, parsing, and validation for the toolgate control
//! plane: tool policy rules, approval workflow settings, and remote server
//! definitions.
//!
//! ## Modules
//!
//! - `types`: typed configuration structures
//! - `loader`: TOML file loading
//! - `validation`: semantic validation beyond deserialization

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{load_config, load_config_str, ConfigError};
pub use types::{
    ApprovalConfig, DangerousOpConfig, ParamRuleConfig, ServerConfig, ToolPolicyConfig,
    ToolgateConfig, TransportKind,
};
pub use validation::ValidationError;
