use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which transport a remote server is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportKind {
    #[default]
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "http+sse")]
    HttpSse,
    #[serde(rename = "http")]
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::HttpSse => write!(f, "http+sse"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// One remote tool server.
///
/// `name` is required and becomes the prefix under which the server's tools
/// are advertised locally (`<name>_<tool>`), so it must not contain `_`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Command line for stdio servers.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides merged onto the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Base URL for HTTP servers.
    #[serde(default)]
    pub url: Option<String>,
    /// Per-request timeout; the client default applies when absent.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}
