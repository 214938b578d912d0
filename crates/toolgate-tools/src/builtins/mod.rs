//! Built-in tools provided by toolgate.

pub mod echo;
pub mod file;
pub mod shell;

pub use echo::EchoTool;
pub use file::{ListFilesTool, ReadFileTool, WriteFileTool};
pub use shell::ShellTool;

use std::sync::Arc;

use crate::{ToolError, ToolRegistry};

/// Registers the standard builtin set into a registry.
pub fn register_builtins(registry: &ToolRegistry) -> Result<(), ToolError> {
    registry.register(Arc::new(EchoTool))?;
    registry.register(Arc::new(ShellTool::default()))?;
    registry.register(Arc::new(ReadFileTool))?;
    registry.register(Arc::new(WriteFileTool))?;
    registry.register(Arc::new(ListFilesTool))?;
    Ok(())
}
