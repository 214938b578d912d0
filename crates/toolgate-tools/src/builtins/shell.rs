//! Built-in command runner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use crate::{Tool, ToolContext, ToolResult};

/// Runs a command line through the system shell.
///
/// The interpreter defaults to `sh` and the working directory falls back to
/// the session workspace. A command that outlives its time limit is killed
/// and reported as an error result, as are non-zero exits and signal
/// deaths; captured stdout and stderr are returned with the stderr section
/// labeled.
#[derive(Debug, Clone)]
pub struct ShellTool {
    shell: String,
    timeout: Duration,
}

/// Wire arguments of one invocation.
#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    workdir: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
}

impl ShellTool {
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new("sh", Duration::from_secs(30))
    }
}

/// Stdout and stderr as one text block, stderr labeled when present.
fn render_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.trim_end().to_string(),
        (true, false) => format!("[stderr]\n{}", stderr.trim_end()),
        (false, false) => format!("{}\n[stderr]\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}

/// Why a finished command counts as failed, if it does.
fn describe_failure(status: std::process::ExitStatus) -> Option<String> {
    match status.code() {
        Some(0) => None,
        Some(code) => Some(format!("command exited with status {}", code)),
        // No exit code on unix means the process died to a signal.
        None => Some("command was killed by a signal".to_string()),
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a command line through the system shell"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line to run through the shell"
                },
                "timeout_secs": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Kill the command after this many seconds"
                },
                "workdir": {
                    "type": "string",
                    "description": "Directory to run in; defaults to the session workspace"
                },
                "env": {
                    "type": "object",
                    "additionalProperties": { "type": "string" },
                    "description": "Extra environment variables for the command"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let params: ShellParams =
            serde_json::from_value(params).context("invalid shell arguments")?;
        if params.command.trim().is_empty() {
            return Ok(ToolResult::error("command is empty"));
        }

        let limit = params
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        let workdir = params.workdir.or_else(|| ctx.workspace_path.clone());

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&params.command)
            .envs(&params.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &workdir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "failed to start {}: {}",
                    self.shell, e
                )))
            }
        };

        let output = match timeout(limit, child.wait_with_output()).await {
            // The timeout drops the wait future, which kills the child.
            Err(_) => {
                return Ok(ToolResult::error(format!(
                    "command did not finish within {}s and was killed",
                    limit.as_secs()
                ))
                .with_metadata(json!({"timed_out": true})))
            }
            Ok(Err(e)) => {
                return Ok(ToolResult::error(format!(
                    "failed to collect command output: {}",
                    e
                )))
            }
            Ok(Ok(output)) => output,
        };

        let body = render_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        );
        let metadata = json!({"exit_code": output.status.code()});
        let result = match describe_failure(output.status) {
            None => ToolResult::success(body),
            Some(failure) if body.is_empty() => ToolResult::error(failure),
            Some(failure) => ToolResult::error(format!("{}\n{}", failure, body)),
        };
        Ok(result.with_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("test-agent", "test-session")
    }

    async fn run(args: Value) -> ToolResult {
        ShellTool::default().execute(args, &ctx()).await.unwrap()
    }

    #[tokio::test]
    async fn test_stdout_is_returned() {
        let result = run(json!({"command": "echo hello"})).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
        assert_eq!(result.metadata.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_stderr_is_labeled_but_not_an_error() {
        let result = run(json!({"command": "echo out; echo oops >&2"})).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "out\n[stderr]\noops");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error_with_status() {
        let result = run(json!({"command": "echo failing >&2; exit 3"})).await;
        assert!(result.is_error);
        assert!(result.content.starts_with("command exited with status 3"));
        assert!(result.content.contains("[stderr]\nfailing"));
        assert_eq!(result.metadata.unwrap()["exit_code"], 3);
    }

    #[tokio::test]
    async fn test_silent_failure_reports_status_only() {
        let result = run(json!({"command": "exit 7"})).await;
        assert!(result.is_error);
        assert_eq!(result.content, "command exited with status 7");
    }

    #[tokio::test]
    async fn test_signal_death_is_distinguished_from_exit_codes() {
        let result = run(json!({"command": "kill -9 $$"})).await;
        assert!(result.is_error);
        assert!(result.content.contains("killed by a signal"));
        assert_eq!(result.metadata.unwrap()["exit_code"], Value::Null);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports() {
        let started = std::time::Instant::now();
        let result = run(json!({"command": "sleep 5", "timeout_secs": 1})).await;
        assert!(result.is_error);
        assert!(result.content.contains("did not finish within 1s"));
        assert_eq!(result.metadata.unwrap()["timed_out"], true);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_empty_command_is_error_result() {
        let result = run(json!({"command": "   "})).await;
        assert!(result.is_error);
        assert!(result.content.contains("empty"));
    }

    #[tokio::test]
    async fn test_missing_command_is_argument_error() {
        let err = ShellTool::default()
            .execute(json!({"env": {}}), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid shell arguments"));
    }

    #[tokio::test]
    async fn test_env_reaches_the_command() {
        let result = run(json!({
            "command": "echo $GREETING",
            "env": {"GREETING": "from the outside"}
        }))
        .await;
        assert_eq!(result.content, "from the outside");
    }

    #[tokio::test]
    async fn test_workdir_param_wins_over_workspace() {
        let workspace = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let requested = elsewhere.path().canonicalize().unwrap();

        let context = ctx().with_workspace_path(workspace.path());
        let result = ShellTool::default()
            .execute(
                json!({"command": "pwd", "workdir": requested}),
                &context,
            )
            .await
            .unwrap();
        assert_eq!(result.content, requested.display().to_string());
    }

    #[tokio::test]
    async fn test_workspace_is_the_default_directory() {
        let workspace = tempfile::tempdir().unwrap();
        let expected = workspace.path().canonicalize().unwrap();

        let context = ctx().with_workspace_path(&expected);
        let result = ShellTool::default()
            .execute(json!({"command": "pwd"}), &context)
            .await
            .unwrap();
        assert_eq!(result.content, expected.display().to_string());
    }

    #[tokio::test]
    async fn test_custom_interpreter() {
        let tool = ShellTool::new("sh", Duration::from_secs(5));
        let result = tool
            .execute(json!({"command": "echo via custom"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result.content, "via custom");
    }

    #[test]
    fn test_schema_requires_command() {
        let schema = ShellTool::default().parameters_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["command"].is_object());
        assert_eq!(schema["required"], json!(["command"]));
    }
}
