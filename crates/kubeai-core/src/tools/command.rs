//! Runs `kubectl` and `bash` tool calls as child processes

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::definitions::{BASH_TOOL, KUBECTL_TOOL};
use crate::ai::provider::ToolExecutor;
use crate::ai::types::{ToolCall, ToolResult};
use crate::constants;

/// Executes tool calls without asking anyone; wrap it to add approval
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self {
            timeout: constants::tools::DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl CommandRunner {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Validate the call and run its command through `sh -c`
    pub async fn run(&self, call: &ToolCall) -> ToolResult {
        let Some(command) = call.command().filter(|c| !c.trim().is_empty()) else {
            return ToolResult::error(&call.id, "missing 'command' argument");
        };

        match call.name() {
            KUBECTL_TOOL => {
                let first = command.split_whitespace().next().unwrap_or_default();
                if first != "kubectl" {
                    return ToolResult::error(
                        &call.id,
                        format!("kubectl tool only runs kubectl commands, got: {}", command),
                    );
                }
            }
            BASH_TOOL => {}
            other => return ToolResult::error(&call.id, format!("unknown tool: {}", other)),
        }

        info!(tool = call.name(), command = %command, "Executing tool command");
        self.run_command(&call.id, &command).await
    }

    async fn run_command(&self, call_id: &str, command: &str) -> ToolResult {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
                    (true, true) => String::new(),
                    (false, true) => stdout.trim_end().to_string(),
                    (true, false) => stderr.trim_end().to_string(),
                    (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
                };
                let exit_code = output.status.code().unwrap_or(-1);
                debug!(exit_code, bytes = combined.len(), "Tool command finished");

                if output.status.success() {
                    ToolResult::success(call_id, combined)
                } else if combined.is_empty() {
                    ToolResult::error(call_id, format!("command exited with status {}", exit_code))
                } else {
                    ToolResult::error(call_id, combined)
                }
            }
            Ok(Err(e)) => ToolResult::error(call_id, format!("Failed to execute command: {}", e)),
            Err(_) => ToolResult::error(
                call_id,
                format!("Command timed out after {} seconds", self.timeout.as_secs()),
            ),
        }
    }
}

#[async_trait]
impl ToolExecutor for CommandRunner {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.run(call).await
    }
}
