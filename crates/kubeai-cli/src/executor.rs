//! Terminal tool executor
//!
//! Asks on stderr before every tool call unless auto-approval is on, then
//! hands the call to the core process runner.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use kubeai_core::tools::CommandRunner;
use kubeai_core::{ToolCall, ToolExecutor, ToolResult};
use tracing::{info, warn};

const DENIED: &str = "Tool execution cancelled by user";

pub struct TerminalExecutor {
    runner: CommandRunner,
    auto_approve: bool,
}

impl TerminalExecutor {
    pub fn new(runner: CommandRunner, auto_approve: bool) -> Self {
        Self {
            runner,
            auto_approve,
        }
    }
}

#[async_trait]
impl ToolExecutor for TerminalExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        if !self.auto_approve {
            let description = describe(call);
            // stdin reads block, keep them off the runtime workers
            let approved = tokio::task::spawn_blocking(move || {
                let stdin = io::stdin();
                confirm(&mut stdin.lock(), &mut io::stderr(), &description)
            })
            .await
            .unwrap_or_else(|e| {
                warn!("Approval prompt failed: {}", e);
                false
            });

            if !approved {
                info!(tool = call.name(), "Tool call denied");
                return ToolResult::error(&call.id, DENIED);
            }
        }
        self.runner.run(call).await
    }
}

/// One-line summary shown in the approval prompt
fn describe(call: &ToolCall) -> String {
    match call.command() {
        Some(command) => format!("{}: {}", call.name(), command),
        None => format!("{} {}", call.name(), call.function.arguments),
    }
}

/// `y`/`yes` approves; anything else, including EOF, denies
fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, description: &str) -> bool {
    let _ = write!(output, "\n⚠️  Run {}? [y/N] ", description);
    let _ = output.flush();

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
    }
}
