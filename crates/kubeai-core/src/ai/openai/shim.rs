//! Tool Use Shim
//!
//! A ReAct-style text protocol for models without native function calling.
//! The model answers with one fenced `json` block holding either an
//! `action` to run or a final `answer`; results come back as plain user
//! turns prefixed with `Observation:`.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::ai::agent::truncate_output;
use crate::ai::provider::TextSink;
use crate::ai::types::{ToolCall, ToolResult};
use crate::constants::ai::SHIM_OUTPUT_PREVIEW_CHARS;

pub(crate) const REACT_SYSTEM_PROMPT: &str = r#"You are a Kubernetes expert assistant with DIRECT ACCESS to kubectl and bash tools.

## Response Format
You MUST respond with a JSON code block in one of these formats:

### When you need to execute a command:
```json
{
    "thought": "Your reasoning about what to do",
    "action": {
        "name": "kubectl",
        "reason": "Why you chose this tool",
        "command": "kubectl get pods -A",
        "modifies_resource": "no"
    }
}
```

### When you have the final answer:
```json
{
    "thought": "Your final reasoning",
    "answer": "Your comprehensive answer to the user"
}
```

## CRITICAL RULES:
1. ALWAYS respond with a JSON code block - no other format is accepted
2. For kubectl commands, ALWAYS put the verb immediately after "kubectl" (e.g., "kubectl get pods", NOT "kubectl -n default get pods")
3. Set "modifies_resource" to "yes" for write operations (create, delete, apply, patch, scale), "no" for read operations (get, describe, logs)
4. After receiving command results, provide a final answer summarizing the information

## Available Tools:
- kubectl: Execute kubectl commands (get, describe, logs, apply, delete, scale, etc.)
- bash: Execute shell commands for non-kubectl operations

## Example Flow:
User: "Show me all pods"
```json
{
    "thought": "User wants to see all pods across all namespaces",
    "action": {
        "name": "kubectl",
        "reason": "Need to list all pods",
        "command": "kubectl get pods -A",
        "modifies_resource": "no"
    }
}
```

After receiving results, provide final answer:
```json
{
    "thought": "I have the pod list, now I'll summarize it",
    "answer": "Here are your pods:\n- pod1 in namespace default (Running)\n- pod2 in namespace kube-system (Running)"
}
```"#;

/// One structured model turn
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReActResponse {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub action: Option<ReActAction>,
}

/// A tool invocation requested through the shim
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReActAction {
    /// `kubectl` or `bash`
    pub name: String,
    pub reason: String,
    pub command: String,
    /// `yes`, `no` or `unknown`; advisory, enforcement belongs to the executor
    pub modifies_resource: String,
}

/// What the loop should do with a parsed turn
#[derive(Debug, PartialEq)]
pub enum ShimStep<'a> {
    Answer(&'a str),
    Action(&'a ReActAction),
    /// Valid JSON carrying neither field
    Unrecognized,
}

impl ReActResponse {
    /// A non-empty answer wins over an action
    pub fn step(&self) -> ShimStep<'_> {
        match (&self.answer, &self.action) {
            (Some(answer), _) if !answer.is_empty() => ShimStep::Answer(answer),
            (_, Some(action)) => ShimStep::Action(action),
            _ => ShimStep::Unrecognized,
        }
    }
}

impl ReActAction {
    /// Synthesize the call handed to the executor; the command is JSON-escaped
    pub fn to_tool_call(&self, iteration: usize) -> ToolCall {
        ToolCall::new(
            format!("shim_{}", iteration),
            self.name.clone(),
            json!({ "command": self.command }).to_string(),
        )
    }

    pub fn modifies_resource(&self) -> bool {
        matches!(self.modifies_resource.as_str(), "yes" | "unknown")
    }
}

#[derive(Debug, Error)]
pub enum ShimParseError {
    #[error("no JSON found in response")]
    NoJson,
    #[error("parsing JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of the first ```` ```json ```` fenced block, trimmed
pub fn extract_json_from_markdown(text: &str) -> Option<&str> {
    const OPEN: &str = "```json";
    const CLOSE: &str = "```";

    let start = text.find(OPEN)? + OPEN.len();
    let rest = &text[start..];
    let end = rest.find(CLOSE)?;
    Some(rest[..end].trim())
}

/// Parse a shim reply; a bare JSON object without fences is accepted too
pub fn parse_react_response(text: &str) -> Result<ReActResponse, ShimParseError> {
    let json = match extract_json_from_markdown(text) {
        Some(block) => block,
        None => {
            let trimmed = text.trim();
            if !trimmed.starts_with('{') {
                return Err(ShimParseError::NoJson);
            }
            trimmed
        }
    };
    Ok(serde_json::from_str(json)?)
}

/// User turn that feeds a tool result back to the model
pub fn observation(result: &ToolResult) -> String {
    let status = if result.is_error { "failed" } else { "succeeded" };
    format!(
        "Observation: Command {}. Result:\n{}\n\nNow provide your final answer or next action.",
        status, result.content
    )
}

/// Shim progress markers: the command itself is announced, output gets a
/// longer preview than on the native path
pub(crate) fn announce_command(sink: &mut TextSink<'_>, command: &str) {
    sink(&format!("🔧 Executing: {}\n", command));
}

pub(crate) fn report_result(sink: &mut TextSink<'_>, result: &ToolResult) {
    if result.is_error {
        sink(&format!("❌ Error: {}\n\n", result.content));
    } else {
        let output = truncate_output(&result.content, SHIM_OUTPUT_PREVIEW_CHARS);
        sink(&format!("```\n{}\n```\n\n", output));
    }
}
