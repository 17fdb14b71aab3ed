//! `kubectl` and `bash` tool definitions

use serde_json::json;

use crate::ai::types::ToolDefinition;

pub const KUBECTL_TOOL: &str = "kubectl";
pub const BASH_TOOL: &str = "bash";

pub fn kubectl_tool() -> ToolDefinition {
    ToolDefinition::function(
        KUBECTL_TOOL,
        "Execute a kubectl command against the current cluster (get, describe, logs, apply, delete, scale, rollout, ...). The command must start with \"kubectl\".",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Full kubectl command, e.g. \"kubectl get pods -n default\""
                }
            },
            "required": ["command"]
        }),
    )
}

pub fn bash_tool() -> ToolDefinition {
    ToolDefinition::function(
        BASH_TOOL,
        "Execute a shell command for operations kubectl cannot do directly (filtering output, reading local files, helm, etc.)",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        }),
    )
}

/// Tools advertised to the agent loop by default
pub fn default_tools() -> Vec<ToolDefinition> {
    vec![kubectl_tool(), bash_tool()]
}
