//! Provider-agnostic vocabulary
//!
//! Every adapter translates these types to and from its own wire protocol.
//! The OpenAI chat shape doubles as the canonical serialization because the
//! OpenAI-compatible adapter sends them as-is.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants;

/// Static connection info for one provider instance
///
/// Read-only once a provider has been constructed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registered provider name (`openai`, `gemini`, `bedrock`, `ollama`, ...)
    pub provider: String,
    /// Model id; empty selects the provider default
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// API key, or the AWS secret access key for Bedrock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// AWS access key id (Bedrock only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// AWS session token (Bedrock only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub skip_tls_verify: bool,
    /// Forwarded as `reasoning_effort` by OpenAI-compatible providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Bound on agent-loop rounds, shared by every adapter
    pub max_iterations: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            endpoint: None,
            api_key: None,
            region: None,
            access_key_id: None,
            session_token: None,
            skip_tls_verify: false,
            reasoning_effort: None,
            max_iterations: constants::ai::DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl ProviderConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// API key, treating an empty string as unset
    pub fn api_key(&self) -> Option<&str> {
        non_empty(self.api_key.as_deref())
    }

    /// Endpoint with trailing slashes removed, or `default`
    pub fn endpoint_or(&self, default: &str) -> String {
        non_empty(self.endpoint.as_deref())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn model_or(&self, default: &str) -> String {
        if self.model.is_empty() {
            default.to_string()
        } else {
            self.model.clone()
        }
    }

    /// Loop bound, never below one round
    pub fn iteration_limit(&self) -> usize {
        self.max_iterations.max(1)
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A callable capability advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// A model-issued invocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the result with this call; unique within one turn
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object
    #[serde(default, deserialize_with = "arguments_as_string")]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

/// Some OpenAI-compatible servers send `arguments` as an object rather than
/// the documented JSON string; accept both.
fn arguments_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parsed arguments; malformed or empty arguments become an empty object
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// The `command` argument used by the kubectl and bash tools
    pub fn command(&self) -> Option<String> {
        self.arguments_value()
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Outcome of executing a [`ToolCall`]
///
/// `is_error` only tags the observation handed back to the model; it never
/// stops the agent loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation turn in OpenAI chat shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}
