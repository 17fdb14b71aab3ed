//! Ollama local models
//!
//! `/api/chat` streams newline-delimited JSON objects and ends with a
//! `done: true` object instead of an SSE `[DONE]` marker.

use std::ops::ControlFlow;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::agent::{ensure_active, execute_calls};
use super::provider::{Provider, TextSink, ToolExecutor, ToolProvider};
use super::transport::{for_each_line, HttpTransport};
use super::types::{ProviderConfig, ToolCall, ToolDefinition, ToolResult};
use crate::error::{ProviderError, Result};

pub const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3.2";

const ASK_SYSTEM_PROMPT: &str = "You are a helpful Kubernetes assistant. Help users manage Kubernetes clusters using natural language. When users ask to create resources, generate the appropriate kubectl commands.";

const TOOLS_SYSTEM_PROMPT: &str = "You are a Kubernetes expert assistant with DIRECT ACCESS to kubectl and bash tools.
ALWAYS USE TOOLS to execute commands - NEVER just suggest commands.
When asked about Kubernetes resources, IMMEDIATELY use the kubectl tool.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl OllamaMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    fn tool_result(call: &ToolCall, result: ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.tool_call_id),
            tool_name: Some(call.name().to_string()),
            ..Self::new("tool", result.content)
        }
    }
}

/// Ollama sends arguments as a JSON object and expects them back that way
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

fn to_tool_calls(calls: &[OllamaToolCall], iteration: usize) -> Vec<ToolCall> {
    calls
        .iter()
        .enumerate()
        .map(|(idx, call)| {
            let arguments = match &call.function.arguments {
                Value::String(raw) => raw.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            let id = call
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("ollama_{}_{}", iteration, idx));
            ToolCall::new(
                id,
                call.function.name.clone(),
                arguments,
            )
        })
        .collect()
}

pub struct OllamaProvider {
    model: String,
    endpoint: String,
    max_iterations: usize,
    transport: HttpTransport,
}

impl OllamaProvider {
    /// Local server, no key needed
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            model: config.model_or(OLLAMA_DEFAULT_MODEL),
            endpoint: config.endpoint_or(OLLAMA_DEFAULT_ENDPOINT),
            max_iterations: config.iteration_limit(),
            transport: HttpTransport::new(config.skip_tls_verify),
        })
    }

    fn chat_request(
        &self,
        messages: &[OllamaMessage],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> RequestBuilder {
        self.transport
            .client()
            .post(format!("{}/api/chat", self.endpoint))
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream,
                tools,
            })
    }

    fn ask_messages(prompt: &str) -> [OllamaMessage; 2] {
        [
            OllamaMessage::new("system", ASK_SYSTEM_PROMPT),
            OllamaMessage::new("user", prompt),
        ]
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_ready(&self) -> bool {
        !self.endpoint.is_empty()
    }

    async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = self.chat_request(&Self::ask_messages(prompt), &[], true);
        let response = self.transport.send(request, cancel).await?;

        for_each_line(response, cancel, |line| {
            let Ok(chunk) = serde_json::from_str::<ChatResponse>(line) else {
                return ControlFlow::Continue(());
            };
            if !chunk.message.content.is_empty() {
                sink(&chunk.message.content);
            }
            if chunk.done {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await
    }

    async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let request = self.chat_request(&Self::ask_messages(prompt), &[], false);
        let response: ChatResponse = self.transport.send_json(request, cancel).await?;
        if response.message.content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(response.message.content)
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let request = self
            .transport
            .client()
            .get(format!("{}/api/tags", self.endpoint));
        let response: TagsResponse = self.transport.send_json(request, cancel).await?;
        Ok(response.models.into_iter().map(|m| m.name).collect())
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for OllamaProvider {
    async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut messages = vec![
            OllamaMessage::new("system", TOOLS_SYSTEM_PROMPT),
            OllamaMessage::new("user", prompt),
        ];

        for iteration in 0..self.max_iterations {
            ensure_active(cancel)?;
            debug!(
                model = %self.model,
                tools = tools.len(),
                iteration = iteration + 1,
                "Ollama tool request"
            );

            let request = self.chat_request(&messages, tools, false);
            let response: ChatResponse = self.transport.send_json(request, cancel).await?;
            let reply = response.message;

            if reply.tool_calls.is_empty() {
                if !reply.content.is_empty() {
                    sink(&reply.content);
                }
                return Ok(());
            }

            let calls = to_tool_calls(&reply.tool_calls, iteration);
            messages.push(OllamaMessage {
                tool_calls: reply.tool_calls,
                ..OllamaMessage::new("assistant", reply.content)
            });

            let results = execute_calls(&calls, executor, sink, cancel).await?;
            messages.extend(
                calls
                    .iter()
                    .zip(results)
                    .map(|(call, result)| OllamaMessage::tool_result(call, result)),
            );
        }

        Err(ProviderError::MaxIterations(self.max_iterations))
    }
}
