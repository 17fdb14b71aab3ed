//! OpenAI-compatible chat completions
//!
//! Serves OpenAI itself plus every server speaking the same protocol
//! (Upstage Solar, a local llama.cpp server). Tool calling runs in two
//! phases: a buffered, tool-aware resolve phase and a streamed, tool-free
//! present phase for the final answer.
//!
//! Whether the model supports native function calling is guessed from the
//! first round trip: zero tool calls there switches the whole call to the
//! Tool Use Shim. A model that legitimately answers without a tool on turn
//! one is misread as unsupported; the shim then still produces an answer.

pub mod shim;

use std::ops::ControlFlow;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::agent::{ensure_active, execute_calls};
use super::provider::{Provider, TextSink, ToolExecutor, ToolProvider};
use super::sse::{sse_data, DONE_MARKER};
use super::transport::{for_each_line, HttpTransport};
use super::types::{non_empty, ChatMessage, ProviderConfig, ToolCall, ToolDefinition};
use crate::error::{ProviderError, Result};
use self::shim::{parse_react_response, ShimStep, REACT_SYSTEM_PROMPT};

pub const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
pub const SOLAR_DEFAULT_ENDPOINT: &str = "https://api.upstage.ai/v1";
pub const SOLAR_DEFAULT_MODEL: &str = "solar-pro2";
pub const EMBEDDED_DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8081/v1";
pub const EMBEDDED_DEFAULT_MODEL: &str = "qwen2.5-0.5b-instruct";

pub(crate) const ASK_SYSTEM_PROMPT: &str = "You are a helpful Kubernetes assistant. Help users manage Kubernetes clusters using natural language. When users ask to create resources, generate the appropriate kubectl commands.";

const NATIVE_TOOLS_SYSTEM_PROMPT: &str = "You are a Kubernetes expert assistant with DIRECT ACCESS to kubectl and bash tools.
ALWAYS USE TOOLS to execute commands - NEVER just suggest commands.
When asked about Kubernetes resources, IMMEDIATELY use the kubectl tool.";

const SUMMARY_REQUEST: &str =
    "Based on the tool execution results above, please provide a clear and helpful summary.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Buffered model turn
struct Reply {
    content: String,
    tool_calls: Vec<ToolCall>,
}

/// Result of the resolve phase
enum Resolution {
    /// No tool calls on the first round trip
    NativeUnsupported,
    /// Tools ran and the model stopped requesting more
    Answered {
        messages: Vec<ChatMessage>,
        content: String,
    },
}

/// Provider for OpenAI-compatible `/chat/completions` servers
pub struct OpenAiProvider {
    name: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    requires_key: bool,
    reasoning_effort: Option<String>,
    max_iterations: usize,
    transport: HttpTransport,
}

impl OpenAiProvider {
    /// OpenAI proper; an API key is required
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Self::build(config, "openai", OPENAI_DEFAULT_ENDPOINT, OPENAI_DEFAULT_MODEL, true)
    }

    /// Upstage Solar; an API key is required
    pub fn solar(config: &ProviderConfig) -> Result<Self> {
        Self::build(config, "solar", SOLAR_DEFAULT_ENDPOINT, SOLAR_DEFAULT_MODEL, true)
    }

    /// Local llama.cpp server; no key
    pub fn embedded(config: &ProviderConfig) -> Result<Self> {
        Self::build(
            config,
            "embedded",
            EMBEDDED_DEFAULT_ENDPOINT,
            EMBEDDED_DEFAULT_MODEL,
            false,
        )
    }

    fn build(
        config: &ProviderConfig,
        name: &str,
        default_endpoint: &str,
        default_model: &str,
        requires_key: bool,
    ) -> Result<Self> {
        let api_key = config.api_key().map(str::to_string);
        if requires_key && api_key.is_none() {
            return Err(ProviderError::MissingApiKey(name.to_string()));
        }

        let endpoint = config.endpoint_or(default_endpoint);
        url::Url::parse(&endpoint).map_err(|_| ProviderError::InvalidEndpoint(endpoint.clone()))?;

        Ok(Self {
            name: name.to_string(),
            model: config.model_or(default_model),
            endpoint,
            api_key,
            requires_key,
            reasoning_effort: non_empty(config.reasoning_effort.as_deref()).map(str::to_string),
            max_iterations: config.iteration_limit(),
            transport: HttpTransport::new(config.skip_tls_verify),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn chat_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream,
            tools,
            reasoning_effort: self.reasoning_effort.as_deref(),
        };
        self.authorize(self.transport.client().post(self.chat_url()))
            .json(&body)
    }

    /// One non-streaming round trip
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Reply> {
        let request = self.chat_request(messages, tools, false);
        let response: ChatResponse = self.transport.send_json(request, cancel).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;
        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or(""),
            "Chat completion received"
        );
        let message = choice.message.unwrap_or_default();
        Ok(Reply {
            content: message.content.unwrap_or_default(),
            tool_calls: message.tool_calls.unwrap_or_default(),
        })
    }

    /// Stream `messages` as SSE, forwarding content deltas
    ///
    /// `lead` is written once the server has accepted the request.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        lead: Option<&str>,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = self.chat_request(messages, &[], true);
        let response = self.transport.send(request, cancel).await?;
        if let Some(lead) = lead {
            sink(lead);
        }

        for_each_line(response, cancel, |line| {
            let Some(data) = sse_data(line) else {
                return ControlFlow::Continue(());
            };
            if data == DONE_MARKER {
                return ControlFlow::Break(());
            }
            // Keep-alives and vendor extras that don't decode are skipped
            if let Ok(chunk) = serde_json::from_str::<ChatResponse>(data) {
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.and_then(|d| d.content) {
                        if !text.is_empty() {
                            sink(&text);
                        }
                    }
                }
            }
            ControlFlow::Continue(())
        })
        .await
    }

    /// Resolve phase: native tool calling, buffered
    async fn resolve_native(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let mut messages = vec![
            ChatMessage::system(NATIVE_TOOLS_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        for iteration in 0..self.max_iterations {
            ensure_active(cancel)?;
            debug!(
                model = %self.model,
                tools = tools.len(),
                iteration = iteration + 1,
                "Native tool request"
            );

            let reply = self.complete(&messages, tools, cancel).await?;
            if reply.tool_calls.is_empty() {
                if iteration == 0 {
                    return Ok(Resolution::NativeUnsupported);
                }
                return Ok(Resolution::Answered {
                    messages,
                    content: reply.content,
                });
            }

            let calls = with_call_ids(reply.tool_calls, iteration);
            messages.push(ChatMessage::assistant_with_tools(reply.content, calls.clone()));
            for result in execute_calls(&calls, executor, sink, cancel).await? {
                messages.push(ChatMessage::tool_result(result.tool_call_id, result.content));
            }
        }

        Err(ProviderError::MaxIterations(self.max_iterations))
    }

    /// Present phase: stream a summary of the resolved conversation
    ///
    /// The resolved answer is already in the sink, so only cancellation
    /// escapes from here.
    async fn present(
        &self,
        mut messages: Vec<ChatMessage>,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        messages.push(ChatMessage::user(SUMMARY_REQUEST));
        match self.stream(&messages, Some("\n\n"), sink, cancel).await {
            Ok(()) => Ok(()),
            Err(ProviderError::Cancelled) => Err(ProviderError::Cancelled),
            Err(e) => {
                warn!("Streaming final response failed: {}", e);
                Ok(())
            }
        }
    }

    /// Shim loop: ReAct prompting without a `tools` field
    async fn run_shim(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut messages = vec![
            ChatMessage::system(REACT_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        for iteration in 0..self.max_iterations {
            ensure_active(cancel)?;
            debug!(iteration = iteration + 1, "Tool Use Shim request");

            let content = self.complete(&messages, &[], cancel).await?.content;
            let parsed = match parse_react_response(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!("Shim reply is not ReAct JSON ({}), showing it as-is", e);
                    sink(&content);
                    return Ok(());
                }
            };

            let action = match parsed.step() {
                ShimStep::Answer(answer) => {
                    sink(answer);
                    return Ok(());
                }
                ShimStep::Unrecognized => {
                    sink(&content);
                    return Ok(());
                }
                ShimStep::Action(action) => action,
            };

            shim::announce_command(sink, &action.command);
            let call = action.to_tool_call(iteration);
            info!(
                tool = call.name(),
                modifies_resource = %action.modifies_resource,
                "Dispatching shim action"
            );
            let result = executor.execute(&call).await;
            shim::report_result(sink, &result);

            messages.push(ChatMessage::assistant(content.clone()));
            messages.push(ChatMessage::user(shim::observation(&result)));
        }

        Err(ProviderError::MaxIterations(self.max_iterations))
    }
}

/// Servers that omit call ids still need a key to correlate results
fn with_call_ids(calls: Vec<ToolCall>, iteration: usize) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(idx, mut call)| {
            if call.id.is_empty() {
                call.id = format!("call_{}_{}", iteration, idx);
            }
            call
        })
        .collect()
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_ready(&self) -> bool {
        !self.requires_key || self.api_key.is_some()
    }

    async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let messages = [ChatMessage::system(ASK_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        self.stream(&messages, None, sink, cancel).await
    }

    async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let messages = [ChatMessage::system(ASK_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        Ok(self.complete(&messages, &[], cancel).await?.content)
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let request = self
            .authorize(self.transport.client().get(format!("{}/models", self.endpoint)));
        let response: ModelsResponse = self.transport.send_json(request, cancel).await?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for OpenAiProvider {
    async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self
            .resolve_native(prompt, tools, sink, executor, cancel)
            .await?
        {
            Resolution::NativeUnsupported => {
                info!(model = %self.model, "No native tool calls on first turn, using Tool Use Shim");
                self.run_shim(prompt, sink, executor, cancel).await
            }
            Resolution::Answered { messages, content } => {
                if !content.is_empty() {
                    sink(&content);
                }
                self.present(messages, sink, cancel).await
            }
        }
    }
}
