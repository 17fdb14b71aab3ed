//! Core AI Client
//!
//! Builds the configured provider through the factory, optionally wrapped
//! in the retry decorator, and routes calls to it.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ai::factory::ProviderFactory;
use crate::ai::provider::{Provider, TextSink, ToolExecutor};
use crate::ai::retry::RetryProvider;
use crate::ai::types::ToolDefinition;
use crate::config::LlmConfig;
use crate::error::Result;

/// Well-known endpoint for a provider name, when it has a fixed one
pub fn default_endpoint(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "solar" => Some("https://api.upstage.ai/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "gemini" => Some("https://generativelanguage.googleapis.com/v1beta"),
        "ollama" => Some("http://localhost:11434"),
        "embedded" | "llamacpp" => Some("http://127.0.0.1:8081/v1"),
        _ => None,
    }
}

pub struct AiClient {
    config: LlmConfig,
    provider: Box<dyn Provider>,
}

impl AiClient {
    /// Create a client using the built-in providers
    pub fn new(config: LlmConfig) -> Result<Self> {
        Self::with_factory(config, &ProviderFactory::default())
    }

    pub fn with_factory(config: LlmConfig, factory: &ProviderFactory) -> Result<Self> {
        let provider = factory.create(&config.to_provider_config())?;
        let provider: Box<dyn Provider> = match config.retry_config() {
            Some(retry) => {
                debug!(
                    max_attempts = retry.max_attempts,
                    max_backoff_ms = retry.max_backoff.as_millis() as u64,
                    "Retry enabled"
                );
                Box::new(RetryProvider::new(provider, retry))
            }
            None => provider,
        };
        info!(
            provider = provider.name(),
            model = provider.model(),
            "AI client ready"
        );
        Ok(Self { config, provider })
    }

    /// Wrap an already constructed provider
    pub fn from_provider(config: LlmConfig, provider: Box<dyn Provider>) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Configured endpoint, else the provider's well-known default
    pub fn endpoint(&self) -> String {
        match self.config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_string(),
            None => default_endpoint(&self.config.provider)
                .map(str::to_string)
                .unwrap_or_else(|| self.provider.endpoint().to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.provider.is_ready()
    }

    pub fn supports_tools(&self) -> bool {
        self.provider.as_tool_provider().is_some()
    }

    pub async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.provider.ask(prompt, sink, cancel).await
    }

    pub async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        self.provider.ask_non_streaming(prompt, cancel).await
    }

    pub async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.provider.list_models(cancel).await
    }

    /// Run the agent loop; providers without tool calling get a plain ask
    pub async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.provider.as_tool_provider() {
            Some(tool_provider) => {
                tool_provider
                    .ask_with_tools(prompt, tools, sink, executor, cancel)
                    .await
            }
            None => {
                debug!(provider = self.provider.name(), "No tool support, falling back to ask");
                self.provider.ask(prompt, sink, cancel).await
            }
        }
    }
}
