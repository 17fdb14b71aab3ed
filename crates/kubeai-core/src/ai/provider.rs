//! Provider contract
//!
//! `Provider` is the surface every adapter implements. Tool calling is an
//! optional capability probed through [`Provider::as_tool_provider`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{ToolCall, ToolDefinition, ToolResult};
use crate::error::Result;

/// Append-only text sink
///
/// Receives streamed tokens as well as progress markers such as
/// `🔧 Executing: kubectl`. Hosts must not parse it as structured events.
pub type TextSink<'a> = dyn FnMut(&str) + Send + 'a;

/// An LLM backend reachable over one wire protocol
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered provider name
    fn name(&self) -> &str;

    /// Model id requests are sent to
    fn model(&self) -> &str;

    /// Base URL requests are sent to
    fn endpoint(&self) -> &str;

    /// Whether auth material is present; never touches the network
    fn is_ready(&self) -> bool;

    /// Stream a plain-text reply into `sink`
    async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String>;

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Tool-calling capability, when the adapter has one
    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        None
    }
}

/// Providers that can drive the bounded agent loop
#[async_trait]
pub trait ToolProvider: Provider {
    /// Run the request/execute/feedback cycle until the model answers
    ///
    /// Tool calls are handed to `executor` one at a time, in the order the
    /// model issued them. Fails with `MaxIterations` when the model keeps
    /// requesting tools past the configured bound.
    async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Host-side approval and execution of tool calls
///
/// May wait indefinitely (for instance on a human approval prompt); the
/// agent loop imposes no timeout around it.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> ToolResult;
}

/// Adapts a synchronous closure into a [`ToolExecutor`]
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F> ToolExecutor for FnExecutor<F>
where
    F: Fn(&ToolCall) -> ToolResult + Send + Sync,
{
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        (self.0)(call)
    }
}
