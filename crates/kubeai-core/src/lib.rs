//! KubeAI Core - multi-provider LLM layer for the Kubernetes dashboard
//!
//! This crate provides:
//! - Provider adapters for OpenAI-compatible servers, Gemini, Bedrock and Ollama
//! - The bounded agentic tool-calling loop and the Tool Use Shim fallback
//! - A provider factory, retry decorator and client facade
//! - Built-in `kubectl`/`bash` tool definitions and a process runner

pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod tools;

// Re-exports for convenience
pub use ai::types::{ChatMessage, ProviderConfig, Role, ToolCall, ToolDefinition, ToolResult};
pub use ai::{AiClient, ConnectionStatus, Provider, ProviderFactory, ToolExecutor, ToolProvider};
pub use config::LlmConfig;
pub use error::{ProviderError, Result};
