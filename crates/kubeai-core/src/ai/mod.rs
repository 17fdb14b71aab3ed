//! LLM provider layer
//!
//! One provider contract, four wire protocols (OpenAI-compatible, Gemini,
//! Bedrock Claude, Ollama) and the bounded agent loop each tool-capable
//! adapter runs.

// Contract and shared vocabulary
pub mod provider;
pub mod types;

// Adapters
pub mod bedrock;
pub mod gemini;
pub mod ollama;
pub mod openai;

// Composition
pub mod client;
pub mod factory;
pub mod retry;

// Shared infrastructure
pub mod agent;
pub mod sse;
pub(crate) mod transport;

pub use client::{AiClient, ConnectionStatus};
pub use factory::ProviderFactory;
pub use provider::{FnExecutor, Provider, TextSink, ToolExecutor, ToolProvider};
