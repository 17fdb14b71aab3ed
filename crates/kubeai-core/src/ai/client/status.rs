//! Connection checks

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::core::AiClient;
use crate::error::Result;

const PROBE_PROMPT: &str = "Say 'OK' if you can hear me.";

/// Outcome of [`AiClient::test_connection`], serialized for status views
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub provider: String,
    pub model: String,
    /// Endpoint as configured; empty when the provider default is used
    pub endpoint: String,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AiClient {
    /// Cheapest possible round trip
    pub async fn check_status(&self, cancel: &CancellationToken) -> Result<()> {
        self.ask_non_streaming("ping", cancel).await.map(|_| ())
    }

    /// Timed probe request with a hint for common misconfigurations
    pub async fn test_connection(&self, cancel: &CancellationToken) -> ConnectionStatus {
        let mut status = ConnectionStatus {
            provider: self.provider_name().to_string(),
            model: self.model().to_string(),
            endpoint: self.config().endpoint.clone().unwrap_or_default(),
            ..Default::default()
        };

        if !self.is_ready() {
            status.error = Some(
                "AI provider not ready - check API key and endpoint configuration".to_string(),
            );
            return status;
        }

        let start = Instant::now();
        let result = self.ask_non_streaming(PROBE_PROMPT, cancel).await;
        status.response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => {
                status.connected = true;
                status.message = Some(format!(
                    "Successfully connected to {} ({})",
                    status.provider, status.model
                ));
                info!(
                    provider = %status.provider,
                    elapsed_ms = status.response_time_ms,
                    "Connection test passed"
                );
            }
            Err(e) => {
                warn!(provider = %status.provider, "Connection test failed: {}", e);
                status.error = Some(e.to_string());
                status.message = match status.provider.as_str() {
                    "openai" if status.endpoint.is_empty() => {
                        Some("Using default OpenAI endpoint. Check your API key.".to_string())
                    }
                    "ollama" => Some(format!("Ensure Ollama is running at {}", self.endpoint())),
                    _ => None,
                };
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::core::tests::StubProvider;
    use crate::config::LlmConfig;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_connection_success() {
        let client = AiClient::from_provider(
            LlmConfig::default(),
            Box::new(StubProvider::answering("OK")),
        );
        let status = client.test_connection(&CancellationToken::new()).await;
        assert!(status.connected);
        assert_eq!(status.error, None);
        assert_eq!(
            status.message.as_deref(),
            Some("Successfully connected to ollama (stub)")
        );
    }

    #[tokio::test]
    async fn test_connection_failure_hint() {
        let mut stub = StubProvider::answering("");
        stub.reply = Err(503);
        let config = LlmConfig {
            provider: "ollama".to_string(),
            ..Default::default()
        };
        let client = AiClient::from_provider(config, Box::new(stub));
        let status = client.test_connection(&CancellationToken::new()).await;
        assert!(!status.connected);
        assert_eq!(
            status.error.as_deref(),
            Some("API error (status 503): stub failure")
        );
        assert_eq!(
            status.message.as_deref(),
            Some("Ensure Ollama is running at http://localhost:11434")
        );

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["connected"], false);
        assert!(json.get("response_time_ms").is_some());
    }

    #[tokio::test]
    async fn test_not_ready_skips_network() {
        let mut stub = StubProvider::answering("OK");
        stub.ready = false;
        let prompts = stub.prompts.clone();
        let client = AiClient::from_provider(LlmConfig::default(), Box::new(stub));

        let status = client.test_connection(&CancellationToken::new()).await;
        assert!(!status.connected);
        assert!(status.error.unwrap().contains("not ready"));
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_check_status() {
        let client = AiClient::from_provider(
            LlmConfig::default(),
            Box::new(StubProvider::answering("pong")),
        );
        assert!(client.check_status(&CancellationToken::new()).await.is_ok());
    }
}
