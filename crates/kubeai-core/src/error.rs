//! Error type shared by every provider adapter

use std::time::Duration;

use thiserror::Error;

use crate::ai::retry::is_retryable_status;

/// Errors surfaced by providers and the agent loop
#[derive(Debug, Error)]
pub enum ProviderError {
    /// DNS, connect, TLS, timeout or body-read failure
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx HTTP status; body is size-capped
    #[error("API error (status {status}): {body}")]
    Api {
        status: u16,
        body: String,
        /// Parsed `Retry-After` header, if the server sent one
        retry_after: Option<Duration>,
    },

    /// Response body did not match the provider's wire format
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Well-formed response without any choice/candidate/content
    #[error("no response from API")]
    EmptyResponse,

    /// The agent loop kept requesting tools past its bound
    #[error("exceeded maximum iterations ({0})")]
    MaxIterations(usize),

    #[error("API key not configured for provider {0}")]
    MissingApiKey(String),

    #[error("AWS credentials not configured (set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY)")]
    MissingAwsCredentials,

    #[error("invalid model name {model:?}: {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("unknown provider: {0} (available: {1})")]
    UnknownProvider(String, String),

    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),

    #[error("failed to sign request: {0}")]
    Signing(String),

    /// Cancellation token fired
    #[error("request cancelled")]
    Cancelled,

    #[error("max retries exceeded: {0}")]
    RetriesExhausted(Box<ProviderError>),
}

impl ProviderError {
    /// Whether a retry of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => is_retryable_status(*status),
            ProviderError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn api(status: u16, body: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Lets hosts tell a runaway agent apart from transport failures
    pub fn is_max_iterations(&self) -> bool {
        matches!(self, ProviderError::MaxIterations(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
