//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for HTTP requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Whole-request timeout, including streamed bodies
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

    /// Upper bound on how much of a non-2xx body is read into an error
    pub const MAX_ERROR_BODY_BYTES: usize = 1 << 20;

    pub const USER_AGENT: &str = "kubeai/0.4";
}

/// AI/LLM configuration
pub mod ai {
    /// Default bound on request/execute/feedback rounds in one agent call
    pub const DEFAULT_MAX_ITERATIONS: usize = 10;

    /// Output token cap for Anthropic-format (Bedrock) requests
    pub const BEDROCK_MAX_TOKENS: u32 = 4096;

    pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

    /// Tool output shown in the text sink after a native tool call
    pub const TOOL_OUTPUT_PREVIEW_CHARS: usize = 1000;

    /// Tool output shown in the text sink after a shim action
    pub const SHIM_OUTPUT_PREVIEW_CHARS: usize = 1500;
}

/// Tool execution configuration (host side)
pub mod tools {
    use super::*;

    /// Default tool execution timeout (2 minutes)
    pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
}

/// Config file location
pub mod config {
    /// Directory under the platform config dir
    pub const CONFIG_DIR_NAME: &str = "kubeai";

    pub const CONFIG_FILE_NAME: &str = "config.toml";
}
