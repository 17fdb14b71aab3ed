//! AWS Bedrock, Anthropic Claude models
//!
//! Requests use the Anthropic Messages format posted to
//! `/model/{model}/invoke` and signed with SigV4. Plain asks send flat
//! string content; the agent loop uses content-block arrays
//! (`text`, `tool_use`, `tool_result`).

pub mod sigv4;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use self::sigv4::{Credentials, SignableRequest};
use super::agent::{ensure_active, execute_calls};
use super::openai::ASK_SYSTEM_PROMPT;
use super::provider::{Provider, TextSink, ToolExecutor, ToolProvider};
use super::transport::HttpTransport;
use super::types::{non_empty, ProviderConfig, ToolCall, ToolDefinition};
use crate::constants::ai::{BEDROCK_ANTHROPIC_VERSION, BEDROCK_MAX_TOKENS};
use crate::error::{ProviderError, Result};

pub const BEDROCK_DEFAULT_MODEL: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
pub const BEDROCK_DEFAULT_REGION: &str = "us-east-1";
const SERVICE: &str = "bedrock";

const TOOLS_SYSTEM_PROMPT: &str = "You are a helpful Kubernetes assistant with DIRECT ACCESS to kubectl and bash tools. ALWAYS USE TOOLS to execute commands - NEVER just suggest commands.";

/// Claude models offered on Bedrock
const KNOWN_MODELS: &[&str] = &[
    "anthropic.claude-3-5-sonnet-20241022-v2:0",
    "anthropic.claude-3-5-haiku-20241022-v1:0",
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "anthropic.claude-3-haiku-20240307-v1:0",
    "anthropic.claude-3-opus-20240229-v1:0",
];

pub fn default_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{}.amazonaws.com", region)
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ClaudeTool<'a>>,
}

#[derive(Serialize)]
struct ClaudeTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Block types this adapter does not act on
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

impl InvokeResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

pub struct BedrockProvider {
    model: String,
    region: String,
    endpoint: String,
    credentials: Credentials,
    max_iterations: usize,
    transport: HttpTransport,
}

impl BedrockProvider {
    /// Credentials and region fall back to the standard `AWS_*` variables
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    /// Like [`BedrockProvider::new`] with an explicit environment lookup
    pub fn with_env<F>(config: &ProviderConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |configured: Option<&str>, var: &str| -> Option<String> {
            non_empty(configured)
                .map(str::to_string)
                .or_else(|| env(var).filter(|v| !v.trim().is_empty()))
        };

        let access_key_id = lookup(config.access_key_id.as_deref(), "AWS_ACCESS_KEY_ID");
        let secret_access_key = lookup(config.api_key.as_deref(), "AWS_SECRET_ACCESS_KEY");
        let (Some(access_key_id), Some(secret_access_key)) = (access_key_id, secret_access_key)
        else {
            return Err(ProviderError::MissingAwsCredentials);
        };
        let credentials = Credentials {
            access_key_id,
            secret_access_key,
            session_token: lookup(config.session_token.as_deref(), "AWS_SESSION_TOKEN"),
        };

        let region = lookup(config.region.as_deref(), "AWS_REGION")
            .unwrap_or_else(|| BEDROCK_DEFAULT_REGION.to_string());
        let endpoint = config.endpoint_or(&default_endpoint(&region));
        Url::parse(&endpoint).map_err(|_| ProviderError::InvalidEndpoint(endpoint.clone()))?;

        Ok(Self {
            model: config.model_or(BEDROCK_DEFAULT_MODEL),
            region,
            endpoint,
            credentials,
            max_iterations: config.iteration_limit(),
            transport: HttpTransport::new(config.skip_tls_verify),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Model ids contain `:`, so the path segment is percent-encoded
    fn invoke_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/model/{}/invoke",
            self.endpoint,
            urlencoding::encode(&self.model)
        );
        Url::parse(&raw).map_err(|_| ProviderError::InvalidEndpoint(raw))
    }

    async fn invoke(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<InvokeResponse> {
        let body = InvokeRequest {
            anthropic_version: BEDROCK_ANTHROPIC_VERSION,
            max_tokens: BEDROCK_MAX_TOKENS,
            system,
            messages,
            tools: tools
                .iter()
                .map(|t| ClaudeTool {
                    name: &t.function.name,
                    description: &t.function.description,
                    input_schema: &t.function.parameters,
                })
                .collect(),
        };
        let payload = serde_json::to_vec(&body)?;
        let url = self.invoke_url()?;

        let signed = sigv4::sign(
            &SignableRequest {
                method: "POST",
                url: &url,
                content_type: "application/json",
                body: &payload,
            },
            &self.credentials,
            &self.region,
            SERVICE,
            Utc::now(),
        )?;

        let mut request = self
            .transport
            .client()
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(AUTHORIZATION, signed.authorization);
        if let Some(token) = signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response: InvokeResponse = self.transport.send_json(request.body(payload), cancel).await?;
        debug!(
            stop_reason = response.stop_reason.as_deref().unwrap_or(""),
            blocks = response.content.len(),
            "Bedrock response received"
        );
        Ok(response)
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_ready(&self) -> bool {
        !self.credentials.access_key_id.is_empty() && !self.credentials.secret_access_key.is_empty()
    }

    /// Bedrock replies are not streamed; the whole answer arrives at once
    async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let reply = self.ask_non_streaming(prompt, cancel).await?;
        sink(&reply);
        Ok(())
    }

    async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let messages = [Message {
            role: "user",
            content: MessageContent::Text(prompt.to_string()),
        }];
        let response = self.invoke(ASK_SYSTEM_PROMPT, &messages, &[], cancel).await?;
        if response.content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(response.text())
    }

    async fn list_models(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect())
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for BedrockProvider {
    async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut messages = vec![Message {
            role: "user",
            content: MessageContent::Blocks(vec![ContentBlock::Text {
                text: prompt.to_string(),
            }]),
        }];

        for iteration in 0..self.max_iterations {
            ensure_active(cancel)?;
            debug!(
                model = %self.model,
                tools = tools.len(),
                iteration = iteration + 1,
                "Bedrock tool request"
            );

            let response = self
                .invoke(TOOLS_SYSTEM_PROMPT, &messages, tools, cancel)
                .await?;

            let text = response.text();
            if !text.is_empty() {
                sink(&text);
            }

            let calls: Vec<ToolCall> = response
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        let arguments = if input.is_null() {
                            "{}".to_string()
                        } else {
                            input.to_string()
                        };
                        Some(ToolCall::new(id.clone(), name.clone(), arguments))
                    }
                    _ => None,
                })
                .collect();
            if calls.is_empty() {
                return Ok(());
            }

            let assistant_blocks = response
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } if !text.is_empty() => {
                        Some(ContentBlock::Text { text })
                    }
                    ContentBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                        id,
                        name,
                        input: if input.is_null() {
                            Value::Object(Map::new())
                        } else {
                            input
                        },
                    }),
                    _ => None,
                })
                .collect();
            messages.push(Message {
                role: "assistant",
                content: MessageContent::Blocks(assistant_blocks),
            });

            let results = execute_calls(&calls, executor, sink, cancel).await?;
            messages.push(Message {
                role: "user",
                content: MessageContent::Blocks(
                    results
                        .into_iter()
                        .map(|result| ContentBlock::ToolResult {
                            tool_use_id: result.tool_call_id,
                            content: result.content,
                            is_error: result.is_error,
                        })
                        .collect(),
                ),
            });
        }

        Err(ProviderError::MaxIterations(self.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_missing_credentials_fail_construction() {
        let cfg = ProviderConfig::new("bedrock", "");
        assert!(matches!(
            BedrockProvider::with_env(&cfg, env(&[])),
            Err(ProviderError::MissingAwsCredentials)
        ));
        let only_id = env(&[("AWS_ACCESS_KEY_ID", "AKID")]);
        assert!(BedrockProvider::with_env(&cfg, only_id).is_err());
    }

    #[test]
    fn test_credentials_and_region_from_env() {
        let cfg = ProviderConfig::new("bedrock", "");
        let provider = BedrockProvider::with_env(
            &cfg,
            env(&[
                ("AWS_ACCESS_KEY_ID", "AKID"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_SESSION_TOKEN", "token"),
                ("AWS_REGION", "eu-west-1"),
            ]),
        )
        .unwrap();
        assert!(provider.is_ready());
        assert_eq!(provider.region(), "eu-west-1");
        assert_eq!(provider.model(), BEDROCK_DEFAULT_MODEL);
        assert_eq!(provider.endpoint(), "https://bedrock-runtime.eu-west-1.amazonaws.com");
        assert_eq!(provider.credentials.session_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_config_overrides_env() {
        let mut cfg = ProviderConfig::new("bedrock", "anthropic.claude-3-haiku-20240307-v1:0")
            .with_api_key("cfg-secret")
            .with_region("ap-northeast-2");
        cfg.access_key_id = Some("CFGKEY".to_string());
        let provider = BedrockProvider::with_env(
            &cfg,
            env(&[("AWS_ACCESS_KEY_ID", "ENVKEY"), ("AWS_SECRET_ACCESS_KEY", "env")]),
        )
        .unwrap();
        assert_eq!(provider.credentials.access_key_id, "CFGKEY");
        assert_eq!(provider.credentials.secret_access_key, "cfg-secret");
        assert_eq!(provider.region(), "ap-northeast-2");
        assert_eq!(
            provider.invoke_url().unwrap().path(),
            "/model/anthropic.claude-3-haiku-20240307-v1%3A0/invoke"
        );
    }

    #[test]
    fn test_plain_request_uses_flat_content() {
        let messages = [Message {
            role: "user",
            content: MessageContent::Text("ping".to_string()),
        }];
        let body = serde_json::to_value(InvokeRequest {
            anthropic_version: BEDROCK_ANTHROPIC_VERSION,
            max_tokens: BEDROCK_MAX_TOKENS,
            system: "",
            messages: &messages,
            tools: Vec::new(),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": "ping"}]
            })
        );
    }

    #[test]
    fn test_content_blocks_roundtrip() {
        let response: InvokeResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "kubectl", "input": {"command": "kubectl get pods"}},
                {"type": "thinking", "thinking": "hidden"}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        assert_eq!(response.text(), "Checking.");
        assert_eq!(response.content[2], ContentBlock::Other);

        let result = ContentBlock::ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: "denied".to_string(),
            is_error: true,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "tool_result", "tool_use_id": "toolu_1", "content": "denied", "is_error": true})
        );
        let ok = ContentBlock::ToolResult {
            tool_use_id: "toolu_2".to_string(),
            content: "fine".to_string(),
            is_error: false,
        };
        assert!(serde_json::to_value(&ok).unwrap().get("is_error").is_none());
    }

    #[tokio::test]
    async fn test_static_model_list() {
        let cfg = ProviderConfig::new("bedrock", "").with_api_key("s");
        let provider = BedrockProvider::with_env(&cfg, env(&[("AWS_ACCESS_KEY_ID", "AKID")])).unwrap();
        let models = provider.list_models(&CancellationToken::new()).await.unwrap();
        assert_eq!(models.len(), 5);
        assert!(models.iter().all(|m| m.starts_with("anthropic.claude-3")));
    }
}
