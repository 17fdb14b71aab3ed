//! Google Gemini (`generativelanguage.googleapis.com`)
//!
//! Tools travel as `functionDeclarations`; the model answers with mixed
//! `text`/`functionCall` parts in one `model` turn, and every result of that
//! turn goes back in a single `user` turn of `functionResponse` parts.

use std::ops::ControlFlow;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::agent::{ensure_active, execute_calls};
use super::openai::ASK_SYSTEM_PROMPT;
use super::provider::{Provider, TextSink, ToolExecutor, ToolProvider};
use super::sse::sse_data;
use super::transport::{for_each_line, HttpTransport};
use super::types::{ProviderConfig, ToolCall, ToolDefinition};
use crate::error::{ProviderError, Result};

pub const GEMINI_DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";

const TOOLS_SYSTEM_PROMPT: &str = "You are a Kubernetes expert assistant with DIRECT ACCESS to kubectl and bash tools.
ALWAYS USE TOOLS to execute commands - NEVER just suggest commands.
When asked about Kubernetes resources, IMMEDIATELY use the kubectl tool.";

/// Known model families; anything else is rejected at construction
const VALID_MODEL_PREFIXES: &[&str] = &[
    "gemini-3-",
    "gemini-2.5-",
    "gemini-2.0-",
    "gemini-1.5-",
    "gemini-1.0-",
    "gemini-pro",
    "gemini-ultra",
    "gemini-nano",
];

/// Reject model names that would only fail later as a 404
pub fn validate_gemini_model(model: &str) -> Result<()> {
    if !model.starts_with("gemini-") {
        return Err(ProviderError::InvalidModel {
            model: model.to_string(),
            reason: "must start with 'gemini-' (e.g., gemini-2.0-flash, gemini-1.5-pro)".to_string(),
        });
    }
    if VALID_MODEL_PREFIXES.iter().any(|p| model.starts_with(p)) {
        return Ok(());
    }
    Err(ProviderError::InvalidModel {
        model: model.to_string(),
        reason: "use a versioned name like gemini-2.5-flash, gemini-2.5-pro, gemini-2.0-flash"
            .to_string(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
                ..Default::default()
            }],
        }
    }
}

/// One content part; fields this adapter does not model (such as
/// `thoughtSignature`) are kept so model turns echo back unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponsePart>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Part {
    fn is_thought(&self) -> bool {
        self.extra.get("thought").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Visible text, if this part carries any
    fn visible_text(&self) -> Option<&str> {
        match &self.text {
            Some(text) if !text.is_empty() && !self.is_thought() => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponsePart {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations<'a> {
    function_declarations: Vec<FunctionDeclaration<'a>>,
}

#[derive(Serialize)]
struct FunctionDeclaration<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn into_parts(self) -> Vec<Part> {
        self.candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

fn declarations(tools: &[ToolDefinition]) -> Vec<ToolDeclarations<'_>> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![ToolDeclarations {
        function_declarations: tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: &t.function.name,
                description: &t.function.description,
                parameters: &t.function.parameters,
            })
            .collect(),
    }]
}

pub struct GeminiProvider {
    model: String,
    endpoint: String,
    api_key: String,
    max_iterations: usize,
    transport: HttpTransport,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let model = config.model_or(GEMINI_DEFAULT_MODEL);
        validate_gemini_model(&model)?;
        let api_key = config
            .api_key()
            .ok_or_else(|| ProviderError::MissingApiKey("gemini".to_string()))?
            .to_string();

        Ok(Self {
            model,
            endpoint: config.endpoint_or(GEMINI_DEFAULT_ENDPOINT),
            api_key,
            max_iterations: config.iteration_limit(),
            transport: HttpTransport::new(config.skip_tls_verify),
        })
    }

    fn model_request(&self, method: &str, body: &GenerateRequest<'_>, stream: bool) -> RequestBuilder {
        let url = format!("{}/models/{}:{}", self.endpoint, self.model, method);
        let mut request = self
            .transport
            .client()
            .post(url)
            .query(&[("key", self.api_key.as_str())]);
        if stream {
            request = request.query(&[("alt", "sse")]);
        }
        request.json(body)
    }

    async fn generate(
        &self,
        contents: &[Content],
        system: &str,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Vec<Part>> {
        let body = GenerateRequest {
            contents,
            system_instruction: Content::text(None, system),
            tools: declarations(tools),
        };
        let request = self.model_request("generateContent", &body, false);
        let response: GenerateResponse = self.transport.send_json(request, cancel).await?;
        let parts = response.into_parts();
        if parts.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(parts)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let contents = [Content::text(Some("user"), prompt)];
        let body = GenerateRequest {
            contents: &contents,
            system_instruction: Content::text(None, ASK_SYSTEM_PROMPT),
            tools: Vec::new(),
        };
        let request = self.model_request("streamGenerateContent", &body, true);
        let response = self.transport.send(request, cancel).await?;

        for_each_line(response, cancel, |line| {
            if let Some(chunk) = sse_data(line)
                .and_then(|data| serde_json::from_str::<GenerateResponse>(data).ok())
            {
                for part in chunk.into_parts() {
                    if let Some(text) = part.visible_text() {
                        sink(text);
                    }
                }
            }
            ControlFlow::Continue(())
        })
        .await
    }

    async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let contents = [Content::text(Some("user"), prompt)];
        let parts = self
            .generate(&contents, ASK_SYSTEM_PROMPT, &[], cancel)
            .await?;
        Ok(parts.iter().filter_map(Part::visible_text).collect())
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let request = self
            .transport
            .client()
            .get(format!("{}/models", self.endpoint))
            .query(&[("key", self.api_key.as_str())]);
        let response: ModelsResponse = self.transport.send_json(request, cancel).await?;
        Ok(response
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for GeminiProvider {
    async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut contents = vec![Content::text(Some("user"), prompt)];

        for iteration in 0..self.max_iterations {
            ensure_active(cancel)?;
            debug!(
                model = %self.model,
                tools = tools.len(),
                iteration = iteration + 1,
                "Gemini tool request"
            );

            let parts = self
                .generate(&contents, TOOLS_SYSTEM_PROMPT, tools, cancel)
                .await?;

            let calls: Vec<ToolCall> = parts
                .iter()
                .filter_map(|p| p.function_call.as_ref())
                .enumerate()
                .map(|(idx, fc)| {
                    ToolCall::new(
                        format!("gemini_{}_{}_{}", iteration, idx, fc.name),
                        fc.name.clone(),
                        Value::Object(fc.args.clone()).to_string(),
                    )
                })
                .collect();

            if calls.is_empty() {
                for text in parts.iter().filter_map(Part::visible_text) {
                    sink(text);
                }
                return Ok(());
            }

            contents.push(Content {
                role: Some("model".to_string()),
                parts,
            });

            let results = execute_calls(&calls, executor, sink, cancel).await?;
            let response_parts = calls
                .iter()
                .zip(results)
                .map(|(call, result)| Part {
                    function_response: Some(FunctionResponsePart {
                        name: call.name().to_string(),
                        response: json!({ "result": result.content }),
                    }),
                    ..Default::default()
                })
                .collect();
            contents.push(Content {
                role: Some("user".to_string()),
                parts: response_parts,
            });
        }

        Err(ProviderError::MaxIterations(self.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_gemini_model() {
        for valid in [
            "gemini-2.5-flash",
            "gemini-2.5-pro",
            "gemini-2.0-flash",
            "gemini-1.5-pro",
            "gemini-3-pro-preview",
            "gemini-pro",
        ] {
            assert!(validate_gemini_model(valid).is_ok(), "{valid} should be valid");
        }
        for invalid in ["gpt-4", "gemini", "gemini-flash", "claude-3", "davinci-003", ""] {
            assert!(validate_gemini_model(invalid).is_err(), "{invalid} should be invalid");
        }
    }

    #[test]
    fn test_validation_messages_distinguish_cases() {
        let err = validate_gemini_model("davinci-003").unwrap_err().to_string();
        assert!(err.contains("must start with 'gemini-'"), "{err}");
        let err = validate_gemini_model("gemini-flash").unwrap_err().to_string();
        assert!(err.contains("versioned name"), "{err}");
    }

    #[test]
    fn test_construction_fails_fast() {
        let cfg = ProviderConfig::new("gemini", "gemini").with_api_key("k");
        assert!(matches!(
            GeminiProvider::new(&cfg),
            Err(ProviderError::InvalidModel { .. })
        ));
        let cfg = ProviderConfig::new("gemini", "gemini-2.5-flash");
        assert!(matches!(
            GeminiProvider::new(&cfg),
            Err(ProviderError::MissingApiKey(_))
        ));
        let provider =
            GeminiProvider::new(&ProviderConfig::new("gemini", "").with_api_key("k")).unwrap();
        assert_eq!(provider.model(), GEMINI_DEFAULT_MODEL);
        assert!(provider.is_ready());
    }

    #[test]
    fn test_part_preserves_unknown_fields() {
        let raw = json!({
            "functionCall": {"name": "kubectl", "args": {"command": "kubectl get pods"}},
            "thoughtSignature": "abc123"
        });
        let part: Part = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(part.function_call.as_ref().unwrap().name, "kubectl");
        assert_eq!(serde_json::to_value(&part).unwrap(), raw);
    }

    #[test]
    fn test_thought_parts_hidden() {
        let part: Part =
            serde_json::from_value(json!({"text": "thinking...", "thought": true})).unwrap();
        assert_eq!(part.visible_text(), None);
        let part: Part = serde_json::from_value(json!({"text": "answer"})).unwrap();
        assert_eq!(part.visible_text(), Some("answer"));
    }

    #[test]
    fn test_request_shape() {
        let tools = vec![ToolDefinition::function(
            "kubectl",
            "Run kubectl",
            json!({"type": "object"}),
        )];
        let contents = [Content::text(Some("user"), "hi")];
        let body = serde_json::to_value(GenerateRequest {
            contents: &contents,
            system_instruction: Content::text(None, "sys"),
            tools: declarations(&tools),
        })
        .unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "kubectl"
        );
        assert_eq!(body["contents"][0]["role"], "user");
    }
}
