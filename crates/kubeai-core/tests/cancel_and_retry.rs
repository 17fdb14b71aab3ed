mod common;

use std::time::{Duration, Instant};

use common::{json_response, CancellingExecutor, RecordingExecutor, Sequence};
use kubeai_core::ai::bedrock::BedrockProvider;
use kubeai_core::ai::openai::OpenAiProvider;
use kubeai_core::ai::retry::{RetryConfig, RetryProvider};
use kubeai_core::tools::default_tools;
use kubeai_core::{AiClient, LlmConfig, Provider, ProviderConfig, ProviderError, ToolProvider};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai(server: &MockServer) -> OpenAiProvider {
    let config = ProviderConfig::new("openai", "gpt-4o")
        .with_endpoint(server.uri())
        .with_api_key("sk-test");
    OpenAiProvider::new(&config).unwrap()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        max_backoff: Duration::from_millis(20),
        jitter_ratio: 0.0,
    }
}

fn answer(content: &str) -> ResponseTemplate {
    json_response(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
}

#[tokio::test]
async fn test_cancel_interrupts_inflight_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(answer("too late").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let provider = openai(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let executor = RecordingExecutor::default();
    let result = provider
        .ask_with_tools("q", &default_tools(), &mut |_: &str| {}, &executor, &cancel)
        .await;
    assert!(matches!(result, Err(ProviderError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_already_cancelled_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(answer("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let executor = RecordingExecutor::default();
    let result = openai(&server)
        .ask_with_tools("q", &default_tools(), &mut |_: &str| {}, &executor, &cancel)
        .await;
    assert!(result.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_cancel_inside_tool_stops_native_loop() {
    let server = MockServer::start().await;
    let call = |id: &str| {
        json!({
            "id": id,
            "type": "function",
            "function": {"name": "kubectl", "arguments": r#"{"command":"kubectl get pods"}"#}
        })
    };
    Mock::given(method("POST"))
        .respond_with(json_response(json!({
            "choices": [{
                "message": {"role": "assistant", "tool_calls": [call("call_a"), call("call_b")]},
                "finish_reason": "tool_calls"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let executor = CancellingExecutor::new(&cancel);
    let mut out = String::new();
    let result = openai(&server)
        .ask_with_tools("q", &default_tools(), &mut |t: &str| out.push_str(t), &executor, &cancel)
        .await;

    assert!(matches!(result, Err(ProviderError::Cancelled)));
    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_a");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(out.matches("🔧 Executing").count(), 1);
}

#[tokio::test]
async fn test_cancel_after_last_tool_skips_next_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(json_response(json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "kubectl", "input": {"command": "kubectl get ns"}}],
            "stop_reason": "tool_use"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = ProviderConfig::new("bedrock", "anthropic.claude-3-haiku-20240307-v1:0")
        .with_endpoint(server.uri())
        .with_api_key("secret")
        .with_region("us-east-1");
    config.access_key_id = Some("AKIDEXAMPLE".to_string());
    let provider = BedrockProvider::with_env(&config, |_| None).unwrap();

    let cancel = CancellationToken::new();
    let executor = CancellingExecutor::new(&cancel);
    let result = provider
        .ask_with_tools("q", &default_tools(), &mut |_: &str| {}, &executor, &cancel)
        .await;

    assert!(matches!(result, Err(ProviderError::Cancelled)));
    assert_eq!(executor.calls().len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retry_recovers_from_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(503).insert_header("retry-after", "0"),
            ResponseTemplate::new(429).set_body_string("slow down"),
            answer("recovered"),
        ]))
        .expect(3)
        .mount(&server)
        .await;

    let provider = RetryProvider::new(Box::new(openai(&server)), fast_retry());
    let answer = provider
        .ask_non_streaming("hi", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "recovered");
}

#[tokio::test]
async fn test_retry_gives_up_and_skips_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let provider = RetryProvider::new(Box::new(openai(&server)), fast_retry());
    let err = provider
        .ask_non_streaming("hi", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RetriesExhausted(_)));
    assert!(err.to_string().contains("status 500"));

    let rejecting = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&rejecting)
        .await;
    let provider = RetryProvider::new(Box::new(openai(&rejecting)), fast_retry());
    assert!(matches!(
        provider.ask_non_streaming("hi", &CancellationToken::new()).await,
        Err(ProviderError::Api { status: 400, .. })
    ));
}

#[tokio::test]
async fn test_retry_wraps_agent_loop_before_tools_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(502),
            answer("first turn without tools"),
            answer(r#"{"thought": "t", "answer": "done"}"#),
        ]))
        .mount(&server)
        .await;

    let provider = RetryProvider::new(Box::new(openai(&server)), fast_retry());
    let executor = RecordingExecutor::default();
    let mut out = String::new();
    provider
        .ask_with_tools(
            "q",
            &default_tools(),
            &mut |t: &str| out.push_str(t),
            &executor,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out, "done");
}

#[tokio::test]
async fn test_client_applies_retry_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(503).insert_header("retry-after", "0"),
            answer("OK"),
        ]))
        .mount(&server)
        .await;

    let config = LlmConfig {
        provider: "openai".to_string(),
        model: "gpt-4o".to_string(),
        endpoint: Some(server.uri()),
        api_key: Some("sk-test".to_string()),
        retry_enabled: true,
        max_retries: 2,
        max_backoff_secs: 0.02,
        ..Default::default()
    };
    let client = AiClient::new(config).unwrap();
    let status = client.test_connection(&CancellationToken::new()).await;
    assert!(status.connected, "{:?}", status.error);
    assert_eq!(
        status.message.as_deref(),
        Some("Successfully connected to openai (gpt-4o)")
    );
}
