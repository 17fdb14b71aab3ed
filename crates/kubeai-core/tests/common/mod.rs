//! Helpers shared by the provider integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kubeai_core::{ToolCall, ToolExecutor, ToolResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

/// Replies with each template in turn, repeating the last one
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    next: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(!responses.is_empty());
        Self {
            responses,
            next: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        self.responses[idx.min(self.responses.len() - 1)].clone()
    }
}

pub fn json_response(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// Server-sent events body from raw `data:` payloads
pub fn sse_response(events: &[&str]) -> ResponseTemplate {
    let body: String = events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// Bodies of every request the server has seen, in arrival order
pub async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

/// Executor that records calls and answers `output for <id>`
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<ToolCall>>,
    pub fail: bool,
}

impl RecordingExecutor {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.calls.lock().unwrap().push(call.clone());
        let content = format!("output for {}", call.id);
        if self.fail {
            ToolResult::error(&call.id, content)
        } else {
            ToolResult::success(&call.id, content)
        }
    }
}

/// Executor that cancels the run from inside its first call
pub struct CancellingExecutor {
    pub calls: Mutex<Vec<ToolCall>>,
    cancel: CancellationToken,
}

impl CancellingExecutor {
    pub fn new(cancel: &CancellationToken) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            cancel: cancel.clone(),
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for CancellingExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.calls.lock().unwrap().push(call.clone());
        self.cancel.cancel();
        ToolResult::success(&call.id, "ran before cancel")
    }
}
