//! Shared HTTP plumbing for the adapters
//!
//! One `reqwest::Client` per provider instance. Every await on the network
//! is raced against the caller's cancellation token.

use std::future::Future;
use std::ops::ControlFlow;

use futures::StreamExt;
use reqwest::{header::RETRY_AFTER, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::retry::parse_retry_after;
use super::sse::LineBuffer;
use crate::constants;
use crate::error::{ProviderError, Result};

/// Resolve `fut` unless `cancel` fires first
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = fut => result,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(skip_tls_verify: bool) -> Self {
        let client = Client::builder()
            .user_agent(constants::http::USER_AGENT)
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .timeout(constants::http::REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(skip_tls_verify)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client: {}. Using default client.", e);
                Client::new()
            });
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send the request and fail on any non-2xx status
    pub async fn send(&self, request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
        cancellable(cancel, async {
            let response = request.send().await?;
            check_status(response).await
        })
        .await
    }

    /// Send and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.send(request, cancel).await?;
        let body = cancellable(cancel, async { Ok(response.bytes().await?) }).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Turn a non-2xx response into `ProviderError::Api`
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = read_capped(response, constants::http::MAX_ERROR_BODY_BYTES).await;
    warn!(status = status.as_u16(), "API error response: {}", body);
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

/// Read at most `cap` bytes of the body; read failures yield what arrived
async fn read_capped(response: Response, cap: usize) -> String {
    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(Ok(chunk)) = stream.next().await {
        let room = cap.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= cap {
            break;
        }
    }
    String::from_utf8_lossy(&body).trim().to_string()
}

/// Feed each complete line of a streamed body to `on_line` until it breaks
/// or the body ends
pub(crate) async fn for_each_line<F>(
    response: Response,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<()>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    let mut stream = response.bytes_stream();
    let mut buffer = LineBuffer::new();
    let mut lines_seen = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = next else { break };
        for line in buffer.push(&chunk?) {
            lines_seen += 1;
            if on_line(&line).is_break() {
                debug!(lines = lines_seen, "Stream terminated by marker");
                return Ok(());
            }
        }
    }

    if let Some(line) = buffer.finish() {
        let _ = on_line(&line);
    }
    debug!(lines = lines_seen, "Stream ended");
    Ok(())
}
