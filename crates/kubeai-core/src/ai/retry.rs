//! Exponential backoff with jitter
//!
//! `RetryProvider` wraps any provider and retries transient API errors
//! (rate limiting, 5xx, timeouts). Adapters never retry on their own; hosts
//! opt in by wrapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::provider::{Provider, TextSink, ToolExecutor, ToolProvider};
use super::types::{ToolCall, ToolDefinition, ToolResult};
use crate::error::{ProviderError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Upper bound on any single wait
    pub max_backoff: Duration,
    /// Random spread applied to each wait, as a fraction of it
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_backoff: Duration::from_secs(10),
            jitter_ratio: 0.1,
        }
    }
}

/// HTTP status codes that should trigger retry
pub const RETRYABLE_STATUS_CODES: &[u16] = &[
    429, // Too Many Requests
    500, // Internal Server Error
    502, // Bad Gateway
    503, // Service Unavailable
    504, // Gateway Timeout
];

/// Check if an HTTP status code is retryable
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Wait before retry number `attempt` (0-based): `min(2^attempt s, max)`
/// spread by `±jitter_ratio`
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = 2f64.powi(attempt.min(30) as i32);
    let capped = base.min(config.max_backoff.as_secs_f64());
    let spread = if config.jitter_ratio > 0.0 {
        let jitter = capped * config.jitter_ratio;
        rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        0.0
    };
    Duration::from_secs_f64((capped + spread).max(0.0))
}

/// Parse Retry-After header value
///
/// The header can be either:
/// - A number of seconds (e.g., "120")
/// - An HTTP date (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    if let Ok(seconds) = header_value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = date.duration_since(now) {
            return Some(duration);
        }
    }

    None
}

/// Attempt bookkeeping for one retried operation
struct Attempts<'a> {
    config: &'a RetryConfig,
    made: u32,
}

impl<'a> Attempts<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self { config, made: 0 }
    }

    /// Sleep before the next attempt, or hand back the final error
    async fn backoff(&mut self, err: ProviderError, cancel: &CancellationToken) -> Result<()> {
        self.made += 1;
        if !err.is_retryable() {
            return Err(err);
        }
        if self.made >= self.config.max_attempts.max(1) {
            return Err(ProviderError::RetriesExhausted(Box::new(err)));
        }

        let computed = calculate_backoff(self.config, self.made - 1);
        let wait = err
            .retry_after()
            .map(|d| d.min(self.config.max_backoff))
            .unwrap_or(computed);

        warn!(
            attempt = self.made,
            max_attempts = self.config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Retrying after error: {}",
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}

/// Retrying decorator over any provider
///
/// Streaming and tool-calling requests are only retried while nothing has
/// reached the sink and no tool has run, so a retry never duplicates output
/// or side effects.
pub struct RetryProvider {
    inner: Box<dyn Provider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Box<dyn Provider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &dyn Provider {
        self.inner.as_ref()
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    async fn ask(
        &self,
        prompt: &str,
        sink: &mut TextSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut attempts = Attempts::new(&self.config);
        loop {
            let mut emitted = false;
            let result = {
                let mut tracking = |text: &str| {
                    emitted = true;
                    sink(text);
                };
                self.inner.ask(prompt, &mut tracking, cancel).await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if emitted => return Err(e),
                Err(e) => attempts.backoff(e, cancel).await?,
            }
        }
    }

    async fn ask_non_streaming(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let mut attempts = Attempts::new(&self.config);
        loop {
            match self.inner.ask_non_streaming(prompt, cancel).await {
                Ok(reply) => return Ok(reply),
                Err(e) => attempts.backoff(e, cancel).await?,
            }
        }
    }

    async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut attempts = Attempts::new(&self.config);
        loop {
            match self.inner.list_models(cancel).await {
                Ok(models) => return Ok(models),
                Err(e) => attempts.backoff(e, cancel).await?,
            }
        }
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        self.inner.as_tool_provider().map(|_| self as &dyn ToolProvider)
    }
}

/// Records whether any tool ran during an attempt
struct TrackingExecutor<'a> {
    inner: &'a dyn ToolExecutor,
    used: AtomicBool,
}

#[async_trait]
impl ToolExecutor for TrackingExecutor<'_> {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.used.store(true, Ordering::SeqCst);
        self.inner.execute(call).await
    }
}

#[async_trait]
impl ToolProvider for RetryProvider {
    async fn ask_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        sink: &mut TextSink<'_>,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(inner) = self.inner.as_tool_provider() else {
            debug!(provider = self.inner.name(), "No tool support, falling back to ask");
            return self.ask(prompt, sink, cancel).await;
        };

        let mut attempts = Attempts::new(&self.config);
        loop {
            let mut emitted = false;
            let tracking_executor = TrackingExecutor {
                inner: executor,
                used: AtomicBool::new(false),
            };
            let result = {
                let mut tracking = |text: &str| {
                    emitted = true;
                    sink(text);
                };
                inner
                    .ask_with_tools(prompt, tools, &mut tracking, &tracking_executor, cancel)
                    .await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if emitted || tracking_executor.used.load(Ordering::SeqCst) => return Err(e),
                Err(e) => attempts.backoff(e, cancel).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            max_backoff: Duration::from_millis(1),
            jitter_ratio: 0.0,
        }
    }

    /// Fails with the given status a fixed number of times, then answers
    struct Flaky {
        status: u16,
        failures: u32,
        calls: Arc<AtomicU32>,
        stream_before_failing: bool,
    }

    impl Flaky {
        fn fail(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ProviderError::api(self.status, "unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Provider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn model(&self) -> &str {
            "m"
        }
        fn endpoint(&self) -> &str {
            "http://localhost"
        }
        fn is_ready(&self) -> bool {
            true
        }
        async fn ask(
            &self,
            _prompt: &str,
            sink: &mut TextSink<'_>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            if self.stream_before_failing {
                sink("partial");
            }
            self.fail()?;
            sink("done");
            Ok(())
        }
        async fn ask_non_streaming(&self, _prompt: &str, _cancel: &CancellationToken) -> Result<String> {
            self.fail()?;
            Ok("success after retry".to_string())
        }
        async fn list_models(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
            self.fail()?;
            Ok(vec!["m".to_string()])
        }
    }

    fn flaky(status: u16, failures: u32) -> (RetryProvider, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = Flaky {
            status,
            failures,
            calls: calls.clone(),
            stream_before_failing: false,
        };
        (RetryProvider::new(Box::new(inner), fast()), calls)
    }

    #[test]
    fn test_retryable_status_codes() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(504));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("0"), Some(Duration::from_secs(0)));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_backoff, Duration::from_secs(10));
        assert!((config.jitter_ratio - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = RetryConfig {
            jitter_ratio: 0.0,
            ..Default::default()
        };
        assert_eq!(calculate_backoff(&config, 0), Duration::from_secs(1));
        assert_eq!(calculate_backoff(&config, 1), Duration::from_secs(2));
        assert_eq!(calculate_backoff(&config, 3), Duration::from_secs(8));
        assert_eq!(calculate_backoff(&config, 4), Duration::from_secs(10));
        assert_eq!(calculate_backoff(&config, 40), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let wait = calculate_backoff(&config, 2).as_secs_f64();
            assert!((3.6..=4.4).contains(&wait), "wait {wait} outside ±10% of 4s");
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let (provider, calls) = flaky(503, 2);
        let reply = provider
            .ask_non_streaming("test", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "success after retry");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let (provider, calls) = flaky(429, 10);
        let err = provider
            .list_models(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("max retries exceeded"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_not_retried() {
        let (provider, calls) = flaky(400, 10);
        let err = provider
            .ask_non_streaming("test", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_not_retried_after_output() {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = Flaky {
            status: 503,
            failures: 1,
            calls: calls.clone(),
            stream_before_failing: true,
        };
        let provider = RetryProvider::new(Box::new(inner), fast());

        let mut out = String::new();
        let mut sink = |s: &str| out.push_str(s);
        let err = provider
            .ask("test", &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out, "partial");
    }

    #[tokio::test]
    async fn test_cancel_aborts_backoff_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = Flaky {
            status: 503,
            failures: 10,
            calls: calls.clone(),
            stream_before_failing: false,
        };
        let config = RetryConfig {
            max_attempts: 10,
            max_backoff: Duration::from_secs(10),
            jitter_ratio: 0.0,
        };
        let provider = RetryProvider::new(Box::new(inner), config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider.ask_non_streaming("test", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_capability_follows_inner() {
        let (provider, _) = flaky(503, 0);
        assert!(provider.as_tool_provider().is_none());
    }
}
