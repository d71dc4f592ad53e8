//! Mock Backend
//!
//! Deterministic in-process backend used for development, for the daemon when
//! no credentials are configured, and throughout the test suite.
//!
//! Token usage is estimated as `chars(prompt) / 4 + max_tokens / 2`, and cost
//! is `tokens × cost_per_token`. Nothing here sleeps: the reported latency
//! is the configured base latency, not measured time.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use super::traits::{BackendError, CompletionRequest, CompletionResponse, ModelClient, TaskType};

/// Default reported latency for mock completions
pub const DEFAULT_MOCK_LATENCY_MS: u64 = 100;

/// Prompt excerpt length used in canned content
const EXCERPT_CHARS: usize = 50;

/// Deterministic mock backend
pub struct MockClient {
    backend_id: String,
    model: String,
    cost_per_token: f64,
    latency_ms: AtomicU64,
    available: AtomicBool,
    /// Number of upcoming calls that fail
    fail_next: AtomicUsize,
    /// Persistent failure returned by every call while set
    failure: Mutex<Option<BackendError>>,
    calls: AtomicUsize,
}

impl MockClient {
    /// Create an available mock backend
    pub fn new(backend_id: impl Into<String>, model: impl Into<String>, cost_per_token: f64) -> Self {
        Self {
            backend_id: backend_id.into(),
            model: model.into(),
            cost_per_token,
            latency_ms: AtomicU64::new(DEFAULT_MOCK_LATENCY_MS),
            available: AtomicBool::new(true),
            fail_next: AtomicUsize::new(0),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Builder form of [`MockClient::set_available`]
    #[must_use]
    pub fn with_available(self, available: bool) -> Self {
        self.set_available(available);
        self
    }

    /// Builder form of [`MockClient::set_latency_ms`]
    #[must_use]
    pub fn with_latency_ms(self, latency_ms: u64) -> Self {
        self.set_latency_ms(latency_ms);
        self
    }

    /// Toggle availability at runtime
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Change the reported latency
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Fail every call with `error` until cleared with `None`
    pub fn set_failure(&self, error: Option<BackendError>) {
        *self.failure.lock() = error;
    }

    /// Fail the next `count` calls with a request failure
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of `complete` calls seen so far, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> Option<BackendError> {
        if let Some(error) = self.failure.lock().clone() {
            return Some(error);
        }

        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| BackendError::RequestFailed("injected failure".to_string()))
    }

    fn canned_content(&self, request: &CompletionRequest) -> String {
        let excerpt = excerpt(&request.prompt, EXCERPT_CHARS);
        let model = &self.model;

        match request.task_type {
            TaskType::Reasoning => format!(
                "[{model}] Reasoning about '{excerpt}': the argument holds once each premise is checked in turn."
            ),
            TaskType::CodeGeneration => format!(
                "[{model}] Generated code for '{excerpt}':\n```rust\nfn example() {{\n    // ...\n}}\n```"
            ),
            TaskType::CodeReview => format!(
                "[{model}] Review of '{excerpt}': looks reasonable, consider more error handling and docs."
            ),
            TaskType::Multimodal => format!("[{model}] Described the supplied media for '{excerpt}'."),
            TaskType::Documentation => format!("[{model}] Documentation draft for '{excerpt}'."),
            TaskType::Creative => format!("[{model}] A creative take on '{excerpt}'."),
            TaskType::Translation => format!("[{model}] Translation of '{excerpt}'."),
            TaskType::Chat => format!(
                "[{model}] Response to '{}'",
                self::excerpt(&request.prompt, EXCERPT_CHARS * 2)
            ),
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

/// Estimated token usage for a request
#[must_use]
pub fn estimate_tokens(request: &CompletionRequest) -> u32 {
    let prompt_tokens = u32::try_from(request.prompt.chars().count() / 4).unwrap_or(u32::MAX);
    prompt_tokens.saturating_add(request.max_tokens / 2)
}

#[async_trait]
impl ModelClient for MockClient {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("model unavailable".to_string()));
        }

        if let Some(error) = self.take_injected_failure() {
            debug!(backend = %self.backend_id, error = %error, "Mock returning injected failure");
            return Err(error);
        }

        let tokens_used = estimate_tokens(request);

        Ok(CompletionResponse {
            content: self.canned_content(request),
            backend: self.backend_id.clone(),
            model: self.model.clone(),
            tokens_used,
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
            cost_usd: f64::from(tokens_used) * self.cost_per_token,
            cached_result: false,
            timestamp: Utc::now(),
        })
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn cost_per_token(&self) -> f64 {
        self.cost_per_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_token_and_cost_estimate() {
        let client = MockClient::new("openai", "o3", 0.000_03);
        // 40 chars -> 10 prompt tokens, 100 max tokens -> 50
        let request = CompletionRequest::new("a".repeat(40)).with_max_tokens(100);

        let response = client.complete(&request).await.unwrap();

        assert_eq!(response.tokens_used, 60);
        assert!((response.cost_usd - 60.0 * 0.000_03).abs() < 1e-12);
        assert_eq!(response.backend, "openai");
        assert_eq!(response.model, "o3");
        assert_eq!(response.latency_ms, DEFAULT_MOCK_LATENCY_MS);
        assert!(!response.cached_result);
    }

    #[tokio::test]
    async fn test_mock_reported_latency() {
        let client = MockClient::new("grok", "grok-3", 0.0).with_latency_ms(250);
        let request = CompletionRequest::new("hi");

        assert_eq!(client.complete(&request).await.unwrap().latency_ms, 250);

        client.set_latency_ms(40);
        assert_eq!(client.complete(&request).await.unwrap().latency_ms, 40);
    }

    #[tokio::test]
    async fn test_mock_unavailable_refuses() {
        let client = MockClient::new("gemini", "gemini-3.0-ultra", 0.000_01).with_available(false);

        assert!(!client.is_available().await);
        let err = client.complete(&CompletionRequest::new("hi")).await.unwrap_err();
        assert_eq!(err, BackendError::Unavailable("model unavailable".to_string()));
        assert_eq!(client.call_count(), 1);

        client.set_available(true);
        assert!(client.complete(&CompletionRequest::new("hi")).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_fail_next() {
        let client = MockClient::new("llama", "llama-4-405b", 0.0);
        client.fail_next(2);

        let request = CompletionRequest::new("hi");
        assert!(client.complete(&request).await.is_err());
        assert!(client.complete(&request).await.is_err());
        assert!(client.complete(&request).await.is_ok());
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_persistent_failure() {
        let client = MockClient::new("grok", "grok-3", 0.0);
        client.set_failure(Some(BackendError::Timeout));

        let request = CompletionRequest::new("hi");
        assert_eq!(client.complete(&request).await.unwrap_err(), BackendError::Timeout);
        assert_eq!(client.complete(&request).await.unwrap_err(), BackendError::Timeout);

        client.set_failure(None);
        assert!(client.complete(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_content_is_task_specific() {
        let client = MockClient::new("anthropic", "claude-opus-4.1", 0.0);

        let code = client
            .complete(&CompletionRequest::new("sort a vec").with_task(TaskType::CodeGeneration))
            .await
            .unwrap();
        assert!(code.content.contains("```rust"));

        let long_prompt = "é".repeat(200);
        let chat = client
            .complete(&CompletionRequest::new(long_prompt))
            .await
            .unwrap();
        assert!(chat.content.ends_with("...'"));
    }
}
