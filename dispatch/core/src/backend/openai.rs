//! OpenAI-Compatible Backend
//!
//! Talks to any server exposing `POST /v1/chat/completions`. The prompt is sent
//! as a single user message; cost is derived from `usage.total_tokens` and
//! the per-model price table in [`price_per_token`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{BackendError, CompletionRequest, CompletionResponse, ModelClient};

/// Default API base URL
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Upper bound on a single upstream call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Price per token in USD for a model name
#[must_use]
pub fn price_per_token(model: &str) -> f64 {
    match model {
        "o3" | "o3-mini" => 0.000_1,
        "gpt-3.5-turbo" => 0.000_002,
        // gpt-4, gpt-4-turbo and unknown models
        _ => 0.000_03,
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

// ============================================================================
// Client
// ============================================================================

/// Backend for OpenAI-compatible chat completion APIs
pub struct OpenAiClient {
    backend_id: String,
    base_url: String,
    api_key: String,
    model: String,
    cost_per_token: f64,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(
        backend_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            backend_id: backend_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            cost_per_token: price_per_token(&model),
            model,
            client,
        })
    }

    /// Override the price table entry for this client
    #[must_use]
    pub fn with_cost_per_token(mut self, cost_per_token: f64) -> Self {
        self.cost_per_token = cost_per_token;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_body<'a>(&'a self, request: &CompletionRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn build_response(
        &self,
        body: ChatCompletionResponse,
        latency: Duration,
    ) -> Result<CompletionResponse, BackendError> {
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("no choices in response".to_string()))?;
        let tokens_used = body.usage.map_or(0, |usage| usage.total_tokens);

        Ok(CompletionResponse {
            content,
            backend: self.backend_id.clone(),
            model: self.model.clone(),
            tokens_used,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            cost_usd: f64::from(tokens_used) * self.cost_per_token,
            cached_result: false,
            timestamp: Utc::now(),
        })
    }
}

fn map_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::AuthenticationFailed,
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited {
            retry_after_ms: retry_after_secs.map(|secs| secs.saturating_mul(1000)),
        },
        StatusCode::SERVICE_UNAVAILABLE => BackendError::Unavailable(body.to_string()),
        _ => BackendError::RequestFailed(format!("{status}: {body}")),
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
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
        if self.api_key.is_empty() {
            return Err(BackendError::AuthenticationFailed);
        }

        let start = Instant::now();
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            debug!(backend = %self.backend_id, %status, "Upstream returned error status");
            return Err(map_status(status, retry_after, &body));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        self.build_response(body, start.elapsed())
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn cost_per_token(&self) -> f64 {
        self.cost_per_token
    }
}
