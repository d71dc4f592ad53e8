//! Model Client Traits
//!
//! Trait and data definitions shared by every completion backend. The router
//! only ever talks to a backend through [`ModelClient`]; how an adapter
//! reaches its upstream (HTTP, local model, canned responses) is its own
//! business.
//!
//! # Design Philosophy
//!
//! The `ModelClient` trait is deliberately small:
//! - `complete` turns a request into a response or a [`BackendError`]
//! - `is_available` lets routing skip a backend that already knows it is down
//! - `backend_id` and `cost_per_token` identify and price the backend
//!
//! Adapters fold their own failure modes (timeouts, HTTP status codes,
//! refusals) into a `BackendError`. The router treats every error the same way.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Max output tokens used when a request asks for none
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Temperature used when a request's temperature is outside `[0, 2]`
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Upper bound of the accepted temperature range
pub const MAX_TEMPERATURE: f64 = 2.0;

// ============================================================================
// Task Classification
// ============================================================================

/// Kind of work a completion request asks for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Multi-step reasoning and analysis
    Reasoning,
    /// Writing new code
    #[serde(alias = "codegen", alias = "code_gen")]
    CodeGeneration,
    /// Reviewing existing code
    CodeReview,
    /// Mixed text/image input
    Multimodal,
    /// Generating documentation
    Documentation,
    /// Conversational or unclassified work
    #[default]
    #[serde(alias = "general")]
    Chat,
    /// Stories, brainstorming, ideation
    Creative,
    /// Translating between languages
    Translation,
}

impl TaskType {
    /// Every task type, in declaration order
    pub const ALL: [TaskType; 8] = [
        Self::Reasoning,
        Self::CodeGeneration,
        Self::CodeReview,
        Self::Multimodal,
        Self::Documentation,
        Self::Chat,
        Self::Creative,
        Self::Translation,
    ];

    /// Stable wire name, also used when fingerprinting requests
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::CodeGeneration => "code_generation",
            Self::CodeReview => "code_review",
            Self::Multimodal => "multimodal",
            Self::Documentation => "documentation",
            Self::Chat => "chat",
            Self::Creative => "creative",
            Self::Translation => "translation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How demanding a request is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Short, well-defined work
    Simple,
    /// The default
    #[default]
    Moderate,
    /// Needs the most capable backend
    Complex,
}

impl Complexity {
    /// Stable wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Why a request was refused before any backend was consulted
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    /// The prompt was empty
    #[error("prompt cannot be empty")]
    EmptyPrompt,

    /// The prompt exceeded the configured maximum length
    #[error("prompt is {len} characters, limit is {max}")]
    PromptTooLong {
        /// Prompt length in characters
        len: usize,
        /// Configured limit
        max: usize,
    },
}

/// A completion request as submitted by a caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionRequest {
    /// The prompt text
    pub prompt: String,
    /// Kind of work requested
    pub task_type: TaskType,
    /// How demanding the request is
    pub complexity: Complexity,
    /// Maximum output tokens (0 = default); negative input reads as 0
    #[serde(deserialize_with = "non_negative_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature, accepted range `[0, 2]`
    pub temperature: f64,
    /// Whether the prompt must stay on a local/offline backend
    pub privacy_required: bool,
    /// Per-request spending ceiling used for budget admission
    pub budget_limit: f64,
    /// Free-form caller metadata (never part of the cache key)
    pub metadata: HashMap<String, String>,
}

fn non_negative_tokens<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    Ok(u32::try_from(raw.max(0)).unwrap_or(u32::MAX))
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            task_type: TaskType::default(),
            complexity: Complexity::default(),
            max_tokens: 0,
            temperature: DEFAULT_TEMPERATURE,
            privacy_required: false,
            budget_limit: 0.0,
            metadata: HashMap::new(),
        }
    }
}

impl CompletionRequest {
    /// Create a new request for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the task type
    #[must_use]
    pub fn with_task(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Set the complexity
    #[must_use]
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Set max output tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature (out-of-range values are defaulted during validation)
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Require a local/offline backend
    #[must_use]
    pub fn with_privacy(mut self, privacy_required: bool) -> Self {
        self.privacy_required = privacy_required;
        self
    }

    /// Set the per-request budget ceiling
    #[must_use]
    pub fn with_budget_limit(mut self, budget_limit: f64) -> Self {
        self.budget_limit = budget_limit;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate the request and fill in defaults
    ///
    /// Fails on an empty prompt, or on a prompt longer than `max_prompt_chars`
    /// when a limit is given. A zero `max_tokens` becomes
    /// [`DEFAULT_MAX_TOKENS`]; a temperature outside `[0, 2]` (or NaN)
    /// becomes [`DEFAULT_TEMPERATURE`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRequest`] describing the first problem found.
    pub fn validate(mut self, max_prompt_chars: Option<usize>) -> Result<Self, InvalidRequest> {
        if self.prompt.is_empty() {
            return Err(InvalidRequest::EmptyPrompt);
        }

        if let Some(max) = max_prompt_chars {
            let len = self.prompt.chars().count();
            if len > max {
                return Err(InvalidRequest::PromptTooLong { len, max });
            }
        }

        if self.max_tokens == 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            self.temperature = DEFAULT_TEMPERATURE;
        }

        Ok(self)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A completed response from a backend (or from the cache)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Backend that produced the content
    pub backend: String,
    /// Model that produced the content
    pub model: String,
    /// Tokens consumed
    pub tokens_used: u32,
    /// Backend-reported latency in milliseconds
    pub latency_ms: u64,
    /// Cost in USD
    pub cost_usd: f64,
    /// Whether this value was served from the cache
    pub cached_result: bool,
    /// When the response was produced
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Backend Errors
// ============================================================================

/// Errors a backend adapter reports back to the router
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Backend refused the call because it is down or disabled
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Could not reach the upstream
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Upstream rejected or failed the request
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Upstream answered with something we could not use
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The upstream call timed out
    #[error("request timed out")]
    Timeout,

    /// Upstream rate limited the call
    #[error("rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited {
        /// Suggested wait before retrying, if the upstream gave one
        retry_after_ms: Option<u64>,
    },

    /// Credentials were rejected
    #[error("authentication failed")]
    AuthenticationFailed,
}

// ============================================================================
// Model Client Trait
// ============================================================================

/// A completion backend
///
/// Implement this trait to make a new upstream routable. Implementations must
/// be cheap to share (`Arc<dyn ModelClient>`) and safe to call concurrently.
/// Dropping the future returned by [`ModelClient::complete`] is how the
/// router cancels an in-flight call.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Identifier the backend is registered and routed under
    fn backend_id(&self) -> &str;

    /// Model this client sends requests to
    fn model_name(&self) -> &str;

    /// Produce a completion
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, BackendError>;

    /// Whether the backend currently accepts work
    async fn is_available(&self) -> bool;

    /// Price per token in USD
    fn cost_per_token(&self) -> f64;
}
