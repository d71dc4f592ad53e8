//! Completion Backends
//!
//! Model clients the router dispatches to, behind the [`ModelClient`] trait.
//!
//! # Available Backends
//!
//! - **Mock**: deterministic in-process backend (default)
//! - **OpenAI**: any `/v1/chat/completions` compatible server
//!
//! # Usage
//!
//! ```ignore
//! use dispatch_core::backend::{create_client, CompletionRequest};
//! use dispatch_core::routing::config::BackendSpec;
//!
//! let client = create_client(&BackendSpec::mock("llama", "llama-4-405b", 0.0))?;
//! let response = client.complete(&CompletionRequest::new("Hello!")).await?;
//! ```

mod mock;
mod openai;
mod traits;

use std::sync::Arc;

use tracing::warn;

pub use mock::{estimate_tokens, MockClient, DEFAULT_MOCK_LATENCY_MS};
pub use openai::{price_per_token, OpenAiClient, DEFAULT_OPENAI_BASE_URL};
pub use traits::{
    BackendError, CompletionRequest, CompletionResponse, Complexity, InvalidRequest, ModelClient,
    TaskType, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, MAX_TEMPERATURE,
};

use crate::routing::config::{BackendKind, BackendSpec};

/// Environment variable read when an `openai` backend names none
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

// ============================================================================
// Backend Factory
// ============================================================================

/// Create a model client from a backend entry
///
/// An `openai` entry whose key variable is unset or empty degrades to a mock
/// with the same id and model, so routing keeps working offline.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn create_client(spec: &BackendSpec) -> Result<Arc<dyn ModelClient>, BackendError> {
    match spec.kind {
        BackendKind::Mock => Ok(Arc::new(mock_from_spec(spec))),
        BackendKind::OpenAi => {
            let key_env = spec.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
            let api_key = std::env::var(key_env).unwrap_or_default();

            if api_key.is_empty() {
                warn!(
                    backend = %spec.id,
                    env = key_env,
                    "No API key found, using mock backend"
                );
                return Ok(Arc::new(mock_from_spec(spec)));
            }

            let base_url = spec.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL);
            let mut client = OpenAiClient::new(&spec.id, base_url, api_key, &spec.model)?;
            if let Some(cost) = spec.cost_per_token {
                client = client.with_cost_per_token(cost);
            }
            Ok(Arc::new(client))
        }
    }
}

fn mock_from_spec(spec: &BackendSpec) -> MockClient {
    let cost = spec
        .cost_per_token
        .unwrap_or_else(|| price_per_token(&spec.model));
    let mock = MockClient::new(&spec.id, &spec.model, cost).with_available(spec.available);
    match spec.latency_ms {
        Some(latency_ms) => mock.with_latency_ms(latency_ms),
        None => mock,
    }
}
