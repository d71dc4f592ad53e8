//! Routing Test Utilities
//!
//! Scripted model clients for exercising routing, fallback and router
//! behaviour without any network or timing dependence.
//!
//! # Usage
//!
//! ```ignore
//! use crate::routing::test_utils::{assert_called, registry_of, ScriptedClient};
//!
//! let primary = Arc::new(ScriptedClient::new("anthropic"));
//! primary.fail_with(BackendError::Timeout);
//!
//! let registry = registry_of(&[primary.clone()]);
//! // ... run the request ...
//! assert_called(&primary, 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::backend::{
    estimate_tokens, BackendError, CompletionRequest, CompletionResponse, ModelClient,
};

use super::registry::BackendRegistry;

/// Price used by scripted clients unless overridden
pub const SCRIPTED_COST_PER_TOKEN: f64 = 0.001;

// ============================================================================
// Call Log
// ============================================================================

/// Order of calls across several clients
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    /// Backend ids in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

// ============================================================================
// Scripted Client
// ============================================================================

/// A model client whose behaviour is set by the test
pub struct ScriptedClient {
    backend_id: String,
    model: String,
    cost_per_token: f64,
    available: AtomicBool,
    hang: AtomicBool,
    /// Persistent failure returned while set
    failure: Mutex<Option<BackendError>>,
    /// One-shot failures consumed before the persistent one
    queued: Mutex<VecDeque<BackendError>>,
    history: Mutex<Vec<CompletionRequest>>,
    log: Option<Arc<CallLog>>,
}

impl ScriptedClient {
    /// An available client that answers every call
    pub fn new(backend_id: impl Into<String>) -> Self {
        let backend_id = backend_id.into();
        Self {
            model: format!("{backend_id}-model"),
            backend_id,
            cost_per_token: SCRIPTED_COST_PER_TOKEN,
            available: AtomicBool::new(true),
            hang: AtomicBool::new(false),
            failure: Mutex::new(None),
            queued: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// Override the price per token
    #[must_use]
    pub fn with_cost(mut self, cost_per_token: f64) -> Self {
        self.cost_per_token = cost_per_token;
        self
    }

    /// Append calls to a shared log
    #[must_use]
    pub fn with_log(mut self, log: Arc<CallLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Toggle reported availability (calls still go through)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail every call until [`ScriptedClient::clear_failure`]
    pub fn fail_with(&self, error: BackendError) {
        *self.failure.lock() = Some(error);
    }

    /// Stop failing
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
        self.queued.lock().clear();
    }

    /// Fail the next call only
    pub fn fail_once(&self, error: BackendError) {
        self.queued.lock().push_back(error);
    }

    /// Never answer: calls stay pending until the caller drops them
    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Requests seen, in order
    pub fn history(&self) -> Vec<CompletionRequest> {
        self.history.lock().clone()
    }

    /// Number of calls seen
    pub fn call_count(&self) -> usize {
        self.history.lock().len()
    }

    /// Cost this client charges for a request
    pub fn cost_of(&self, request: &CompletionRequest) -> f64 {
        f64::from(estimate_tokens(request)) * self.cost_per_token
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
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
        self.history.lock().push(request.clone());
        if let Some(log) = &self.log {
            log.calls.lock().push(self.backend_id.clone());
        }

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(error) = self.queued.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }

        let tokens = estimate_tokens(request);
        Ok(CompletionResponse {
            content: format!("{} answered: {}", self.backend_id, request.prompt),
            backend: self.backend_id.clone(),
            model: self.model.clone(),
            tokens_used: tokens,
            latency_ms: 1,
            cost_usd: f64::from(tokens) * self.cost_per_token,
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

// ============================================================================
// Helpers
// ============================================================================

/// Registry holding the given clients
pub fn registry_of(clients: &[Arc<ScriptedClient>]) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for client in clients {
        registry.register(client.clone());
    }
    registry
}

/// Assert a client was called exactly `times` times
#[track_caller]
pub fn assert_called(client: &ScriptedClient, times: usize) {
    assert_eq!(
        client.call_count(),
        times,
        "backend '{}' called {} times, expected {}",
        client.backend_id,
        client.call_count(),
        times
    );
}

/// Assert the shared log recorded exactly this call order
#[track_caller]
pub fn assert_call_order(log: &CallLog, expected: &[&str]) {
    let calls = log.calls();
    assert_eq!(calls, expected, "unexpected backend call order");
}
