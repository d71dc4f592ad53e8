//! Fallback Execution
//!
//! Drives the backend call(s) for a routing decision.
//!
//! # Architecture
//!
//! ```text
//! Primary backend (anthropic) fails
//!         |
//!         v
//! Fallback 1: openai   (skipped if not registered)
//!         |
//!         v
//! Fallback 2: llama    (last resort)
//!         |
//!         v
//! AllProvidersFailed { attempted, last error }
//! ```
//!
//! Only the primary is tried when fallback is disabled. A backend is never
//! retried within one request; success is solely "the call returned `Ok`".

use tracing::{debug, warn};

use crate::backend::{BackendError, CompletionRequest, CompletionResponse};

use super::metrics::MetricsAggregator;
use super::policy::RoutingDecision;
use super::registry::BackendRegistry;
use super::router::RouterError;

// ============================================================================
// Fallback Context
// ============================================================================

/// Tracks which backends a request has tried
#[derive(Clone, Debug)]
pub struct FallbackContext {
    /// Backend the decision selected
    pub original_backend: String,
    /// Backends tried, in order
    pub tried_backends: Vec<String>,
    /// Backend currently being tried
    pub current_backend: String,
    /// Whether the current backend is a fallback
    pub is_fallback: bool,
}

impl FallbackContext {
    /// Start with the primary backend
    pub fn new(backend: impl Into<String>) -> Self {
        let backend = backend.into();
        Self {
            original_backend: backend.clone(),
            tried_backends: vec![backend.clone()],
            current_backend: backend,
            is_fallback: false,
        }
    }

    /// Move on to a fallback backend
    pub fn fallback_to(&mut self, backend: impl Into<String>) {
        let backend = backend.into();
        self.tried_backends.push(backend.clone());
        self.current_backend = backend;
        self.is_fallback = true;
    }

    /// Whether a backend has already been tried
    #[must_use]
    pub fn has_tried(&self, backend: &str) -> bool {
        self.tried_backends.iter().any(|b| b == backend)
    }

    /// Number of fallbacks taken
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.tried_backends.len().saturating_sub(1)
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Outcome of a successful execution
#[derive(Clone, Debug)]
pub struct Execution {
    /// The response that was returned
    pub response: CompletionResponse,
    /// Backends tried, in order, the answering one last
    pub attempted: Vec<String>,
    /// Whether a fallback answered
    pub used_fallback: bool,
}

/// Runs a routing decision against the registry
pub struct FallbackExecutor<'a> {
    registry: &'a BackendRegistry,
    metrics: Option<&'a MetricsAggregator>,
    enable_fallback: bool,
}

impl<'a> FallbackExecutor<'a> {
    /// Create an executor over a registry
    #[must_use]
    pub fn new(registry: &'a BackendRegistry, enable_fallback: bool) -> Self {
        Self {
            registry,
            metrics: None,
            enable_fallback,
        }
    }

    /// Record failed attempts and fallbacks here
    #[must_use]
    pub fn with_metrics(mut self, metrics: Option<&'a MetricsAggregator>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Call the primary, then each fallback in order, until one succeeds
    ///
    /// # Errors
    ///
    /// - [`RouterError::NoAvailableBackend`] if the primary is not registered
    /// - [`RouterError::AllProvidersFailed`] if every attempt failed
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        request: &CompletionRequest,
    ) -> Result<Execution, RouterError> {
        let Some(primary) = self.registry.get(&decision.backend) else {
            return Err(RouterError::NoAvailableBackend(decision.backend.clone()));
        };

        let mut ctx = FallbackContext::new(&decision.backend);
        let mut last_error = match primary.complete(request).await {
            Ok(response) => return Ok(self.finish(ctx, response)),
            Err(e) => {
                self.note_failure(&decision.backend, &e);
                e
            }
        };

        if !self.enable_fallback {
            return Err(Self::exhausted(ctx, last_error));
        }

        for backend in &decision.fallbacks {
            if ctx.has_tried(backend) {
                continue;
            }
            let Some(client) = self.registry.get(backend) else {
                debug!(backend = %backend, "Skipping unregistered fallback");
                continue;
            };

            debug!(
                from = %ctx.current_backend,
                to = %backend,
                "Trying fallback backend"
            );
            ctx.fallback_to(backend);

            match client.complete(request).await {
                Ok(response) => return Ok(self.finish(ctx, response)),
                Err(e) => {
                    self.note_failure(backend, &e);
                    last_error = e;
                }
            }
        }

        Err(Self::exhausted(ctx, last_error))
    }

    fn finish(&self, ctx: FallbackContext, response: CompletionResponse) -> Execution {
        if ctx.is_fallback {
            if let Some(metrics) = self.metrics {
                metrics.record_fallback(&ctx.original_backend, &ctx.current_backend);
            }
        }

        Execution {
            response,
            used_fallback: ctx.is_fallback,
            attempted: ctx.tried_backends,
        }
    }

    fn note_failure(&self, backend: &str, error: &BackendError) {
        warn!(backend = %backend, error = %error, "Backend call failed");
        if let Some(metrics) = self.metrics {
            metrics.record_error(backend);
        }
    }

    fn exhausted(ctx: FallbackContext, last: BackendError) -> RouterError {
        RouterError::AllProvidersFailed {
            attempted: ctx.tried_backends,
            last,
        }
    }
}
