//! Completion Router
//!
//! The composition root: validates a request, admits it against the budget,
//! serves it from the cache or routes and executes it, then records spend,
//! caches the result and updates metrics.
//!
//! # Request Flow
//!
//! ```text
//! validate ──► admit (budget) ──► cache lookup ──hit──► record metrics ──► return
//!                                     │ miss
//!                                     ▼
//!                                  decide ──► execute (primary, fallbacks)
//!                                                 │ ok
//!                                                 ▼
//!                          record spend ──► cache store ──► record metrics ──► return
//! ```
//!
//! Everything after the backend call is synchronous, so a cancelled or timed
//! out request can never record spend or populate the cache.
//!
//! # Usage
//!
//! ```ignore
//! let mut router = Router::new(RouterConfig::default(), Arc::new(BudgetTracker::new(100.0)));
//! router.register_client(Arc::new(MockClient::new("anthropic", "claude-sonnet-4.5", 0.000_015)));
//! router.set_cache(Arc::new(InMemoryCache::new(Duration::from_secs(3600))));
//! router.set_metrics(Arc::new(MetricsAggregator::new()));
//!
//! let response = router.complete(CompletionRequest::new("Hello!")).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{
    BackendError, CompletionRequest, CompletionResponse, InvalidRequest, ModelClient,
};

use super::budget::{BudgetReservation, BudgetTracker};
use super::cache::CompletionCache;
use super::config::{AdmissionMode, CostConfig, RouterConfig};
use super::cost::{CostAccuracy, CostPrediction, CostPredictor};
use super::fallback::FallbackExecutor;
use super::metrics::{MetricsAggregator, MetricsSummary, ModelMetrics};
use super::policy::{RoutingDecision, RoutingRule, RoutingTable, RoutingTableError};
use super::registry::BackendRegistry;

// ============================================================================
// Router
// ============================================================================

/// Routes completion requests across registered backends
///
/// Registration (`register_client`, `set_cache`, `set_metrics`, `pin`) takes
/// `&mut self` and happens before serving; serving takes `&self`, so the
/// router is shared between request tasks behind an `Arc`.
pub struct Router {
    config: RouterConfig,
    admission: AdmissionMode,
    registry: BackendRegistry,
    table: RoutingTable,
    predictor: CostPredictor,
    cache: Option<Arc<dyn CompletionCache>>,
    metrics: Option<Arc<MetricsAggregator>>,
    budget: Arc<BudgetTracker>,
}

impl Router {
    /// Create a router with the reference routing table and no backends
    #[must_use]
    pub fn new(config: RouterConfig, budget: Arc<BudgetTracker>) -> Self {
        Self {
            config,
            admission: AdmissionMode::default(),
            registry: BackendRegistry::new(),
            table: RoutingTable::reference(),
            predictor: CostPredictor::default(),
            cache: None,
            metrics: None,
            budget,
        }
    }

    /// Choose how spend is admitted against the budget
    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionMode) -> Self {
        self.admission = admission;
        self
    }

    /// Replace the routing table
    #[must_use]
    pub fn with_table(mut self, table: RoutingTable) -> Self {
        self.table = table;
        self
    }

    /// Estimate request cost with these parameters
    #[must_use]
    pub fn with_cost_config(mut self, config: CostConfig) -> Self {
        self.predictor = CostPredictor::new(config);
        self
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register a model client under its backend id
    pub fn register_client(&mut self, client: Arc<dyn ModelClient>) {
        self.registry.register(client);
    }

    /// Use a response cache
    pub fn set_cache(&mut self, cache: Arc<dyn CompletionCache>) {
        self.cache = Some(cache);
    }

    /// Record metrics into this aggregator
    pub fn set_metrics(&mut self, metrics: Arc<MetricsAggregator>) {
        self.metrics = Some(metrics);
    }

    /// Add a routing rule ahead of the reference rules
    ///
    /// # Errors
    ///
    /// Returns an error if the rule's chain is invalid.
    pub fn pin(&mut self, rule: RoutingRule) -> Result<(), RoutingTableError> {
        self.table.pin(rule)
    }

    // ------------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------------

    /// Complete a request, applying the configured deadline if any
    ///
    /// # Errors
    ///
    /// See [`RouterError`]; [`RouterError::DeadlineExceeded`] when the
    /// deadline passes first.
    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, RouterError> {
        let cancel = CancellationToken::new();
        match self.config.request_timeout() {
            Some(deadline) => {
                tokio::time::timeout(deadline, self.complete_with_cancel(request, &cancel))
                    .await
                    .map_err(|_| {
                        warn!(deadline = ?deadline, "Request deadline exceeded");
                        RouterError::DeadlineExceeded(deadline)
                    })?
            }
            None => self.complete_with_cancel(request, &cancel).await,
        }
    }

    /// Complete a request unless `cancel` fires first
    ///
    /// Cancellation drops the in-flight backend call.
    ///
    /// # Errors
    ///
    /// See [`RouterError`].
    pub async fn complete_with_cancel(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, RouterError> {
        let span = info_span!(
            "complete",
            request_id = %Uuid::new_v4(),
            task = %request.task_type
        );
        self.run(request, cancel).instrument(span).await
    }

    async fn run(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, RouterError> {
        let started = Instant::now();

        let request = request.validate(self.config.max_prompt_chars)?;
        let reservation = self.admit(&request)?;

        if let Some(cached) = self.cache_lookup(&request) {
            debug!(backend = %cached.backend, "Cache hit");
            // No spend was incurred; any reservation is released on drop
            drop(reservation);
            if let Some(metrics) = &self.metrics {
                metrics.record_request(
                    &cached.backend,
                    &cached.model,
                    started.elapsed(),
                    cached.tokens_used,
                    0.0,
                    true,
                );
            }
            return Ok(cached);
        }

        let executor = FallbackExecutor::new(&self.registry, self.config.enable_fallback)
            .with_metrics(self.metrics.as_deref());

        let work = async {
            let decision = self
                .table
                .decide(&self.registry, &self.predictor, &request)
                .await;
            if !decision.has_backend() {
                return Err(RouterError::NoAvailableBackend(format!(
                    "no registered backend for {} requests",
                    request.task_type
                )));
            }
            let execution = executor.execute(&decision, &request).await?;
            Ok::<_, RouterError>((decision, execution))
        };

        let (decision, execution) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Request cancelled before completion");
                return Err(RouterError::Cancelled);
            }
            result = work => result?,
        };
        let response = execution.response;

        // Estimates are per backend; a fallback answer is not comparable
        if let Some(estimated) = decision.estimated_cost {
            if response.backend == decision.backend {
                self.predictor.record_outcome(estimated, response.cost_usd);
            }
        }

        match reservation {
            Some(reservation) => reservation.commit(response.cost_usd),
            None => self.budget.record_spending(response.cost_usd),
        }

        if self.config.enable_caching {
            if let Some(cache) = &self.cache {
                cache.set(&request, &response);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_request(
                &response.backend,
                &response.model,
                started.elapsed(),
                response.tokens_used,
                response.cost_usd,
                false,
            );
        }

        info!(
            backend = %response.backend,
            model = %response.model,
            tokens = response.tokens_used,
            cost_usd = response.cost_usd,
            fallback = execution.used_fallback,
            "Request completed"
        );

        Ok(response)
    }

    fn admit(&self, request: &CompletionRequest) -> Result<Option<BudgetReservation>, RouterError> {
        let amount = request.budget_limit.max(0.0);

        let admitted = match self.admission {
            AdmissionMode::CheckThenRecord => self.budget.can_spend(amount).then_some(None),
            AdmissionMode::Reserve => self.budget.try_reserve(amount).map(Some),
        };

        admitted.ok_or_else(|| {
            let limit = self.budget.daily_limit();
            warn!(requested = amount, limit, "Request refused by budget");
            if let Some(metrics) = &self.metrics {
                metrics.record_rejection();
            }
            RouterError::BudgetExceeded {
                requested: amount,
                limit,
            }
        })
    }

    fn cache_lookup(&self, request: &CompletionRequest) -> Option<CompletionResponse> {
        if !self.config.enable_caching {
            return None;
        }
        self.cache.as_ref()?.get(request)
    }

    /// Routing decision a request would get right now, without executing it
    pub async fn decide(&self, request: &CompletionRequest) -> RoutingDecision {
        self.table
            .decide(&self.registry, &self.predictor, request)
            .await
    }

    /// Full cost estimate for a request on the backend it would be routed to
    ///
    /// Defaults are filled in as they would be for serving. `None` when the
    /// request is invalid or no backend in its chain is registered.
    pub async fn predict_cost(&self, request: &CompletionRequest) -> Option<CostPrediction> {
        let request = request.clone().validate(self.config.max_prompt_chars).ok()?;
        let decision = self.decide(&request).await;
        let client = self.registry.get(&decision.backend)?;
        Some(self.predictor.predict(&request, client.as_ref()))
    }

    // ------------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------------

    /// Per-backend metrics snapshot (empty when no aggregator is set)
    pub fn metrics(&self) -> BTreeMap<String, ModelMetrics> {
        self.metrics
            .as_ref()
            .map(|m| m.all_metrics())
            .unwrap_or_default()
    }

    /// Aggregate metrics, if an aggregator is set
    pub fn metrics_summary(&self) -> Option<MetricsSummary> {
        self.metrics.as_ref().map(|m| m.summary())
    }

    /// Drop every cached response
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Response cache cleared");
        }
    }

    /// How close cost estimates have come to actual spend
    pub fn cost_accuracy(&self) -> CostAccuracy {
        self.predictor.accuracy()
    }

    /// Spend as a percentage of the daily limit
    pub fn budget_percent(&self) -> f64 {
        self.budget.budget_percent()
    }

    /// The budget tracker
    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    /// The backend registry
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// The routing table
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Router configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by [`Router`]
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Caller error
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    /// Admission refused by the budget
    #[error("budget exceeded: requested {requested:.4} with daily limit {limit:.2}")]
    BudgetExceeded {
        /// Amount the request asked to spend
        requested: f64,
        /// Daily limit in force
        limit: f64,
    },

    /// Routing produced no usable backend
    #[error("no available backend: {0}")]
    NoAvailableBackend(String),

    /// Every attempted backend failed
    #[error("all providers failed (tried {}): {last}", .attempted.join(", "))]
    AllProvidersFailed {
        /// Backends tried, in order
        attempted: Vec<String>,
        /// Error from the last attempt
        #[source]
        last: BackendError,
    },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The configured deadline passed
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl RouterError {
    /// Stable machine-readable name of the error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::NoAvailableBackend(_) => "no_available_backend",
            Self::AllProvidersFailed { .. } => "all_providers_failed",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}
