//! Router Metrics
//!
//! Per-backend running statistics for the router:
//! - Request, error and cache-hit counts
//! - Token and cost totals
//! - Exponential moving average latency (α = 0.1)
//! - Global fallback and budget-rejection counters
//!
//! Per-backend records live in a `DashMap`, so updates to different backends
//! never contend and each read-modify-write happens under that backend's
//! shard lock. Reads hand out copies.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

/// Smoothing factor for the latency moving average
pub const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Bucket upper bounds (ms) for the latency histogram
static LATENCY_BUCKETS_MS: [f64; 12] = [
    10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 120_000.0,
];

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Set back to zero
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    counts: Vec<AtomicU64>,
    total: AtomicU64,
}

impl Histogram {
    /// Histogram over the default latency buckets
    #[must_use]
    pub fn latency_default() -> Self {
        Self {
            bounds: &LATENCY_BUCKETS_MS,
            counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            total: AtomicU64::new(0),
        }
    }

    /// Record a value; values above the last bound land in the last bucket
    pub fn record(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bounds.len() - 1);
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Upper bound of the bucket holding the `p` quantile (0 when empty)
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentile(&self, p: f64) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }

        let target = ((total as f64) * p).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;
        for (idx, count) in self.counts.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return self.bounds[idx];
            }
        }
        self.bounds[self.bounds.len() - 1]
    }

    /// Number of recorded values
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.total.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Per-Backend Metrics
// ============================================================================

/// Running statistics for one backend
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelMetrics {
    /// Backend id
    pub backend: String,
    /// Most recent model served by this backend
    pub model: String,
    /// Completed requests, cache hits included
    pub request_count: u64,
    /// Failed attempts
    pub error_count: u64,
    /// Requests served from the cache
    pub cache_hits: u64,
    /// Tokens consumed
    pub total_tokens: u64,
    /// Cost in USD
    pub total_cost: f64,
    /// Moving-average latency in milliseconds
    pub avg_latency_ms: f64,
    /// Last completed request
    pub last_used: Option<DateTime<Utc>>,
}

impl ModelMetrics {
    fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            model: String::new(),
            request_count: 0,
            error_count: 0,
            cache_hits: 0,
            total_tokens: 0,
            total_cost: 0.0,
            avg_latency_ms: 0.0,
            last_used: None,
        }
    }

    /// `errors / requests`, 0 before any request
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }

    fn fold_latency(&mut self, latency_ms: f64) {
        if self.request_count == 0 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms =
                LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * self.avg_latency_ms;
        }
    }
}

/// Per-backend line of a [`MetricsSummary`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackendSummary {
    /// Completed requests
    pub requests: u64,
    /// Cost in USD
    pub cost: f64,
    /// Tokens consumed
    pub tokens: u64,
    /// Moving-average latency in milliseconds
    pub avg_latency_ms: f64,
    /// `errors / requests`
    pub error_rate: f64,
}

/// Totals across all backends
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Completed requests
    pub total_requests: u64,
    /// Cost in USD
    pub total_cost: f64,
    /// Tokens consumed
    pub total_tokens: u64,
    /// Requests served from the cache
    pub cache_hits: u64,
    /// Requests answered by a fallback backend
    pub fallbacks: u64,
    /// Requests refused by the budget
    pub budget_rejections: u64,
    /// Seconds since the aggregator was created or reset
    pub uptime_secs: u64,
    /// Breakdown keyed by backend id
    pub backends: BTreeMap<String, BackendSummary>,
}

// ============================================================================
// Metrics Aggregator
// ============================================================================

/// Concurrency-safe metrics store shared by the router
pub struct MetricsAggregator {
    backends: DashMap<String, ModelMetrics>,
    /// Requests answered by a fallback
    fallbacks: Counter,
    /// Requests refused by the budget
    budget_rejections: Counter,
    /// Latency distribution of non-cached completions
    latency: Histogram,
    started_at: parking_lot::Mutex<Instant>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
            fallbacks: Counter::new(),
            budget_rejections: Counter::new(),
            latency: Histogram::latency_default(),
            started_at: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed request
    #[allow(clippy::cast_precision_loss)]
    pub fn record_request(
        &self,
        backend: &str,
        model: &str,
        duration: Duration,
        tokens: u32,
        cost: f64,
        from_cache: bool,
    ) {
        let latency_ms = duration.as_secs_f64() * 1000.0;

        {
            let mut entry = self
                .backends
                .entry(backend.to_string())
                .or_insert_with(|| ModelMetrics::new(backend));

            entry.fold_latency(latency_ms);
            entry.request_count += 1;
            entry.total_tokens += u64::from(tokens);
            entry.total_cost += cost;
            entry.model = model.to_string();
            entry.last_used = Some(Utc::now());
            if from_cache {
                entry.cache_hits += 1;
            }
        }

        if !from_cache {
            self.latency.record(latency_ms);
        }
    }

    /// Record a failed attempt against a backend
    pub fn record_error(&self, backend: &str) {
        self.backends
            .entry(backend.to_string())
            .or_insert_with(|| ModelMetrics::new(backend))
            .error_count += 1;
    }

    /// Record that a fallback backend answered
    pub fn record_fallback(&self, from: &str, to: &str) {
        self.fallbacks.inc();
        tracing::debug!(from, to, "Request fell back to alternate backend");
    }

    /// Record a budget refusal
    pub fn record_rejection(&self) {
        self.budget_rejections.inc();
    }

    /// Copy of one backend's record
    #[must_use]
    pub fn metrics(&self, backend: &str) -> Option<ModelMetrics> {
        self.backends.get(backend).map(|m| m.value().clone())
    }

    /// Copies of every backend's record
    #[must_use]
    pub fn all_metrics(&self) -> BTreeMap<String, ModelMetrics> {
        self.backends
            .iter()
            .map(|m| (m.key().clone(), m.value().clone()))
            .collect()
    }

    /// Error rate for a backend, 0 when unknown or unused
    #[must_use]
    pub fn error_rate(&self, backend: &str) -> f64 {
        self.backends.get(backend).map_or(0.0, |m| m.error_rate())
    }

    /// Cost across all backends
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.backends.iter().map(|m| m.total_cost).sum()
    }

    /// Requests across all backends
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.backends.iter().map(|m| m.request_count).sum()
    }

    /// Totals plus a per-backend breakdown
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let all = self.all_metrics();

        MetricsSummary {
            total_requests: all.values().map(|m| m.request_count).sum(),
            total_cost: all.values().map(|m| m.total_cost).sum(),
            total_tokens: all.values().map(|m| m.total_tokens).sum(),
            cache_hits: all.values().map(|m| m.cache_hits).sum(),
            fallbacks: self.fallbacks.get(),
            budget_rejections: self.budget_rejections.get(),
            uptime_secs: self.started_at.lock().elapsed().as_secs(),
            backends: all
                .into_iter()
                .map(|(id, m)| {
                    let line = BackendSummary {
                        requests: m.request_count,
                        cost: m.total_cost,
                        tokens: m.total_tokens,
                        avg_latency_ms: m.avg_latency_ms,
                        error_rate: m.error_rate(),
                    };
                    (id, line)
                })
                .collect(),
        }
    }

    /// Drop every record and zero the counters
    pub fn reset(&self) {
        self.backends.clear();
        self.fallbacks.reset();
        self.budget_rejections.reset();
        self.latency.reset();
        *self.started_at.lock() = Instant::now();
    }

    /// Export in Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "# HELP dispatch_requests_total Completed requests\n\
             # TYPE dispatch_requests_total counter\n\
             dispatch_requests_total {}\n\n",
            self.total_requests()
        );
        let _ = write!(
            output,
            "# HELP dispatch_fallbacks_total Requests answered by a fallback backend\n\
             # TYPE dispatch_fallbacks_total counter\n\
             dispatch_fallbacks_total {}\n\n",
            self.fallbacks.get()
        );
        let _ = write!(
            output,
            "# HELP dispatch_budget_rejections_total Requests refused by the budget\n\
             # TYPE dispatch_budget_rejections_total counter\n\
             dispatch_budget_rejections_total {}\n\n",
            self.budget_rejections.get()
        );
        let _ = write!(
            output,
            "# HELP dispatch_latency_ms Completion latency quantiles\n\
             # TYPE dispatch_latency_ms gauge\n\
             dispatch_latency_ms{{quantile=\"0.5\"}} {}\n\
             dispatch_latency_ms{{quantile=\"0.99\"}} {}\n\n",
            self.latency.percentile(0.5),
            self.latency.percentile(0.99)
        );

        for (backend, m) in self.all_metrics() {
            let _ = writeln!(output, "backend_requests_total{{backend=\"{backend}\"}} {}", m.request_count);
            let _ = writeln!(output, "backend_errors_total{{backend=\"{backend}\"}} {}", m.error_count);
            let _ = writeln!(output, "backend_cache_hits_total{{backend=\"{backend}\"}} {}", m.cache_hits);
            let _ = writeln!(output, "backend_tokens_total{{backend=\"{backend}\"}} {}", m.total_tokens);
            let _ = writeln!(output, "backend_cost_usd_total{{backend=\"{backend}\"}} {}", m.total_cost);
            let _ = writeln!(
                output,
                "backend_latency_ema_ms{{backend=\"{backend}\"}} {}\n",
                m.avg_latency_ms
            );
        }

        output
    }
}
