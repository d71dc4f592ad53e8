//! Completion Routing
//!
//! Admission control, caching, routing decisions and fallback execution for
//! completion requests across interchangeable backends.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |      Router      |  <-- Entry point for every completion request
//! +--------+---------+
//!          |
//!    +-----+-------+--------------+
//!    |             |              |
//!    v             v              v
//! +--------+  +----------+  +------------+
//! | Budget |  |  Cache   |  |  Metrics   |  <-- Shared state, independent locks
//! +--------+  +----------+  +------------+
//!          |
//!          v
//! +------------------+
//! |   RoutingTable   |  <-- Picks primary backend + fallback chain,
//! +--------+---------+      estimates cost with the CostPredictor
//!          |
//!          v
//! +------------------+
//! | FallbackExecutor |  <-- Calls primary, then fallbacks in order
//! +--------+---------+
//!          |
//!    +-----+-----+
//!    |     |     |
//!    v     v     v
//! +----+ +------+ +-----+
//! |Mock| |OpenAI| | ... |  <-- ModelClient implementations
//! +----+ +------+ +-----+
//! ```
//!
//! # Design Principles
//!
//! 1. **No lock across a request**: each shared component locks only for a
//!    single read-modify-write, never around a backend call
//! 2. **Routing as data**: the rule table is built, pinned and validated like
//!    any other value
//! 3. **Graceful degradation**: unavailable primaries are substituted, failed
//!    calls fall back, cache and metrics never fail a request
//! 4. **Injected state**: budget, cache and metrics are constructed by the
//!    caller and handed to the router

pub mod budget;
pub mod cache;
pub mod config;
pub mod cost;
pub mod fallback;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod router;

#[cfg(test)]
pub mod test_utils;

pub use budget::{BudgetReservation, BudgetSnapshot, BudgetTracker, BUDGET_WINDOW};
pub use cache::{fingerprint, CacheStats, CompletionCache, InMemoryCache};
pub use config::*;
pub use cost::{CostAccuracy, CostBreakdown, CostPrediction, CostPredictor};
pub use fallback::{Execution, FallbackContext, FallbackExecutor};
pub use metrics::{MetricsAggregator, MetricsSummary, ModelMetrics};
pub use policy::{RoutingDecision, RoutingRule, RoutingTable, RoutingTableError};
pub use registry::BackendRegistry;
pub use router::*;
