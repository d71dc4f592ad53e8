//! Dispatch Core - Routing and Admission Control for AI Completion Backends
//!
//! Decides which of several interchangeable model backends handles a
//! completion request, rejects requests that would exceed a daily budget,
//! serves repeated requests from a time-bounded cache and falls back to
//! alternate backends when one fails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Callers                                  │
//! │   ┌───────────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │   │ dispatch CLI  │   │ NDJSON serving │   │ Embedding crates │  │
//! │   └───────┬───────┘   └───────┬────────┘   └────────┬─────────┘  │
//! │           └───────────────────┼─────────────────────┘            │
//! └───────────────────────────────┼──────────────────────────────────┘
//!                                 │ CompletionRequest
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                         DISPATCH CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                          Router                             │  │
//! │  │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌────────────────┐  │  │
//! │  │  │ Budget  │  │  Cache  │  │ Metrics │  │ Routing table  │  │  │
//! │  │  └─────────┘  └─────────┘  └─────────┘  └────────────────┘  │  │
//! │  └────────────────────────────┬───────────────────────────────┘  │
//! │                               │ ModelClient                       │
//! │        ┌──────────────┬───────┴───────┬──────────────┐           │
//! │        │ MockClient   │ OpenAiClient  │     ...      │           │
//! │        └──────────────┴───────────────┴──────────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Router`]: composition root; `complete` is the single entry point
//! - [`CompletionRequest`] / [`CompletionResponse`]: the request contract
//! - [`ModelClient`]: capability every backend adapter implements
//! - [`BudgetTracker`], [`InMemoryCache`], [`MetricsAggregator`]: shared state
//!   injected into the router
//! - [`DispatchConfig`]: file/env/CLI configuration that assembles a router
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dispatch_core::{
//!     BudgetTracker, CompletionRequest, MetricsAggregator, MockClient, Router, RouterConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let budget = Arc::new(BudgetTracker::new(100.0));
//!     let mut router = Router::new(RouterConfig::default(), budget);
//!     router.register_client(Arc::new(MockClient::new("anthropic", "claude-sonnet-4.5", 0.000_015)));
//!     router.set_metrics(Arc::new(MetricsAggregator::new()));
//!
//!     let response = router.complete(CompletionRequest::new("Hello!")).await.unwrap();
//!     println!("{} answered: {}", response.backend, response.content);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: request/response types, the `ModelClient` trait and adapters
//! - [`routing`]: router, routing table, fallback execution, budget, cache, metrics
//! - [`config`]: TOML configuration with environment and CLI overrides

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod routing;

// Re-exports for convenience
pub use backend::{
    create_client, BackendError, CompletionRequest, CompletionResponse, Complexity,
    InvalidRequest, MockClient, ModelClient, OpenAiClient, TaskType,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DispatchConfig,
};
pub use routing::{
    AdmissionMode, BackendRegistry, BackendSpec, BudgetConfig, BudgetTracker, CacheConfig,
    CompletionCache, CostAccuracy, CostConfig, CostPrediction, CostPredictor, InMemoryCache,
    MetricsAggregator, MetricsSummary, ModelMetrics, PinRule, Router, RouterConfig, RouterError,
    RoutingDecision, RoutingRule, RoutingTable,
};
