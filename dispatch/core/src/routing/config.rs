//! Routing Configuration
//!
//! Runtime configuration types for the router, the budget tracker, the cache
//! and backend registration. These are the resolved values; the TOML layer in
//! [`crate::config`] fills them from file, environment and CLI.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{Complexity, TaskType};

// ============================================================================
// Router
// ============================================================================

/// Top-level router behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Serve and store results in the response cache
    pub enable_caching: bool,
    /// Walk the fallback chain when the primary fails
    pub enable_fallback: bool,
    /// Deadline applied to each `Router::complete` call
    pub request_timeout_ms: Option<u64>,
    /// Reject prompts longer than this many characters
    pub max_prompt_chars: Option<usize>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_fallback: true,
            request_timeout_ms: None,
            max_prompt_chars: None,
        }
    }
}

impl RouterConfig {
    /// Deadline for a single request, if configured
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Budget
// ============================================================================

/// How the router admits spend against the daily budget
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Check the prospective amount, record actual cost after success.
    /// Concurrent requests near the limit may jointly overrun it.
    #[default]
    CheckThenRecord,
    /// Debit the prospective amount up front and settle afterwards
    Reserve,
}

/// Daily budget settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Spend limit per 24h window in USD
    pub daily_limit_usd: f64,
    /// Log a warning once spend crosses this share of the limit
    pub alert_threshold_percent: f64,
    /// Admission strategy
    pub admission: AdmissionMode,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 100.0,
            alert_threshold_percent: 80.0,
            admission: AdmissionMode::default(),
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Response cache settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached response
    pub ttl_secs: u64,
    /// How often expired entries are swept
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep period
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ============================================================================
// Cost Prediction
// ============================================================================

/// Parameters of the pre-flight cost estimate
///
/// The token price itself comes from the chosen client; these settings
/// shape the estimate around it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    /// Fixed overhead added to every request, in USD
    pub baseline_usd: f64,
    /// Uplift on token cost per complexity step above simple (0.05 = 5%)
    pub complexity_factor: f64,
    /// Half-width of the confidence band as a share of the estimate
    pub confidence_interval: f64,
    /// Per-model price multipliers; unlisted models use 1.0
    pub multipliers: BTreeMap<String, f64>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            baseline_usd: 0.0,
            complexity_factor: 0.05,
            confidence_interval: 0.15,
            multipliers: BTreeMap::new(),
        }
    }
}

impl CostConfig {
    /// Price multiplier for a model
    #[must_use]
    pub fn multiplier(&self, model: &str) -> f64 {
        self.multipliers.get(model).copied().unwrap_or(1.0)
    }
}

// ============================================================================
// Routing Pins
// ============================================================================

/// A static routing override for a task type
///
/// `complexity` and `privacy` narrow the match when set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinRule {
    /// Task type the pin applies to
    pub task: TaskType,
    /// Only match this complexity
    #[serde(default)]
    pub complexity: Option<Complexity>,
    /// Only match this privacy requirement
    #[serde(default)]
    pub privacy: Option<bool>,
    /// Primary backend id
    pub backend: String,
    /// Model id reported in the decision
    pub model: String,
    /// Ordered fallback backend ids
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

// ============================================================================
// Backends
// ============================================================================

/// Adapter kind for a configured backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process deterministic backend
    #[default]
    Mock,
    /// OpenAI-compatible HTTP backend
    #[serde(rename = "openai")]
    OpenAi,
}

/// A backend to register at startup
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Registry id (what routing rules refer to)
    pub id: String,
    /// Adapter kind
    #[serde(default)]
    pub kind: BackendKind,
    /// Model the adapter sends requests to
    pub model: String,
    /// Price per token; adapters use their own table when absent
    #[serde(default)]
    pub cost_per_token: Option<f64>,
    /// Initial availability (mock only)
    #[serde(default = "default_true")]
    pub available: bool,
    /// API base URL (HTTP adapters only)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key (HTTP adapters only)
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Latency a mock reports, in milliseconds (mock only)
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl BackendSpec {
    /// A mock backend entry
    pub fn mock(id: impl Into<String>, model: impl Into<String>, cost_per_token: f64) -> Self {
        Self {
            id: id.into(),
            kind: BackendKind::Mock,
            model: model.into(),
            cost_per_token: Some(cost_per_token),
            available: true,
            base_url: None,
            api_key_env: None,
            latency_ms: None,
        }
    }
}

/// The reference deployment: one mock per backend id the routing table uses
#[must_use]
pub fn default_backends() -> Vec<BackendSpec> {
    vec![
        BackendSpec::mock("openai", "o3", 0.000_03),
        BackendSpec::mock("anthropic", "claude-sonnet-4.5", 0.000_015),
        BackendSpec::mock("gemini", "gemini-3.0-ultra", 0.000_01),
        BackendSpec::mock("grok", "grok-3", 0.000_02),
        BackendSpec::mock("llama", "llama-4-405b", 0.0),
    ]
}
