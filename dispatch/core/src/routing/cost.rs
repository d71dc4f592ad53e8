//! Cost Prediction
//!
//! Estimates what a request will cost on a client before it is sent, and
//! tracks how close those estimates come to what backends actually charge.
//!
//! # Estimate
//!
//! ```text
//! tokens       = estimated prompt + output tokens
//! token cost   = tokens × client price per token
//! complexity   = token cost × steps above simple × complexity_factor
//! subtotal     = baseline + token cost + complexity
//! estimate     = subtotal × model multiplier
//! band         = estimate ± estimate × confidence_interval
//! ```
//!
//! The router uses the estimate as [`RoutingDecision::estimated_cost`] and
//! feeds every completed call back through [`CostPredictor::record_outcome`].
//!
//! [`RoutingDecision::estimated_cost`]: super::policy::RoutingDecision::estimated_cost

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::{estimate_tokens, CompletionRequest, Complexity, ModelClient};

use super::config::CostConfig;

/// Outcomes kept for accuracy tracking
pub const HISTORY_CAPACITY: usize = 10_000;

/// Token estimate above which trimming the input is suggested
pub const LARGE_REQUEST_TOKENS: u32 = 10_000;

/// Estimate above which a cheaper model is suggested, in USD
pub const EXPENSIVE_REQUEST_USD: f64 = 0.1;

const OPTIMIZED: &str = "Cost is optimized for current request";

// ============================================================================
// Prediction
// ============================================================================

/// Components of an estimate, in USD
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostBreakdown {
    /// Fixed per-request overhead
    pub baseline: f64,
    /// Tokens at the client's price
    pub tokens: f64,
    /// Complexity uplift
    pub complexity: f64,
    /// Amount added (or removed) by the model multiplier
    pub multiplier: f64,
}

/// Pre-flight cost estimate for one request on one client
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostPrediction {
    /// Backend the estimate is for
    pub backend: String,
    /// Model the estimate is for
    pub model: String,
    /// Estimated tokens consumed
    pub estimated_tokens: u32,
    /// Point estimate in USD
    pub estimated_cost: f64,
    /// Lower edge of the confidence band
    pub confidence_min: f64,
    /// Upper edge of the confidence band
    pub confidence_max: f64,
    /// Confidence attached to the band, in `(0, 1]`
    pub confidence_level: f64,
    /// Where the estimate comes from
    pub breakdown: CostBreakdown,
    /// Suggestions for lowering the cost
    pub recommendations: Vec<String>,
    /// When the estimate was made
    pub predicted_at: DateTime<Utc>,
}

/// How close past estimates came to actual cost
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CostAccuracy {
    /// Outcomes considered
    pub samples: usize,
    /// Mean of `|estimate - actual|` in USD
    pub mean_absolute_error: f64,
    /// Mean relative error, each sample capped at 1.0
    pub mean_relative_error: f64,
    /// `1 - mean_relative_error`; 0 with no samples
    pub accuracy: f64,
}

#[derive(Clone, Copy, Debug)]
struct Outcome {
    estimated: f64,
    actual: f64,
}

impl Outcome {
    fn relative_error(self) -> f64 {
        let error = (self.estimated - self.actual).abs();
        if self.actual > 0.0 {
            (error / self.actual).min(1.0)
        } else if error > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

// ============================================================================
// Predictor
// ============================================================================

/// Estimates request cost and tracks estimate accuracy
#[derive(Debug)]
pub struct CostPredictor {
    config: CostConfig,
    history: Mutex<VecDeque<Outcome>>,
}

impl Default for CostPredictor {
    fn default() -> Self {
        Self::new(CostConfig::default())
    }
}

impl CostPredictor {
    /// Create a predictor with the given parameters
    #[must_use]
    pub fn new(config: CostConfig) -> Self {
        Self {
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Estimate the cost of `request` on `client`
    #[must_use]
    pub fn predict(&self, request: &CompletionRequest, client: &dyn ModelClient) -> CostPrediction {
        let estimated_tokens = estimate_tokens(request);
        let model = client.model_name();

        let baseline = self.config.baseline_usd;
        let tokens = f64::from(estimated_tokens) * client.cost_per_token();
        let complexity =
            tokens * complexity_steps(request.complexity) * self.config.complexity_factor;
        let subtotal = baseline + tokens + complexity;

        let multiplier = self.config.multiplier(model);
        let estimated_cost = subtotal * multiplier;
        let band = estimated_cost * self.config.confidence_interval;

        let recommendations =
            recommendations(request, estimated_tokens, estimated_cost, model, multiplier);

        CostPrediction {
            backend: client.backend_id().to_string(),
            model: model.to_string(),
            estimated_tokens,
            estimated_cost,
            confidence_min: (estimated_cost - band).max(0.0),
            confidence_max: estimated_cost + band,
            confidence_level: 1.0 - self.config.confidence_interval,
            breakdown: CostBreakdown {
                baseline,
                tokens,
                complexity,
                multiplier: estimated_cost - subtotal,
            },
            recommendations,
            predicted_at: Utc::now(),
        }
    }

    /// Record what a request actually cost against its estimate
    ///
    /// Only the most recent [`HISTORY_CAPACITY`] outcomes are kept.
    pub fn record_outcome(&self, estimated: f64, actual: f64) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(Outcome { estimated, actual });
    }

    /// Accuracy over the recorded outcomes
    #[must_use]
    pub fn accuracy(&self) -> CostAccuracy {
        let history = self.history.lock();
        if history.is_empty() {
            return CostAccuracy::default();
        }

        #[allow(clippy::cast_precision_loss)]
        let samples = history.len() as f64;
        let mean_absolute_error = history
            .iter()
            .map(|o| (o.estimated - o.actual).abs())
            .sum::<f64>()
            / samples;
        let mean_relative_error =
            history.iter().map(|o| o.relative_error()).sum::<f64>() / samples;

        CostAccuracy {
            samples: history.len(),
            mean_absolute_error,
            mean_relative_error,
            accuracy: (1.0 - mean_relative_error).clamp(0.0, 1.0),
        }
    }
}

fn complexity_steps(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Simple => 0.0,
        Complexity::Moderate => 1.0,
        Complexity::Complex => 2.0,
    }
}

fn recommendations(
    request: &CompletionRequest,
    tokens: u32,
    cost: f64,
    model: &str,
    multiplier: f64,
) -> Vec<String> {
    let mut out = Vec::new();

    if tokens > LARGE_REQUEST_TOKENS {
        out.push("Consider reducing input size to lower token costs".to_string());
    }
    if request.complexity == Complexity::Complex {
        out.push(
            "Request complexity is high - consider breaking into smaller tasks".to_string(),
        );
    }
    if cost > EXPENSIVE_REQUEST_USD {
        out.push("Consider using a more cost-effective model for this task".to_string());
    }
    if multiplier > 1.0 {
        out.push(format!(
            "{model} is priced at {multiplier}x - consider a cheaper model for simpler tasks"
        ));
    }

    if out.is_empty() {
        out.push(OPTIMIZED.to_string());
    }
    out
}
