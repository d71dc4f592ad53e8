//! Routing Policy
//!
//! Maps request attributes to a primary backend, a model, a justification and
//! an ordered fallback chain.
//!
//! # Routing Decision Flow
//!
//! ```text
//! 1. Match (task, complexity, privacy) against the rule table (first match wins)
//!    pins → reference rules → default rule
//! 2. Check the primary in the registry
//!    registered + unavailable → promote first registered fallback
//!    unregistered             → promote first registered fallback
//! 3. Estimate cost on the chosen client (see [`CostPredictor`])
//! ```
//!
//! The table is data: the reference rules are built by
//! [`RoutingTable::reference`] and configuration can layer pins on top of
//! them with [`RoutingTable::pin`].

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{CompletionRequest, Complexity, TaskType};

use super::config::PinRule;
use super::cost::CostPredictor;
use super::registry::BackendRegistry;

/// Longest allowed chain, primary included
pub const MAX_CHAIN_DEPTH: usize = 5;

// ============================================================================
// Routing Rule
// ============================================================================

/// One row of the routing table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingRule {
    /// Task types this rule applies to (empty matches every task)
    pub tasks: Vec<TaskType>,
    /// Only match this complexity
    pub complexity: Option<Complexity>,
    /// Only match this privacy requirement
    pub privacy: Option<bool>,
    /// Primary backend id
    pub backend: String,
    /// Model id reported for the primary
    pub model: String,
    /// Ordered fallback backend ids
    pub fallbacks: Vec<String>,
    /// Human-readable justification
    pub reason: String,
}

impl RoutingRule {
    /// Create a rule for the given tasks with no narrowing
    pub fn new(
        tasks: &[TaskType],
        backend: impl Into<String>,
        model: impl Into<String>,
        fallbacks: &[&str],
        reason: impl Into<String>,
    ) -> Self {
        Self {
            tasks: tasks.to_vec(),
            complexity: None,
            privacy: None,
            backend: backend.into(),
            model: model.into(),
            fallbacks: fallbacks.iter().map(|s| (*s).to_string()).collect(),
            reason: reason.into(),
        }
    }

    /// Narrow to one complexity
    #[must_use]
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    /// Narrow to one privacy requirement
    #[must_use]
    pub fn with_privacy(mut self, privacy: bool) -> Self {
        self.privacy = Some(privacy);
        self
    }

    /// Build a rule from a configured pin
    #[must_use]
    pub fn from_pin(pin: &PinRule) -> Self {
        Self {
            tasks: vec![pin.task],
            complexity: pin.complexity,
            privacy: pin.privacy,
            backend: pin.backend.clone(),
            model: pin.model.clone(),
            fallbacks: pin.fallbacks.clone(),
            reason: format!("Pinned {} routing to {}", pin.task, pin.model),
        }
    }

    /// Whether this rule applies to the given attributes
    #[must_use]
    pub fn matches(&self, task: TaskType, complexity: Complexity, privacy: bool) -> bool {
        (self.tasks.is_empty() || self.tasks.contains(&task))
            && !matches!(self.complexity, Some(c) if c != complexity)
            && !matches!(self.privacy, Some(p) if p != privacy)
    }

    /// Check the chain for an empty primary, repeats and excessive depth
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), RoutingTableError> {
        if self.backend.is_empty() || self.fallbacks.iter().any(String::is_empty) {
            return Err(RoutingTableError::EmptyBackend);
        }

        let mut seen = HashSet::new();
        seen.insert(self.backend.as_str());

        for fallback in &self.fallbacks {
            if !seen.insert(fallback.as_str()) {
                return Err(RoutingTableError::CycleDetected {
                    backend: fallback.clone(),
                });
            }

            if seen.len() > MAX_CHAIN_DEPTH {
                return Err(RoutingTableError::ChainTooDeep {
                    depth: 1 + self.fallbacks.len(),
                    max: MAX_CHAIN_DEPTH,
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Routing Decision
// ============================================================================

/// Where a request goes
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingDecision {
    /// Selected backend id; empty when nothing usable is registered
    pub backend: String,
    /// Selected model id
    pub model: String,
    /// Justification, including any substitution
    pub reason: String,
    /// Remaining fallback backend ids, in order
    pub fallbacks: Vec<String>,
    /// Estimated cost of the request on the selected backend
    pub estimated_cost: Option<f64>,
}

impl RoutingDecision {
    /// Whether the decision names a backend
    #[must_use]
    pub fn has_backend(&self) -> bool {
        !self.backend.is_empty()
    }
}

// ============================================================================
// Routing Table
// ============================================================================

/// Ordered rule table consulted by the router
#[derive(Clone, Debug)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
    default: RoutingRule,
    pin_count: usize,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::reference()
    }
}

impl RoutingTable {
    /// The reference policy
    #[must_use]
    pub fn reference() -> Self {
        let code = [TaskType::CodeGeneration, TaskType::CodeReview];

        let rules = vec![
            RoutingRule::new(
                &[TaskType::Reasoning],
                "openai",
                "o3",
                &["anthropic", "gemini"],
                "Complex reasoning task requires o3",
            )
            .with_complexity(Complexity::Complex),
            RoutingRule::new(
                &[TaskType::Reasoning],
                "anthropic",
                "claude-sonnet-4.5",
                &["openai", "gemini"],
                "Moderate reasoning with Claude Sonnet",
            ),
            RoutingRule::new(
                &code,
                "llama",
                "llama-4-405b",
                &[],
                "Privacy required - using local Llama 4",
            )
            .with_privacy(true),
            RoutingRule::new(
                &code,
                "anthropic",
                "claude-opus-4.1",
                &["openai", "llama"],
                "Code task with Claude Opus for quality",
            ),
            RoutingRule::new(
                &[TaskType::Multimodal],
                "gemini",
                "gemini-3.0-ultra",
                &["grok"],
                "Multimodal task with Gemini 3.0",
            ),
            RoutingRule::new(
                &[TaskType::Documentation],
                "gemini",
                "gemini-3.0-ultra",
                &["anthropic"],
                "Documentation generation with Gemini",
            ),
        ];

        let default = RoutingRule::new(
            &[],
            "anthropic",
            "claude-sonnet-4.5",
            &["openai", "llama"],
            "Default routing to Claude Sonnet",
        );

        Self {
            rules,
            default,
            pin_count: 0,
        }
    }

    /// Add a rule that takes precedence over the reference rules
    ///
    /// Pins keep their insertion order among themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule's chain is invalid.
    pub fn pin(&mut self, rule: RoutingRule) -> Result<(), RoutingTableError> {
        rule.validate()?;
        debug!(backend = %rule.backend, tasks = ?rule.tasks, "Pinned routing rule");
        self.rules.insert(self.pin_count, rule);
        self.pin_count += 1;
        Ok(())
    }

    /// Number of pinned rules
    #[must_use]
    pub fn pin_count(&self) -> usize {
        self.pin_count
    }

    /// All rules in match order, default last
    pub fn rules(&self) -> impl Iterator<Item = &RoutingRule> {
        self.rules.iter().chain(std::iter::once(&self.default))
    }

    /// Pure rule lookup
    #[must_use]
    pub fn route(&self, task: TaskType, complexity: Complexity, privacy: bool) -> &RoutingRule {
        self.rules
            .iter()
            .find(|rule| rule.matches(task, complexity, privacy))
            .unwrap_or(&self.default)
    }

    /// Decide where a request goes, taking registry availability into account
    ///
    /// Never fails. An empty `backend` means nothing in the chain is registered.
    pub async fn decide(
        &self,
        registry: &BackendRegistry,
        predictor: &CostPredictor,
        request: &CompletionRequest,
    ) -> RoutingDecision {
        let rule = self.route(
            request.task_type,
            request.complexity,
            request.privacy_required,
        );

        let mut decision = RoutingDecision {
            backend: rule.backend.clone(),
            model: rule.model.clone(),
            reason: rule.reason.clone(),
            fallbacks: rule.fallbacks.clone(),
            estimated_cost: None,
        };

        match registry.get(&decision.backend) {
            Some(client) => {
                if !client.is_available().await {
                    let unavailable = decision.backend.clone();
                    if promote_registered_fallback(&mut decision, registry) {
                        warn!(
                            backend = %unavailable,
                            fallback = %decision.backend,
                            "Primary backend unavailable, promoting fallback"
                        );
                    }
                }
            }
            None => {
                let missing = std::mem::take(&mut decision.backend);
                if promote_registered_fallback(&mut decision, registry) {
                    warn!(
                        backend = %missing,
                        fallback = %decision.backend,
                        "Primary backend not registered, promoting fallback"
                    );
                } else {
                    warn!(backend = %missing, "No backend in the chain is registered");
                    decision.model.clear();
                    decision.fallbacks.clear();
                }
            }
        }

        decision.estimated_cost = registry
            .get(&decision.backend)
            .map(|client| predictor.predict(request, client.as_ref()).estimated_cost);

        debug!(
            backend = %decision.backend,
            model = %decision.model,
            reason = %decision.reason,
            fallbacks = ?decision.fallbacks,
            "Routing decision"
        );

        decision
    }
}

/// Replace the primary with the first registered fallback
///
/// Unregistered fallbacks ahead of it are dropped from the chain. Leaves the
/// decision untouched and returns false when no fallback is registered.
fn promote_registered_fallback(decision: &mut RoutingDecision, registry: &BackendRegistry) -> bool {
    let Some(index) = decision.fallbacks.iter().position(|id| registry.contains(id)) else {
        return false;
    };

    decision.fallbacks.drain(..index);
    decision.backend = decision.fallbacks.remove(0);
    decision.reason = format!("{} (fallback)", decision.reason);
    if let Some(promoted) = registry.get(&decision.backend) {
        decision.model = promoted.model_name().to_string();
    }
    true
}

// ============================================================================
// Errors
// ============================================================================

/// Invalid routing rules
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoutingTableError {
    /// A backend appears twice in a chain
    #[error("Cycle detected in fallback chain at backend: {backend}")]
    CycleDetected {
        /// Repeated backend id
        backend: String,
    },

    /// Chain exceeds the maximum depth
    #[error("Chain depth {depth} exceeds maximum {max}")]
    ChainTooDeep {
        /// Depth of the rejected chain
        depth: usize,
        /// Maximum allowed depth
        max: usize,
    },

    /// A chain entry names no backend
    #[error("Routing rule has an empty backend id")]
    EmptyBackend,
}
