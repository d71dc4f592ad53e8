//! TOML Configuration File Support
//!
//! Centralized configuration loading for the dispatch router, from a TOML file
//! at `~/.config/dispatch/dispatch.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`DISPATCH_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/dispatch/dispatch.toml` (typically `~/.config/dispatch/dispatch.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [router]
//! enable_caching = true
//! enable_fallback = true
//! request_timeout_ms = 30000
//!
//! [budget]
//! daily_limit_usd = 25.0
//! alert_threshold_percent = 80.0
//! admission = "reserve"
//!
//! [cache]
//! ttl_secs = 3600
//! sweep_interval_secs = 300
//!
//! [cost]
//! baseline_usd = 0.0
//! complexity_factor = 0.05
//! confidence_interval = 0.15
//! multipliers = { o3 = 3.0 }
//!
//! [[routing.pins]]
//! task = "translation"
//! backend = "llama"
//! model = "llama-4-405b"
//!
//! [[backends]]
//! id = "openai"
//! kind = "openai"
//! model = "o3"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [[backends]]
//! id = "llama"
//! model = "llama-4-405b"
//! cost_per_token = 0.0
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{create_client, BackendError};
use crate::routing::config::{
    default_backends, AdmissionMode, BackendSpec, BudgetConfig, CacheConfig, CostConfig,
    PinRule, RouterConfig,
};
use crate::routing::{
    BudgetTracker, InMemoryCache, MetricsAggregator, Router, RoutingRule, RoutingTableError,
};

/// Daily budget in USD
pub const ENV_DAILY_BUDGET: &str = "DISPATCH_DAILY_BUDGET";
/// Cache TTL in seconds
pub const ENV_CACHE_TTL_SECS: &str = "DISPATCH_CACHE_TTL_SECS";
/// Enable or disable the response cache
pub const ENV_ENABLE_CACHE: &str = "DISPATCH_ENABLE_CACHE";
/// Enable or disable fallback execution
pub const ENV_ENABLE_FALLBACK: &str = "DISPATCH_ENABLE_FALLBACK";
/// Per-request deadline in milliseconds
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DISPATCH_REQUEST_TIMEOUT_MS";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration or building a router
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// A backend could not be constructed
    #[error("Failed to create backend: {0}")]
    Backend(#[from] BackendError),

    /// A routing pin is invalid
    #[error("Invalid routing pin: {0}")]
    Routing(#[from] RoutingTableError),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Router section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Serve and store results in the response cache
    pub enable_caching: Option<bool>,

    /// Walk the fallback chain when the primary fails
    pub enable_fallback: Option<bool>,

    /// Per-request deadline in milliseconds (0 disables it)
    pub request_timeout_ms: Option<u64>,

    /// Maximum prompt length in characters
    pub max_prompt_chars: Option<usize>,
}

/// Budget section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetToml {
    /// Spend limit per 24h window in USD
    pub daily_limit_usd: Option<f64>,

    /// Alert threshold as a percentage of the limit
    pub alert_threshold_percent: Option<f64>,

    /// Admission strategy
    pub admission: Option<AdmissionMode>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Entry lifetime in seconds
    pub ttl_secs: Option<u64>,

    /// Sweep period in seconds
    pub sweep_interval_secs: Option<u64>,
}

/// Cost estimate section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostToml {
    /// Fixed overhead per request in USD
    pub baseline_usd: Option<f64>,

    /// Uplift per complexity step above simple
    pub complexity_factor: Option<f64>,

    /// Half-width of the confidence band
    pub confidence_interval: Option<f64>,

    /// Per-model price multipliers
    pub multipliers: BTreeMap<String, f64>,
}

/// Routing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingToml {
    /// Static per-task overrides
    pub pins: Vec<PinRule>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Router configuration section
    pub router: RouterToml,

    /// Budget configuration section
    pub budget: BudgetToml,

    /// Cache configuration section
    pub cache: CacheToml,

    /// Cost estimate section
    pub cost: CostToml,

    /// Routing configuration section
    pub routing: RoutingToml,

    /// Backends to register; the reference set when empty
    pub backends: Vec<BackendSpec>,
}

impl From<&DispatchConfig> for DispatchToml {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            router: RouterToml {
                enable_caching: Some(config.router.enable_caching),
                enable_fallback: Some(config.router.enable_fallback),
                request_timeout_ms: config.router.request_timeout_ms,
                max_prompt_chars: config.router.max_prompt_chars,
            },
            budget: BudgetToml {
                daily_limit_usd: Some(config.budget.daily_limit_usd),
                alert_threshold_percent: Some(config.budget.alert_threshold_percent),
                admission: Some(config.budget.admission),
            },
            cache: CacheToml {
                ttl_secs: Some(config.cache.ttl_secs),
                sweep_interval_secs: Some(config.cache.sweep_interval_secs),
            },
            cost: CostToml {
                baseline_usd: Some(config.cost.baseline_usd),
                complexity_factor: Some(config.cost.complexity_factor),
                confidence_interval: Some(config.cost.confidence_interval),
                multipliers: config.cost.multipliers.clone(),
            },
            routing: RoutingToml {
                pins: config.pins.clone(),
            },
            backends: config.backends.clone(),
        }
    }
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for the dispatch router
///
/// Use [`load_config`] to load with proper priority handling, then
/// [`DispatchConfig::build_router`] to assemble a ready router.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Router behaviour
    pub router: RouterConfig,

    /// Budget settings
    pub budget: BudgetConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Cost estimate settings
    pub cost: CostConfig,

    /// Routing pins, in precedence order
    pub pins: Vec<PinRule>,

    /// Backends to register
    pub backends: Vec<BackendSpec>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            budget: BudgetConfig::default(),
            cache: CacheConfig::default(),
            cost: CostConfig::default(),
            pins: Vec::new(),
            backends: default_backends(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the router misbehave
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = self.budget.daily_limit_usd;
        if limit.is_nan() || limit <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "daily_limit_usd must be positive, got {}",
                self.budget.daily_limit_usd
            )));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache sweep_interval_secs must be non-zero".to_string(),
            ));
        }

        self.validate_cost()?;

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "backend id must not be empty".to_string(),
                ));
            }
            if !ids.insert(backend.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate backend id: {}",
                    backend.id
                )));
            }
        }

        for pin in &self.pins {
            RoutingRule::from_pin(pin).validate()?;
        }

        Ok(())
    }

    fn validate_cost(&self) -> Result<(), ConfigError> {
        let cost = &self.cost;
        if !cost.baseline_usd.is_finite() || cost.baseline_usd < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "cost baseline_usd must be non-negative, got {}",
                cost.baseline_usd
            )));
        }
        if !cost.complexity_factor.is_finite() || cost.complexity_factor < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "cost complexity_factor must be non-negative, got {}",
                cost.complexity_factor
            )));
        }
        if !(0.0..1.0).contains(&cost.confidence_interval) {
            return Err(ConfigError::ValidationError(format!(
                "cost confidence_interval must be in [0, 1), got {}",
                cost.confidence_interval
            )));
        }
        for (model, multiplier) in &cost.multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "cost multiplier for {model} must be positive, got {multiplier}"
                )));
            }
        }
        Ok(())
    }

    /// Validate and assemble a router with every configured backend,
    /// pin, cache and a fresh metrics aggregator
    ///
    /// Must be called from within a Tokio runtime when caching is enabled
    /// (the cache sweeper is spawned here).
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or a backend cannot be created.
    pub fn build_router(&self) -> Result<Router, ConfigError> {
        self.validate()?;

        let budget = Arc::new(BudgetTracker::from_config(&self.budget));
        let mut router = Router::new(self.router.clone(), budget)
            .with_admission(self.budget.admission)
            .with_cost_config(self.cost.clone());

        for spec in &self.backends {
            router.register_client(create_client(spec)?);
        }
        for pin in &self.pins {
            router.pin(RoutingRule::from_pin(pin))?;
        }
        if self.router.enable_caching {
            router.set_cache(InMemoryCache::from_config(&self.cache));
        }
        router.set_metrics(Arc::new(MetricsAggregator::new()));

        tracing::info!(
            backends = self.backends.len(),
            pins = self.pins.len(),
            daily_limit_usd = self.budget.daily_limit_usd,
            source = %self.source,
            "Router assembled"
        );

        Ok(router)
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/dispatch/dispatch.toml` or
/// `~/.config/dispatch/dispatch.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dispatch").join("dispatch.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<DispatchConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DispatchConfig, ConfigError> {
    let mut config = DispatchConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DispatchToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DispatchConfig, toml: &DispatchToml) {
    // Router settings
    if let Some(enabled) = toml.router.enable_caching {
        config.router.enable_caching = enabled;
    }
    if let Some(enabled) = toml.router.enable_fallback {
        config.router.enable_fallback = enabled;
    }
    if let Some(ms) = toml.router.request_timeout_ms {
        config.router.request_timeout_ms = (ms > 0).then_some(ms);
    }
    if toml.router.max_prompt_chars.is_some() {
        config.router.max_prompt_chars = toml.router.max_prompt_chars;
    }

    // Budget settings
    if let Some(limit) = toml.budget.daily_limit_usd {
        config.budget.daily_limit_usd = limit;
    }
    if let Some(percent) = toml.budget.alert_threshold_percent {
        config.budget.alert_threshold_percent = percent;
    }
    if let Some(admission) = toml.budget.admission {
        config.budget.admission = admission;
    }

    // Cache settings
    if let Some(ttl) = toml.cache.ttl_secs {
        config.cache.ttl_secs = ttl;
    }
    if let Some(interval) = toml.cache.sweep_interval_secs {
        config.cache.sweep_interval_secs = interval;
    }

    // Cost estimate
    if let Some(baseline) = toml.cost.baseline_usd {
        config.cost.baseline_usd = baseline;
    }
    if let Some(factor) = toml.cost.complexity_factor {
        config.cost.complexity_factor = factor;
    }
    if let Some(interval) = toml.cost.confidence_interval {
        config.cost.confidence_interval = interval;
    }
    config
        .cost
        .multipliers
        .extend(toml.cost.multipliers.iter().map(|(m, x)| (m.clone(), *x)));

    // Routing and backends
    if !toml.routing.pins.is_empty() {
        config.pins.clone_from(&toml.routing.pins);
    }
    if !toml.backends.is_empty() {
        config.backends.clone_from(&toml.backends);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut DispatchConfig) {
    apply_env_from(config, |key| std::env::var(key).ok());
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

fn apply_env_from(config: &mut DispatchConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(limit) = lookup(ENV_DAILY_BUDGET) {
        if let Ok(usd) = limit.parse::<f64>() {
            config.budget.daily_limit_usd = usd;
            config.source = ConfigSource::Env;
        } else {
            tracing::warn!(var = ENV_DAILY_BUDGET, value = %limit, "Ignoring unparsable value");
        }
    }
    if let Some(ttl) = lookup(ENV_CACHE_TTL_SECS) {
        if let Ok(secs) = ttl.parse::<u64>() {
            config.cache.ttl_secs = secs;
            config.source = ConfigSource::Env;
        } else {
            tracing::warn!(var = ENV_CACHE_TTL_SECS, value = %ttl, "Ignoring unparsable value");
        }
    }
    if let Some(enabled) = lookup(ENV_ENABLE_CACHE) {
        config.router.enable_caching = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = lookup(ENV_ENABLE_FALLBACK) {
        config.router.enable_fallback = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = lookup(ENV_REQUEST_TIMEOUT_MS) {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.router.request_timeout_ms = (ms > 0).then_some(ms);
            config.source = ConfigSource::Env;
        } else {
            tracing::warn!(var = ENV_REQUEST_TIMEOUT_MS, value = %timeout, "Ignoring unparsable value");
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Daily budget override
    pub daily_budget: Option<f64>,

    /// Cache enabled override
    pub enable_caching: Option<bool>,

    /// Fallback enabled override
    pub enable_fallback: Option<bool>,

    /// Request deadline override (milliseconds, 0 disables it)
    pub request_timeout_ms: Option<u64>,

    /// Admission strategy override
    pub admission: Option<AdmissionMode>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set daily budget override
    #[must_use]
    pub fn with_daily_budget(mut self, usd: f64) -> Self {
        self.daily_budget = Some(usd);
        self
    }

    /// Set cache enabled override
    #[must_use]
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = Some(enabled);
        self
    }

    /// Set fallback enabled override
    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = Some(enabled);
        self
    }

    /// Set request deadline override
    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Set admission strategy override
    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionMode) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DispatchConfig) {
        if self.daily_budget.is_some()
            || self.enable_caching.is_some()
            || self.enable_fallback.is_some()
            || self.request_timeout_ms.is_some()
            || self.admission.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(usd) = self.daily_budget {
            config.budget.daily_limit_usd = usd;
        }
        if let Some(enabled) = self.enable_caching {
            config.router.enable_caching = enabled;
        }
        if let Some(enabled) = self.enable_fallback {
            config.router.enable_fallback = enabled;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.router.request_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(admission) = self.admission {
            config.budget.admission = admission;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use crate::backend::{estimate_tokens, CompletionRequest, Complexity, TaskType};
    use crate::routing::config::BackendKind;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();

        assert!(config.router.enable_caching);
        assert!(config.router.enable_fallback);
        assert!((config.budget.daily_limit_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.sweep_interval_secs, 300);
        assert!(config.pins.is_empty());
        assert_eq!(config.backends.len(), 5);
        assert_eq!(config.source(), ConfigSource::Default);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("dispatch"));
            assert!(p.to_string_lossy().ends_with("dispatch.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_config(
            r#"
[router]
enable_caching = false
request_timeout_ms = 2500
max_prompt_chars = 4000

[budget]
daily_limit_usd = 12.5
alert_threshold_percent = 90.0
admission = "reserve"

[cache]
ttl_secs = 60
sweep_interval_secs = 10

[[routing.pins]]
task = "translation"
backend = "llama"
model = "llama-4-405b"
fallbacks = ["anthropic"]

[[backends]]
id = "llama"
model = "llama-4-405b"
cost_per_token = 0.0

[[backends]]
id = "anthropic"
kind = "mock"
model = "claude-sonnet-4.5"
available = false
"#,
        );

        let mut config = DispatchConfig::default();
        let toml_config: DispatchToml =
            toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        apply_toml_config(&mut config, &toml_config);

        assert!(!config.router.enable_caching);
        assert_eq!(config.router.request_timeout_ms, Some(2500));
        assert_eq!(config.router.max_prompt_chars, Some(4000));
        assert!((config.budget.daily_limit_usd - 12.5).abs() < f64::EPSILON);
        assert_eq!(config.budget.admission, AdmissionMode::Reserve);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.sweep_interval_secs, 10);

        assert_eq!(config.pins.len(), 1);
        assert_eq!(config.pins[0].task, TaskType::Translation);
        assert_eq!(config.pins[0].fallbacks, vec!["anthropic".to_string()]);

        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].kind, BackendKind::Mock);
        assert!(config.backends[0].available);
        assert!(!config.backends[1].available);
    }

    #[test]
    fn test_parse_cost_section() {
        let toml_config: DispatchToml = toml::from_str(
            r#"
[cost]
baseline_usd = 0.25
confidence_interval = 0.2
multipliers = { o3 = 3.0 }
"#,
        )
        .unwrap();
        let mut config = DispatchConfig::default();
        apply_toml_config(&mut config, &toml_config);

        assert!((config.cost.baseline_usd - 0.25).abs() < f64::EPSILON);
        assert!((config.cost.complexity_factor - 0.05).abs() < f64::EPSILON);
        assert!((config.cost.confidence_interval - 0.2).abs() < f64::EPSILON);
        assert!((config.cost.multiplier("o3") - 3.0).abs() < f64::EPSILON);
        assert!((config.cost.multiplier("grok-3") - 1.0).abs() < f64::EPSILON);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_toml_zero_timeout_disables_deadline() {
        let toml_config: DispatchToml =
            toml::from_str("[router]\nrequest_timeout_ms = 0\n").unwrap();
        let mut config = DispatchConfig::default();
        config.router.request_timeout_ms = Some(5000);

        apply_toml_config(&mut config, &toml_config);

        assert_eq!(config.router.request_timeout_ms, None);
        assert!(config.router.request_timeout().is_none());
    }

    #[test]
    fn test_load_from_file_sets_source_and_path() {
        let file = write_config("[cache]\nttl_secs = 42\n");

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        // Environment may override in parallel runs, but the file was read
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
        assert!(matches!(
            config.source(),
            ConfigSource::File | ConfigSource::Env
        ));
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let toml_config: DispatchToml = toml::from_str("[budget]\ndaily_limit_usd = 5.0\n").unwrap();
        let mut config = DispatchConfig::default();
        apply_toml_config(&mut config, &toml_config);

        assert!((config.budget.daily_limit_usd - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.budget.admission, AdmissionMode::CheckThenRecord);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.backends.len(), 5);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/dispatch.toml");
        let config = load_config_from_path(Some(path)).unwrap();

        assert!(config.config_file_path.is_none());
        assert!(matches!(
            config.source(),
            ConfigSource::Default | ConfigSource::Env
        ));
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_config("[budget\ndaily_limit_usd = \"lots\"\n");

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_unknown_task_in_pin_is_parse_error() {
        let result: Result<DispatchToml, _> = toml::from_str(
            "[[routing.pins]]\ntask = \"poetry\"\nbackend = \"llama\"\nmodel = \"x\"\n",
        );
        assert!(result.is_err());
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let toml_config: DispatchToml =
            toml::from_str("[budget]\ndaily_limit_usd = 5.0\n[cache]\nttl_secs = 10\n").unwrap();
        let mut config = DispatchConfig::default();
        apply_toml_config(&mut config, &toml_config);
        config.set_source(ConfigSource::File);

        apply_env_from(
            &mut config,
            env_of(&[
                (ENV_DAILY_BUDGET, "7.5"),
                (ENV_ENABLE_CACHE, "false"),
                (ENV_ENABLE_FALLBACK, "0"),
                (ENV_REQUEST_TIMEOUT_MS, "900"),
            ]),
        );

        assert!((config.budget.daily_limit_usd - 7.5).abs() < f64::EPSILON);
        assert_eq!(config.cache.ttl_secs, 10);
        assert!(!config.router.enable_caching);
        assert!(!config.router.enable_fallback);
        assert_eq!(config.router.request_timeout_ms, Some(900));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_env_ignores_garbage() {
        let mut config = DispatchConfig::default();

        apply_env_from(
            &mut config,
            env_of(&[(ENV_DAILY_BUDGET, "lots"), (ENV_CACHE_TTL_SECS, "-1")]),
        );

        assert!((config.budget.daily_limit_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_env_zero_timeout_disables_deadline() {
        let mut config = DispatchConfig::default();
        config.router.request_timeout_ms = Some(100);

        apply_env_from(&mut config, env_of(&[(ENV_REQUEST_TIMEOUT_MS, "0")]));

        assert_eq!(config.router.request_timeout_ms, None);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = DispatchConfig::default();
        apply_env_from(&mut config, env_of(&[(ENV_DAILY_BUDGET, "7.5")]));

        ConfigOverrides::new()
            .with_daily_budget(3.0)
            .with_caching(false)
            .apply(&mut config);

        assert!((config.budget.daily_limit_usd - 3.0).abs() < f64::EPSILON);
        assert!(!config.router.enable_caching);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    // =========================================================================
    // ConfigOverrides Tests
    // =========================================================================

    #[test]
    fn test_config_overrides_builder() {
        let overrides = ConfigOverrides::new()
            .with_daily_budget(1.0)
            .with_caching(true)
            .with_fallback(false)
            .with_request_timeout_ms(250)
            .with_admission(AdmissionMode::Reserve);

        assert_eq!(overrides.daily_budget, Some(1.0));
        assert_eq!(overrides.enable_caching, Some(true));
        assert_eq!(overrides.enable_fallback, Some(false));
        assert_eq!(overrides.request_timeout_ms, Some(250));
        assert_eq!(overrides.admission, Some(AdmissionMode::Reserve));
    }

    #[test]
    fn test_config_overrides_zero_timeout_disables_deadline() {
        let mut config = DispatchConfig::default();
        config.router.request_timeout_ms = Some(5000);

        ConfigOverrides::new()
            .with_request_timeout_ms(0)
            .apply(&mut config);

        assert_eq!(config.router.request_timeout_ms, None);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = DispatchConfig::default();
        let original_source = config.source();

        ConfigOverrides::new().apply(&mut config);

        assert_eq!(config.source(), original_source);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Cli), "CLI");
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DispatchConfig::default();
        config.budget.daily_limit_usd = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = DispatchConfig::default();
        config.budget.daily_limit_usd = f64::NAN;
        assert_err!(config.validate());

        let mut config = DispatchConfig::default();
        config.cache.ttl_secs = 0;
        assert_err!(config.validate());

        let mut config = DispatchConfig::default();
        config.cache.sweep_interval_secs = 0;
        assert_err!(config.validate());

        let mut config = DispatchConfig::default();
        config.backends.push(BackendSpec::mock("llama", "other", 0.0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate backend id: llama"));
    }

    #[test]
    fn test_validation_rejects_bad_cost_values() {
        let mut config = DispatchConfig::default();
        config.cost.baseline_usd = -0.01;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = DispatchConfig::default();
        config.cost.complexity_factor = f64::INFINITY;
        assert_err!(config.validate());

        let mut config = DispatchConfig::default();
        config.cost.confidence_interval = 1.0;
        assert_err!(config.validate());

        let mut config = DispatchConfig::default();
        config.cost.multipliers.insert("o3".to_string(), 0.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cost multiplier for o3"));
    }

    #[test]
    fn test_validation_rejects_cyclic_pin() {
        let mut config = DispatchConfig::default();
        config.pins.push(PinRule {
            task: TaskType::Chat,
            complexity: None,
            privacy: None,
            backend: "llama".to_string(),
            model: "llama-4-405b".to_string(),
            fallbacks: vec!["anthropic".to_string(), "llama".to_string()],
        });

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Routing(RoutingTableError::CycleDetected { .. }))
        ));
    }

    // =========================================================================
    // Router Assembly Tests
    // =========================================================================

    #[tokio::test]
    async fn test_build_router_registers_backends_and_pins() {
        let mut config = DispatchConfig::default();
        config.pins.push(PinRule {
            task: TaskType::Translation,
            complexity: None,
            privacy: None,
            backend: "llama".to_string(),
            model: "llama-4-405b".to_string(),
            fallbacks: Vec::new(),
        });

        let router = config.build_router().unwrap();

        assert_eq!(
            router.registry().ids(),
            vec!["anthropic", "gemini", "grok", "llama", "openai"]
        );
        assert_eq!(router.table().pin_count(), 1);

        let response = router
            .complete(CompletionRequest::new("hola").with_task(TaskType::Translation))
            .await
            .unwrap();
        assert_eq!(response.backend, "llama");
        assert_eq!(router.metrics()["llama"].request_count, 1);
    }

    #[tokio::test]
    async fn test_build_router_applies_cost_config() {
        let mut config = DispatchConfig::default();
        config.cost.complexity_factor = 0.0;
        config.cost.multipliers.insert("o3".to_string(), 3.0);

        let router = config.build_router().unwrap();
        let request = CompletionRequest::new("prove the lemma")
            .with_task(TaskType::Reasoning)
            .with_complexity(Complexity::Complex);

        let prediction = router.predict_cost(&request).await.unwrap();

        let validated = request.validate(None).unwrap();
        let expected = f64::from(estimate_tokens(&validated)) * 0.000_03 * 3.0;
        assert_eq!(prediction.backend, "openai");
        assert!((prediction.estimated_cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = DispatchConfig::default();
        config.budget.admission = AdmissionMode::Reserve;
        config.router.request_timeout_ms = Some(1000);
        config.cost.multipliers.insert("o3".to_string(), 2.5);

        let rendered = toml::to_string(&DispatchToml::from(&config)).unwrap();
        let parsed: DispatchToml = toml::from_str(&rendered).unwrap();

        let mut reloaded = DispatchConfig::default();
        reloaded.backends.clear();
        apply_toml_config(&mut reloaded, &parsed);

        assert_eq!(reloaded.budget.admission, AdmissionMode::Reserve);
        assert_eq!(reloaded.router.request_timeout_ms, Some(1000));
        assert_eq!(reloaded.cost, config.cost);
        assert_eq!(reloaded.backends, config.backends);
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = format!("{read_err}");
        assert!(msg.contains("/test/path"));
        assert!(msg.contains("Failed to read"));

        let validation_err = ConfigError::ValidationError("invalid value".to_string());
        assert!(format!("{validation_err}").contains("invalid value"));
    }
}
