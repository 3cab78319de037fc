//! Engine configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`CONSENSUS_*`)
//! 2. Values from a TOML file
//! 3. Built-in defaults
//!
//! ## Recognized options
//!
//! | Option                | Default                      |
//! |-----------------------|------------------------------|
//! | `enabled_providers`   | `fraud_guard`, `strategist`  |
//! | `shared_deadline_ms`  | 5000                         |
//! | `freshness_window_ms` | 300000                       |
//! | `primary`             | `dynamic`                    |
//! | `field_weights`       | equal (1.0 for everyone)     |
//! | `max_recommendations` | 10                           |
//! | `cache_capacity`      | 1024                         |
//! | `smoothing_factor`    | 0.5                          |
//! | `coalesce_requests`   | false                        |

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ProviderId, ScoreField};

/// Id of the built-in fraud-oriented provider.
pub const FRAUD_PROVIDER_ID: &str = "fraud_guard";
/// Id of the built-in strategy-oriented provider.
pub const STRATEGY_PROVIDER_ID: &str = "strategist";

const DEFAULT_SHARED_DEADLINE_MS: u64 = 5_000;
const DEFAULT_FRESHNESS_WINDOW_MS: u64 = 300_000;
const DEFAULT_MAX_RECOMMENDATIONS: usize = 10;
const DEFAULT_CACHE_CAPACITY: usize = 1_024;
const DEFAULT_PROVIDER_CACHE_CAPACITY: usize = 256;
const DEFAULT_SMOOTHING_FACTOR: f64 = 0.5;
const DEFAULT_SINK_TIMEOUT_MS: u64 = 10_000;

/// Environment-variable names for overrides.
const ENV_ENABLED_PROVIDERS: &str = "CONSENSUS_ENABLED_PROVIDERS";
const ENV_SHARED_DEADLINE_MS: &str = "CONSENSUS_SHARED_DEADLINE_MS";
const ENV_FRESHNESS_WINDOW_MS: &str = "CONSENSUS_FRESHNESS_WINDOW_MS";
const ENV_PRIMARY: &str = "CONSENSUS_PRIMARY";
const ENV_COALESCE_REQUESTS: &str = "CONSENSUS_COALESCE_REQUESTS";
const ENV_SINK_URL: &str = "CONSENSUS_SINK_URL";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("No provider enabled")]
    NoProviderEnabled,

    #[error("Unknown provider: {0}")]
    UnknownProvider(ProviderId),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Which provider is authoritative when a single result must be shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryPolicy {
    /// Highest-confidence contributor wins.
    #[default]
    Dynamic,
    /// A fixed provider; falls back to `Dynamic` when it did not contribute.
    Provider(ProviderId),
}

impl std::str::FromStr for PrimaryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(ConfigError::invalid("primary", "empty value")),
            "dynamic" => Ok(Self::Dynamic),
            id => Ok(Self::Provider(ProviderId::new(id))),
        }
    }
}

/// Per-field, per-provider merge weights. Missing entries weigh 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub risk: BTreeMap<ProviderId, f64>,
    pub skill: BTreeMap<ProviderId, f64>,
    pub outcome: BTreeMap<ProviderId, f64>,
    pub confidence: BTreeMap<ProviderId, f64>,
}

impl FieldWeights {
    /// Weight the fraud provider higher on risk and the strategic provider
    /// higher on skill and outcome (0.7 / 0.3).
    pub fn specialist(fraud: &ProviderId, strategic: &ProviderId) -> Self {
        let split = |heavy: &ProviderId, light: &ProviderId| {
            BTreeMap::from([(heavy.clone(), 0.7), (light.clone(), 0.3)])
        };
        Self {
            risk: split(fraud, strategic),
            skill: split(strategic, fraud),
            outcome: split(strategic, fraud),
            confidence: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, field: ScoreField, provider: ProviderId, weight: f64) {
        self.table_mut(field).insert(provider, weight);
    }

    pub fn weight(&self, field: ScoreField, provider: &ProviderId) -> f64 {
        self.table(field).get(provider).copied().unwrap_or(1.0)
    }

    fn table(&self, field: ScoreField) -> &BTreeMap<ProviderId, f64> {
        match field {
            ScoreField::Risk => &self.risk,
            ScoreField::Skill => &self.skill,
            ScoreField::Outcome => &self.outcome,
            ScoreField::Confidence => &self.confidence,
        }
    }

    fn table_mut(&mut self, field: ScoreField) -> &mut BTreeMap<ProviderId, f64> {
        match field {
            ScoreField::Risk => &mut self.risk,
            ScoreField::Skill => &mut self.skill,
            ScoreField::Outcome => &mut self.outcome,
            ScoreField::Confidence => &mut self.confidence,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for &field in ScoreField::all() {
            for (provider, weight) in self.table(field) {
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(ConfigError::invalid(
                        "field_weights",
                        format!("{field} weight for {provider} must be a non-negative number"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Settings for each adapter's private result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCacheConfig {
    pub enabled: bool,
    pub freshness_ms: u64,
    pub capacity: usize,
}

impl Default for ProviderCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            freshness_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            capacity: DEFAULT_PROVIDER_CACHE_CAPACITY,
        }
    }
}

impl ProviderCacheConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

/// Webhook delivery of fresh consensus results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sink_timeout_ms() -> u64 {
    DEFAULT_SINK_TIMEOUT_MS
}

impl SinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: DEFAULT_SINK_TIMEOUT_MS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration for the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enabled_providers: BTreeSet<ProviderId>,
    /// Maximum wall-clock wait for provider responses.
    pub shared_deadline_ms: u64,
    /// How long a consensus result stays fresh in the result cache.
    pub freshness_window_ms: u64,
    pub primary: PrimaryPolicy,
    pub field_weights: FieldWeights,
    /// Cap on merged recommendations.
    pub max_recommendations: usize,
    /// LRU bound of the result cache.
    pub cache_capacity: usize,
    /// Fixed provider order for merging; unlisted providers follow in
    /// registration order.
    pub provider_priority: Vec<ProviderId>,
    /// EMA factor for smoothed metrics, in (0, 1].
    pub smoothing_factor: f64,
    /// Let identical concurrent requests share one fan-out.
    pub coalesce_requests: bool,
    pub provider_cache: ProviderCacheConfig,
    pub sink: Option<SinkConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled_providers: BTreeSet::from([
                ProviderId::new(FRAUD_PROVIDER_ID),
                ProviderId::new(STRATEGY_PROVIDER_ID),
            ]),
            shared_deadline_ms: DEFAULT_SHARED_DEADLINE_MS,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            primary: PrimaryPolicy::Dynamic,
            field_weights: FieldWeights::default(),
            max_recommendations: DEFAULT_MAX_RECOMMENDATIONS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            provider_priority: Vec::new(),
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            coalesce_requests: false,
            provider_cache: ProviderCacheConfig::default(),
            sink: None,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `CONSENSUS_*` overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ENABLED_PROVIDERS) {
            self.enabled_providers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ProviderId::new)
                .collect();
        }
        if let Some(raw) = lookup(ENV_SHARED_DEADLINE_MS) {
            self.shared_deadline_ms = parse_u64("shared_deadline_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_FRESHNESS_WINDOW_MS) {
            self.freshness_window_ms = parse_u64("freshness_window_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_PRIMARY) {
            self.primary = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_COALESCE_REQUESTS) {
            self.coalesce_requests = matches!(raw.trim(), "1" | "true" | "yes");
        }
        if let Some(url) = lookup(ENV_SINK_URL) {
            self.sink = Some(SinkConfig::new(url));
        }
        Ok(())
    }

    /// Check every option for sanity. Provider membership is checked by the
    /// engine builder, which knows what is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_providers.is_empty() {
            return Err(ConfigError::NoProviderEnabled);
        }
        if self.shared_deadline_ms == 0 {
            return Err(ConfigError::invalid("shared_deadline_ms", "must be > 0"));
        }
        if self.freshness_window_ms == 0 {
            return Err(ConfigError::invalid("freshness_window_ms", "must be > 0"));
        }
        if self.max_recommendations == 0 {
            return Err(ConfigError::invalid("max_recommendations", "must be > 0"));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::invalid("cache_capacity", "must be > 0"));
        }
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(ConfigError::invalid(
                "smoothing_factor",
                format!("{} is outside (0, 1]", self.smoothing_factor),
            ));
        }
        if self.provider_cache.enabled
            && (self.provider_cache.capacity == 0 || self.provider_cache.freshness_ms == 0)
        {
            return Err(ConfigError::invalid(
                "provider_cache",
                "capacity and freshness_ms must be > 0 when enabled",
            ));
        }
        if let Some(ref sink) = self.sink {
            if sink.url.trim().is_empty() {
                return Err(ConfigError::invalid("sink.url", "must not be empty"));
            }
        }
        self.field_weights.validate()
    }

    pub fn shared_deadline(&self) -> Duration {
        Duration::from_millis(self.shared_deadline_ms)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn with_enabled<I, P>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProviderId>,
    {
        self.enabled_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_shared_deadline_ms(mut self, ms: u64) -> Self {
        self.shared_deadline_ms = ms;
        self
    }

    pub fn with_freshness_window_ms(mut self, ms: u64) -> Self {
        self.freshness_window_ms = ms;
        self
    }

    pub fn with_primary(mut self, primary: PrimaryPolicy) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_field_weights(mut self, weights: FieldWeights) -> Self {
        self.field_weights = weights;
        self
    }
}

fn parse_u64(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("`{raw}` is not an integer")))
}
