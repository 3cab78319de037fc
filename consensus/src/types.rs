//! Core analytics types shared by providers, the engine and its caches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest value any score or confidence may take.
pub const SCORE_MIN: f64 = 0.0;
/// Highest value any score or confidence may take.
pub const SCORE_MAX: f64 = 100.0;

/// Provider tag carried by every merged result.
pub const CONSENSUS_PROVIDER: &str = "consensus";

/// Identifier of a scoring provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Tag used for merged results.
    pub fn consensus() -> Self {
        Self(CONSENSUS_PROVIDER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a provider specializes in. Used to filter providers per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    /// Fraud and integrity signals (risk-oriented).
    Fraud,
    /// Skill and outcome prediction (strategy-oriented).
    Strategic,
    /// No particular specialty; served for comprehensive requests only.
    General,
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fraud => write!(f, "fraud"),
            Self::Strategic => write!(f, "strategic"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Kind of evaluation requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Every enabled provider.
    Comprehensive,
    /// Fraud-oriented providers only.
    FraudOnly,
    /// Strategy-oriented providers only.
    StrategicOnly,
}

impl RequestKind {
    /// Whether a provider with `role` takes part in this kind of request.
    pub fn admits(&self, role: ProviderRole) -> bool {
        match self {
            Self::Comprehensive => true,
            Self::FraudOnly => role == ProviderRole::Fraud,
            Self::StrategicOnly => role == ProviderRole::Strategic,
        }
    }

    pub fn all() -> &'static [RequestKind] {
        &[
            RequestKind::Comprehensive,
            RequestKind::FraudOnly,
            RequestKind::StrategicOnly,
        ]
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Comprehensive => write!(f, "comprehensive"),
            Self::FraudOnly => write!(f, "fraud_only"),
            Self::StrategicOnly => write!(f, "strategic_only"),
        }
    }
}

impl std::str::FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comprehensive" => Ok(Self::Comprehensive),
            "fraud_only" | "fraud" => Ok(Self::FraudOnly),
            "strategic_only" | "strategic" => Ok(Self::StrategicOnly),
            other => Err(format!("unknown request kind: {other}")),
        }
    }
}

/// The four numeric fields that take part in merging and agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Risk,
    Skill,
    Outcome,
    Confidence,
}

impl ScoreField {
    pub fn all() -> &'static [ScoreField] {
        &[
            ScoreField::Risk,
            ScoreField::Skill,
            ScoreField::Outcome,
            ScoreField::Confidence,
        ]
    }
}

impl std::fmt::Display for ScoreField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Risk => write!(f, "risk_score"),
            Self::Skill => write!(f, "skill_score"),
            Self::Outcome => write!(f, "outcome_score"),
            Self::Confidence => write!(f, "confidence"),
        }
    }
}

/// Severity of a notable condition reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A notable condition attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub kind: String,
    pub severity: Severity,
    pub description: String,
}

impl Flag {
    pub fn new(kind: impl Into<String>, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity,
            description: description.into(),
        }
    }
}

/// Output of one provider for one subject/context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub subject_id: String,
    pub context_id: String,
    pub timestamp: DateTime<Utc>,
    /// 0–100
    pub risk_score: f64,
    /// 0–100
    pub skill_score: f64,
    /// 0–100
    pub outcome_score: f64,
    /// Provider self-reported certainty, 0–100.
    pub confidence: f64,
    /// Provider-defined numeric features.
    pub signals: Vec<f64>,
    pub recommendations: Vec<String>,
    pub flags: Vec<Flag>,
    pub provider_id: ProviderId,
}

impl AnalyticsResult {
    /// Create a result with zeroed scores, stamped now.
    pub fn new(subject_id: &str, context_id: &str, provider_id: ProviderId) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            context_id: context_id.to_string(),
            timestamp: Utc::now(),
            risk_score: 0.0,
            skill_score: 0.0,
            outcome_score: 0.0,
            confidence: 0.0,
            signals: Vec::new(),
            recommendations: Vec::new(),
            flags: Vec::new(),
            provider_id,
        }
    }

    pub fn with_scores(mut self, risk: f64, skill: f64, outcome: f64, confidence: f64) -> Self {
        self.risk_score = risk;
        self.skill_score = skill;
        self.outcome_score = outcome;
        self.confidence = confidence;
        self
    }

    pub fn with_signals(mut self, signals: Vec<f64>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn field(&self, field: ScoreField) -> f64 {
        match field {
            ScoreField::Risk => self.risk_score,
            ScoreField::Skill => self.skill_score,
            ScoreField::Outcome => self.outcome_score,
            ScoreField::Confidence => self.confidence,
        }
    }

    pub fn set_field(&mut self, field: ScoreField, value: f64) {
        match field {
            ScoreField::Risk => self.risk_score = value,
            ScoreField::Skill => self.skill_score = value,
            ScoreField::Outcome => self.outcome_score = value,
            ScoreField::Confidence => self.confidence = value,
        }
    }

    /// Force every score into [0, 100]. Non-finite values become 0.
    ///
    /// Returns the fields that had to be corrected.
    pub fn clamp_scores(&mut self) -> Vec<ScoreField> {
        let mut corrected = Vec::new();
        for &field in ScoreField::all() {
            let raw = self.field(field);
            let fixed = clamp_score(raw);
            if fixed != raw {
                corrected.push(field);
                self.set_field(field, fixed);
            }
        }
        corrected
    }

    /// Whether every score lies within bounds.
    pub fn is_in_range(&self) -> bool {
        ScoreField::all().iter().all(|&f| {
            let v = self.field(f);
            v.is_finite() && (SCORE_MIN..=SCORE_MAX).contains(&v)
        })
    }
}

/// Clamp a raw score into [0, 100]; NaN and infinities map to 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(SCORE_MIN, SCORE_MAX)
    } else {
        SCORE_MIN
    }
}

/// Why a provider did not contribute to a consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub reason: String,
}

/// Merged output exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub subject_id: String,
    pub context_id: String,
    pub kind: RequestKind,
    pub timestamp: DateTime<Utc>,
    /// Blend of all contributors, tagged `consensus`.
    pub merged: AnalyticsResult,
    /// 0.0–1.0; 1.0 when a single provider responded.
    pub agreement: f64,
    /// Providers that responded in time, in priority order.
    pub contributing_providers: Vec<ProviderId>,
    pub provider_latencies_ms: BTreeMap<ProviderId, u64>,
    /// Provider chosen by the primary selection policy.
    pub primary_provider: ProviderId,
    /// Sanitized per-provider results, in priority order.
    pub provider_results: Vec<AnalyticsResult>,
    pub failures: Vec<ProviderFailure>,
}

impl ConsensusResult {
    /// The single authoritative result according to the selection policy.
    pub fn primary_result(&self) -> Option<&AnalyticsResult> {
        self.provider_results
            .iter()
            .find(|r| r.provider_id == self.primary_provider)
    }

    pub fn contributed(&self, provider: &ProviderId) -> bool {
        self.contributing_providers.contains(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score_bounds() {
        assert_eq!(clamp_score(150.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_clamp_scores_reports_fields() {
        let mut result = AnalyticsResult::new("p1", "g1", "a".into())
            .with_scores(150.0, 50.0, -1.0, f64::NAN);
        assert!(!result.is_in_range());

        let corrected = result.clamp_scores();
        assert_eq!(
            corrected,
            vec![ScoreField::Risk, ScoreField::Outcome, ScoreField::Confidence]
        );
        assert_eq!(result.risk_score, 100.0);
        assert_eq!(result.skill_score, 50.0);
        assert_eq!(result.outcome_score, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_in_range());
    }

    #[test]
    fn test_request_kind_admits() {
        assert!(RequestKind::Comprehensive.admits(ProviderRole::General));
        assert!(RequestKind::FraudOnly.admits(ProviderRole::Fraud));
        assert!(!RequestKind::FraudOnly.admits(ProviderRole::Strategic));
        assert!(RequestKind::StrategicOnly.admits(ProviderRole::Strategic));
        assert!(!RequestKind::StrategicOnly.admits(ProviderRole::General));
    }

    #[test]
    fn test_request_kind_parse() {
        assert_eq!("fraud".parse::<RequestKind>(), Ok(RequestKind::FraudOnly));
        assert_eq!(
            "comprehensive".parse::<RequestKind>(),
            Ok(RequestKind::Comprehensive)
        );
        assert!("everything".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_provider_id_serializes_as_string() {
        let id = ProviderId::new("fraud_guard");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"fraud_guard\"");
        assert_eq!(ProviderId::consensus().as_str(), "consensus");
    }
}
