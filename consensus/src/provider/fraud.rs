//! Fraud-oriented heuristics.
//!
//! Risk is the sum of independent penalties, each backed by a flag:
//!
//! | Signal                     | Penalty | Flag                         |
//! |----------------------------|---------|------------------------------|
//! | reaction time < 120 ms     | 35      | `inhuman_reaction` (high)    |
//! | win rate > 90% (≥20 games) | 20      | `win_rate_anomaly` (medium)  |
//! | abuse reports              | 5 each, max 25 | `abuse_reports` (medium/high) |
//! | account younger than 7 d   | 10      | `new_account` (low)          |
//! | recent score outliers (2σ) | 15      | `score_anomaly` (medium/high)|
//! | ≥75% of ≥3 transfers to one counterparty | 15 | `counterparty_concentration` (medium) |
//!
//! Skill and outcome are coarse by-products (rating and win rate); the
//! strategy adapter is the authority on those.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{mean_and_std, validate_ids, AnalyticsProvider, ProviderError, DEFAULT_PROVIDER_TIMEOUT};
use crate::config::FRAUD_PROVIDER_ID;
use crate::data::{ActivityRecord, LedgerClient, LedgerTransaction, SubjectStats, SubjectStore};
use crate::types::{clamp_score, AnalyticsResult, Flag, ProviderId, ProviderRole, Severity};

const REACTION_FLOOR_MS: f64 = 120.0;
const WIN_RATE_CEILING: f64 = 0.9;
const MIN_GAMES_FOR_WIN_RATE: u32 = 20;
const NEW_ACCOUNT_DAYS: u32 = 7;
const REPORT_PENALTY: f64 = 5.0;
const REPORT_PENALTY_CAP: f64 = 25.0;
const OUTLIER_SIGMA: f64 = 2.0;
const MIN_OUTLIER_SAMPLES: usize = 5;
const CONCENTRATION_MIN_TRANSFERS: usize = 3;
const CONCENTRATION_SHARE: f64 = 0.75;

/// Rating scale of [`SubjectStats::rating`].
pub(crate) const RATING_MAX: f64 = 3_000.0;

const DEFAULT_HISTORY_LIMIT: usize = 50;

pub struct FraudGuard {
    id: ProviderId,
    store: Arc<dyn SubjectStore>,
    ledger: Option<Arc<dyn LedgerClient>>,
    timeout: Duration,
    history_limit: usize,
}

impl FraudGuard {
    pub fn new(store: Arc<dyn SubjectStore>) -> Self {
        Self {
            id: ProviderId::new(FRAUD_PROVIDER_ID),
            store,
            ledger: None,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Also inspect ledger transfers.
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_id(mut self, id: impl Into<ProviderId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    fn score(
        &self,
        subject_id: &str,
        context_id: &str,
        stats: &SubjectStats,
        activity: &[ActivityRecord],
        transactions: &[LedgerTransaction],
    ) -> AnalyticsResult {
        let mut result = AnalyticsResult::new(subject_id, context_id, self.id.clone());
        let mut risk = 0.0;

        let reaction = stats.average_reaction_ms;
        if reaction > 0.0 && reaction < REACTION_FLOOR_MS {
            risk += 35.0;
            result = result
                .with_flag(Flag::new(
                    "inhuman_reaction",
                    Severity::High,
                    format!("Average reaction {reaction:.0} ms is below {REACTION_FLOOR_MS:.0} ms"),
                ))
                .with_recommendation("Review recent matches for input automation");
        }

        let win_rate = stats.win_rate();
        if stats.games_played >= MIN_GAMES_FOR_WIN_RATE && win_rate > WIN_RATE_CEILING {
            risk += 20.0;
            result = result
                .with_flag(Flag::new(
                    "win_rate_anomaly",
                    Severity::Medium,
                    format!(
                        "Won {} of {} games ({:.0}%)",
                        stats.wins,
                        stats.games_played,
                        win_rate * 100.0
                    ),
                ))
                .with_recommendation("Audit opponents in the winning streak");
        }

        if stats.reports > 0 {
            risk += (stats.reports as f64 * REPORT_PENALTY).min(REPORT_PENALTY_CAP);
            let severity = if stats.reports >= 5 {
                Severity::High
            } else {
                Severity::Medium
            };
            result = result
                .with_flag(Flag::new(
                    "abuse_reports",
                    severity,
                    format!("{} abuse reports on record", stats.reports),
                ))
                .with_recommendation("Escalate to manual review");
        }

        if stats.account_age_days < NEW_ACCOUNT_DAYS {
            risk += 10.0;
            result = result
                .with_flag(Flag::new(
                    "new_account",
                    Severity::Low,
                    format!("Account is {} days old", stats.account_age_days),
                ))
                .with_recommendation("Apply new-account limits");
        }

        let outliers = score_outliers(activity);
        if outliers > 0 {
            risk += 15.0;
            let severity = if outliers > activity.len() / 4 {
                Severity::High
            } else {
                Severity::Medium
            };
            result = result
                .with_flag(Flag::new(
                    "score_anomaly",
                    severity,
                    format!("{} of {} recent scores are outliers", outliers, activity.len()),
                ))
                .with_recommendation("Investigate anomalous recent scores");
        }

        let concentration = counterparty_concentration(transactions);
        if let Some((counterparty, share)) = &concentration {
            if *share >= CONCENTRATION_SHARE {
                risk += 15.0;
                result = result
                    .with_flag(Flag::new(
                        "counterparty_concentration",
                        Severity::Medium,
                        format!("{:.0}% of transfers go to {}", share * 100.0, counterparty),
                    ))
                    .with_recommendation(format!("Review transfers to {counterparty}"));
            }
        }

        let mut confidence = 30.0
            + stats.games_played.min(100) as f64 * 0.3
            + activity.len().min(20) as f64;
        if !transactions.is_empty() {
            confidence += 10.0;
        }

        result.signals = [
            reaction,
            win_rate,
            stats.reports as f64,
            outliers as f64,
            concentration.map(|(_, share)| share).unwrap_or(0.0),
        ]
        .into_iter()
        .map(|v| if v.is_finite() { v } else { 0.0 })
        .collect();

        result.with_scores(
            clamp_score(risk),
            clamp_score(stats.rating / RATING_MAX * 100.0),
            clamp_score(win_rate * 100.0),
            clamp_score(confidence),
        )
    }
}

/// Recent scores further than 2σ from the mean.
fn score_outliers(activity: &[ActivityRecord]) -> usize {
    if activity.len() < MIN_OUTLIER_SAMPLES {
        return 0;
    }
    let scores: Vec<f64> = activity.iter().map(|a| a.score).collect();
    match mean_and_std(&scores) {
        Some((mean, std)) => scores
            .iter()
            .filter(|s| (*s - mean).abs() > OUTLIER_SIGMA * std)
            .count(),
        None => 0,
    }
}

/// Most frequent counterparty and its share of transfers.
fn counterparty_concentration(transactions: &[LedgerTransaction]) -> Option<(String, f64)> {
    if transactions.len() < CONCENTRATION_MIN_TRANSFERS {
        return None;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tx in transactions {
        *counts.entry(tx.counterparty.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(counterparty, n)| (counterparty.to_string(), n as f64 / transactions.len() as f64))
}

#[async_trait]
impl AnalyticsProvider for FraudGuard {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Fraud
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn analyze(
        &self,
        subject_id: &str,
        context_id: &str,
    ) -> Result<AnalyticsResult, ProviderError> {
        validate_ids(subject_id, context_id)?;

        let stats = self.store.subject_stats(subject_id).await?;
        let activity = self
            .store
            .recent_activity(subject_id, self.history_limit)
            .await?;
        let transactions = match &self.ledger {
            Some(ledger) => ledger.transactions(subject_id, self.history_limit).await?,
            None => Vec::new(),
        };

        let result = self.score(subject_id, context_id, &stats, &activity, &transactions);
        debug!(
            provider = %self.id,
            subject_id,
            risk = result.risk_score,
            flags = result.flags.len(),
            "fraud analysis complete"
        );
        Ok(result)
    }
}
