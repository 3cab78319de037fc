//! Skill and outcome heuristics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::fraud::RATING_MAX;
use super::{mean_and_std, validate_ids, AnalyticsProvider, ProviderError, DEFAULT_PROVIDER_TIMEOUT};
use crate::config::STRATEGY_PROVIDER_ID;
use crate::data::{ActivityRecord, SubjectStats, SubjectStore};
use crate::types::{clamp_score, AnalyticsResult, Flag, ProviderId, ProviderRole, Severity};

const DEFAULT_HISTORY_LIMIT: usize = 20;
/// Coefficient of variation above which recent form counts as erratic.
const VOLATILITY_WARN: f64 = 0.5;

pub struct Strategist {
    id: ProviderId,
    store: Arc<dyn SubjectStore>,
    timeout: Duration,
    history_limit: usize,
}

impl Strategist {
    pub fn new(store: Arc<dyn SubjectStore>) -> Self {
        Self {
            id: ProviderId::new(STRATEGY_PROVIDER_ID),
            store,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
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
}

/// Fraction of decided recent matches that were wins, if any were decided.
fn recent_form(activity: &[ActivityRecord]) -> Option<f64> {
    let (wins, decided) = activity.iter().fold((0usize, 0usize), |(w, d), a| {
        match a.action.as_str() {
            "win" => (w + 1, d + 1),
            "loss" => (w, d + 1),
            _ => (w, d),
        }
    });
    (decided > 0).then(|| wins as f64 / decided as f64)
}

/// Coefficient of variation of recent scores; 0 when undefined.
fn volatility(activity: &[ActivityRecord]) -> f64 {
    let scores: Vec<f64> = activity.iter().map(|a| a.score).collect();
    match mean_and_std(&scores) {
        Some((mean, std)) if mean.abs() > f64::EPSILON => std / mean.abs(),
        _ => 0.0,
    }
}

fn score(
    id: &ProviderId,
    subject_id: &str,
    context_id: &str,
    stats: &SubjectStats,
    activity: &[ActivityRecord],
) -> AnalyticsResult {
    let win_rate = stats.win_rate();
    let rating = clamp_score(stats.rating / RATING_MAX * 100.0);
    let form = recent_form(activity).unwrap_or(win_rate);
    let volatility = volatility(activity);

    let skill = 0.6 * rating + 0.4 * win_rate * 100.0;
    let outcome = 50.0 * win_rate + 50.0 * form;
    let risk = volatility * 50.0;
    let confidence = 20.0
        + stats.games_played.min(100) as f64 * 0.5
        + activity.len().min(20) as f64 * 1.5;

    let mut result = AnalyticsResult::new(subject_id, context_id, id.clone());
    if stats.games_played == 0 {
        result = result.with_recommendation("Play placement matches to establish a rating");
    } else if skill < 40.0 {
        result = result.with_recommendation("Focus on fundamentals before ranked play");
    } else if skill >= 75.0 {
        result = result.with_recommendation("Seek stronger opponents");
    }
    if volatility > VOLATILITY_WARN {
        result = result
            .with_flag(Flag::new(
                "erratic_form",
                Severity::Low,
                format!("Recent score variation is {:.0}% of the mean", volatility * 100.0),
            ))
            .with_recommendation("Work on consistency across matches");
    }
    if form + 0.25 < win_rate {
        result = result.with_recommendation("Recent form is below average; review recent losses");
    }

    result.signals = [stats.rating, win_rate, form, volatility]
        .into_iter()
        .map(|v| if v.is_finite() { v } else { 0.0 })
        .collect();

    result.with_scores(
        clamp_score(risk),
        clamp_score(skill),
        clamp_score(outcome),
        clamp_score(confidence),
    )
}

#[async_trait]
impl AnalyticsProvider for Strategist {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Strategic
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

        let result = score(&self.id, subject_id, context_id, &stats, &activity);
        debug!(
            provider = %self.id,
            subject_id,
            skill = result.skill_score,
            outcome = result.outcome_score,
            "strategy analysis complete"
        );
        Ok(result)
    }
}
