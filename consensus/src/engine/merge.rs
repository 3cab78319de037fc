//! Merging contributor results into one consensus result.

use std::collections::HashSet;

use chrono::Utc;
use tracing::warn;

use crate::config::FieldWeights;
use crate::types::{clamp_score, AnalyticsResult, ProviderId, ScoreField};

/// Clamp out-of-range or non-finite scores in place, logging each fix.
pub(crate) fn sanitize(result: &mut AnalyticsResult) {
    let raw: Vec<(ScoreField, f64)> = ScoreField::all()
        .iter()
        .map(|&f| (f, result.field(f)))
        .collect();
    for field in result.clamp_scores() {
        let before = raw
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| *v)
            .unwrap_or_default();
        warn!(
            provider = %result.provider_id,
            subject_id = %result.subject_id,
            %field,
            before,
            clamped = result.field(field),
            "provider returned an out-of-range score"
        );
    }
}

/// Blend sanitized contributor results given in provider-priority order.
///
/// A single contributor is passed through, re-tagged `consensus`.
/// Otherwise each score is a weighted mean (an unweighted mean when all
/// weights for the field are zero), recommendations are deduplicated in
/// first-seen order and capped, and flags and signals are concatenated.
pub(crate) fn merge(
    contributions: &[AnalyticsResult],
    weights: &FieldWeights,
    max_recommendations: usize,
) -> Option<AnalyticsResult> {
    match contributions {
        [] => None,
        [only] => {
            let mut merged = only.clone();
            merged.provider_id = ProviderId::consensus();
            Some(merged)
        }
        [first, ..] => {
            let mut merged = AnalyticsResult::new(
                &first.subject_id,
                &first.context_id,
                ProviderId::consensus(),
            );
            merged.timestamp = Utc::now();

            for &field in ScoreField::all() {
                merged.set_field(field, weighted_mean(contributions, weights, field));
            }

            let mut seen = HashSet::new();
            merged.recommendations = contributions
                .iter()
                .flat_map(|r| r.recommendations.iter())
                .filter(|rec| seen.insert(rec.as_str()))
                .take(max_recommendations)
                .cloned()
                .collect();
            merged.flags = contributions
                .iter()
                .flat_map(|r| r.flags.iter().cloned())
                .collect();
            merged.signals = contributions
                .iter()
                .flat_map(|r| r.signals.iter().copied())
                .collect();

            Some(merged)
        }
    }
}

fn weighted_mean(
    contributions: &[AnalyticsResult],
    weights: &FieldWeights,
    field: ScoreField,
) -> f64 {
    let (sum, total_weight) = contributions.iter().fold((0.0, 0.0), |(sum, total), r| {
        let w = weights.weight(field, &r.provider_id);
        (sum + w * r.field(field), total + w)
    });
    let mean = if total_weight > 0.0 {
        sum / total_weight
    } else {
        contributions.iter().map(|r| r.field(field)).sum::<f64>() / contributions.len() as f64
    };
    clamp_score(mean)
}
