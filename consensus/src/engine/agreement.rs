//! Agreement between contributors.
//!
//! For a pair of results the distance is the summed absolute difference of
//! the four scores over its maximum (400). Agreement is one minus the mean
//! pairwise distance, so two providers reduce to
//! `1 - (|Δrisk| + |Δskill| + |Δoutcome| + |Δconfidence|) / 400`.

use crate::types::{AnalyticsResult, ScoreField, SCORE_MAX, SCORE_MIN};

/// Agreement in [0, 1]. Fewer than two results agree fully.
pub fn agreement(results: &[AnalyticsResult]) -> f64 {
    if results.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in results.iter().enumerate() {
        for b in &results[i + 1..] {
            total += pair_distance(a, b);
            pairs += 1;
        }
    }
    (1.0 - total / pairs as f64).clamp(0.0, 1.0)
}

fn pair_distance(a: &AnalyticsResult, b: &AnalyticsResult) -> f64 {
    let fields = ScoreField::all();
    let span = (SCORE_MAX - SCORE_MIN) * fields.len() as f64;
    let diff: f64 = fields
        .iter()
        .map(|&f| (a.field(f) - b.field(f)).abs())
        .sum();
    if diff.is_finite() {
        diff / span
    } else {
        1.0
    }
}
