//! Primary provider selection.

use tracing::debug;

use crate::config::PrimaryPolicy;
use crate::types::{AnalyticsResult, ProviderId};

/// Pick the authoritative provider among `contributions` (priority order).
///
/// `Dynamic` takes the highest confidence, earliest in priority on ties. A
/// fixed provider that did not contribute falls back to `Dynamic`.
pub fn select_primary(
    policy: &PrimaryPolicy,
    contributions: &[AnalyticsResult],
) -> Option<ProviderId> {
    if let PrimaryPolicy::Provider(id) = policy {
        if contributions.iter().any(|r| &r.provider_id == id) {
            return Some(id.clone());
        }
        debug!(primary = %id, "configured primary did not contribute, using dynamic selection");
    }
    most_confident(contributions).map(|r| r.provider_id.clone())
}

fn most_confident(contributions: &[AnalyticsResult]) -> Option<&AnalyticsResult> {
    contributions.iter().fold(None, |best, r| match best {
        Some(b) if b.confidence >= r.confidence => Some(b),
        _ => Some(r),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_confidence(id: &str, confidence: f64) -> AnalyticsResult {
        AnalyticsResult::new("p1", "g1", ProviderId::new(id)).with_scores(0.0, 0.0, 0.0, confidence)
    }

    #[test]
    fn test_dynamic_picks_highest_confidence() {
        let results = [with_confidence("a", 60.0), with_confidence("b", 90.0)];
        assert_eq!(
            select_primary(&PrimaryPolicy::Dynamic, &results),
            Some(ProviderId::new("b"))
        );
    }

    #[test]
    fn test_dynamic_tie_goes_to_priority() {
        let results = [with_confidence("a", 70.0), with_confidence("b", 70.0)];
        assert_eq!(
            select_primary(&PrimaryPolicy::Dynamic, &results),
            Some(ProviderId::new("a"))
        );
    }

    #[test]
    fn test_fixed_primary() {
        let results = [with_confidence("a", 10.0), with_confidence("b", 90.0)];
        let policy = PrimaryPolicy::Provider(ProviderId::new("a"));
        assert_eq!(select_primary(&policy, &results), Some(ProviderId::new("a")));
    }

    #[test]
    fn test_absent_fixed_primary_falls_back() {
        let results = [with_confidence("b", 40.0)];
        let policy = PrimaryPolicy::Provider(ProviderId::new("a"));
        assert_eq!(select_primary(&policy, &results), Some(ProviderId::new("b")));
        assert_eq!(select_primary(&policy, &[]), None);
    }
}
