//! End-to-end tests for the consensus engine: fan-out, deadline handling,
//! merging, caching, metrics, coalescing and result delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;

use consensus_engine::{
    AnalyticsProvider, AnalyticsResult, ConsensusEngine, ConsensusError, ConsensusResult,
    EngineConfig, FieldWeights, FraudGuard, InMemoryStore, PrimaryPolicy, ProviderError,
    ProviderId, ProviderRole, RequestKind, ResultSink, SinkError, Strategist, FRAUD_PROVIDER_ID,
    STRATEGY_PROVIDER_ID,
};

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Behavior {
    Respond([f64; 4]),
    Fail,
    Crash,
}

struct Scripted {
    id: ProviderId,
    role: ProviderRole,
    delay: Duration,
    behavior: Behavior,
    recommendations: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(id: &str, role: ProviderRole, behavior: Behavior) -> Self {
        Self {
            id: ProviderId::new(id),
            role,
            delay: Duration::from_millis(10),
            behavior,
            recommendations: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn responding(id: &str, scores: [f64; 4]) -> Self {
        Self::new(id, ProviderRole::General, Behavior::Respond(scores))
    }

    fn failing(id: &str) -> Self {
        Self::new(id, ProviderRole::General, Behavior::Fail)
    }

    fn role(mut self, role: ProviderRole) -> Self {
        self.role = role;
        self
    }

    fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    fn recommend(mut self, text: &str) -> Self {
        self.recommendations.push(text.to_string());
        self
    }

    fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl AnalyticsProvider for Scripted {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn role(&self) -> ProviderRole {
        self.role
    }

    async fn analyze(
        &self,
        subject_id: &str,
        context_id: &str,
    ) -> Result<AnalyticsResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.behavior {
            Behavior::Respond([risk, skill, outcome, confidence]) => {
                let mut result = AnalyticsResult::new(subject_id, context_id, self.id.clone())
                    .with_scores(risk, skill, outcome, confidence);
                result.recommendations = self.recommendations.clone();
                Ok(result)
            }
            Behavior::Fail => Err(ProviderError::Unavailable("scripted failure".to_string())),
            Behavior::Crash => panic!("scripted crash"),
        }
    }
}

struct ChannelSink(mpsc::UnboundedSender<ConsensusResult>);

#[async_trait]
impl ResultSink for ChannelSink {
    async fn deliver(&self, result: &ConsensusResult) -> Result<(), SinkError> {
        self.0
            .send(result.clone())
            .map_err(|e| SinkError::Delivery(e.to_string()))
    }
}

struct BrokenSink;

#[async_trait]
impl ResultSink for BrokenSink {
    async fn deliver(&self, _result: &ConsensusResult) -> Result<(), SinkError> {
        Err(SinkError::Delivery("receiver down".to_string()))
    }
}

fn config(enabled: &[&str]) -> EngineConfig {
    EngineConfig::default().with_enabled(enabled.iter().copied())
}

fn engine_with(config: EngineConfig, providers: Vec<Scripted>) -> ConsensusEngine {
    providers
        .into_iter()
        .fold(ConsensusEngine::builder(config), |b, p| b.with_provider(p))
        .build()
        .unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ── Merging and agreement ────────────────────────────────────────────────────

/// Two providers with equal weights average field-by-field.
#[tokio::test]
async fn test_two_provider_scenario() {
    let engine = engine_with(
        config(&["a", "b"]),
        vec![
            Scripted::responding("a", [10.0, 80.0, 70.0, 90.0]),
            Scripted::responding("b", [20.0, 60.0, 50.0, 70.0]),
        ],
    );

    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    assert_eq!(result.merged.provider_id, ProviderId::consensus());
    assert_close(result.merged.risk_score, 15.0);
    assert_close(result.merged.skill_score, 70.0);
    assert_close(result.merged.outcome_score, 60.0);
    assert_close(result.merged.confidence, 80.0);
    assert_close(result.agreement, 0.825);
    assert_eq!(
        result.contributing_providers,
        vec![ProviderId::new("a"), ProviderId::new("b")]
    );
    assert_eq!(result.provider_latencies_ms.len(), 2);
    assert!(result.failures.is_empty());
}

/// When one provider fails, the other's result is the consensus.
#[tokio::test]
async fn test_single_provider_fallback() {
    let engine = engine_with(
        config(&["a", "b"]),
        vec![
            Scripted::failing("a"),
            Scripted::responding("b", [33.0, 44.0, 55.0, 66.0]).recommend("rest"),
        ],
    );

    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    assert_eq!(result.agreement, 1.0);
    assert_eq!(result.contributing_providers, vec![ProviderId::new("b")]);
    assert_eq!(result.primary_provider, ProviderId::new("b"));

    let mut expected = result.provider_results[0].clone();
    expected.provider_id = ProviderId::consensus();
    assert_eq!(result.merged, expected);
    assert_eq!(result.merged.recommendations, vec!["rest".to_string()]);

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].provider, ProviderId::new("a"));
    assert!(!result.provider_latencies_ms.contains_key(&ProviderId::new("a")));
}

/// Identical results agree fully; opposite extremes not at all.
#[tokio::test]
async fn test_agreement_extremes() {
    let engine = engine_with(
        config(&["a", "b"]),
        vec![
            Scripted::responding("a", [40.0, 40.0, 40.0, 40.0]),
            Scripted::responding("b", [40.0, 40.0, 40.0, 40.0]),
        ],
    );
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_eq!(result.agreement, 1.0);

    let engine = engine_with(
        config(&["a", "b"]),
        vec![
            Scripted::responding("a", [0.0, 0.0, 0.0, 0.0]),
            Scripted::responding("b", [100.0, 100.0, 100.0, 100.0]),
        ],
    );
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_eq!(result.agreement, 0.0);
}

/// Out-of-range provider values are clamped before merging.
#[tokio::test]
async fn test_scores_are_clamped() {
    let engine = engine_with(
        config(&["a", "b"]),
        vec![
            Scripted::responding("a", [150.0, 50.0, f64::NAN, 50.0]),
            Scripted::responding("b", [100.0, 50.0, 20.0, 50.0]),
        ],
    );

    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    assert_eq!(result.merged.risk_score, 100.0);
    assert_eq!(result.merged.outcome_score, 10.0);
    assert_eq!(result.provider_results[0].risk_score, 100.0);
    assert!(result.provider_results.iter().all(|r| r.is_in_range()));
}

/// Specialist weights trust each provider on its own field.
#[tokio::test]
async fn test_specialist_weights() {
    let fraud = ProviderId::new("a");
    let strategic = ProviderId::new("b");
    let engine = engine_with(
        config(&["a", "b"]).with_field_weights(FieldWeights::specialist(&fraud, &strategic)),
        vec![
            Scripted::responding("a", [100.0, 0.0, 0.0, 50.0]),
            Scripted::responding("b", [0.0, 100.0, 100.0, 50.0]),
        ],
    );

    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_close(result.merged.risk_score, 70.0);
    assert_close(result.merged.skill_score, 70.0);
    assert_close(result.merged.outcome_score, 70.0);
    assert_close(result.merged.confidence, 50.0);
}

/// Recommendations dedupe across providers and respect the cap.
#[tokio::test]
async fn test_recommendation_cap() {
    let mut cfg = config(&["a", "b"]);
    cfg.max_recommendations = 2;
    let engine = engine_with(
        cfg,
        vec![
            Scripted::responding("a", [0.0; 4]).recommend("x").recommend("y"),
            Scripted::responding("b", [0.0; 4]).recommend("y").recommend("z"),
        ],
    );
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_eq!(result.merged.recommendations, vec!["x", "y"]);
}

// ── Deadlines and failures ───────────────────────────────────────────────────

/// A slow provider is abandoned at the shared deadline.
#[tokio::test(start_paused = true)]
async fn test_deadline_respected() {
    let engine = engine_with(
        config(&["fast", "slow"]).with_shared_deadline_ms(200),
        vec![
            Scripted::responding("fast", [10.0, 10.0, 10.0, 10.0]).delay_ms(20),
            Scripted::responding("slow", [90.0, 90.0, 90.0, 90.0]).delay_ms(10_000),
        ],
    );

    let start = Instant::now();
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed <= Duration::from_millis(205), "took {elapsed:?}");
    assert_eq!(result.contributing_providers, vec![ProviderId::new("fast")]);
    assert_eq!(result.failures[0].provider, ProviderId::new("slow"));
    assert_eq!(result.agreement, 1.0);
}

/// Every provider failing surfaces `NoProviderAvailable` and caches nothing.
#[tokio::test]
async fn test_all_fail_propagation() {
    let engine = engine_with(
        config(&["a", "b"]),
        vec![Scripted::failing("a"), Scripted::failing("b")],
    );

    let err = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap_err();

    match &err {
        ConsensusError::NoProviderAvailable { attempted, failures } => {
            assert_eq!(attempted.len(), 2);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retriable());
    assert_eq!(engine.cache_stats().size, 0);

    let metrics = engine.metrics();
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(metrics.availability(&ProviderId::new("a")), Some(0.0));
}

/// A provider task that dies is reported as such, not as a deadline miss.
#[tokio::test(start_paused = true)]
async fn test_crashed_provider_is_not_a_deadline_miss() {
    let engine = engine_with(
        config(&["ok", "crashy"]).with_shared_deadline_ms(1_000),
        vec![
            Scripted::responding("ok", [10.0; 4]),
            Scripted::new("crashy", ProviderRole::General, Behavior::Crash),
        ],
    );

    let start = Instant::now();
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(1_000));
    assert_eq!(result.contributing_providers, vec![ProviderId::new("ok")]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].provider, ProviderId::new("crashy"));
    assert_eq!(
        result.failures[0].reason,
        "provider task ended without a result"
    );
}

/// Empty identifiers never reach a provider.
#[tokio::test]
async fn test_invalid_input_calls_nothing() {
    let provider = Scripted::responding("a", [1.0; 4]);
    let calls = provider.calls();
    let engine = engine_with(config(&["a"]), vec![provider]);

    let err = engine
        .evaluate("p1", "", RequestKind::Comprehensive)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidInput(_)));
    assert!(!err.is_retriable());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ── Request kinds and primary selection ──────────────────────────────────────

/// `FraudOnly` only reaches fraud-role providers.
#[tokio::test]
async fn test_fraud_only_filters_providers() {
    let fraud = Scripted::responding("guard", [80.0, 20.0, 20.0, 60.0]).role(ProviderRole::Fraud);
    let strat =
        Scripted::responding("coach", [10.0, 90.0, 90.0, 60.0]).role(ProviderRole::Strategic);
    let strat_calls = strat.calls();
    let engine = engine_with(config(&["guard", "coach"]), vec![fraud, strat]);

    let result = engine
        .evaluate("p1", "g1", RequestKind::FraudOnly)
        .await
        .unwrap();

    assert_eq!(result.kind, RequestKind::FraudOnly);
    assert_eq!(result.contributing_providers, vec![ProviderId::new("guard")]);
    assert_eq!(strat_calls.load(Ordering::SeqCst), 0);
}

/// A kind that selects no enabled provider is a configuration error.
#[tokio::test]
async fn test_kind_without_providers() {
    let engine = engine_with(
        config(&["guard"]),
        vec![Scripted::responding("guard", [1.0; 4]).role(ProviderRole::Fraud)],
    );

    let err = engine
        .evaluate("p1", "g1", RequestKind::StrategicOnly)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::NoProviderEnabled {
            kind: RequestKind::StrategicOnly
        }
    ));
    assert!(!err.is_retriable());
}

/// A fixed primary wins regardless of confidence and never alters `merged`.
#[tokio::test]
async fn test_primary_policy() {
    let providers = || {
        vec![
            Scripted::responding("a", [10.0, 10.0, 10.0, 95.0]),
            Scripted::responding("b", [30.0, 30.0, 30.0, 40.0]),
        ]
    };

    let dynamic = engine_with(config(&["a", "b"]), providers());
    let fixed = engine_with(
        config(&["a", "b"]).with_primary(PrimaryPolicy::Provider(ProviderId::new("b"))),
        providers(),
    );

    let d = dynamic
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    let f = fixed
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    assert_eq!(d.primary_provider, ProviderId::new("a"));
    assert_eq!(f.primary_provider, ProviderId::new("b"));
    assert_eq!(f.primary_result().unwrap().confidence, 40.0);
    assert_close(d.merged.risk_score, f.merged.risk_score);
    assert_close(d.merged.confidence, f.merged.confidence);
}

/// A fixed primary that failed hands over to the most confident contributor.
#[tokio::test]
async fn test_failed_primary_falls_back() {
    let engine = engine_with(
        config(&["a", "b", "c"]).with_primary(PrimaryPolicy::Provider(ProviderId::new("a"))),
        vec![
            Scripted::failing("a"),
            Scripted::responding("b", [0.0, 0.0, 0.0, 30.0]),
            Scripted::responding("c", [0.0, 0.0, 0.0, 70.0]),
        ],
    );
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_eq!(result.primary_provider, ProviderId::new("c"));
}

// ── Caching ──────────────────────────────────────────────────────────────────

/// Hits within the freshness window, refetches after it.
#[tokio::test(start_paused = true)]
async fn test_cache_freshness() {
    let provider = Scripted::responding("a", [1.0; 4]);
    let calls = provider.calls();
    let engine = engine_with(
        config(&["a"]).with_freshness_window_ms(1_000),
        vec![provider],
    );

    let first = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;
    let second = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let metrics = engine.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.cache_hits, 1);
}

/// The request kind is part of the cache key, and clearing forces a refetch.
#[tokio::test]
async fn test_cache_key_and_clear() {
    let provider = Scripted::responding("a", [1.0; 4]).role(ProviderRole::Fraud);
    let calls = provider.calls();
    let engine = engine_with(config(&["a"]), vec![provider]);

    engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    engine
        .evaluate("p1", "g1", RequestKind::FraudOnly)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.cache_stats().size, 2);

    engine.clear_cache();
    engine
        .evaluate("p1", "g1", RequestKind::FraudOnly)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

/// With coalescing, identical concurrent requests share one fan-out.
#[tokio::test(start_paused = true)]
async fn test_coalesced_requests_share_one_fan_out() {
    let provider = Scripted::responding("a", [1.0; 4]).delay_ms(50);
    let calls = provider.calls();
    let mut cfg = config(&["a"]);
    cfg.coalesce_requests = true;
    let engine = engine_with(cfg, vec![provider]);

    let results = join_all(
        (0..8).map(|_| engine.evaluate("p1", "g1", RequestKind::Comprehensive)),
    )
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let metrics = engine.metrics();
    assert_eq!(metrics.total_requests, 8);
    assert_eq!(metrics.cache_hits, 7);
}

/// With coalescing, a failed fan-out is shared too: no caller waits past its
/// own deadline, however many are queued behind a hanging provider.
#[tokio::test(start_paused = true)]
async fn test_coalesced_callers_keep_their_deadline() {
    let provider = Scripted::responding("hang", [1.0; 4]).delay_ms(60_000);
    let calls = provider.calls();
    let mut cfg = config(&["hang"]).with_shared_deadline_ms(200);
    cfg.coalesce_requests = true;
    let engine = engine_with(cfg, vec![provider]);

    let outcomes = join_all((0..4).map(|_| async {
        let start = Instant::now();
        let result = engine
            .evaluate("p1", "g1", RequestKind::Comprehensive)
            .await;
        (result, start.elapsed())
    }))
    .await;

    for (result, elapsed) in &outcomes {
        assert!(matches!(
            result,
            Err(ConsensusError::NoProviderAvailable { .. })
        ));
        assert!(*elapsed <= Duration::from_millis(205), "waited {elapsed:?}");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let metrics = engine.metrics();
    assert_eq!(metrics.total_requests, 4);
    assert_eq!(metrics.failed_requests, 4);
}

/// Without coalescing, identical concurrent requests each fan out.
#[tokio::test(start_paused = true)]
async fn test_uncoalesced_requests_fan_out_independently() {
    let provider = Scripted::responding("a", [1.0; 4]).delay_ms(50);
    let calls = provider.calls();
    let engine = engine_with(config(&["a"]), vec![provider]);

    let (a, b) = tokio::join!(
        engine.evaluate("p1", "g1", RequestKind::Comprehensive),
        engine.evaluate("p1", "g1", RequestKind::Comprehensive),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// An engine shared across tasks serves different subjects in parallel.
#[tokio::test(start_paused = true)]
async fn test_shared_engine_across_tasks() {
    let engine = Arc::new(engine_with(
        config(&["a"]),
        vec![Scripted::responding("a", [1.0; 4]).delay_ms(100)],
    ));

    let start = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .evaluate(&format!("p{i}"), "g1", RequestKind::Comprehensive)
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(engine.cache_stats().size, 4);
}

// ── Metrics ──────────────────────────────────────────────────────────────────

/// Availability is smoothed per provider, and failures count against it.
#[tokio::test]
async fn test_metrics_track_availability() {
    let engine = engine_with(
        config(&["up", "down"]),
        vec![
            Scripted::responding("up", [50.0; 4]),
            Scripted::failing("down"),
        ],
    );

    engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    engine
        .evaluate("p2", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.successful_requests, 2);
    assert_eq!(metrics.availability(&ProviderId::new("up")), Some(1.0));
    assert_eq!(metrics.availability(&ProviderId::new("down")), Some(0.0));
    assert_eq!(metrics.providers[&ProviderId::new("down")].failures, 2);
    assert_eq!(metrics.average_agreement, 1.0);
}

// ── Result delivery ──────────────────────────────────────────────────────────

/// Fresh results reach the sink; cache hits do not.
#[tokio::test(start_paused = true)]
async fn test_sink_receives_fresh_results() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = ConsensusEngine::builder(config(&["a"]))
        .with_provider(Scripted::responding("a", [5.0; 4]))
        .with_sink(Arc::new(ChannelSink(tx)))
        .build()
        .unwrap();

    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered, result);

    engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );
}

/// A failing sink never fails the evaluation.
#[tokio::test]
async fn test_broken_sink_is_ignored() {
    let engine = ConsensusEngine::builder(config(&["a"]))
        .with_provider(Scripted::responding("a", [5.0; 4]))
        .with_sink(Arc::new(BrokenSink))
        .build()
        .unwrap();

    assert!(engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .is_ok());
}

// ── Built-in providers ───────────────────────────────────────────────────────

const FIXTURE: &str = r#"{
    "p1": {
        "stats": {
            "games_played": 60, "wins": 33, "average_score": 42.0,
            "average_reaction_ms": 240.0, "rating": 1650.0,
            "account_age_days": 300, "reports": 1
        },
        "activity": [
            { "timestamp": "2024-05-01T10:00:00Z", "context_id": "g1", "action": "win", "score": 40.0, "duration_ms": 600000 },
            { "timestamp": "2024-05-02T10:00:00Z", "context_id": "g2", "action": "loss", "score": 35.0, "duration_ms": 540000 }
        ],
        "transactions": [
            { "tx_id": "t1", "timestamp": "2024-05-01T11:00:00Z", "counterparty": "shop", "amount": 5.0 }
        ]
    }
}"#;

fn builtin_engine() -> ConsensusEngine {
    let store = Arc::new(InMemoryStore::from_json(FIXTURE).unwrap());
    ConsensusEngine::builder(EngineConfig::default())
        .with_cached_provider(FraudGuard::new(store.clone()).with_ledger(store.clone()))
        .with_cached_provider(Strategist::new(store))
        .build()
        .unwrap()
}

/// Both built-in providers contribute bounded scores for a known subject.
#[tokio::test]
async fn test_builtin_providers_end_to_end() {
    let engine = builtin_engine();
    let result = engine
        .evaluate("p1", "g1", RequestKind::Comprehensive)
        .await
        .unwrap();

    assert_eq!(
        result.contributing_providers,
        vec![
            ProviderId::new(FRAUD_PROVIDER_ID),
            ProviderId::new(STRATEGY_PROVIDER_ID)
        ]
    );
    assert!(result.merged.is_in_range());
    assert!((0.0..=1.0).contains(&result.agreement));
    assert!(result
        .merged
        .flags
        .iter()
        .any(|f| f.kind == "abuse_reports"));
}

/// An unknown subject makes every built-in provider unavailable.
#[tokio::test]
async fn test_builtin_providers_unknown_subject() {
    let engine = builtin_engine();
    let err = engine
        .evaluate("ghost", "g1", RequestKind::Comprehensive)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::NoProviderAvailable { .. }));
}
