//! Consensus engine: cache → fan-out → merge → metrics.
//!
//! ```text
//! evaluate(subject, context, kind)
//!   ├─ result cache hit ─────────────────────────────▶ return
//!   ├─ active = enabled providers admitted by kind
//!   ├─ [coalesce] lead the key's flight, or follow it until the deadline
//!   ├─ fan-out (tasks + mpsc, shared deadline)
//!   ├─ sanitize → merge → agreement → primary
//!   ├─ metrics, result cache, sink (detached)
//!   └─ return ConsensusResult
//! ```
//!
//! ## Partial failure policy
//!
//! Provider failures and deadline misses are recorded on the result and in
//! metrics. The evaluation only fails when no active provider contributed.

mod agreement;
mod fanout;
mod flight;
mod merge;
mod primary;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::config::{ConfigError, EngineConfig, PrimaryPolicy};
use crate::error::{ConsensusError, EvaluateResult};
use crate::metrics::{EvaluationSample, MetricsRecorder, MetricsSnapshot, ProviderObservation};
use crate::provider::{AnalyticsProvider, CachedProvider};
use crate::sink::{ResultSink, WebhookSink};
use crate::types::{ConsensusResult, ProviderFailure, ProviderId, RequestKind};

pub use agreement::agreement;
pub use primary::select_primary;

use fanout::{fan_out, ProviderOutcome};
use flight::{Flight, FlightGate};

const MISSED_DEADLINE: &str = "no response before shared deadline";
const TASK_ENDED: &str = "provider task ended without a result";

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a [`ConsensusEngine`] from a configuration and providers.
pub struct EngineBuilder {
    config: EngineConfig,
    providers: Vec<Arc<dyn AnalyticsProvider>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            sink: None,
        }
    }

    /// Register a provider as-is.
    pub fn with_provider<P: AnalyticsProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn with_shared_provider(mut self, provider: Arc<dyn AnalyticsProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Register a provider behind its own result cache, per
    /// `config.provider_cache`. Registered as-is when that cache is disabled.
    pub fn with_cached_provider<P: AnalyticsProvider + 'static>(self, provider: P) -> Self {
        if self.config.provider_cache.enabled {
            let cached = CachedProvider::from_config(provider, &self.config.provider_cache);
            self.with_provider(cached)
        } else {
            self.with_provider(provider)
        }
    }

    /// Override the sink built from `config.sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration against the registered providers.
    pub fn build(self) -> EvaluateResult<ConsensusEngine> {
        let config = self.config;
        config.validate()?;

        let mut registered: HashMap<ProviderId, Arc<dyn AnalyticsProvider>> = HashMap::new();
        let mut registration_order = Vec::with_capacity(self.providers.len());
        for provider in self.providers {
            let id = provider.id().clone();
            if registered.insert(id.clone(), provider).is_some() {
                return Err(ConfigError::Invalid {
                    field: "providers",
                    reason: format!("provider {id} registered twice"),
                }
                .into());
            }
            registration_order.push(id);
        }

        for id in &config.enabled_providers {
            if !registered.contains_key(id) {
                return Err(ConfigError::UnknownProvider(id.clone()).into());
            }
        }
        if let PrimaryPolicy::Provider(ref id) = config.primary {
            if !config.enabled_providers.contains(id) {
                return Err(ConfigError::UnknownProvider(id.clone()).into());
            }
        }

        // Priority list first, then registration order.
        let mut ordered = Vec::with_capacity(config.enabled_providers.len());
        let mut placed = HashSet::new();
        for id in &config.provider_priority {
            if !config.enabled_providers.contains(id) {
                warn!(provider = %id, "provider_priority names a provider that is not enabled");
                continue;
            }
            if placed.insert(id.clone()) {
                ordered.push(Arc::clone(&registered[id]));
            }
        }
        for id in &registration_order {
            if config.enabled_providers.contains(id) && placed.insert(id.clone()) {
                ordered.push(Arc::clone(&registered[id]));
            }
        }

        let sink = match (self.sink, &config.sink) {
            (Some(sink), _) => Some(sink),
            (None, Some(sink_config)) => {
                let sink = WebhookSink::new(sink_config).map_err(|e| ConfigError::Invalid {
                    field: "sink",
                    reason: e.to_string(),
                })?;
                Some(Arc::new(sink) as Arc<dyn ResultSink>)
            }
            (None, None) => None,
        };

        info!(
            providers = ?ordered.iter().map(|p| p.id().as_str()).collect::<Vec<_>>(),
            shared_deadline_ms = config.shared_deadline_ms,
            freshness_window_ms = config.freshness_window_ms,
            coalesce = config.coalesce_requests,
            "consensus engine ready"
        );

        Ok(ConsensusEngine {
            cache: ResultCache::new(config.cache_capacity, config.freshness_window()),
            metrics: MetricsRecorder::new(config.smoothing_factor),
            flights: FlightGate::new(),
            providers: ordered,
            sink,
            config,
        })
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Fans requests out to providers and merges what comes back in time.
///
/// `evaluate` takes `&self`; share the engine behind an `Arc` for concurrent
/// callers.
pub struct ConsensusEngine {
    config: EngineConfig,
    /// Enabled providers in priority order.
    providers: Vec<Arc<dyn AnalyticsProvider>>,
    cache: ResultCache,
    metrics: MetricsRecorder,
    flights: FlightGate<CacheKey, EvaluateResult<ConsensusResult>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl ConsensusEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enabled providers in priority order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id().clone()).collect()
    }

    pub async fn evaluate(
        &self,
        subject_id: &str,
        context_id: &str,
        kind: RequestKind,
    ) -> EvaluateResult<ConsensusResult> {
        let entered = Instant::now();
        if subject_id.trim().is_empty() || context_id.trim().is_empty() {
            self.metrics.record_rejected();
            return Err(ConsensusError::InvalidInput(
                "subject_id and context_id must be non-empty".to_string(),
            ));
        }

        if let Some(hit) = self.cached(subject_id, context_id, kind) {
            return Ok(hit);
        }

        let active: Vec<Arc<dyn AnalyticsProvider>> = self
            .providers
            .iter()
            .filter(|p| kind.admits(p.role()))
            .cloned()
            .collect();
        if active.is_empty() {
            self.metrics.record_rejected();
            return Err(ConsensusError::NoProviderEnabled { kind });
        }

        let shared_deadline = self.config.shared_deadline();
        if !self.config.coalesce_requests {
            return self
                .compute(subject_id, context_id, kind, &active, shared_deadline)
                .await;
        }

        // Every caller, leader or follower, answers within its own deadline.
        let deadline = entered + shared_deadline;
        match self.flights.join(CacheKey::new(subject_id, context_id, kind)) {
            Flight::Leader(leader) => {
                let outcome = match self.cached(subject_id, context_id, kind) {
                    Some(hit) => Ok(hit),
                    None => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        self.compute(subject_id, context_id, kind, &active, remaining)
                            .await
                    }
                };
                leader.complete(outcome.clone());
                outcome
            }
            Flight::Follower(follower) => match follower.outcome(deadline).await {
                Some(Ok(result)) => {
                    self.metrics.record_cache_hit();
                    debug!(subject_id, context_id, %kind, "joined in-flight evaluation");
                    Ok(result)
                }
                Some(Err(err)) => {
                    self.metrics.record_rejected();
                    debug!(
                        subject_id,
                        context_id,
                        %kind,
                        error = %err,
                        "in-flight evaluation failed"
                    );
                    Err(err)
                }
                None => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.metrics.record_rejected();
                        warn!(
                            subject_id,
                            context_id,
                            %kind,
                            "deadline passed waiting on in-flight evaluation"
                        );
                        return Err(ConsensusError::NoProviderAvailable {
                            attempted: active.iter().map(|p| p.id().clone()).collect(),
                            failures: active
                                .iter()
                                .map(|p| ProviderFailure {
                                    provider: p.id().clone(),
                                    reason: MISSED_DEADLINE.to_string(),
                                })
                                .collect(),
                        });
                    }
                    warn!(
                        subject_id,
                        context_id,
                        %kind,
                        remaining_ms = remaining.as_millis() as u64,
                        "in-flight evaluation gave no outcome, computing alone"
                    );
                    self.compute(subject_id, context_id, kind, &active, remaining)
                        .await
                }
            },
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("result cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop expired result-cache entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    fn cached(
        &self,
        subject_id: &str,
        context_id: &str,
        kind: RequestKind,
    ) -> Option<ConsensusResult> {
        let hit = self.cache.get(subject_id, context_id, kind)?;
        self.metrics.record_cache_hit();
        debug!(subject_id, context_id, %kind, "result cache hit");
        Some(hit)
    }

    async fn compute(
        &self,
        subject_id: &str,
        context_id: &str,
        kind: RequestKind,
        active: &[Arc<dyn AnalyticsProvider>],
        deadline: Duration,
    ) -> EvaluateResult<ConsensusResult> {
        let started = Instant::now();
        let report = fan_out(active, subject_id, context_id, deadline).await;
        let missing_reason = if report.timed_out {
            MISSED_DEADLINE
        } else {
            TASK_ENDED
        };

        let mut outcomes: HashMap<ProviderId, ProviderOutcome> = report
            .completed
            .into_iter()
            .map(|o| (o.provider.clone(), o))
            .collect();

        let mut contributions = Vec::new();
        let mut latencies = BTreeMap::new();
        let mut failures = Vec::new();
        let mut observations = Vec::with_capacity(active.len());

        // Walk in priority order so merge order is stable.
        for provider in active {
            let id = provider.id().clone();
            match outcomes.remove(&id) {
                Some(ProviderOutcome {
                    result: Ok(mut result),
                    elapsed,
                    ..
                }) => {
                    let latency_ms = elapsed.as_millis() as u64;
                    result.provider_id = id.clone();
                    merge::sanitize(&mut result);
                    debug!(provider = %id, subject_id, latency_ms, "provider responded");
                    latencies.insert(id.clone(), latency_ms);
                    observations.push(ProviderObservation {
                        provider: id,
                        succeeded: true,
                        latency_ms: Some(latency_ms),
                    });
                    contributions.push(result);
                }
                Some(ProviderOutcome {
                    result: Err(err),
                    elapsed,
                    ..
                }) => {
                    let latency_ms = elapsed.as_millis() as u64;
                    warn!(provider = %id, subject_id, latency_ms, error = %err, "provider failed");
                    failures.push(ProviderFailure {
                        provider: id.clone(),
                        reason: err.to_string(),
                    });
                    observations.push(ProviderObservation {
                        provider: id,
                        succeeded: false,
                        latency_ms: Some(latency_ms),
                    });
                }
                None => {
                    warn!(
                        provider = %id,
                        subject_id,
                        reason = missing_reason,
                        "provider did not report"
                    );
                    failures.push(ProviderFailure {
                        provider: id.clone(),
                        reason: missing_reason.to_string(),
                    });
                    observations.push(ProviderObservation {
                        provider: id,
                        succeeded: false,
                        latency_ms: None,
                    });
                }
            }
        }

        let total_ms = started.elapsed().as_millis() as u64;

        let merged = merge::merge(
            &contributions,
            &self.config.field_weights,
            self.config.max_recommendations,
        );
        let primary = select_primary(&self.config.primary, &contributions);
        let (merged, primary) = match (merged, primary) {
            (Some(merged), Some(primary)) => (merged, primary),
            _ => {
                self.metrics.record_evaluation(&EvaluationSample {
                    success: false,
                    latency_ms: total_ms,
                    providers: observations,
                    agreement: 0.0,
                });
                warn!(
                    subject_id,
                    context_id,
                    %kind,
                    attempted = active.len(),
                    "no provider available"
                );
                return Err(ConsensusError::NoProviderAvailable {
                    attempted: active.iter().map(|p| p.id().clone()).collect(),
                    failures,
                });
            }
        };

        let agreement = agreement(&contributions);
        self.metrics.record_evaluation(&EvaluationSample {
            success: true,
            latency_ms: total_ms,
            providers: observations,
            agreement,
        });

        let result = ConsensusResult {
            subject_id: subject_id.to_string(),
            context_id: context_id.to_string(),
            kind,
            timestamp: Utc::now(),
            merged,
            agreement,
            contributing_providers: contributions.iter().map(|r| r.provider_id.clone()).collect(),
            provider_latencies_ms: latencies,
            primary_provider: primary,
            provider_results: contributions,
            failures,
        };

        info!(
            subject_id,
            context_id,
            %kind,
            contributors = result.contributing_providers.len(),
            failed = result.failures.len(),
            agreement,
            primary = %result.primary_provider,
            latency_ms = total_ms,
            "consensus evaluated"
        );

        self.cache.put(subject_id, context_id, kind, result.clone());
        self.forward(&result);
        Ok(result)
    }

    fn forward(&self, result: &ConsensusResult) {
        let Some(sink) = &self.sink else {
            return;
        };
        let sink = Arc::clone(sink);
        let result = result.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&result).await {
                warn!(subject_id = %result.subject_id, error = %e, "result sink delivery failed");
            }
        });
    }
}
