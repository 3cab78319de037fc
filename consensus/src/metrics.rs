//! Process-wide evaluation metrics.
//!
//! The recorder owns all mutable state behind one lock; readers only ever
//! see [`MetricsSnapshot`] copies. Averages are exponential moving averages
//! seeded by their first observation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProviderId;

/// Smoothing factor used when the configuration does not say otherwise.
pub const DEFAULT_SMOOTHING: f64 = 0.5;

fn ema(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * sample + (1.0 - alpha) * prev,
        None => sample,
    }
}

/// How one active provider fared during an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderObservation {
    pub provider: ProviderId,
    pub succeeded: bool,
    /// Elapsed time, when the provider answered (successfully or not).
    pub latency_ms: Option<u64>,
}

/// Everything recorded about one fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSample {
    pub success: bool,
    pub latency_ms: u64,
    pub providers: Vec<ProviderObservation>,
    /// Only meaningful when `success` is true.
    pub agreement: f64,
}

#[derive(Debug, Clone, Default)]
struct ProviderState {
    availability: Option<f64>,
    average_latency_ms: Option<f64>,
    successes: u64,
    failures: u64,
}

#[derive(Debug, Clone, Default)]
struct MetricsState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    cache_hits: u64,
    average_latency_ms: Option<f64>,
    average_agreement: Option<f64>,
    providers: BTreeMap<ProviderId, ProviderState>,
}

/// Per-provider view inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// Smoothed fraction of evaluations the provider contributed to (0.0–1.0).
    pub availability: f64,
    pub average_latency_ms: f64,
    pub successes: u64,
    pub failures: u64,
}

/// Immutable copy of the recorder state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
    pub average_agreement: f64,
    pub providers: BTreeMap<ProviderId, ProviderMetrics>,
    pub started_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }

    pub fn availability(&self, provider: &ProviderId) -> Option<f64> {
        self.providers.get(provider).map(|p| p.availability)
    }
}

/// Thread-safe metrics sink shared by every evaluation.
pub struct MetricsRecorder {
    state: Mutex<MetricsState>,
    smoothing: f64,
    started_at: DateTime<Utc>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl MetricsRecorder {
    /// `smoothing` outside (0, 1] falls back to the default.
    pub fn new(smoothing: f64) -> Self {
        let smoothing = if smoothing > 0.0 && smoothing <= 1.0 {
            smoothing
        } else {
            DEFAULT_SMOOTHING
        };
        Self {
            state: Mutex::new(MetricsState::default()),
            smoothing,
            started_at: Utc::now(),
        }
    }

    /// Record a finished request where every active provider is listed in
    /// `contributing_providers`.
    pub fn record_request(
        &self,
        success: bool,
        latency_ms: u64,
        contributing_providers: &[ProviderId],
        agreement: f64,
    ) {
        let providers = contributing_providers
            .iter()
            .map(|provider| ProviderObservation {
                provider: provider.clone(),
                succeeded: true,
                latency_ms: None,
            })
            .collect();
        self.record_evaluation(&EvaluationSample {
            success,
            latency_ms,
            providers,
            agreement,
        });
    }

    /// Record a full fan-out, including providers that failed.
    pub fn record_evaluation(&self, sample: &EvaluationSample) {
        let alpha = self.smoothing;
        let mut state = self.lock();

        state.total_requests += 1;
        if sample.success {
            state.successful_requests += 1;
            state.average_agreement = Some(ema(
                state.average_agreement,
                sample.agreement.clamp(0.0, 1.0),
                alpha,
            ));
        } else {
            state.failed_requests += 1;
        }
        state.average_latency_ms = Some(ema(
            state.average_latency_ms,
            sample.latency_ms as f64,
            alpha,
        ));

        for observation in &sample.providers {
            let provider = state
                .providers
                .entry(observation.provider.clone())
                .or_default();
            let up = if observation.succeeded { 1.0 } else { 0.0 };
            provider.availability = Some(ema(provider.availability, up, alpha));
            if observation.succeeded {
                provider.successes += 1;
            } else {
                provider.failures += 1;
            }
            if let Some(latency) = observation.latency_ms {
                provider.average_latency_ms =
                    Some(ema(provider.average_latency_ms, latency as f64, alpha));
            }
        }
    }

    /// A request answered without a fan-out of its own, from the result
    /// cache or an in-flight evaluation it joined. Counts as a successful
    /// request but leaves latency, agreement and availability untouched.
    pub fn record_cache_hit(&self) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.successful_requests += 1;
        state.cache_hits += 1;
    }

    /// A failed request that ran no fan-out of its own: rejected input, or
    /// the shared failure of an in-flight evaluation it joined.
    pub fn record_rejected(&self) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.failed_requests += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        MetricsSnapshot {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            cache_hits: state.cache_hits,
            average_latency_ms: state.average_latency_ms.unwrap_or(0.0),
            average_agreement: state.average_agreement.unwrap_or(0.0),
            providers: state
                .providers
                .iter()
                .map(|(id, p)| {
                    (
                        id.clone(),
                        ProviderMetrics {
                            availability: p.availability.unwrap_or(1.0),
                            average_latency_ms: p.average_latency_ms.unwrap_or(0.0),
                            successes: p.successes,
                            failures: p.failures,
                        },
                    )
                })
                .collect(),
            started_at: self.started_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
