//! Deadline-bounded fan-out.
//!
//! ```text
//! tokio::spawn(provider_i.analyze) × N ──mpsc──▶ collector (timeout_at deadline)
//! ```
//!
//! Each call runs in its own task, bounded by
//! `min(provider.timeout(), shared_deadline)`. The collector stops at the
//! shared deadline; tasks still running are left to finish on their own and
//! their results are dropped with the channel.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::provider::{AnalyticsProvider, ProviderError};
use crate::types::{AnalyticsResult, ProviderId};

/// What one provider task reported.
#[derive(Debug)]
pub(crate) struct ProviderOutcome {
    pub provider: ProviderId,
    pub result: Result<AnalyticsResult, ProviderError>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct FanOutReport {
    /// In completion order.
    pub completed: Vec<ProviderOutcome>,
    /// Providers that never reported.
    pub missing: BTreeSet<ProviderId>,
    /// The collector stopped at the shared deadline. When false, every task
    /// ended, so anything in `missing` died without sending a result.
    pub timed_out: bool,
}

pub(crate) async fn fan_out(
    providers: &[Arc<dyn AnalyticsProvider>],
    subject_id: &str,
    context_id: &str,
    shared_deadline: Duration,
) -> FanOutReport {
    let deadline = Instant::now() + shared_deadline;
    // Capacity for every provider, so a send never waits on the collector.
    let (tx, mut rx) = mpsc::channel(providers.len().max(1));
    let mut missing = BTreeSet::new();

    for provider in providers {
        let provider = Arc::clone(provider);
        let tx = tx.clone();
        let subject_id = subject_id.to_string();
        let context_id = context_id.to_string();
        let limit = provider.timeout().min(shared_deadline);
        missing.insert(provider.id().clone());

        tokio::spawn(async move {
            let start = Instant::now();
            let result =
                match tokio::time::timeout(limit, provider.analyze(&subject_id, &context_id)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(limit)),
                };
            let outcome = ProviderOutcome {
                provider: provider.id().clone(),
                result,
                elapsed: start.elapsed(),
            };
            // The collector is gone once the deadline passed.
            if tx.send(outcome).await.is_err() {
                debug!(provider = %provider.id(), "late provider result discarded");
            }
        });
    }
    drop(tx);

    let mut completed = Vec::with_capacity(providers.len());
    let mut timed_out = false;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(outcome)) => {
                missing.remove(&outcome.provider);
                completed.push(outcome);
            }
            // Every task reported (or died without reporting).
            Ok(None) => break,
            Err(_) => {
                warn!(
                    pending = missing.len(),
                    deadline_ms = shared_deadline.as_millis() as u64,
                    "shared deadline elapsed, abandoning pending providers"
                );
                timed_out = true;
                break;
            }
        }
    }

    FanOutReport {
        completed,
        missing,
        timed_out,
    }
}
