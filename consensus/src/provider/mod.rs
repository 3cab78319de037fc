//! Scoring provider adapters.
//!
//! Every provider sits behind [`AnalyticsProvider`]: given a subject and a
//! context it produces a bounded-confidence [`AnalyticsResult`], or fails.
//! The engine only sees the trait, so built-in heuristics, remote scorers
//! and test doubles are interchangeable.
//!
//! - [`FraudGuard`]: fraud-oriented heuristics over subject data
//! - [`Strategist`]: skill and outcome heuristics over subject data
//! - [`RemoteProvider`]: externally hosted scorer over HTTP/JSON
//! - [`CachedProvider`]: per-adapter result cache wrapping any of the above

pub mod cached;
pub mod fraud;
pub mod remote;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::data::DataError;
use crate::types::{AnalyticsResult, ProviderId, ProviderRole};

pub use cached::CachedProvider;
pub use fraud::FraudGuard;
pub use remote::RemoteProvider;
pub use strategy::Strategist;

/// Default internal timeout for built-in adapters.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(3);

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),
}

impl From<DataError> for ProviderError {
    fn from(err: DataError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// A pluggable scoring provider.
#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn role(&self) -> ProviderRole;

    /// Internal timeout. The engine bounds each call by the smaller of this
    /// and its shared deadline.
    fn timeout(&self) -> Duration {
        DEFAULT_PROVIDER_TIMEOUT
    }

    async fn analyze(
        &self,
        subject_id: &str,
        context_id: &str,
    ) -> Result<AnalyticsResult, ProviderError>;
}

#[async_trait]
impl<P: AnalyticsProvider + ?Sized> AnalyticsProvider for Arc<P> {
    fn id(&self) -> &ProviderId {
        (**self).id()
    }

    fn role(&self) -> ProviderRole {
        (**self).role()
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    async fn analyze(
        &self,
        subject_id: &str,
        context_id: &str,
    ) -> Result<AnalyticsResult, ProviderError> {
        (**self).analyze(subject_id, context_id).await
    }
}

/// Reject empty or blank identifiers before touching any backend.
pub fn validate_ids(subject_id: &str, context_id: &str) -> Result<(), ProviderError> {
    if subject_id.trim().is_empty() {
        return Err(ProviderError::InvalidInput("subject_id is empty".to_string()));
    }
    if context_id.trim().is_empty() {
        return Err(ProviderError::InvalidInput("context_id is empty".to_string()));
    }
    Ok(())
}

/// Population mean and standard deviation. `None` for an empty or
/// non-finite sample.
pub(crate) fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
