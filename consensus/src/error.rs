//! Error taxonomy for consensus evaluation.
//!
//! | Error                 | Raised by        | Retriable |
//! |-----------------------|------------------|-----------|
//! | `InvalidInput`        | engine, adapters | no        |
//! | `NoProviderEnabled`   | engine           | no        |
//! | `NoProviderAvailable` | engine           | yes       |
//! | `Config`              | engine builder   | no        |
//!
//! Per-provider failures (`ProviderError`) never surface here on their own;
//! they are recorded on the result and only turn into `NoProviderAvailable`
//! when every active provider failed.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{ProviderFailure, ProviderId, RequestKind};

#[derive(Debug, Clone, Error)]
pub enum ConsensusError {
    /// Empty or malformed identifiers. No provider was called.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The request kind selects none of the enabled providers.
    #[error("No provider enabled for request kind {kind}")]
    NoProviderEnabled { kind: RequestKind },

    /// Every active provider failed or missed the shared deadline.
    #[error("No provider available: {} attempted, all failed", attempted.len())]
    NoProviderAvailable {
        attempted: Vec<ProviderId>,
        failures: Vec<ProviderFailure>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ConsensusError {
    /// Whether re-issuing the same request could succeed.
    ///
    /// The engine itself never retries; this is a hint for callers.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NoProviderAvailable { .. })
    }
}

/// Result type for engine operations
pub type EvaluateResult<T> = Result<T, ConsensusError>;
