//! Multi-provider analytics consensus engine.
//!
//! This library provides:
//! - A provider abstraction for independent subject scorers
//! - A consensus engine that fans out under a shared deadline, tolerates
//!   partial failure and merges what comes back into one result
//! - A time- and size-bounded result cache in front of the engine
//! - Process-wide evaluation metrics
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use consensus_engine::{
//!     ConsensusEngine, EngineConfig, FraudGuard, InMemoryStore, RequestKind, Strategist,
//! };
//!
//! # async fn run() -> Result<(), consensus_engine::ConsensusError> {
//! let store = Arc::new(InMemoryStore::new());
//! let engine = ConsensusEngine::builder(EngineConfig::default())
//!     .with_cached_provider(FraudGuard::new(store.clone()).with_ledger(store.clone()))
//!     .with_cached_provider(Strategist::new(store))
//!     .build()?;
//!
//! let result = engine.evaluate("player-1", "match-9", RequestKind::Comprehensive).await?;
//! println!("risk {} (agreement {:.2})", result.merged.risk_score, result.agreement);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod sink;
pub mod telemetry;
pub mod types;

pub use cache::{CacheStats, ResultCache, TtlCache};
pub use config::{
    ConfigError, EngineConfig, FieldWeights, PrimaryPolicy, ProviderCacheConfig, SinkConfig,
    FRAUD_PROVIDER_ID, STRATEGY_PROVIDER_ID,
};
pub use data::{
    ActivityRecord, DataError, InMemoryStore, LedgerClient, LedgerTransaction, SubjectRecord,
    SubjectStats, SubjectStore,
};
pub use engine::{agreement, select_primary, ConsensusEngine, EngineBuilder};
pub use error::{ConsensusError, EvaluateResult};
pub use metrics::{MetricsRecorder, MetricsSnapshot, ProviderMetrics};
pub use provider::{
    AnalyticsProvider, CachedProvider, FraudGuard, ProviderError, RemoteProvider, Strategist,
};
pub use sink::{ResultSink, SinkError, WebhookSink};
pub use types::{
    AnalyticsResult, ConsensusResult, Flag, ProviderFailure, ProviderId, ProviderRole,
    RequestKind, ScoreField, Severity,
};
