//! Per-adapter result cache.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{validate_ids, AnalyticsProvider, ProviderError};
use crate::cache::TtlCache;
use crate::config::ProviderCacheConfig;
use crate::types::{AnalyticsResult, ProviderId, ProviderRole};

/// Wraps a provider with an LRU + TTL cache keyed by `(subject_id, context_id)`.
///
/// Only successes are cached. Timestamps handed out for a key never go
/// backwards, even when the wrapped provider's clock does.
pub struct CachedProvider<P> {
    inner: P,
    cache: TtlCache<(String, String), AnalyticsResult>,
}

impl<P: AnalyticsProvider> CachedProvider<P> {
    pub fn new(inner: P, capacity: usize, freshness: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(capacity, freshness),
        }
    }

    pub fn from_config(inner: P, config: &ProviderCacheConfig) -> Self {
        Self::new(inner, config.capacity, config.freshness())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl<P: AnalyticsProvider> AnalyticsProvider for CachedProvider<P> {
    fn id(&self) -> &ProviderId {
        self.inner.id()
    }

    fn role(&self) -> ProviderRole {
        self.inner.role()
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    async fn analyze(
        &self,
        subject_id: &str,
        context_id: &str,
    ) -> Result<AnalyticsResult, ProviderError> {
        validate_ids(subject_id, context_id)?;

        let key = (subject_id.to_string(), context_id.to_string());
        if let Some(hit) = self.cache.get(&key) {
            debug!(provider = %self.inner.id(), subject_id, context_id, "provider cache hit");
            return Ok(hit);
        }

        let mut result = self.inner.analyze(subject_id, context_id).await?;
        if let Some(previous) = self.cache.peek_stale(&key) {
            if result.timestamp < previous.timestamp {
                result.timestamp = previous.timestamp;
            }
        }
        self.cache.put(key, result.clone());
        Ok(result)
    }
}
