//! Externally hosted scorer reached over HTTP/JSON.
//!
//! Request: `POST {url}` with `{"subject_id": .., "context_id": ..}`.
//! Response: a JSON object carrying the four scores plus optional
//! `signals`, `recommendations`, `flags` and `timestamp`. Anything else
//! (non-2xx, unparsable body, transport error) is reported as
//! [`ProviderError::Unavailable`]; client-side timeouts as
//! [`ProviderError::Timeout`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{validate_ids, AnalyticsProvider, ProviderError, DEFAULT_PROVIDER_TIMEOUT};
use crate::types::{AnalyticsResult, Flag, ProviderId, ProviderRole};

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    subject_id: &'a str,
    context_id: &'a str,
}

/// Body returned by a remote scorer.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteScore {
    pub risk_score: f64,
    pub skill_score: f64,
    pub outcome_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub signals: Vec<f64>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RemoteScore {
    fn into_result(
        self,
        subject_id: &str,
        context_id: &str,
        provider: ProviderId,
    ) -> AnalyticsResult {
        let mut result = AnalyticsResult::new(subject_id, context_id, provider)
            .with_scores(
                self.risk_score,
                self.skill_score,
                self.outcome_score,
                self.confidence,
            )
            .with_signals(self.signals);
        result.recommendations = self.recommendations;
        result.flags = self.flags;
        if let Some(ts) = self.timestamp {
            result.timestamp = ts;
        }
        result
    }
}

pub struct RemoteProvider {
    id: ProviderId,
    role: ProviderRole,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(
        id: impl Into<ProviderId>,
        role: ProviderRole,
        url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_timeout(id, role, url, DEFAULT_PROVIDER_TIMEOUT)
    }

    pub fn with_timeout(
        id: impl Into<ProviderId>,
        role: ProviderRole,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            id: id.into(),
            role,
            url: url.into(),
            api_key: None,
            timeout,
            client,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Unavailable(format!("request failed: {err}"))
        }
    }
}

/// Decode a scorer response body.
pub fn parse_score(body: &str) -> Result<RemoteScore, ProviderError> {
    serde_json::from_str(body)
        .map_err(|e| ProviderError::Unavailable(format!("malformed response: {e}")))
}

#[async_trait]
impl AnalyticsProvider for RemoteProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn role(&self) -> ProviderRole {
        self.role
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn analyze(
        &self,
        subject_id: &str,
        context_id: &str,
    ) -> Result<AnalyticsResult, ProviderError> {
        validate_ids(subject_id, context_id)?;

        let mut request = self.client.post(&self.url).json(&ScoreRequest {
            subject_id,
            context_id,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            warn!(provider = %self.id, %status, "remote scorer returned an error status");
            return Err(ProviderError::Unavailable(format!(
                "remote scorer returned {status}"
            )));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let score = parse_score(&body)?;
        debug!(provider = %self.id, subject_id, "remote score received");
        Ok(score.into_result(subject_id, context_id, self.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_body() {
        let body = r#"{
            "risk_score": 12.0, "skill_score": 70.0, "outcome_score": 55.5, "confidence": 80.0,
            "signals": [0.1, 0.2],
            "recommendations": ["Keep it up"],
            "flags": [{ "kind": "smurf", "severity": "low", "description": "alt account" }],
            "timestamp": "2024-03-01T12:00:00Z"
        }"#;
        let result = parse_score(body)
            .unwrap()
            .into_result("p1", "g1", ProviderId::new("remote"));

        assert_eq!(result.outcome_score, 55.5);
        assert_eq!(result.signals, vec![0.1, 0.2]);
        assert_eq!(result.flags[0].kind, "smurf");
        assert_eq!(result.provider_id.as_str(), "remote");
        assert_eq!(result.timestamp.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_minimal_body() {
        let body = r#"{"risk_score": 1, "skill_score": 2, "outcome_score": 3, "confidence": 4}"#;
        let score = parse_score(body).unwrap();
        assert!(score.signals.is_empty());
        assert!(score.timestamp.is_none());
    }

    #[test]
    fn test_malformed_body_is_unavailable() {
        for body in ["", "[]", r#"{"risk_score": "high"}"#, "<html>oops</html>"] {
            assert!(
                matches!(parse_score(body), Err(ProviderError::Unavailable(_))),
                "body {body:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let provider = RemoteProvider::with_timeout(
            "remote",
            ProviderRole::General,
            "http://127.0.0.1:1/score",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = provider.analyze("p1", "g1").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Unavailable(_) | ProviderError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_ids_rejected_before_request() {
        let provider =
            RemoteProvider::new("remote", ProviderRole::Fraud, "http://127.0.0.1:1/score").unwrap();
        assert_eq!(provider.role(), ProviderRole::Fraud);
        let err = provider.analyze("", "g1").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }
}
