//! Delivery of fresh consensus results to downstream consumers.
//!
//! The engine hands every newly computed [`ConsensusResult`] (never cache
//! hits) to its sink on a detached task. Delivery failures are logged and
//! never affect the evaluation that produced the result.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::config::SinkConfig;
use crate::types::ConsensusResult;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("Failed to build sink client: {0}")]
    Client(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Receiver rejected result with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, result: &ConsensusResult) -> Result<(), SinkError>;
}

/// POSTs each result as JSON to a fixed URL.
pub struct WebhookSink {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;
        Ok(Self {
            url: config.url.clone(),
            timeout: config.timeout(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ResultSink for WebhookSink {
    async fn deliver(&self, result: &ConsensusResult) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(result)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.url, error = %e, "failed to forward consensus result");
                SinkError::Delivery(e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(url = %self.url, %status, body = %body, "receiver rejected consensus result");
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            url = %self.url,
            %status,
            subject_id = %result.subject_id,
            context_id = %result.context_id,
            "forwarded consensus result"
        );
        Ok(())
    }
}
