//! Read-only collaborators consumed by provider adapters.
//!
//! Adapters never own subject data. They query a [`SubjectStore`] for
//! aggregate statistics and recent activity, and a [`LedgerClient`] for
//! transaction history when fraud signals need it. [`InMemoryStore`]
//! implements both for tests and the CLI.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("Subject not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Aggregate statistics for a subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectStats {
    pub games_played: u32,
    pub wins: u32,
    /// Mean in-game score over all games.
    pub average_score: f64,
    /// Mean reaction time in milliseconds.
    pub average_reaction_ms: f64,
    /// Skill rating as stored by the platform (0–3000).
    pub rating: f64,
    pub account_age_days: u32,
    /// Number of abuse reports filed against the subject.
    pub reports: u32,
}

impl SubjectStats {
    pub fn win_rate(&self) -> f64 {
        if self.games_played == 0 {
            0.0
        } else {
            self.wins as f64 / self.games_played as f64
        }
    }
}

/// One recent action by a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub context_id: String,
    pub action: String,
    pub score: f64,
    pub duration_ms: u64,
}

/// A ledger transaction involving the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
    pub counterparty: String,
    pub amount: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn subject_stats(&self, subject_id: &str) -> Result<SubjectStats, DataError>;

    /// Most recent first, at most `limit` records.
    async fn recent_activity(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, DataError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Most recent first, at most `limit` transactions.
    async fn transactions(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, DataError>;
}

/// Everything known about one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectRecord {
    pub stats: SubjectStats,
    pub activity: Vec<ActivityRecord>,
    pub transactions: Vec<LedgerTransaction>,
}

/// Map-backed store serving both collaborator traits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    subjects: RwLock<HashMap<String, SubjectRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object of `subject_id -> SubjectRecord`.
    pub fn from_json(raw: &str) -> Result<Self, DataError> {
        let subjects: HashMap<String, SubjectRecord> =
            serde_json::from_str(raw).map_err(|e| DataError::Backend(e.to_string()))?;
        Ok(Self {
            subjects: RwLock::new(subjects),
        })
    }

    pub fn insert(&self, subject_id: impl Into<String>, record: SubjectRecord) {
        self.subjects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subject_id.into(), record);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SubjectRecord>> {
        self.subjects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_record<T>(
        &self,
        subject_id: &str,
        f: impl FnOnce(&SubjectRecord) -> T,
    ) -> Result<T, DataError> {
        self.read()
            .get(subject_id)
            .map(f)
            .ok_or_else(|| DataError::NotFound(subject_id.to_string()))
    }
}

fn most_recent<T: Clone>(items: &[T], limit: usize, at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by_key(|item| std::cmp::Reverse(at(item)));
    sorted.truncate(limit);
    sorted
}

#[async_trait]
impl SubjectStore for InMemoryStore {
    async fn subject_stats(&self, subject_id: &str) -> Result<SubjectStats, DataError> {
        self.with_record(subject_id, |r| r.stats.clone())
    }

    async fn recent_activity(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, DataError> {
        self.with_record(subject_id, |r| most_recent(&r.activity, limit, |a| a.timestamp))
    }
}

#[async_trait]
impl LedgerClient for InMemoryStore {
    async fn transactions(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, DataError> {
        self.with_record(subject_id, |r| {
            most_recent(&r.transactions, limit, |t| t.timestamp)
        })
    }
}
