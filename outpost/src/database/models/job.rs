//! Publish job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Publish job database model.
/// Represents one outbound publishing action against a channel.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: i64,
    /// Target platform lane, e.g. "meta_facebook"
    pub channel: String,
    /// JSON blob passed through to the channel publisher
    pub payload: String,
    /// Status: pending, running, completed, failed
    pub status: String,
    /// Epoch ms; the job is due once `now >= run_at`
    pub run_at: i64,
    /// Number of claims so far
    pub attempts: i64,
    pub idempotency_key: String,
    /// Identifier returned by the external platform on success
    pub remote_id: Option<String>,
    /// Last failure message (sanitized)
    pub error: Option<String>,
    /// Follow-up job created as a side effect of this one
    pub child_job_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Values for a row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewJobDbModel {
    pub channel: String,
    pub payload: String,
    pub run_at: i64,
    pub idempotency_key: String,
    pub child_job_id: Option<i64>,
}

/// Job status values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at` and a free concurrency slot.
    Pending,
    /// Claimed by a scheduler tick; a dispatcher owns it.
    Running,
    /// Published successfully.
    Completed,
    /// Failed permanently or exhausted its attempts.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilters {
    pub channel: Option<String>,
    pub status: Option<JobStatus>,
    /// Substring match on the idempotency key.
    pub search: Option<String>,
}

impl JobFilters {
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

/// Job counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }
}
