//! Publish job domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::{JobDbModel, JobStatus, NewJobDbModel};
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::{Error, Result};

/// A publishing job as seen by the scheduler and dispatchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub channel: String,
    /// Channel-specific data, opaque to the queue.
    pub payload: Value,
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
    pub idempotency_key: String,
    pub remote_id: Option<String>,
    pub error: Option<String>,
    pub child_job_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job may be picked up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }
}

impl TryFrom<JobDbModel> for Job {
    type Error = Error;

    fn try_from(row: JobDbModel) -> Result<Self> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(format!("job {} has unknown status '{}'", row.id, row.status))
        })?;
        let payload = serde_json::from_str(&row.payload)?;

        Ok(Self {
            id: row.id,
            channel: row.channel,
            payload,
            status,
            run_at: ms_to_datetime(row.run_at),
            attempts: row.attempts.clamp(0, u32::MAX as i64) as u32,
            idempotency_key: row.idempotency_key,
            remote_id: row.remote_id,
            error: row.error,
            child_job_id: row.child_job_id,
            created_at: ms_to_datetime(row.created_at),
            updated_at: ms_to_datetime(row.updated_at),
        })
    }
}

/// Request to add a job to the queue.
///
/// ```ignore
/// let request = EnqueueRequest::new("meta_facebook", "post-42", json!({"text": "hi"}))
///     .run_at(publish_time);
/// let job = store.enqueue(request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub channel: String,
    pub idempotency_key: String,
    pub payload: Value,
    /// Defaults to "now" at enqueue time.
    pub run_at: Option<DateTime<Utc>>,
    pub child_job_id: Option<i64>,
}

impl EnqueueRequest {
    pub fn new(
        channel: impl Into<String>,
        idempotency_key: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            idempotency_key: idempotency_key.into(),
            payload,
            run_at: None,
            child_job_id: None,
        }
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn child_job(mut self, child_job_id: i64) -> Self {
        self.child_job_id = Some(child_job_id);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(Error::validation("channel must not be empty"));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(Error::validation("idempotency_key must not be empty"));
        }
        Ok(())
    }

    pub(crate) fn into_db_model(self, now: DateTime<Utc>) -> Result<NewJobDbModel> {
        Ok(NewJobDbModel {
            payload: serde_json::to_string(&self.payload)?,
            run_at: datetime_to_ms(self.run_at.unwrap_or(now)),
            channel: self.channel,
            idempotency_key: self.idempotency_key,
            child_job_id: self.child_job_id,
        })
    }
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Returned to `pending`; eligible again at `run_at`.
    Retrying { run_at: DateTime<Utc> },
    /// Moved to `failed`; needs an operator replay.
    Failed,
}

/// One page of jobs for operational listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> JobDbModel {
        JobDbModel {
            id: 7,
            channel: "meta_facebook".into(),
            payload: r#"{"text":"hello"}"#.into(),
            status: "running".into(),
            run_at: 1_700_000_000_000,
            attempts: 2,
            idempotency_key: "post-7".into(),
            remote_id: None,
            error: Some("timeout".into()),
            child_job_id: None,
            created_at: 1_699_999_000_000,
            updated_at: 1_700_000_000_500,
        }
    }

    #[test]
    fn test_from_db_model() {
        let job = Job::try_from(row()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.payload, json!({"text": "hello"}));
        assert_eq!(job.attempts, 2);
        assert_eq!(datetime_to_ms(job.run_at), 1_700_000_000_000);
    }

    #[test]
    fn test_from_db_model_rejects_unknown_status() {
        let mut bad = row();
        bad.status = "PROCESSING".into();
        assert!(Job::try_from(bad).is_err());
    }

    #[test]
    fn test_enqueue_request_validation() {
        assert!(EnqueueRequest::new("", "k", json!({})).validate().is_err());
        assert!(EnqueueRequest::new("c", "  ", json!({})).validate().is_err());
        assert!(EnqueueRequest::new("c", "k", json!({})).validate().is_ok());
    }

    #[test]
    fn test_enqueue_request_defaults_run_at_to_now() {
        let now = Utc::now();
        let model = EnqueueRequest::new("c", "k", json!({"a": 1}))
            .into_db_model(now)
            .unwrap();
        assert_eq!(model.run_at, datetime_to_ms(now));
        assert_eq!(model.payload, r#"{"a":1}"#);
    }
}
