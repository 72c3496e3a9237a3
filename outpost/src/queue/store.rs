//! The job store: the single source of truth for job existence and status.
//!
//! Failure policy differs by path:
//! - reads used by the scheduling loop (`due_jobs`, `running_channels`,
//!   `paginate`, `counts_by_status`) log and degrade to empty results;
//! - writes that must move exactly one row (`mark_completed`, `mark_failed`,
//!   `replay`) return [`Error::StoreIntegrity`] when they move none.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use super::backoff::RetryPolicy;
use super::job::{EnqueueRequest, FailureOutcome, Job, JobPage};
use crate::database::models::{JobCounts, JobDbModel, JobFilters};
use crate::database::repositories::JobRepository;
use crate::database::time::datetime_to_ms;
use crate::utils::text::sanitize_message;
use crate::{Error, Result};

/// Default page size for listings.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Upper bound for a listing page.
pub const MAX_PER_PAGE: u32 = 200;

/// Convert rows, dropping (and logging) rows that cannot be decoded so one
/// corrupt payload does not hide every other job.
fn decode_rows(rows: Vec<JobDbModel>, context: &'static str) -> Vec<Job> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match Job::try_from(row) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(job_id = id, error = %e, "Skipping undecodable job row in {}", context);
                    None
                }
            }
        })
        .collect()
}

/// Persistent job queue with idempotent enqueue and atomic claims.
pub struct JobStore {
    repository: Arc<dyn JobRepository>,
    retry_policy: RetryPolicy,
}

impl JobStore {
    pub fn new(repository: Arc<dyn JobRepository>, retry_policy: RetryPolicy) -> Self {
        Self {
            repository,
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Insert a new pending job.
    ///
    /// If `(idempotency_key, channel)` already exists the stored job is
    /// returned untouched. The caller's payload is not written in that case.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        request.validate()?;

        let now = Utc::now();
        let row = request.into_db_model(now)?;
        let (stored, inserted) = self
            .repository
            .insert_or_get(&row, datetime_to_ms(now))
            .await?;

        if inserted {
            debug!(
                job_id = stored.id,
                channel = %stored.channel,
                idempotency_key = %stored.idempotency_key,
                "Enqueued job"
            );
        } else {
            debug!(
                job_id = stored.id,
                channel = %stored.channel,
                idempotency_key = %stored.idempotency_key,
                "Enqueue collapsed onto existing job"
            );
        }

        Job::try_from(stored)
    }

    /// Pending jobs with `run_at <= now`, oldest first, at most `limit`.
    pub async fn due_jobs(&self, now: DateTime<Utc>, limit: u32) -> Vec<Job> {
        match self.repository.list_due(datetime_to_ms(now), limit).await {
            Ok(rows) => decode_rows(rows, "due_jobs"),
            Err(e) => {
                warn!(error = %e, "Failed to list due jobs; treating as nothing runnable");
                Vec::new()
            }
        }
    }

    /// Number of `running` jobs per channel.
    pub async fn running_channels(&self) -> HashMap<String, u32> {
        match self.repository.running_counts().await {
            Ok(rows) => rows
                .into_iter()
                .map(|(channel, count)| (channel, count.clamp(0, u32::MAX as i64) as u32))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to count running jobs; treating as none running");
                HashMap::new()
            }
        }
    }

    /// Atomically move `job` from `pending` to `running`.
    ///
    /// Returns `Ok(None)` when another claimant got there first.
    pub async fn claim(&self, job: &Job, now: DateTime<Utc>) -> Result<Option<Job>> {
        match self.repository.claim(job.id, datetime_to_ms(now)).await? {
            Some(row) => Ok(Some(Job::try_from(row)?)),
            None => {
                debug!(job_id = job.id, channel = %job.channel, "Job no longer claimable");
                Ok(None)
            }
        }
    }

    /// `running -> completed`, storing the platform's identifier.
    pub async fn mark_completed(&self, job_id: i64, remote_id: Option<&str>) -> Result<()> {
        let affected = self
            .repository
            .complete(job_id, remote_id, datetime_to_ms(Utc::now()))
            .await?;

        if affected == 0 {
            error!(job_id, "mark_completed affected no rows");
            return Err(Error::integrity("mark_completed", job_id, "running"));
        }

        info!(job_id, remote_id = ?remote_id, "Job completed");
        Ok(())
    }

    /// Record a failed attempt, rescheduling with backoff or failing for good.
    pub async fn mark_failed(
        &self,
        job: &Job,
        message: &str,
        retryable: bool,
    ) -> Result<FailureOutcome> {
        self.mark_failed_at(job, message, retryable, Utc::now()).await
    }

    /// [`Self::mark_failed`] with an explicit clock.
    pub async fn mark_failed_at(
        &self,
        job: &Job,
        message: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let message = sanitize_message(message);
        let now_ms = datetime_to_ms(now);

        if retryable && self.retry_policy.should_retry(job.attempts) {
            // Saturates; the job must leave `running`.
            let run_at = TimeDelta::from_std(self.retry_policy.delay_for_attempt(job.attempts))
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            let affected = self
                .repository
                .reschedule(job.id, datetime_to_ms(run_at), &message, now_ms)
                .await?;
            if affected == 0 {
                error!(job_id = job.id, "mark_failed (retry) affected no rows");
                return Err(Error::integrity("mark_failed", job.id, "running"));
            }

            warn!(
                job_id = job.id,
                channel = %job.channel,
                attempts = job.attempts,
                run_at = %run_at,
                error = %message,
                "Job failed, retry scheduled"
            );
            return Ok(FailureOutcome::Retrying { run_at });
        }

        let affected = self.repository.fail(job.id, &message, now_ms).await?;
        if affected == 0 {
            error!(job_id = job.id, "mark_failed (permanent) affected no rows");
            return Err(Error::integrity("mark_failed", job.id, "running"));
        }

        warn!(
            job_id = job.id,
            channel = %job.channel,
            attempts = job.attempts,
            retryable,
            error = %message,
            "Job failed permanently"
        );
        Ok(FailureOutcome::Failed)
    }

    /// Operator-triggered reset of a failed, completed or stuck job back to
    /// `pending` with `run_at = now`. Attempts are preserved.
    pub async fn replay(&self, job_id: i64) -> Result<Job> {
        let row = self
            .repository
            .replay(job_id, datetime_to_ms(Utc::now()))
            .await?
            .ok_or_else(|| {
                error!(job_id, "replay affected no rows");
                Error::integrity("replay", job_id, "non-pending")
            })?;

        info!(job_id, channel = %row.channel, "Job replayed");
        Job::try_from(row)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Job>> {
        self.repository
            .get_job(id)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    pub async fn find_by_idempotency(&self, key: &str, channel: &str) -> Result<Option<Job>> {
        self.repository
            .find_by_idempotency(key, channel)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// A page of jobs, newest first. `page` is 1-based.
    pub async fn paginate(&self, page: u32, per_page: u32, filters: &JobFilters) -> JobPage {
        let page = page.max(1);
        let per_page = if per_page == 0 {
            DEFAULT_PER_PAGE
        } else {
            per_page.min(MAX_PER_PAGE)
        };
        let offset = (page - 1).saturating_mul(per_page);

        match self.repository.list_page(filters, per_page, offset).await {
            Ok((rows, total)) => JobPage {
                items: decode_rows(rows, "paginate"),
                total,
                page,
                per_page,
            },
            Err(e) => {
                warn!(error = %e, "Failed to list jobs; returning an empty page");
                JobPage {
                    items: Vec::new(),
                    total: 0,
                    page,
                    per_page,
                }
            }
        }
    }

    pub async fn counts_by_status(&self) -> JobCounts {
        self.repository.status_counts().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count jobs by status");
            JobCounts::default()
        })
    }

    /// Record that `child_job_id` was created as a follow-up of `job_id`.
    pub async fn link_child(&self, job_id: i64, child_job_id: i64) -> Result<()> {
        let affected = self
            .repository
            .set_child_job(job_id, child_job_id, datetime_to_ms(Utc::now()))
            .await?;
        if affected == 0 {
            return Err(Error::not_found("Job", job_id.to_string()));
        }
        Ok(())
    }

    /// Return `running` jobs untouched since `older_than` to `pending`.
    ///
    /// A job only stays `running` that long when its worker died mid-dispatch.
    pub async fn recover_stale_running(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let recovered = self
            .repository
            .requeue_stale_running(datetime_to_ms(older_than), datetime_to_ms(Utc::now()))
            .await?;
        if recovered > 0 {
            warn!(recovered, cutoff = %older_than, "Requeued stale running jobs");
        }
        Ok(recovered)
    }
}
