use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::classify::panic_message;
use super::follow_up::follow_up_key;
use super::publisher::{ChannelPublisher, FollowUp, PublishError, PublishReceipt};
use crate::Result;
use crate::breaker::{BreakerError, CircuitBreaker, CircuitBreakerRegistry};
use crate::queue::{EnqueueRequest, FailureOutcome, Job, JobStore};

/// What happened to a dispatched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed {
        remote_id: Option<String>,
        follow_up_job_id: Option<i64>,
    },
    Retrying {
        run_at: DateTime<Utc>,
    },
    Failed,
    /// The job belongs to another channel; nothing was done.
    Skipped,
}

impl From<FailureOutcome> for DispatchOutcome {
    fn from(outcome: FailureOutcome) -> Self {
        match outcome {
            FailureOutcome::Retrying { run_at } => Self::Retrying { run_at },
            FailureOutcome::Failed => Self::Failed,
        }
    }
}

/// Runs claimed jobs of one channel through its publisher and breaker, then
/// reports the result to the store.
pub struct Dispatcher {
    publisher: Arc<dyn ChannelPublisher>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<JobStore>,
}

impl Dispatcher {
    pub fn new(
        publisher: Arc<dyn ChannelPublisher>,
        breakers: &CircuitBreakerRegistry,
        store: Arc<JobStore>,
    ) -> Self {
        let breaker = breakers.get(publisher.service());
        Self {
            publisher,
            breaker,
            store,
        }
    }

    pub fn channel(&self) -> &str {
        self.publisher.channel()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Publish a claimed (`running`) job and record the outcome.
    ///
    /// Channel failures, breaker rejections and publisher panics all end in
    /// `mark_failed`; only store errors are returned.
    pub async fn dispatch(&self, job: &Job) -> Result<DispatchOutcome> {
        if job.channel != self.channel() {
            return Ok(DispatchOutcome::Skipped);
        }

        debug!(job_id = job.id, channel = %job.channel, attempts = job.attempts, "Dispatching job");

        let result = self
            .breaker
            .call(|| publish_guarded(self.publisher.as_ref(), &job.payload))
            .await;

        match result {
            Ok(receipt) => self.complete(job, receipt).await,
            Err(BreakerError::Open { service, retry_in }) => {
                debug!(job_id = job.id, service = %service, retry_in = ?retry_in, "Breaker open, deferring job");
                let message = format!("circuit breaker open for service '{service}'");
                Ok(self.store.mark_failed(job, &message, true).await?.into())
            }
            Err(BreakerError::Inner(e)) => {
                debug!(job_id = job.id, kind = %e.kind, retryable = e.retryable, "Publish failed");
                Ok(self
                    .store
                    .mark_failed(job, &e.message, e.retryable)
                    .await?
                    .into())
            }
        }
    }

    async fn complete(&self, job: &Job, receipt: PublishReceipt) -> Result<DispatchOutcome> {
        self.store
            .mark_completed(job.id, receipt.remote_id.as_deref())
            .await?;

        let follow_up_job_id = match receipt.follow_up {
            Some(follow_up) => self.enqueue_follow_up(job, follow_up).await,
            None => None,
        };

        Ok(DispatchOutcome::Completed {
            remote_id: receipt.remote_id,
            follow_up_job_id,
        })
    }

    /// Enqueue the follow-up and link it to the parent.
    ///
    /// The parent is already completed at this point, so failures here are
    /// logged rather than returned.
    async fn enqueue_follow_up(&self, parent: &Job, follow_up: FollowUp) -> Option<i64> {
        let key = follow_up_key(
            &parent.channel,
            &parent.idempotency_key,
            &follow_up.channel,
            &follow_up.discriminator,
        );
        let delay = i64::try_from(follow_up.delay_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let run_at = Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let request = EnqueueRequest::new(follow_up.channel, key, follow_up.payload).run_at(run_at);
        let child = match self.store.enqueue(request).await {
            Ok(child) => child,
            Err(e) => {
                error!(job_id = parent.id, error = %e, "Failed to enqueue follow-up job");
                return None;
            }
        };

        if let Err(e) = self.store.link_child(parent.id, child.id).await {
            warn!(job_id = parent.id, child_job_id = child.id, error = %e, "Failed to link follow-up job");
        }

        info!(
            job_id = parent.id,
            child_job_id = child.id,
            channel = %child.channel,
            run_at = %child.run_at,
            "Scheduled follow-up job"
        );
        Some(child.id)
    }
}

/// Call the publisher, turning a panic into an unclassified failure.
async fn publish_guarded(
    publisher: &dyn ChannelPublisher,
    payload: &Value,
) -> std::result::Result<PublishReceipt, PublishError> {
    match AssertUnwindSafe(publisher.publish(payload))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(channel = %publisher.channel(), panic = %message, "Publisher panicked");
            Err(PublishError::unclassified(format!(
                "publisher panicked: {message}"
            )))
        }
    }
}
