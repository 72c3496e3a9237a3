//! Periodic trigger that feeds claimed jobs to dispatchers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Scheduler;
use crate::Result;
use crate::dispatch::{DispatchOutcome, DispatcherRegistry};

type DispatchResult = (i64, Result<DispatchOutcome>);

/// Tally of dispatch outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Dispatches that ended in a store error or a crashed task.
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, joined: std::result::Result<DispatchResult, JoinError>) {
        match joined {
            Ok((_, Ok(outcome))) => match outcome {
                DispatchOutcome::Completed { .. } => self.completed += 1,
                DispatchOutcome::Retrying { .. } => self.retrying += 1,
                DispatchOutcome::Failed => self.failed += 1,
                DispatchOutcome::Skipped => self.skipped += 1,
            },
            Ok((job_id, Err(e))) => {
                self.errors += 1;
                if e.is_integrity() {
                    error!(job_id, error = %e, "Store integrity error while dispatching");
                } else {
                    error!(job_id, error = %e, "Failed to record dispatch outcome");
                }
            }
            Err(e) => {
                self.errors += 1;
                error!(error = %e, "Dispatch task failed");
            }
        }
    }
}

/// Drives a [`Scheduler`] on an interval and routes claimed jobs.
pub struct TickRunner {
    scheduler: Arc<Scheduler>,
    dispatchers: Arc<DispatcherRegistry>,
}

impl TickRunner {
    pub fn new(scheduler: Arc<Scheduler>, dispatchers: Arc<DispatcherRegistry>) -> Self {
        Self {
            scheduler,
            dispatchers,
        }
    }

    /// Claim runnable jobs and spawn one dispatch task per job.
    async fn spawn_dispatches(
        &self,
        tasks: &mut JoinSet<DispatchResult>,
        now: DateTime<Utc>,
    ) -> usize {
        let jobs = self.scheduler.runnable_jobs(now, None).await;
        let claimed = jobs.len();
        for job in jobs {
            let dispatchers = self.dispatchers.clone();
            tasks.spawn(async move {
                let result = dispatchers.route(&job).await;
                (job.id, result)
            });
        }
        claimed
    }

    /// One tick: claim runnable jobs and wait for every dispatch to finish.
    pub async fn run_once(&self, now: DateTime<Utc>) -> TickReport {
        let mut tasks = JoinSet::new();
        let mut report = TickReport {
            claimed: self.spawn_dispatches(&mut tasks, now).await,
            ..Default::default()
        };

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }
        report
    }

    /// Tick until `cancel` fires, then wait for in-flight dispatches.
    ///
    /// Dispatches of one tick may still be running when the next tick starts;
    /// the running-count check keeps same-channel work under its cap.
    pub async fn run(&self, cancel: CancellationToken) {
        self.recover_stale().await;

        let interval_duration = self.scheduler.config().tick_interval();
        let mut interval = tokio::time::interval(interval_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tasks: JoinSet<DispatchResult> = JoinSet::new();
        let mut totals = TickReport::default();

        info!(
            interval_ms = interval_duration.as_millis() as u64,
            channels = ?self.dispatchers.channels(),
            "Tick runner started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    totals.record(joined);
                }
                _ = interval.tick() => {
                    let claimed = self.spawn_dispatches(&mut tasks, Utc::now()).await;
                    totals.claimed += claimed;
                    if claimed > 0 {
                        debug!(claimed, in_flight = tasks.len(), "Tick dispatched jobs");
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight dispatches");
        }
        while let Some(joined) = tasks.join_next().await {
            totals.record(joined);
        }

        info!(
            claimed = totals.claimed,
            completed = totals.completed,
            retrying = totals.retrying,
            failed = totals.failed,
            errors = totals.errors,
            "Tick runner stopped"
        );
    }

    async fn recover_stale(&self) {
        let config = self.scheduler.config();
        let Ok(max_age) = chrono::Duration::from_std(config.stale_running_after()) else {
            warn!("stale_running_after is out of range; skipping stale job recovery");
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return;
        };

        if let Err(e) = self.scheduler.store().recover_stale_running(cutoff).await {
            warn!(error = %e, "Failed to recover stale running jobs");
        }
    }
}
