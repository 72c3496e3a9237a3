//! Due-job selection with per-channel admission control.
//!
//! Three filters decide whether a pending job may run: its `run_at` has
//! passed, its channel is below the concurrency cap, and no blackout window
//! for its channel covers the current time. The store's atomic claim is the
//! final arbiter; everything before it is a best-effort read.

pub mod blackout;
pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::queue::{Job, JobStore};
use crate::{Error, Result};

pub use blackout::BlackoutWindow;
pub use runner::{TickReport, TickRunner};

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum jobs fetched and claimed per tick.
    pub batch_limit: u32,
    pub tick_interval_ms: u64,
    /// In-flight jobs allowed per channel without an explicit entry.
    pub default_concurrency: u32,
    /// Per-channel concurrency caps.
    pub concurrency: HashMap<String, u32>,
    pub blackouts: Vec<BlackoutWindow>,
    /// `running` jobs untouched this long are requeued on startup.
    pub stale_running_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            tick_interval_ms: 5_000,
            default_concurrency: 1,
            concurrency: HashMap::new(),
            blackouts: Vec::new(),
            stale_running_after_secs: 3_600,
        }
    }
}

impl SchedulerConfig {
    pub fn concurrency_cap(&self, channel: &str) -> u32 {
        self.concurrency
            .get(channel)
            .copied()
            .unwrap_or(self.default_concurrency)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stale_running_after(&self) -> Duration {
        Duration::from_secs(self.stale_running_after_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_limit == 0 {
            return Err(Error::config("scheduler batch_limit must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::config("scheduler tick_interval_ms must be at least 1"));
        }
        if self.default_concurrency == 0 {
            return Err(Error::config(
                "scheduler default_concurrency must be at least 1",
            ));
        }
        if let Some((channel, _)) = self.concurrency.iter().find(|(_, cap)| **cap == 0) {
            return Err(Error::config(format!(
                "concurrency cap for channel '{channel}' must be at least 1"
            )));
        }
        for window in &self.blackouts {
            window.validate()?;
        }
        Ok(())
    }
}

/// Side-effect-free answer to "would a job on this channel run at `run_at`?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub runnable: bool,
    pub in_blackout: bool,
    pub has_collision: bool,
}

/// Selects and claims runnable jobs.
pub struct Scheduler {
    store: Arc<JobStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Due jobs that pass admission, already claimed into `running`.
    ///
    /// `limit` defaults to the configured batch limit. Jobs skipped for
    /// capacity or blackout stay `pending`; a job lost to a concurrent
    /// claimant is dropped for this tick.
    pub async fn runnable_jobs(&self, now: DateTime<Utc>, limit: Option<u32>) -> Vec<Job> {
        let limit = limit.unwrap_or(self.config.batch_limit);
        let due = self.store.due_jobs(now, limit).await;
        if due.is_empty() {
            return Vec::new();
        }

        let mut running = self.store.running_channels().await;
        let mut claimed = Vec::with_capacity(due.len());

        for job in due {
            if self.at_capacity(&job.channel, &running) {
                debug!(job_id = job.id, channel = %job.channel, "Channel at concurrency cap, skipping");
                continue;
            }
            if self.in_blackout(&job.channel, now) {
                debug!(job_id = job.id, channel = %job.channel, "Channel in blackout window, skipping");
                continue;
            }

            match self.store.claim(&job, now).await {
                Ok(Some(job)) => {
                    // Count the claim so later jobs of the same channel in
                    // this batch see the cap.
                    *running.entry(job.channel.clone()).or_insert(0) += 1;
                    claimed.push(job);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = job.id, channel = %job.channel, error = %e, "Failed to claim job");
                }
            }
        }

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed runnable jobs");
        }
        claimed
    }

    /// Admission check for `channel` at `run_at` against current load.
    ///
    /// Uses the same blackout and concurrency rules as
    /// [`Self::runnable_jobs`] and never writes to the store.
    pub async fn evaluate(&self, channel: &str, run_at: DateTime<Utc>) -> Evaluation {
        let running = self.store.running_channels().await;
        let in_blackout = self.in_blackout(channel, run_at);
        let has_collision = self.at_capacity(channel, &running);

        Evaluation {
            runnable: !in_blackout && !has_collision,
            in_blackout,
            has_collision,
        }
    }

    fn at_capacity(&self, channel: &str, running: &HashMap<String, u32>) -> bool {
        let in_flight = running.get(channel).copied().unwrap_or(0);
        in_flight >= self.config.concurrency_cap(channel)
    }

    fn in_blackout(&self, channel: &str, now: DateTime<Utc>) -> bool {
        self.config
            .blackouts
            .iter()
            .any(|window| window.applies_to(channel) && window.contains(now))
    }
}
