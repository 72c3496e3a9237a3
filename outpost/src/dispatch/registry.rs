use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::dispatcher::{DispatchOutcome, Dispatcher};
use crate::queue::{Job, JobStore};
use crate::{Error, Result};

/// Failure message stored on jobs whose channel has no dispatcher.
pub const NO_DISPATCHER_MESSAGE: &str = "no dispatcher registered for channel";

/// Channel to dispatcher lookup table, filled at startup.
pub struct DispatcherRegistry {
    dispatchers: HashMap<String, Arc<Dispatcher>>,
    store: Arc<JobStore>,
}

impl DispatcherRegistry {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            dispatchers: HashMap::new(),
            store,
        }
    }

    /// Add a dispatcher. A channel can only be registered once.
    pub fn register(&mut self, dispatcher: Dispatcher) -> Result<()> {
        let channel = dispatcher.channel().to_string();
        if self.dispatchers.contains_key(&channel) {
            return Err(Error::config(format!(
                "channel '{channel}' has more than one dispatcher"
            )));
        }
        self.dispatchers.insert(channel, Arc::new(dispatcher));
        Ok(())
    }

    pub fn get(&self, channel: &str) -> Option<&Arc<Dispatcher>> {
        self.dispatchers.get(channel)
    }

    pub fn channels(&self) -> Vec<&str> {
        let mut channels: Vec<_> = self.dispatchers.keys().map(String::as_str).collect();
        channels.sort_unstable();
        channels
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    /// Hand a claimed job to its channel's dispatcher.
    ///
    /// A job with no dispatcher is failed permanently so it does not stay
    /// `running`.
    pub async fn route(&self, job: &Job) -> Result<DispatchOutcome> {
        match self.dispatchers.get(&job.channel) {
            Some(dispatcher) => dispatcher.dispatch(job).await,
            None => {
                warn!(job_id = job.id, channel = %job.channel, "No dispatcher registered for channel");
                let message = format!("{NO_DISPATCHER_MESSAGE} '{}'", job.channel);
                Ok(self.store.mark_failed(job, &message, false).await?.into())
            }
        }
    }
}
