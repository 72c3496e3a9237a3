#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};

use outpost::database::repositories::SqlxJobRepository;
use outpost::database::{DbPool, init_pool_with_size, run_migrations};
use outpost::dispatch::{ChannelPublisher, PublishError, PublishReceipt};
use outpost::queue::{EnqueueRequest, Job, JobStore, RetryPolicy};

/// Fresh in-memory database. One connection, since each in-memory
/// connection is its own database.
pub async fn memory_pool() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn memory_store(policy: RetryPolicy) -> Arc<JobStore> {
    let pool = memory_pool().await;
    Arc::new(JobStore::new(
        Arc::new(SqlxJobRepository::new(pool)),
        policy,
    ))
}

pub fn retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1_000,
        backoff_factor: 2.0,
        max_delay_ms: 60_000,
    }
}

/// 2026-03-10 at `h:m` UTC.
pub fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
}

pub async fn enqueue_at(store: &JobStore, channel: &str, key: &str, run_at: DateTime<Utc>) -> Job {
    store
        .enqueue(EnqueueRequest::new(channel, key, json!({"text": key})).run_at(run_at))
        .await
        .unwrap()
}

/// Enqueue a due job and claim it, returning the `running` job.
pub async fn running_job(store: &JobStore, channel: &str, key: &str) -> Job {
    let now = Utc::now();
    let job = enqueue_at(store, channel, key, now).await;
    store.claim(&job, now).await.unwrap().unwrap()
}

pub enum Step {
    Succeed(PublishReceipt),
    Fail(PublishError),
    Panic(&'static str),
}

/// Publisher that replays a script of outcomes, then succeeds.
pub struct ScriptedPublisher {
    channel: String,
    service: String,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    payloads: Mutex<Vec<Value>>,
}

impl ScriptedPublisher {
    pub fn new(channel: &str) -> Self {
        Self::with_service(channel, channel)
    }

    pub fn with_service(channel: &str, service: &str) -> Self {
        Self {
            channel: channel.to_string(),
            service: service.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl ChannelPublisher for ScriptedPublisher {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn publish(&self, payload: &Value) -> Result<PublishReceipt, PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.payloads.lock().push(payload.clone());

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Succeed(receipt)) => Ok(receipt),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Panic(msg)) => panic!("{msg}"),
            None => Ok(PublishReceipt::new(format!("{}-{call}", self.channel))),
        }
    }
}
