mod common;

use std::sync::Arc;

use chrono::Utc;

use common::{ScriptedPublisher, enqueue_at, memory_store, retry_policy, running_job, utc};
use outpost::breaker::CircuitBreakerRegistry;
use outpost::database::models::JobStatus;
use outpost::dispatch::{Dispatcher, DispatcherRegistry, NO_DISPATCHER_MESSAGE};
use outpost::queue::JobStore;
use outpost::scheduler::{BlackoutWindow, Evaluation, Scheduler, SchedulerConfig, TickRunner};

fn config_with_blackout(window: BlackoutWindow) -> SchedulerConfig {
    SchedulerConfig {
        blackouts: vec![window],
        ..Default::default()
    }
}

fn ids(jobs: &[outpost::queue::Job]) -> Vec<i64> {
    jobs.iter().map(|j| j.id).collect()
}

#[tokio::test]
async fn blackout_window_defers_job_until_it_ends() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(
        store.clone(),
        config_with_blackout(BlackoutWindow::new("meta_facebook", "09:00", "11:00", "UTC")),
    );
    let job = enqueue_at(&store, "meta_facebook", "job-1", utc(10, 0)).await;

    assert!(scheduler.runnable_jobs(utc(10, 0), None).await.is_empty());
    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.attempts, 0);

    let runnable = scheduler.runnable_jobs(utc(11, 1), None).await;
    assert_eq!(ids(&runnable), vec![job.id]);
    assert_eq!(runnable[0].status, JobStatus::Running);
    assert_eq!(runnable[0].attempts, 1);
}

#[tokio::test]
async fn blackout_only_applies_to_its_channel() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(
        store.clone(),
        config_with_blackout(BlackoutWindow::new("meta_facebook", "09:00", "11:00", "UTC")),
    );
    enqueue_at(&store, "meta_facebook", "fb", utc(10, 0)).await;
    let li = enqueue_at(&store, "linkedin", "li", utc(10, 0)).await;

    let runnable = scheduler.runnable_jobs(utc(10, 30), None).await;
    assert_eq!(ids(&runnable), vec![li.id]);
}

#[tokio::test]
async fn overnight_blackout_wraps_midnight() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(
        store.clone(),
        config_with_blackout(BlackoutWindow::new("c", "22:00", "06:00", "UTC")),
    );
    let job = enqueue_at(&store, "c", "k", utc(1, 0)).await;

    assert!(scheduler.runnable_jobs(utc(5, 59), None).await.is_empty());
    assert_eq!(ids(&scheduler.runnable_jobs(utc(6, 0), None).await), vec![job.id]);
}

#[tokio::test]
async fn invalid_timezone_does_not_block() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(
        store.clone(),
        config_with_blackout(BlackoutWindow::new("c", "00:00", "23:59", "Not/AZone")),
    );
    let job = enqueue_at(&store, "c", "k", utc(9, 0)).await;

    assert_eq!(ids(&scheduler.runnable_jobs(utc(10, 0), None).await), vec![job.id]);
}

#[tokio::test]
async fn concurrency_cap_holds_back_same_channel() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(store.clone(), SchedulerConfig::default());
    let first = enqueue_at(&store, "meta_facebook", "a", utc(9, 0)).await;
    let second = enqueue_at(&store, "meta_facebook", "b", utc(9, 1)).await;
    let other = enqueue_at(&store, "linkedin", "c", utc(9, 2)).await;

    // Cap 1: only the oldest of the channel is claimed, other channels proceed.
    let runnable = scheduler.runnable_jobs(utc(10, 0), None).await;
    assert_eq!(ids(&runnable), vec![first.id, other.id]);

    // The first is still running.
    assert!(scheduler.runnable_jobs(utc(10, 0), None).await.is_empty());

    store.mark_completed(first.id, Some("fb_1")).await.unwrap();
    let runnable = scheduler.runnable_jobs(utc(10, 0), None).await;
    assert_eq!(ids(&runnable), vec![second.id]);
}

#[tokio::test]
async fn concurrency_cap_is_configurable_per_channel() {
    let store = memory_store(retry_policy(5)).await;
    let mut config = SchedulerConfig::default();
    config.concurrency.insert("x_api".into(), 2);
    let scheduler = Scheduler::new(store.clone(), config);

    for key in ["a", "b", "c"] {
        enqueue_at(&store, "x_api", key, utc(9, 0)).await;
    }

    assert_eq!(scheduler.runnable_jobs(utc(10, 0), None).await.len(), 2);
    assert!(scheduler.runnable_jobs(utc(10, 0), None).await.is_empty());
}

#[tokio::test]
async fn limit_caps_the_batch() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(store.clone(), SchedulerConfig::default());
    for channel in ["a", "b", "c", "d"] {
        enqueue_at(&store, channel, "k", utc(9, 0)).await;
    }

    assert_eq!(scheduler.runnable_jobs(utc(10, 0), Some(3)).await.len(), 3);
    assert_eq!(scheduler.runnable_jobs(utc(10, 0), Some(3)).await.len(), 1);
}

#[tokio::test]
async fn evaluate_reports_without_claiming() {
    let store = memory_store(retry_policy(5)).await;
    let scheduler = Scheduler::new(
        store.clone(),
        config_with_blackout(BlackoutWindow::new("meta_facebook", "09:00", "11:00", "UTC")),
    );

    assert_eq!(
        scheduler.evaluate("meta_facebook", utc(12, 0)).await,
        Evaluation {
            runnable: true,
            in_blackout: false,
            has_collision: false,
        }
    );
    assert_eq!(
        scheduler.evaluate("meta_facebook", utc(10, 0)).await,
        Evaluation {
            runnable: false,
            in_blackout: true,
            has_collision: false,
        }
    );

    let pending = enqueue_at(&store, "meta_facebook", "queued", utc(8, 0)).await;
    running_job(&store, "meta_facebook", "busy").await;

    let evaluation = scheduler.evaluate("meta_facebook", utc(12, 0)).await;
    assert!(evaluation.has_collision);
    assert!(!evaluation.runnable);

    // Nothing was claimed by evaluating.
    let stored = store.find_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(store.counts_by_status().await.running, 1);
}

async fn runner_with(
    store: Arc<JobStore>,
    publishers: Vec<Arc<ScriptedPublisher>>,
) -> TickRunner {
    let breakers = CircuitBreakerRegistry::default();
    let mut registry = DispatcherRegistry::new(store.clone());
    for publisher in publishers {
        registry
            .register(Dispatcher::new(publisher, &breakers, store.clone()))
            .unwrap();
    }
    let scheduler = Arc::new(Scheduler::new(store, SchedulerConfig::default()));
    TickRunner::new(scheduler, Arc::new(registry))
}

#[tokio::test]
async fn tick_dispatches_claimed_jobs() {
    let store = memory_store(retry_policy(5)).await;
    let fb = Arc::new(ScriptedPublisher::new("meta_facebook"));
    let li = Arc::new(ScriptedPublisher::new("linkedin"));
    let runner = runner_with(store.clone(), vec![fb.clone(), li.clone()]).await;

    let a = enqueue_at(&store, "meta_facebook", "a", utc(9, 0)).await;
    let b = enqueue_at(&store, "linkedin", "b", utc(9, 0)).await;

    let report = runner.run_once(Utc::now()).await;
    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.errors, 0);
    assert_eq!((fb.calls(), li.calls()), (1, 1));

    for id in [a.id, b.id] {
        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.remote_id.is_some());
    }
}

#[tokio::test]
async fn tick_fails_jobs_without_dispatcher() {
    let store = memory_store(retry_policy(5)).await;
    let runner = runner_with(store.clone(), vec![]).await;
    let job = enqueue_at(&store, "tiktok", "k", utc(9, 0)).await;

    let report = runner.run_once(Utc::now()).await;
    assert_eq!(report.failed, 1);

    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().starts_with(NO_DISPATCHER_MESSAGE));
}

#[tokio::test]
async fn run_recovers_stale_jobs_and_stops_on_cancel() {
    let store = memory_store(retry_policy(5)).await;
    let stuck = running_job(&store, "c", "stuck").await;

    let registry = DispatcherRegistry::new(store.clone());
    let config = SchedulerConfig {
        stale_running_after_secs: 0,
        ..Default::default()
    };
    // Let the claim's updated_at fall behind the cutoff.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let runner = TickRunner::new(
        Arc::new(Scheduler::new(store.clone(), config)),
        Arc::new(registry),
    );
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    runner.run(cancel).await;

    let stored = store.find_by_id(stuck.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.attempts, 1);
}
