use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use outpost::config::AppConfig;
use outpost::database::{self, repositories::SqlxJobRepository};
use outpost::dispatch::{Dispatcher, DispatcherRegistry};
use outpost::queue::JobStore;
use outpost::scheduler::{Scheduler, TickRunner};
use outpost::utils::http_client::install_rustls_provider;
use outpost::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;

    let _logging = logging::init_logging(&config.logging)?;
    panic_hook::install();
    install_rustls_provider();

    let pool =
        database::init_pool_with_size(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("opening database {}", config.database.url))?;
    database::run_migrations(&pool).await?;

    let repository = Arc::new(SqlxJobRepository::new(pool.clone()));
    let store = Arc::new(JobStore::new(repository, config.retry.clone()));
    let breakers = config.breakers.build_registry();

    let mut dispatchers = DispatcherRegistry::new(store.clone());
    for channel in &config.channels {
        let publisher = channel.build()?;
        dispatchers.register(Dispatcher::new(publisher, &breakers, store.clone()))?;
    }
    if dispatchers.is_empty() {
        warn!("No channels configured; due jobs will be failed as undeliverable");
    }

    let counts = store.counts_by_status().await;
    info!(
        pending = counts.pending,
        running = counts.running,
        failed = counts.failed,
        channels = dispatchers.len(),
        "outpost initialized"
    );

    let scheduler = Arc::new(Scheduler::new(store, config.scheduler.clone()));
    let runner = TickRunner::new(scheduler, Arc::new(dispatchers));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    runner.run(cancel).await;

    for snapshot in breakers.snapshot() {
        info!(
            service = %snapshot.service,
            state = %snapshot.state,
            failure_count = snapshot.failure_count,
            "Circuit breaker state at shutdown"
        );
    }

    pool.close().await;
    info!("outpost stopped");
    Ok(())
}
