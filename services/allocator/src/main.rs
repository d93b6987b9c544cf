//! pairwise allocator
//!
//! Runs the allocation batch worker and the outbox dispatcher against a
//! shared Postgres database.

use std::sync::Arc;

use anyhow::Result;
use pairwise_allocator::{
    allocation::{AllocationConfig, AllocationService, AllocationWorker},
    config,
    counter::SequenceService,
    db::Database,
    engine::AllocationEngine,
    outbox::{LogPublisher, OutboxDispatcher, OutboxWorker, Publisher, WebhookPublisher},
};
use pairwise_retry::{Clock, Sleeper, SystemClock, TokioSleeper};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to PAIRWISE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting pairwise allocator");
    info!(
        strategy = config.fairness.strategy().as_str(),
        academic_year = ?config.academic_year,
        dispatch_once = config.dispatch_once,
        "Configuration loaded"
    );

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };
    match db.health_check().await {
        Ok(server_version) => info!(%server_version, "Database connection established"),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            return Err(e.into());
        }
    }

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let outbox_store = Arc::new(db.outbox_store());

    let publisher: Arc<dyn Publisher> = match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "Publishing outbox events to webhook");
            Arc::new(WebhookPublisher::new(url.clone()))
        }
        None => {
            info!("No webhook configured, logging outbox events");
            Arc::new(LogPublisher)
        }
    };
    let dispatcher = OutboxDispatcher::new(
        outbox_store.clone(),
        publisher,
        clock.clone(),
        config.outbox,
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start outbox worker in background
    let outbox_worker =
        OutboxWorker::new(dispatcher, config.outbox_poll_interval, config.dispatch_once);
    let mut outbox_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            outbox_worker.run(shutdown_rx).await;
        }
    });

    if config.dispatch_once {
        if let Err(e) = (&mut outbox_handle).await {
            error!(error = %e, "Outbox worker panicked");
        }
        info!("Single dispatch complete");
        return Ok(());
    }

    // Start allocation worker in background
    let sequences = Arc::new(SequenceService::new(
        Arc::new(db.sequence_store()),
        clock.clone(),
        sleeper,
        config.counter,
    ));
    let directory = Arc::new(db.directory());
    let service = Arc::new(AllocationService::new(
        AllocationEngine::new(config.fairness),
        sequences,
        directory.clone(),
        directory.clone(),
        directory,
        outbox_store,
        clock,
        AllocationConfig {
            academic_year: config.academic_year,
            ..Default::default()
        },
    ));
    let allocation_worker = AllocationWorker::new(
        service,
        config.allocation_interval,
        config.allocation_batch_size,
    );
    let allocation_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            allocation_worker.run(shutdown_rx).await;
        }
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut outbox_handle => {
            if let Err(e) = result {
                error!(error = %e, "Outbox worker panicked");
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, allocation_handle).await {
        warn!(error = %e, "Allocation worker did not shut down in time");
    }

    if !outbox_handle.is_finished() {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, outbox_handle).await {
            warn!(error = %e, "Outbox worker did not shut down in time");
        }
    }

    info!("Allocator shutdown complete");
    Ok(())
}
