use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quorum_engine::{Engine, JobQueue, PgJobQueue, PgStore};
use quorum_events::{names, EventBus, EventPersistence, WebhookDelivery, WebhookNotifier};
use quorum_worker::config::WorkerConfig;
use quorum_worker::runner::JobRunner;
use quorum_worker::scheduler::MaintenanceScheduler;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorum_worker=debug,quorum_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(
        concurrency = config.concurrency,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        maintenance_interval_secs = config.maintenance_interval.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = quorum_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    quorum_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    quorum_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let persistence_handle = tokio::spawn(EventPersistence::run(pool.clone(), event_bus.subscribe()));
    let webhook_handle = config.webhook_url.as_ref().map(|url| {
        let delivery = WebhookDelivery::new().expect("Failed to build webhook client");
        let notifier = WebhookNotifier::new(url.clone(), delivery).only(&[
            names::ASSIGNMENT_CREATED,
            names::CONSENSUS_FINALIZED,
            names::TASK_ESCALATED,
        ]);
        tokio::spawn(notifier.run(event_bus.subscribe()))
    });
    tracing::info!(webhook = webhook_handle.is_some(), "Event services started");

    // --- Engine ---
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool.clone()));
    let engine = Arc::new(Engine::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::clone(&queue),
        Arc::clone(&event_bus),
    ));

    // --- Runners and scheduler ---
    let cancel = CancellationToken::new();
    let process_id = uuid::Uuid::new_v4();
    let runner_handles: Vec<_> = (0..config.concurrency)
        .map(|i| {
            let runner = JobRunner::new(
                pool.clone(),
                Arc::clone(&engine),
                format!("{process_id}-{i}"),
                config.poll_interval,
            );
            tokio::spawn(runner.run(cancel.clone()))
        })
        .collect();

    let scheduler = MaintenanceScheduler::new(
        pool.clone(),
        Arc::clone(&queue),
        config.maintenance_interval,
        config.stale_claim_secs,
        config.stale_assignment_hours,
    );
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));
    tracing::info!(%process_id, runners = config.concurrency, "Worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    tracing::info!("Shutdown requested, draining runners");
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(30), join_all(runner_handles)).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    tracing::info!("Runners and scheduler stopped");

    // Dropping every bus sender closes the channel and stops its subscribers.
    drop(engine);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    if let Some(handle) = webhook_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Event services shut down");

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
