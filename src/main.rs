//! Sendwave Worker - Main entry point
//!
//! Runs the batch mail queue, scheduler, and worker as one process.

use std::sync::Arc;
use std::time::Duration;

use sendwave_dispatch::{
    config::{Config, QueueBackendKind},
    jobs::{
        BackoffStrategy, DispatchScheduler, InMemoryQueueBackend, JobQueue, MailWorker,
        QueueBackend, QueueConfig, RedisQueueBackend, WorkerConfig,
    },
    mail::SmtpTransportProvider,
    observability,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    // Initialize observability
    observability::init("sendwave-worker", &config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Sendwave worker"
    );

    // Select the queue backend
    let backend: Arc<dyn QueueBackend> = match config.queue.backend {
        QueueBackendKind::Memory => {
            tracing::info!("Using in-memory queue backend");
            Arc::new(InMemoryQueueBackend::new())
        }
        QueueBackendKind::Redis => {
            let client = redis::Client::open(config.redis.url.as_str())
                .map_err(|e| anyhow::anyhow!("Failed to create Redis client: {}", e))?;
            tracing::info!("Redis client created for {}", config.redis.url);
            Arc::new(RedisQueueBackend::new(client, config.queue.key.clone()))
        }
    };

    let queue = Arc::new(JobQueue::new(
        backend,
        QueueConfig {
            max_attempts: config.queue.max_attempts,
            enable_dead_letter: true,
            dead_letter_max_size: config.queue.dead_letter_max_size,
        },
    ));

    // Start the scheduler loop, picking up registrations that survived a
    // previous run of this process.
    let scheduler = Arc::new(DispatchScheduler::new(queue.clone()));
    let restored = scheduler.restore().await?;
    if restored > 0 {
        tracing::info!(count = restored, "Recurring dispatches restored");
    }
    let scheduler_task = scheduler
        .clone()
        .start(Duration::from_millis(config.worker.poll_interval_ms));
    tracing::info!("Scheduler started");

    // Start the mail worker
    let worker = Arc::new(MailWorker::new(
        queue.clone(),
        Arc::new(SmtpTransportProvider::new()),
        WorkerConfig {
            name: config.worker.name.clone(),
            poll_interval_ms: config.worker.poll_interval_ms,
            continue_on_error: config.worker.continue_on_error,
            retry_backoff: BackoffStrategy::default(),
        },
    ));
    let worker_handle = worker.start();

    shutdown_signal().await;

    // Cleanup
    worker_handle.shutdown();
    scheduler.shutdown();
    scheduler_task.abort();
    tracing::info!(
        processed = worker_handle.stats().processed(),
        succeeded = worker_handle.stats().succeeded(),
        dead_lettered = worker_handle.stats().dead_lettered(),
        "Worker shutdown complete"
    );

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
