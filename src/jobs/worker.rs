//! Mail worker: consumes the batch mail queue and delivers occurrences.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::job::{BackoffStrategy, JobError, JobStatus};
use super::queue::{JobQueue, QueuedJob};
use crate::mail::TransportProvider;

/// Configuration for the mail worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name/identifier
    pub name: String,
    /// Poll interval for checking the queue (milliseconds)
    pub poll_interval_ms: u64,
    /// Keep delivering to later recipients after a send failure. Off by
    /// default; the batch aborts at the first failure.
    pub continue_on_error: bool,
    /// Delay between retry attempts of a failed occurrence
    pub retry_backoff: BackoffStrategy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "sendwave-worker".to_string(),
            poll_interval_ms: 1000,
            continue_on_error: false,
            retry_backoff: BackoffStrategy::default(),
        }
    }
}

/// Statistics for the mail worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Total occurrences processed
    pub processed: Arc<AtomicU64>,
    /// Total occurrences succeeded
    pub succeeded: Arc<AtomicU64>,
    /// Total failed attempts (including retried ones)
    pub failed: Arc<AtomicU64>,
    /// Total occurrences dead-lettered
    pub dead_lettered: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

/// Observer for job lifecycle transitions.
pub trait JobLifecycleHook: Send + Sync {
    fn on_active(&self, job: &QueuedJob);
    fn on_completed(&self, job: &QueuedJob);
    fn on_failed(&self, job: &QueuedJob, error: &JobError);
    fn on_dead_lettered(&self, job: &QueuedJob, error: &JobError);
}

/// Default hook that logs lifecycle transitions.
pub struct TracingLifecycleHook;

impl JobLifecycleHook for TracingLifecycleHook {
    fn on_active(&self, job: &QueuedJob) {
        tracing::debug!(
            job_id = %job.metadata.id,
            attempt = job.metadata.attempts,
            "Processing job {} of type {}",
            job.metadata.id,
            job.metadata.job_type
        );
    }

    fn on_completed(&self, job: &QueuedJob) {
        tracing::debug!(
            job_id = %job.metadata.id,
            "Completed job {} of type {}",
            job.metadata.id,
            job.metadata.job_type
        );
    }

    fn on_failed(&self, job: &QueuedJob, error: &JobError) {
        tracing::error!(
            job_id = %job.metadata.id,
            attempt = job.metadata.attempts,
            "Failed job {} of type {}: {}",
            job.metadata.id,
            job.metadata.job_type,
            error
        );
    }

    fn on_dead_lettered(&self, job: &QueuedJob, error: &JobError) {
        tracing::error!(
            job_id = %job.metadata.id,
            attempts = job.metadata.attempts,
            "Job {} of type {} moved to dead letter queue: {}",
            job.metadata.id,
            job.metadata.job_type,
            error
        );
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    stats: WorkerStats,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

/// Worker that delivers batch mail occurrences from the queue.
pub struct MailWorker {
    queue: Arc<JobQueue>,
    provider: Arc<dyn TransportProvider>,
    hook: Arc<dyn JobLifecycleHook>,
    config: WorkerConfig,
    stats: WorkerStats,
}

impl MailWorker {
    /// Create a new worker over the given queue and transport provider.
    pub fn new(
        queue: Arc<JobQueue>,
        provider: Arc<dyn TransportProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            provider,
            hook: Arc::new(TracingLifecycleHook),
            config,
            stats: WorkerStats::new(),
        }
    }

    /// Replace the lifecycle hook.
    pub fn with_hook(mut self, hook: Arc<dyn JobLifecycleHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Deliver one occurrence: open a transport with the occurrence's own
    /// credentials, then send to each recipient in batch order. The first
    /// send error aborts the batch unless `continue_on_error` is set.
    async fn deliver(&self, occurrence: &QueuedJob) -> Result<(), JobError> {
        let job = &occurrence.job;
        let transport = self
            .provider
            .connect(&job.credentials)
            .await
            .map_err(JobError::from)?;

        let mut first_error: Option<JobError> = None;
        for recipient in &job.recipients {
            let result = transport
                .send(
                    &job.credentials.address,
                    &recipient.recipient,
                    &recipient.subject,
                    &recipient.message,
                )
                .await;

            match result {
                Ok(()) => {
                    metrics::counter!("sendwave_mails_sent").increment(1);
                }
                Err(e) => {
                    metrics::counter!("sendwave_mails_failed").increment(1);
                    let error = JobError::from(e);
                    if !self.config.continue_on_error {
                        return Err(error);
                    }
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Process the next occurrence from the queue, if any.
    ///
    /// Returns the status the occurrence ended this attempt in: `Completed`,
    /// `Failed` (requeued for another attempt), or `Dead`.
    pub async fn process_next(&self) -> crate::error::Result<Option<JobStatus>> {
        let Some(mut occurrence) = self.queue.dequeue().await? else {
            return Ok(None);
        };

        occurrence.metadata.mark_running();
        self.hook.on_active(&occurrence);
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        match self.deliver(&occurrence).await {
            Ok(()) => {
                occurrence.metadata.mark_completed();
                self.hook.on_completed(&occurrence);
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sendwave_jobs_completed").increment(1);
                Ok(Some(JobStatus::Completed))
            }
            Err(error) => {
                occurrence.metadata.mark_failed(&error.message);
                self.hook.on_failed(&occurrence, &error);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sendwave_jobs_failed").increment(1);

                if error.retryable && occurrence.metadata.can_retry() {
                    self.requeue_after_backoff(occurrence).await?;
                    Ok(Some(JobStatus::Failed))
                } else {
                    occurrence.metadata.mark_dead(&error.message);
                    self.hook.on_dead_lettered(&occurrence, &error);
                    self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("sendwave_jobs_dead_lettered").increment(1);
                    self.queue.dead_letter(occurrence).await;
                    Ok(Some(JobStatus::Dead))
                }
            }
        }
    }

    /// Requeue a failed occurrence. With zero backoff the requeue happens
    /// inline so retries stay ordered behind already-queued work; with a
    /// nonzero backoff the requeue is deferred on a spawned timer.
    async fn requeue_after_backoff(&self, occurrence: QueuedJob) -> crate::error::Result<()> {
        let delay = self
            .config
            .retry_backoff
            .delay_for_attempt(occurrence.metadata.attempts.saturating_sub(1));

        if delay.is_zero() {
            return self.queue.requeue(occurrence).await;
        }

        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.requeue(occurrence).await {
                e.log();
            }
        });
        Ok(())
    }

    /// Start the worker loop, returning a handle for control.
    pub fn start(self: Arc<Self>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let stats = self.stats.clone();
        let poll_interval = tokio::time::Duration::from_millis(self.config.poll_interval_ms);
        let name = self.config.name.clone();

        tokio::spawn(async move {
            tracing::info!(worker = %name, "Mail worker started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!(worker = %name, "Worker shutting down");
                            break;
                        }
                    }
                    result = self.process_next() => {
                        match result {
                            // Processed one; go straight back for the next.
                            Ok(Some(_)) => {}
                            Ok(None) => tokio::time::sleep(poll_interval).await,
                            Err(e) => {
                                e.log();
                                tokio::time::sleep(poll_interval).await;
                            }
                        }
                    }
                }
            }

            tracing::info!(worker = %name, "Worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats,
        }
    }
}
