//! The batch mail queue: FIFO dispatch with dead letter handling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Instrument;

use super::job::{DispatchJob, JobId, JobMetadata};
use super::SEND_BATCH_MAIL;

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempt ceiling before an occurrence is dead-lettered
    pub max_attempts: u32,
    /// Whether to enable the dead letter queue
    pub enable_dead_letter: bool,
    /// Maximum items in the dead letter queue
    pub dead_letter_max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            enable_dead_letter: true,
            dead_letter_max_size: 1000,
        }
    }
}

/// Handle returned from a successful submission.
///
/// For an immediate job it names the queued occurrence; for a recurring job
/// it names the scheduler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle(pub JobId);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job occurrence in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Occurrence metadata
    pub metadata: JobMetadata,
    /// The dispatch payload
    pub job: DispatchJob,
    /// When the occurrence was enqueued
    pub enqueued_at: DateTime<Utc>,
}

/// Persisted form of a recurring registration.
///
/// The cron trigger is not stored; it is rebuilt from the job's schedule
/// policy on rehydration, so the stored shape stays stable even if trigger
/// internals change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringRecord {
    /// Registration identifier
    pub id: JobId,
    /// Template job
    pub job: DispatchJob,
    /// Next scheduled firing
    pub next_run: Option<DateTime<Utc>>,
    /// Last firing time
    pub last_run: Option<DateTime<Utc>>,
    /// Number of occurrences submitted so far
    pub run_count: u64,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of pending occurrences
    pub pending: usize,
    /// Number of running occurrences
    pub running: usize,
    /// Number of dead letter occurrences
    pub dead_letter: usize,
}

/// Dead letter queue for occurrences that exhausted their attempts.
#[derive(Debug)]
pub struct DeadLetterQueue {
    jobs: VecDeque<QueuedJob>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, job: QueuedJob) {
        if self.jobs.len() >= self.max_size {
            self.jobs.pop_front();
        }
        self.jobs.push_back(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn drain(&mut self) -> Vec<QueuedJob> {
        self.jobs.drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<QueuedJob> {
        self.jobs.iter().cloned().collect()
    }
}

/// Trait for queue backends.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Enqueue an occurrence at the back of the queue.
    async fn enqueue(&self, job: QueuedJob) -> crate::error::Result<()>;

    /// Dequeue the oldest occurrence.
    async fn dequeue(&self) -> crate::error::Result<Option<QueuedJob>>;

    /// Get queue statistics.
    async fn stats(&self) -> crate::error::Result<QueueStats>;

    /// Get the current queue length.
    async fn len(&self) -> crate::error::Result<usize>;

    /// Check if the queue is empty.
    async fn is_empty(&self) -> crate::error::Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Persist a recurring registration (insert or update).
    async fn save_recurring(&self, record: &RecurringRecord) -> crate::error::Result<()>;

    /// Remove a recurring registration.
    async fn remove_recurring(&self, id: JobId) -> crate::error::Result<()>;

    /// Load all recurring registrations.
    async fn load_recurring(&self) -> crate::error::Result<Vec<RecurringRecord>>;
}

/// In-memory queue backend for testing and development.
///
/// Strict FIFO: occurrences come out in submission order.
pub struct InMemoryQueueBackend {
    queue: Arc<RwLock<VecDeque<QueuedJob>>>,
    recurring: Arc<RwLock<HashMap<JobId, RecurringRecord>>>,
    stats: Arc<RwLock<QueueStats>>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(RwLock::new(VecDeque::new())),
            recurring: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(QueueStats::default())),
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job: QueuedJob) -> crate::error::Result<()> {
        let mut queue = self.queue.write().await;
        let mut stats = self.stats.write().await;
        queue.push_back(job);
        stats.pending = queue.len();
        Ok(())
    }

    async fn dequeue(&self) -> crate::error::Result<Option<QueuedJob>> {
        let mut queue = self.queue.write().await;
        let mut stats = self.stats.write().await;
        let job = queue.pop_front();
        stats.pending = queue.len();
        if job.is_some() {
            stats.running += 1;
        }
        Ok(job)
    }

    async fn stats(&self) -> crate::error::Result<QueueStats> {
        Ok(self.stats.read().await.clone())
    }

    async fn len(&self) -> crate::error::Result<usize> {
        Ok(self.queue.read().await.len())
    }

    async fn save_recurring(&self, record: &RecurringRecord) -> crate::error::Result<()> {
        self.recurring.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn remove_recurring(&self, id: JobId) -> crate::error::Result<()> {
        self.recurring.write().await.remove(&id);
        Ok(())
    }

    async fn load_recurring(&self) -> crate::error::Result<Vec<RecurringRecord>> {
        Ok(self.recurring.read().await.values().cloned().collect())
    }
}

/// Redis-backed queue backend for production use.
///
/// RPUSH on enqueue, BLPOP on dequeue, so FIFO order matches the in-memory
/// backend and occurrences survive worker restarts. Recurring registrations
/// live in a hash at `{queue_key}:recurring` so they survive restarts too.
pub struct RedisQueueBackend {
    client: redis::Client,
    queue_key: String,
    recurring_key: String,
}

impl RedisQueueBackend {
    /// Create a new Redis queue backend.
    ///
    /// # Arguments
    /// * `client` - A connected Redis client
    /// * `queue_key` - The Redis list key to use (e.g. `"sendwave:jobs:BATCH_MAIL_QUEUE"`)
    pub fn new(client: redis::Client, queue_key: impl Into<String>) -> Self {
        let queue_key = queue_key.into();
        let recurring_key = format!("{}:recurring", queue_key);
        Self {
            client,
            queue_key,
            recurring_key,
        }
    }

    /// Obtain an async multiplexed connection from the Redis client.
    async fn get_conn(&self) -> crate::error::Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                crate::error::SendwaveError::with_internal(
                    crate::error::ErrorCode::QueueConnectionFailed,
                    "Failed to get Redis connection for job queue",
                    e.to_string(),
                )
            })
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, job: QueuedJob) -> crate::error::Result<()> {
        let span = tracing::info_span!("redis_queue_enqueue", queue = %self.queue_key);
        async {
            let serialized = serde_json::to_string(&job)?;

            let mut conn = self.get_conn().await?;
            redis::cmd("RPUSH")
                .arg(&self.queue_key)
                .arg(&serialized)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(|e| {
                    crate::error::SendwaveError::with_internal(
                        crate::error::ErrorCode::QueueError,
                        "Failed to enqueue job to Redis",
                        e.to_string(),
                    )
                })?;

            tracing::debug!(queue = %self.queue_key, job_id = %job.metadata.id, "Job enqueued");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn dequeue(&self) -> crate::error::Result<Option<QueuedJob>> {
        let span = tracing::info_span!("redis_queue_dequeue", queue = %self.queue_key);
        async {
            let mut conn = self.get_conn().await?;

            // BLPOP with a 5-second timeout so we don't block indefinitely
            let result: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(&self.queue_key)
                .arg(5_u64)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    crate::error::SendwaveError::with_internal(
                        crate::error::ErrorCode::QueueError,
                        "Failed to dequeue job from Redis",
                        e.to_string(),
                    )
                })?;

            match result {
                Some((_key, value)) => {
                    let job: QueuedJob = serde_json::from_str(&value)?;
                    tracing::debug!(queue = %self.queue_key, job_id = %job.metadata.id, "Job dequeued");
                    Ok(Some(job))
                }
                None => Ok(None),
            }
        }
        .instrument(span)
        .await
    }

    async fn stats(&self) -> crate::error::Result<QueueStats> {
        let pending = self.len().await?;
        Ok(QueueStats {
            pending,
            running: 0,
            dead_letter: 0,
        })
    }

    async fn len(&self) -> crate::error::Result<usize> {
        let span = tracing::info_span!("redis_queue_len", queue = %self.queue_key);
        async {
            let mut conn = self.get_conn().await?;
            let length: usize = redis::cmd("LLEN")
                .arg(&self.queue_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    crate::error::SendwaveError::with_internal(
                        crate::error::ErrorCode::QueueError,
                        "Failed to get Redis queue length",
                        e.to_string(),
                    )
                })?;

            Ok(length)
        }
        .instrument(span)
        .await
    }

    async fn save_recurring(&self, record: &RecurringRecord) -> crate::error::Result<()> {
        let span = tracing::info_span!("redis_recurring_save", queue = %self.queue_key);
        async {
            let serialized = serde_json::to_string(record)?;

            let mut conn = self.get_conn().await?;
            redis::cmd("HSET")
                .arg(&self.recurring_key)
                .arg(record.id.to_string())
                .arg(&serialized)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(|e| {
                    crate::error::SendwaveError::with_internal(
                        crate::error::ErrorCode::QueueError,
                        "Failed to persist recurring registration to Redis",
                        e.to_string(),
                    )
                })?;

            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn remove_recurring(&self, id: JobId) -> crate::error::Result<()> {
        let span = tracing::info_span!("redis_recurring_remove", queue = %self.queue_key);
        async {
            let mut conn = self.get_conn().await?;
            redis::cmd("HDEL")
                .arg(&self.recurring_key)
                .arg(id.to_string())
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(|e| {
                    crate::error::SendwaveError::with_internal(
                        crate::error::ErrorCode::QueueError,
                        "Failed to remove recurring registration from Redis",
                        e.to_string(),
                    )
                })?;

            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn load_recurring(&self) -> crate::error::Result<Vec<RecurringRecord>> {
        let span = tracing::info_span!("redis_recurring_load", queue = %self.queue_key);
        async {
            let mut conn = self.get_conn().await?;
            let stored: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(&self.recurring_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    crate::error::SendwaveError::with_internal(
                        crate::error::ErrorCode::QueueError,
                        "Failed to load recurring registrations from Redis",
                        e.to_string(),
                    )
                })?;

            let mut records = Vec::with_capacity(stored.len());
            for value in stored.values() {
                records.push(serde_json::from_str(value)?);
            }
            Ok(records)
        }
        .instrument(span)
        .await
    }
}

/// The batch mail queue.
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    dead_letter: Arc<RwLock<DeadLetterQueue>>,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue with the given backend.
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        let dlq = DeadLetterQueue::new(config.dead_letter_max_size);
        Self {
            backend,
            dead_letter: Arc::new(RwLock::new(dlq)),
            config,
        }
    }

    /// Create a new in-memory job queue (for testing).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryQueueBackend::new()),
            QueueConfig::default(),
        )
    }

    /// Validate and enqueue a fresh occurrence of a dispatch job.
    ///
    /// Nothing is enqueued when validation fails.
    pub async fn submit(&self, job: DispatchJob) -> crate::error::Result<JobHandle> {
        job.validate()?;

        let metadata = JobMetadata::new(SEND_BATCH_MAIL).with_max_attempts(self.config.max_attempts);
        let handle = JobHandle(metadata.id);
        let queued = QueuedJob {
            metadata,
            job,
            enqueued_at: Utc::now(),
        };

        self.backend.enqueue(queued).await?;
        metrics::counter!("sendwave_jobs_enqueued", "kind" => SEND_BATCH_MAIL).increment(1);
        Ok(handle)
    }

    /// Put a failed occurrence back, keeping its metadata (attempt count,
    /// last error) intact.
    pub async fn requeue(&self, job: QueuedJob) -> crate::error::Result<()> {
        self.backend.enqueue(job).await
    }

    /// Dequeue the next occurrence.
    pub async fn dequeue(&self) -> crate::error::Result<Option<QueuedJob>> {
        self.backend.dequeue().await
    }

    /// Move an occurrence to the dead letter queue.
    pub async fn dead_letter(&self, job: QueuedJob) {
        if self.config.enable_dead_letter {
            self.dead_letter.write().await.push(job);
        }
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> crate::error::Result<QueueStats> {
        let mut stats = self.backend.stats().await?;
        stats.dead_letter = self.dead_letter.read().await.len();
        Ok(stats)
    }

    /// Snapshot of the dead letter queue contents.
    pub async fn dead_letters(&self) -> Vec<QueuedJob> {
        self.dead_letter.read().await.snapshot()
    }

    /// Persist a recurring registration (insert or update).
    pub async fn save_recurring(&self, record: &RecurringRecord) -> crate::error::Result<()> {
        self.backend.save_recurring(record).await
    }

    /// Remove a recurring registration.
    pub async fn remove_recurring(&self, id: JobId) -> crate::error::Result<()> {
        self.backend.remove_recurring(id).await
    }

    /// Load all recurring registrations from the backing store.
    pub async fn load_recurring(&self) -> crate::error::Result<Vec<RecurringRecord>> {
        self.backend.load_recurring().await
    }

    /// Current queue length.
    pub async fn len(&self) -> crate::error::Result<usize> {
        self.backend.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::schedule::SchedulePolicy;
    use crate::mail::{CredentialBundle, MailProvider, RecipientContext};

    fn job_for(recipient: &str) -> DispatchJob {
        DispatchJob::new(
            CredentialBundle::new(MailProvider::Gmail, "a@x.com", "p"),
            SchedulePolicy::None,
            vec![RecipientContext::new(recipient, "Hi", "Hello")],
        )
    }

    #[tokio::test]
    async fn test_submit_and_dequeue() {
        let queue = JobQueue::in_memory();

        let handle = queue.submit(job_for("b@y.com")).await.unwrap();
        let dequeued = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.metadata.id, handle.0);
        assert_eq!(dequeued.metadata.job_type, SEND_BATCH_MAIL);
        assert_eq!(dequeued.metadata.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::in_memory();

        queue.submit(job_for("first@y.com")).await.unwrap();
        queue.submit(job_for("second@y.com")).await.unwrap();
        queue.submit(job_for("third@y.com")).await.unwrap();

        for expected in ["first@y.com", "second@y.com", "third@y.com"] {
            let job = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(job.job.recipients[0].recipient, expected);
        }
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_before_enqueue() {
        let queue = JobQueue::in_memory();

        let mut job = job_for("b@y.com");
        job.recipients.clear();
        assert!(queue.submit(job).await.is_err());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_retention() {
        let queue = JobQueue::in_memory();

        let handle = queue.submit(job_for("b@y.com")).await.unwrap();
        let occurrence = queue.dequeue().await.unwrap().unwrap();
        queue.dead_letter(occurrence).await;

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].metadata.id, handle.0);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.dead_letter, 1);
    }

    #[tokio::test]
    async fn test_recurring_records_persist_in_backing_store() {
        let queue = JobQueue::in_memory();

        let job = job_for("b@y.com");
        let record = RecurringRecord {
            id: crate::jobs::JobId::new(),
            job,
            next_run: Some(Utc::now()),
            last_run: None,
            run_count: 3,
        };

        queue.save_recurring(&record).await.unwrap();
        let loaded = queue.load_recurring().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
        assert_eq!(loaded[0].run_count, 3);

        queue.remove_recurring(record.id).await.unwrap();
        assert!(queue.load_recurring().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_caps_at_max_size() {
        let mut dlq = DeadLetterQueue::new(2);
        let queue = JobQueue::in_memory();
        for recipient in ["a@y.com", "b@y.com", "c@y.com"] {
            queue.submit(job_for(recipient)).await.unwrap();
            dlq.push(queue.dequeue().await.unwrap().unwrap());
        }
        assert_eq!(dlq.len(), 2);
        let kept = dlq.drain();
        assert_eq!(kept[0].job.recipients[0].recipient, "b@y.com");
        assert_eq!(kept[1].job.recipients[0].recipient, "c@y.com");
    }
}
