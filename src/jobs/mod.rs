//! Batched mail dispatch pipeline: queue, scheduler, and worker.
//!
//! A dispatch job travels one of two paths. With no schedule it goes straight
//! into the batch mail queue and is picked up by the worker. With a recurring
//! schedule it is registered with the scheduler, which submits a fresh
//! occurrence to the queue each time the schedule's cron trigger fires.

pub mod job;
pub mod queue;
pub mod schedule;
pub mod scheduler;
pub mod worker;

pub use job::{
    BackoffStrategy, DispatchJob, JobError, JobId, JobMetadata, JobResult, JobStatus, RetryPolicy,
};
pub use queue::{
    DeadLetterQueue, InMemoryQueueBackend, JobHandle, JobQueue, QueueBackend, QueueConfig,
    QueueStats, QueuedJob, RecurringRecord, RedisQueueBackend,
};
pub use schedule::{CronTrigger, SchedulePolicy, Trigger};
pub use scheduler::{DispatchScheduler, RecurringEntry};
pub use worker::{
    JobLifecycleHook, MailWorker, TracingLifecycleHook, WorkerConfig, WorkerHandle, WorkerStats,
};

/// Name of the queue that carries batched mail jobs.
pub const BATCH_MAIL_QUEUE: &str = "BATCH_MAIL_QUEUE";

/// Kind label for batched mail jobs.
pub const SEND_BATCH_MAIL: &str = "SEND_BATCH_MAIL";
