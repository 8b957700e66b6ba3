#![allow(clippy::result_large_err)]
//! # Sendwave Dispatch
//!
//! Batched and scheduled mail dispatch pipeline.
//!
//! ## Architecture
//!
//! - **Mail Service**: Intake surface that turns send-mail requests into dispatch jobs
//! - **Scheduler**: Routes jobs to the queue immediately or on a recurring cron trigger
//! - **Job Queue**: FIFO batch mail queue with in-memory and Redis backends
//! - **Mail Worker**: Dequeues occurrences and delivers them over SMTP, with retries and a dead letter queue
//! - **Transport**: Provider-aware SMTP sessions built from per-job credentials

pub mod config;
pub mod error;
pub mod jobs;
pub mod mail;
pub mod observability;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SendwaveError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SendwaveError};
    pub use crate::jobs::{
        DispatchJob, DispatchScheduler, JobHandle, JobId, JobQueue, JobStatus, MailWorker,
        SchedulePolicy, WorkerConfig,
    };
    pub use crate::mail::{
        CredentialBundle, MailProvider, MailService, RecipientContext, SendMailRequest,
    };
}
