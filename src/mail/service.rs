//! Mail service: the intake surface that turns send-mail requests into
//! dispatch jobs.

use std::sync::Arc;

use super::SendMailRequest;
use crate::error::Result;
use crate::jobs::{DispatchJob, DispatchScheduler, JobHandle, SchedulePolicy};

/// Accepts send-mail requests and hands them to the dispatcher.
pub struct MailService {
    dispatcher: Arc<DispatchScheduler>,
}

impl MailService {
    pub fn new(dispatcher: Arc<DispatchScheduler>) -> Self {
        Self { dispatcher }
    }

    /// Queue a batch mail request.
    ///
    /// `schedule` is the raw wire value; absent means immediate dispatch,
    /// and an unknown name is rejected. Acceptance only means the job was
    /// queued or registered; delivery happens later in the worker.
    pub async fn send_mail(
        &self,
        schedule: Option<&str>,
        request: SendMailRequest,
    ) -> Result<JobHandle> {
        let policy = match schedule {
            Some(raw) => raw.parse::<SchedulePolicy>()?,
            None => SchedulePolicy::None,
        };

        let (credentials, recipients) = request.into_parts();
        let job = DispatchJob::new(credentials, policy, recipients);

        match self.dispatcher.enqueue(job).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                tracing::error!(error = %e, "Error queueing email");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobQueue;
    use crate::mail::{MailProvider, RecipientContext};

    fn service_over(queue: Arc<JobQueue>) -> MailService {
        MailService::new(Arc::new(DispatchScheduler::new(queue)))
    }

    fn request() -> SendMailRequest {
        SendMailRequest {
            service: MailProvider::Gmail,
            email: "a@x.com".to_string(),
            password: "p".to_string(),
            data: vec![RecipientContext::new("b@y.com", "Hi", "Hello")],
        }
    }

    #[tokio::test]
    async fn test_no_schedule_means_immediate() {
        let queue = Arc::new(JobQueue::in_memory());
        let service = service_over(queue.clone());

        service.send_mail(None, request()).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_schedule_rejected() {
        let queue = Arc::new(JobQueue::in_memory());
        let service = service_over(queue.clone());

        assert!(service.send_mail(Some("fortnightly"), request()).await.is_err());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_request_registers_only() {
        let queue = Arc::new(JobQueue::in_memory());
        let service = service_over(queue.clone());

        service.send_mail(Some("weekly"), request()).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let queue = Arc::new(JobQueue::in_memory());
        let service = service_over(queue.clone());

        let mut req = request();
        req.data.clear();
        assert!(service.send_mail(None, req).await.is_err());
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
