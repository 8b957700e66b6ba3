//! End-to-end tests for the dispatch pipeline: intake, scheduling, delivery,
//! retries, and dead-lettering, with a recording transport in place of SMTP.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sendwave_dispatch::error::{ErrorCode, Result, SendwaveError};
use sendwave_dispatch::jobs::{
    DispatchJob, DispatchScheduler, JobError, JobLifecycleHook, JobQueue, JobStatus, MailWorker,
    QueuedJob, SchedulePolicy, WorkerConfig,
};
use sendwave_dispatch::mail::{
    CredentialBundle, MailProvider, MailService, RecipientContext, SendMailRequest, Transport,
    TransportProvider,
};

/// One recorded send: (from, to, subject, body).
type SentMail = (String, String, String, String);

/// Transport provider that records every send and fails for configured
/// recipient addresses.
#[derive(Default)]
struct RecordingProvider {
    calls: Arc<Mutex<Vec<SentMail>>>,
    failing: HashSet<String>,
    connects: AtomicU64,
    refuse_connect: bool,
}

impl RecordingProvider {
    fn new() -> Self {
        Self::default()
    }

    fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<SentMail> {
        self.calls.lock().unwrap().clone()
    }

    fn attempted(&self) -> Vec<SentMail> {
        self.sent()
    }
}

struct RecordingTransport {
    calls: Arc<Mutex<Vec<SentMail>>>,
    failing: HashSet<String>,
}

#[async_trait]
impl TransportProvider for RecordingProvider {
    async fn connect(&self, _credentials: &CredentialBundle) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        if self.refuse_connect {
            return Err(SendwaveError::new(
                ErrorCode::TransportConnectFailed,
                "connection refused",
            ));
        }
        Ok(Arc::new(RecordingTransport {
            calls: self.calls.clone(),
            failing: self.failing.clone(),
        }))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, from: &str, to: &str, subject: &str, text: &str) -> Result<()> {
        self.calls.lock().unwrap().push((
            from.to_string(),
            to.to_string(),
            subject.to_string(),
            text.to_string(),
        ));
        if self.failing.contains(to) {
            return Err(SendwaveError::new(
                ErrorCode::TransportSendFailed,
                format!("send to {} rejected", to),
            ));
        }
        Ok(())
    }
}

fn pipeline(
    provider: Arc<RecordingProvider>,
) -> (Arc<JobQueue>, Arc<DispatchScheduler>, MailService, MailWorker) {
    let queue = Arc::new(JobQueue::in_memory());
    let scheduler = Arc::new(DispatchScheduler::new(queue.clone()));
    let service = MailService::new(scheduler.clone());
    let worker = MailWorker::new(queue.clone(), provider, WorkerConfig::default());
    (queue, scheduler, service, worker)
}

fn request_for(recipients: &[(&str, &str, &str)]) -> SendMailRequest {
    SendMailRequest {
        service: MailProvider::Gmail,
        email: "sender@gmail.com".to_string(),
        password: "app-password".to_string(),
        data: recipients
            .iter()
            .map(|(to, subject, message)| RecipientContext::new(*to, *subject, *message))
            .collect(),
    }
}

#[tokio::test]
async fn immediate_batch_is_delivered_once() {
    let provider = Arc::new(RecordingProvider::new());
    let (queue, _scheduler, service, worker) = pipeline(provider.clone());

    // The reference wire body, misspelled recipient key included.
    let body = serde_json::json!({
        "service": "Gmail",
        "email": "sender@gmail.com",
        "password": "app-password",
        "data": [
            { "receipient": "b@y.com", "subject": "Hi", "message": "Hello" }
        ]
    });
    let request: SendMailRequest = serde_json::from_value(body).unwrap();

    service.send_mail(None, request).await.unwrap();

    let status = worker.process_next().await.unwrap();
    assert_eq!(status, Some(JobStatus::Completed));

    let sent = provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "sender@gmail.com");
    assert_eq!(sent[0].1, "b@y.com");
    assert_eq!(sent[0].2, "Hi");
    assert_eq!(sent[0].3, "Hello");

    // Nothing left to process.
    assert_eq!(worker.process_next().await.unwrap(), None);
    assert!(queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn failing_job_retries_five_times_then_dead_letters() {
    let provider = Arc::new(RecordingProvider::failing_for(&["b@y.com"]));
    let (queue, _scheduler, service, worker) = pipeline(provider.clone());

    service
        .send_mail(None, request_for(&[("b@y.com", "Hi", "Hello")]))
        .await
        .unwrap();

    // Attempts 1-4 fail and requeue.
    for _ in 0..4 {
        assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Failed));
    }
    // Attempt 5 exhausts the ceiling.
    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Dead));

    // Exactly five delivery attempts, never a sixth.
    assert_eq!(provider.attempted().len(), 5);
    assert_eq!(worker.process_next().await.unwrap(), None);

    let dead = queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].metadata.attempts, 5);
    assert_eq!(worker.stats().succeeded(), 0);
    assert_eq!(worker.stats().dead_lettered(), 1);
}

#[tokio::test]
async fn connect_failures_also_respect_the_attempt_ceiling() {
    let provider = Arc::new(RecordingProvider {
        refuse_connect: true,
        ..RecordingProvider::new()
    });
    let (queue, _scheduler, service, worker) = pipeline(provider.clone());

    service
        .send_mail(None, request_for(&[("b@y.com", "Hi", "Hello")]))
        .await
        .unwrap();

    for _ in 0..4 {
        assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Failed));
    }
    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Dead));
    assert_eq!(provider.connects.load(Ordering::Relaxed), 5);
    assert!(provider.sent().is_empty());
    assert_eq!(queue.dead_letters().await.len(), 1);
}

#[tokio::test]
async fn weekly_schedule_registers_without_sending() {
    let provider = Arc::new(RecordingProvider::new());
    let (queue, scheduler, service, worker) = pipeline(provider.clone());

    service
        .send_mail(Some("weekly"), request_for(&[("b@y.com", "Hi", "Hello")]))
        .await
        .unwrap();

    // Accepted, but nothing queued and nothing sent.
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(worker.process_next().await.unwrap(), None);
    assert!(provider.sent().is_empty());

    let entries = scheduler.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].trigger.expression(), "0 0 3 * * Sun");
}

#[tokio::test]
async fn batch_aborts_at_first_failure() {
    let provider = Arc::new(RecordingProvider::failing_for(&["second@y.com"]));
    let (_queue, _scheduler, service, worker) = pipeline(provider.clone());

    service
        .send_mail(
            None,
            request_for(&[
                ("first@y.com", "s1", "m1"),
                ("second@y.com", "s2", "m2"),
                ("third@y.com", "s3", "m3"),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Failed));

    // The first send happened, the second was attempted, the third never was.
    let attempted = provider.attempted();
    assert_eq!(attempted.len(), 2);
    assert_eq!(attempted[0].1, "first@y.com");
    assert_eq!(attempted[1].1, "second@y.com");
}

#[tokio::test]
async fn batch_order_is_preserved() {
    let provider = Arc::new(RecordingProvider::new());
    let (_queue, _scheduler, service, worker) = pipeline(provider.clone());

    let recipients: Vec<String> = (0..10).map(|i| format!("r{}@y.com", i)).collect();
    let batch: Vec<(&str, &str, &str)> = recipients
        .iter()
        .map(|r| (r.as_str(), "subject", "message"))
        .collect();

    service.send_mail(None, request_for(&batch)).await.unwrap();
    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Completed));

    let sent: Vec<String> = provider.sent().into_iter().map(|(_, to, _, _)| to).collect();
    assert_eq!(sent, recipients);
}

#[tokio::test]
async fn empty_batch_is_rejected_at_intake() {
    let provider = Arc::new(RecordingProvider::new());
    let (queue, _scheduler, service, worker) = pipeline(provider.clone());

    let result = service.send_mail(None, request_for(&[])).await;
    assert!(result.is_err());
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(worker.process_next().await.unwrap(), None);
}

#[tokio::test]
async fn continue_on_error_delivers_remainder() {
    let provider = Arc::new(RecordingProvider::failing_for(&["second@y.com"]));
    let queue = Arc::new(JobQueue::in_memory());
    let scheduler = Arc::new(DispatchScheduler::new(queue.clone()));
    let service = MailService::new(scheduler);
    let worker = MailWorker::new(
        queue.clone(),
        provider.clone(),
        WorkerConfig {
            continue_on_error: true,
            ..WorkerConfig::default()
        },
    );

    service
        .send_mail(
            None,
            request_for(&[
                ("first@y.com", "s1", "m1"),
                ("second@y.com", "s2", "m2"),
                ("third@y.com", "s3", "m3"),
            ]),
        )
        .await
        .unwrap();

    // The occurrence still fails overall, but all three sends were attempted.
    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Failed));
    assert_eq!(provider.attempted().len(), 3);
}

#[derive(Default)]
struct RecordingHook {
    events: Mutex<Vec<String>>,
}

impl JobLifecycleHook for RecordingHook {
    fn on_active(&self, job: &QueuedJob) {
        self.events
            .lock()
            .unwrap()
            .push(format!("active:{}", job.metadata.attempts));
    }

    fn on_completed(&self, _job: &QueuedJob) {
        self.events.lock().unwrap().push("completed".to_string());
    }

    fn on_failed(&self, _job: &QueuedJob, error: &JobError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{}", error.retryable));
    }

    fn on_dead_lettered(&self, _job: &QueuedJob, _error: &JobError) {
        self.events.lock().unwrap().push("dead".to_string());
    }
}

#[tokio::test]
async fn lifecycle_hook_sees_every_transition() {
    let provider = Arc::new(RecordingProvider::failing_for(&["b@y.com"]));
    let queue = Arc::new(JobQueue::in_memory());
    let scheduler = Arc::new(DispatchScheduler::new(queue.clone()));
    let service = MailService::new(scheduler);
    let hook = Arc::new(RecordingHook::default());
    let worker = MailWorker::new(queue, provider, WorkerConfig::default())
        .with_hook(hook.clone());

    service
        .send_mail(None, request_for(&[("b@y.com", "Hi", "Hello")]))
        .await
        .unwrap();

    while worker.process_next().await.unwrap().is_some() {}

    let events = hook.events.lock().unwrap().clone();
    assert_eq!(events.iter().filter(|e| e.starts_with("active")).count(), 5);
    assert_eq!(events.iter().filter(|e| e.as_str() == "dead").count(), 1);
    assert_eq!(events.first().map(String::as_str), Some("active:1"));
    assert_eq!(events.last().map(String::as_str), Some("dead"));
    assert!(!events.contains(&"completed".to_string()));
}

#[tokio::test]
async fn recurring_entry_delivers_on_each_firing() {
    let provider = Arc::new(RecordingProvider::new());
    let (queue, scheduler, _service, worker) = pipeline(provider.clone());

    let job = DispatchJob::new(
        CredentialBundle::new(MailProvider::Gmail, "sender@gmail.com", "app-password"),
        SchedulePolicy::Hourly,
        vec![RecipientContext::new("b@y.com", "Hi", "Hello")],
    );
    scheduler.enqueue(job).await.unwrap();

    // Force two separate firings.
    let fired = scheduler
        .fire_due(chrono::Utc::now() + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(fired.len(), 1);
    let fired = scheduler
        .fire_due(chrono::Utc::now() + chrono::Duration::hours(4))
        .await
        .unwrap();
    assert_eq!(fired.len(), 1);

    assert_eq!(queue.len().await.unwrap(), 2);
    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Completed));
    assert_eq!(worker.process_next().await.unwrap(), Some(JobStatus::Completed));
    assert_eq!(provider.sent().len(), 2);
}
