//! Dispatch routing and recurring schedules.
//!
//! The scheduler is the single entry point for dispatch jobs. Unscheduled
//! jobs pass straight through to the queue; scheduled jobs are registered as
//! recurring entries and a fresh occurrence is submitted each time their cron
//! trigger fires. The scheduler never delivers mail itself.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::job::{DispatchJob, JobId};
use super::queue::{JobHandle, JobQueue, RecurringRecord};
use super::schedule::{CronTrigger, Trigger};

/// A registered recurring dispatch.
#[derive(Debug, Clone)]
pub struct RecurringEntry {
    /// Registration identifier
    pub id: JobId,
    /// The cron trigger driving this entry
    pub trigger: CronTrigger,
    /// Template job; each firing submits a fresh occurrence of it
    pub job: DispatchJob,
    /// Next scheduled firing
    pub next_run: Option<DateTime<Utc>>,
    /// Last firing time
    pub last_run: Option<DateTime<Utc>>,
    /// Number of occurrences submitted so far
    pub run_count: u64,
    /// Whether this entry is active
    pub active: bool,
}

impl RecurringEntry {
    fn to_record(&self) -> RecurringRecord {
        RecurringRecord {
            id: self.id,
            job: self.job.clone(),
            next_run: self.next_run,
            last_run: self.last_run,
            run_count: self.run_count,
        }
    }

    /// Rebuild an entry from its stored form. Returns `None` if the stored
    /// job no longer maps to a cron trigger.
    fn from_record(record: RecurringRecord) -> Option<Self> {
        let Trigger::Cron(trigger) = record.job.schedule.trigger() else {
            return None;
        };
        Some(Self {
            id: record.id,
            trigger,
            job: record.job,
            next_run: record.next_run,
            last_run: record.last_run,
            run_count: record.run_count,
            active: true,
        })
    }
}

/// Routes dispatch jobs to the queue, now or on a recurring schedule.
pub struct DispatchScheduler {
    queue: Arc<JobQueue>,
    entries: Arc<RwLock<Vec<RecurringEntry>>>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl DispatchScheduler {
    /// Create a new scheduler in front of the given queue.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            queue,
            entries: Arc::new(RwLock::new(Vec::new())),
            shutdown,
        }
    }

    /// Accept a dispatch job.
    ///
    /// Validation happens before any routing, so an invalid job neither
    /// enqueues nor registers anything. An immediate job is submitted to the
    /// queue right away; a recurring job only registers an entry and sends
    /// nothing until the trigger first fires.
    pub async fn enqueue(&self, job: DispatchJob) -> crate::error::Result<JobHandle> {
        job.validate()?;

        match job.schedule.trigger() {
            Trigger::Immediate => self.queue.submit(job).await,
            Trigger::Cron(trigger) => {
                let id = JobId::new();
                let next_run = trigger.next_after(Utc::now());
                let entry = RecurringEntry {
                    id,
                    trigger,
                    job,
                    next_run,
                    last_run: None,
                    run_count: 0,
                    active: true,
                };
                tracing::info!(
                    entry_id = %id,
                    cron = entry.trigger.expression(),
                    next_run = ?entry.next_run,
                    "Recurring dispatch registered"
                );
                // Durably recorded before the registration is visible.
                self.queue.save_recurring(&entry.to_record()).await?;
                self.entries.write().await.push(entry);
                metrics::counter!("sendwave_recurring_registered").increment(1);
                Ok(JobHandle(id))
            }
        }
    }

    /// Submit occurrences for every active entry whose trigger has fired at
    /// or before `now`. Returns the handles of the submitted occurrences.
    ///
    /// Entries with identical schedules fire independently; occurrences are
    /// never coalesced.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> crate::error::Result<Vec<JobHandle>> {
        let mut fired = Vec::new();
        let mut entries = self.entries.write().await;

        for entry in entries.iter_mut().filter(|e| e.active) {
            let Some(due) = entry.next_run else { continue };
            if due > now {
                continue;
            }

            let handle = self.queue.submit(entry.job.clone()).await?;
            entry.last_run = Some(due);
            entry.next_run = entry.trigger.next_after(now);
            entry.run_count += 1;
            self.queue.save_recurring(&entry.to_record()).await?;
            tracing::debug!(
                entry_id = %entry.id,
                occurrence = %handle,
                run_count = entry.run_count,
                "Recurring dispatch fired"
            );
            fired.push(handle);
        }

        Ok(fired)
    }

    /// Deactivate a recurring entry and drop it from the backing store.
    pub async fn cancel(&self, id: JobId) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.active = false;
            if let Err(e) = self.queue.remove_recurring(id).await {
                e.log();
            }
            true
        } else {
            false
        }
    }

    /// Rehydrate recurring registrations from the queue's backing store.
    ///
    /// Call once at startup before the firing loop runs. A restored entry
    /// whose `next_run` passed while the process was down fires on the next
    /// tick. Returns the number of entries restored.
    pub async fn restore(&self) -> crate::error::Result<usize> {
        let records = self.queue.load_recurring().await?;
        let mut entries = self.entries.write().await;
        let mut restored = 0;

        for record in records {
            if entries.iter().any(|e| e.id == record.id) {
                continue;
            }
            if let Some(entry) = RecurringEntry::from_record(record) {
                tracing::info!(
                    entry_id = %entry.id,
                    cron = entry.trigger.expression(),
                    run_count = entry.run_count,
                    "Recurring dispatch restored"
                );
                entries.push(entry);
                restored += 1;
            }
        }

        Ok(restored)
    }

    /// Snapshot of active recurring entries.
    pub async fn entries(&self) -> Vec<RecurringEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.active)
            .cloned()
            .collect()
    }

    /// Spawn the background loop that fires due entries once per tick.
    pub fn start(self: Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.fire_due(Utc::now()).await {
                            e.log();
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal the background loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
