use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::error::QueueError;
use super::job::{
    JobRecord, JobState, JobStatus, JobStatusResponse, ReceiptJobPayload, SubmitReceiptRequest,
    SubmitReceiptResponse,
};
use super::store::{JobStore, MemoryJobStore};
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::{QueueConfig, QueueStoreKind};
use crate::db::{Database, SqliteJobStore};

/// What callers see of the queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, payload: ReceiptJobPayload) -> Result<String, QueueError>;

    async fn fetch_status(&self, id: &str) -> Result<JobStatus, QueueError>;

    async fn fetch_result(&self, id: &str) -> Result<JobStatusResponse, QueueError>;
}

pub async fn submit(
    queue: &dyn JobQueue,
    request: SubmitReceiptRequest,
) -> Result<SubmitReceiptResponse, QueueError> {
    let job_id = queue
        .enqueue(ReceiptJobPayload {
            image_base64: request.image_base64,
            user_id: request.user_id,
        })
        .await?;
    Ok(SubmitReceiptResponse { job_id })
}

/// Retrying job queue over a `JobStore`.
pub struct ReceiptJobQueue {
    store: Arc<dyn JobStore>,
    notify: Arc<Notify>,
    events: JobProgressBroadcaster,
    max_attempts: u32,
    backoff_base: Duration,
    retention: Duration,
}

impl ReceiptJobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            notify: Arc::new(Notify::new()),
            events: JobProgressBroadcaster::new(config.event_capacity),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    /// Builds the store named by `queue.store`.
    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let store: Arc<dyn JobStore> = match config.store {
            QueueStoreKind::Memory => Arc::new(MemoryJobStore::new(Duration::from_secs(
                config.retention_secs,
            ))),
            QueueStoreKind::Sqlite => {
                let store = SqliteJobStore::new(Database::open_configured(
                    config.database_path.as_deref(),
                )?);
                store.recover_interrupted()?;
                Arc::new(store)
            }
        };
        Ok(Self::new(store, config))
    }

    pub fn events(&self) -> &JobProgressBroadcaster {
        &self.events
    }

    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// `base × 2^(attempts_made − 1)`
    pub fn backoff_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }

    pub fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        self.store.claim_next(Utc::now())
    }

    pub fn report_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        let progress = progress.min(100);
        if self.store.raise_progress(id, progress)? {
            self.events.send(JobProgressEvent::progress(id, progress));
        }
        Ok(())
    }

    pub fn complete(&self, id: &str, data: Value) -> Result<(), QueueError> {
        let mut record = self.load(id)?;
        let now = Utc::now();
        record.state = JobState::Completed;
        record.progress = 100;
        record.result = Some(data);
        record.failed_reason = None;
        record.updated_at = now;
        record.finished_at = Some(now);
        self.store.save(&record)?;

        info!(job_id = id, attempts = record.attempts_made, "Receipt job completed");
        self.events.send(JobProgressEvent::completed(id));
        Ok(())
    }

    /// Schedules a retry while attempts remain, otherwise fails the job.
    /// Returns the state the job ended up in.
    pub fn fail(&self, id: &str, reason: &str, retryable: bool) -> Result<JobState, QueueError> {
        let mut record = self.load(id)?;
        let now = Utc::now();
        record.failed_reason = Some(reason.to_string());
        record.updated_at = now;

        if retryable && record.attempts_made < record.max_attempts {
            let delay = self.backoff_for(record.attempts_made);
            record.state = JobState::Delayed;
            record.run_at = run_at_after(now, delay);
            self.store.save(&record)?;

            warn!(
                job_id = id,
                attempt = record.attempts_made,
                max_attempts = record.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = reason,
                "Receipt job attempt failed, retry scheduled"
            );
            self.events.send(JobProgressEvent::retrying(id, record.progress, reason, delay));
            self.notify.notify_one();
            return Ok(JobState::Delayed);
        }

        record.state = JobState::Failed;
        record.finished_at = Some(now);
        self.store.save(&record)?;

        warn!(
            job_id = id,
            attempts = record.attempts_made,
            error = reason,
            "Receipt job failed"
        );
        self.events.send(JobProgressEvent::failed(id, record.progress, reason));
        Ok(JobState::Failed)
    }

    pub fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        self.store.next_run_at()
    }

    /// Drops finished jobs past the retention period.
    pub fn purge_finished(&self) -> Result<usize, QueueError> {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let purged = self.store.purge_finished(cutoff)?;
        if purged > 0 {
            info!(purged, "Purged finished receipt jobs");
        }
        Ok(purged)
    }

    pub fn counts(&self) -> Result<Vec<(JobState, usize)>, QueueError> {
        [
            JobState::Waiting,
            JobState::Active,
            JobState::Delayed,
            JobState::Completed,
            JobState::Failed,
        ]
        .into_iter()
        .map(|state| Ok((state, self.store.count_by_state(state)?)))
        .collect()
    }

    fn load(&self, id: &str) -> Result<JobRecord, QueueError> {
        self.store
            .get(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }
}

fn run_at_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JobQueue for ReceiptJobQueue {
    async fn enqueue(&self, payload: ReceiptJobPayload) -> Result<String, QueueError> {
        let record = JobRecord::new(payload, self.max_attempts);
        self.store.insert(&record)?;

        info!(job_id = %record.id, "Receipt job created");
        self.events.send(JobProgressEvent::submitted(&record.id));
        self.notify.notify_one();
        Ok(record.id)
    }

    async fn fetch_status(&self, id: &str) -> Result<JobStatus, QueueError> {
        Ok(self
            .store
            .get(id)?
            .map(|record| JobStatus::from(record.state))
            .unwrap_or(JobStatus::NotFound))
    }

    async fn fetch_result(&self, id: &str) -> Result<JobStatusResponse, QueueError> {
        Ok(self
            .store
            .get(id)?
            .as_ref()
            .map(JobStatusResponse::from_record)
            .unwrap_or_else(JobStatusResponse::not_found))
    }
}
