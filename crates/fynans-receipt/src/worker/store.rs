//! Job persistence behind a small synchronous trait.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

use super::error::QueueError;
use super::job::{JobRecord, JobState};

/// Storage for job records. Claims must be exclusive across workers.
pub trait JobStore: Send + Sync {
    fn insert(&self, record: &JobRecord) -> Result<(), QueueError>;

    fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Marks the oldest ready job active and counts the attempt.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError>;

    /// Overwrites a record, keeping the larger of the stored and given progress.
    fn save(&self, record: &JobRecord) -> Result<(), QueueError>;

    /// Raises stored progress. Returns whether the value changed.
    fn raise_progress(&self, id: &str, progress: u8) -> Result<bool, QueueError>;

    /// Earliest `run_at` among waiting and delayed jobs.
    fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError>;

    /// Drops finished jobs older than `older_than`. Returns how many went.
    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError>;

    fn count_by_state(&self, state: JobState) -> Result<usize, QueueError>;
}

/// Process-local job store. Finished jobs expire after the retention period.
pub struct MemoryJobStore {
    live: RwLock<HashMap<String, JobRecord>>,
    finished: Cache<String, JobRecord>,
}

impl MemoryJobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            finished: Cache::builder().time_to_live(retention).build(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        self.live.read().unwrap_or_else(|poisoned| {
            log::warn!("Job store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        self.live.write().unwrap_or_else(|poisoned| {
            log::warn!("Job store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, record: &JobRecord) -> Result<(), QueueError> {
        self.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        if let Some(record) = self.read().get(id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.finished.get(id))
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        let mut live = self.write();
        let next_id = live
            .values()
            .filter(|r| r.is_ready(now))
            .min_by_key(|r| (r.run_at, r.created_at))
            .map(|r| r.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(record) = live.get_mut(&id) else {
            return Ok(None);
        };
        record.state = JobState::Active;
        record.attempts_made += 1;
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut live = self.write();
        let mut record = record.clone();
        if let Some(existing) = live.get(&record.id) {
            record.progress = record.progress.max(existing.progress);
        }

        if record.state.is_terminal() {
            live.remove(&record.id);
            self.finished.insert(record.id.clone(), record);
        } else {
            live.insert(record.id.clone(), record);
        }
        Ok(())
    }

    fn raise_progress(&self, id: &str, progress: u8) -> Result<bool, QueueError> {
        let mut live = self.write();
        let Some(record) = live.get_mut(id) else {
            if self.finished.contains_key(id) {
                return Ok(false);
            }
            return Err(QueueError::NotFound(id.to_string()));
        };
        if progress <= record.progress {
            return Ok(false);
        }
        record.progress = progress;
        record.updated_at = Utc::now();
        Ok(true)
    }

    fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        Ok(self
            .read()
            .values()
            .filter(|r| matches!(r.state, JobState::Waiting | JobState::Delayed))
            .map(|r| r.run_at)
            .min())
    }

    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        let expired: Vec<String> = self
            .finished
            .iter()
            .filter(|(_, r)| r.finished_at.is_some_and(|at| at < older_than))
            .map(|(id, _)| id.to_string())
            .collect();
        for id in &expired {
            self.finished.invalidate(id);
        }
        self.finished.run_pending_tasks();
        Ok(expired.len())
    }

    fn count_by_state(&self, state: JobState) -> Result<usize, QueueError> {
        if state.is_terminal() {
            self.finished.run_pending_tasks();
            return Ok(self.finished.iter().filter(|(_, r)| r.state == state).count());
        }
        Ok(self.read().values().filter(|r| r.state == state).count())
    }
}
