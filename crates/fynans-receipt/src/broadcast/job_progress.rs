//! Job progress broadcaster for streaming receipt job status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    /// Human-readable description of what just happened.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    fn build(job_id: &str, status: JobStatus, progress: u8, message: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            progress,
            message,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn submitted(job_id: &str) -> Self {
        Self::build(job_id, JobStatus::Waiting, 0, "Receipt queued for processing".to_string())
    }

    pub fn progress(job_id: &str, progress: u8) -> Self {
        Self::build(job_id, JobStatus::Active, progress, format!("Processing receipt ({}%)", progress))
    }

    pub fn completed(job_id: &str) -> Self {
        Self::build(job_id, JobStatus::Completed, 100, "Receipt processed".to_string())
    }

    pub fn retrying(job_id: &str, progress: u8, error: &str, delay: Duration) -> Self {
        let mut event = Self::build(
            job_id,
            JobStatus::Waiting,
            progress,
            format!("Attempt failed, retrying in {}ms", delay.as_millis()),
        );
        event.error = Some(error.to_string());
        event
    }

    pub fn failed(job_id: &str, progress: u8, error: &str) -> Self {
        let mut event = Self::build(job_id, JobStatus::Failed, progress, "Receipt processing failed".to_string());
        event.error = Some(error.to_string());
        event
    }
}

#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
