use std::sync::{Mutex, MutexGuard};

use crate::domain::UserReceiptContext;

use super::error::PipelineWarning;
use super::progress::ProgressTracker;

/// Collects warnings for one run and emits each as a structured event.
#[derive(Debug, Default)]
pub struct PipelineEvents {
    job_id: Option<String>,
    warnings: Mutex<Vec<PipelineWarning>>,
}

impl PipelineEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_job(job_id: &str) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn warn(&self, warning: PipelineWarning) {
        tracing::warn!(
            job_id = self.job_id.as_deref().unwrap_or("-"),
            kind = warning.kind(),
            "{}",
            warning
        );
        self.lock_warnings().push(warning);
    }

    pub fn warnings(&self) -> Vec<PipelineWarning> {
        self.lock_warnings().clone()
    }

    fn lock_warnings(&self) -> MutexGuard<'_, Vec<PipelineWarning>> {
        self.warnings.lock().unwrap_or_else(|poisoned| {
            log::warn!("Pipeline warning lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Inputs handed to every parser in the chain.
pub struct ParseContext<'a> {
    pub user_context: Option<&'a UserReceiptContext>,
    pub tracker: &'a ProgressTracker,
    pub events: &'a PipelineEvents,
}

impl<'a> ParseContext<'a> {
    /// A context without user data, mostly for tests.
    pub fn bare(tracker: &'a ProgressTracker, events: &'a PipelineEvents) -> Self {
        Self {
            user_context: None,
            tracker,
            events,
        }
    }
}
