//! Broadcast channels for real-time job events.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent};
