//! Background receipt jobs: queue, storage, handler and workers.

pub mod error;
pub mod job;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod store;

pub use error::QueueError;
pub use job::{
    JobRecord, JobState, JobStatus, JobStatusResponse, ReceiptJobPayload, SubmitReceiptRequest,
    SubmitReceiptResponse,
};
pub use pool::WorkerPool;
pub use processor::{JobFailure, JobHandler, JobProgressReporter, ReceiptJobProcessor};
pub use queue::{submit, JobQueue, ReceiptJobQueue};
pub use store::{JobStore, MemoryJobStore};
