//! Single-receipt processing: OCR, user context and parsing, with
//! weighted progress and collected warnings.

pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use context::{ParseContext, PipelineEvents};
pub use error::{PipelineError, PipelineWarning};
pub use progress::{FnProgress, NoopProgress, ProgressReporter, ProgressTracker};
pub use runner::{ProcessedReceipt, ReceiptPipeline, STAGE_CONTEXT, STAGE_OCR};
