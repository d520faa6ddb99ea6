pub mod ai;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod logging;
pub mod ocr;
pub mod parser;
pub mod pipeline;
pub mod secrets;
pub mod worker;

pub use ai::{CompletionError, CompletionService, OllamaClient};
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError, SqliteJobStore};
pub use domain::{Collaborators, InMemoryFinanceStore, UserContextFetcher};
pub use enrich::{EnrichedReceipt, ReceiptEnricher};
pub use error::{ConfigError, ExtractionError, ReceiptError, Result};
pub use logging::init_tracing;
pub use ocr::{build_extractor, ExtractionResult, TextExtractor};
pub use parser::{ParseError, ParsedItem, ParsedReceipt, ParserChain, ReceiptParser};
pub use pipeline::{PipelineError, PipelineEvents, PipelineWarning, ProgressTracker, ReceiptPipeline};
pub use worker::{
    submit, JobQueue, JobStatus, JobStatusResponse, QueueError, ReceiptJobProcessor,
    ReceiptJobQueue, WorkerPool,
};
