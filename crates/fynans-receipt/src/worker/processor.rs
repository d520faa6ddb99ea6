//! Turns a claimed job into an enriched receipt.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use tracing::{info_span, warn, Instrument};

use super::job::{JobRecord, ReceiptJobPayload};
use super::queue::ReceiptJobQueue;
use crate::config::ProgressConfig;
use crate::enrich::{EnrichedReceipt, ReceiptEnricher, STAGE_ENRICH};
use crate::pipeline::{PipelineError, PipelineEvents, ProgressReporter, ProgressTracker, ReceiptPipeline};

/// Why an attempt failed, and whether another attempt could help.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub reason: String,
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

impl From<PipelineError> for JobFailure {
    fn from(e: PipelineError) -> Self {
        Self {
            retryable: !matches!(e, PipelineError::InvalidPayload(_)),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        job: &JobRecord,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Value, JobFailure>;
}

/// Forwards tracker percentages into the queue.
pub struct JobProgressReporter {
    queue: Arc<ReceiptJobQueue>,
    job_id: String,
}

impl JobProgressReporter {
    pub fn new(queue: Arc<ReceiptJobQueue>, job_id: &str) -> Self {
        Self {
            queue,
            job_id: job_id.to_string(),
        }
    }
}

impl ProgressReporter for JobProgressReporter {
    fn report(&self, percent: u8) {
        if let Err(e) = self.queue.report_progress(&self.job_id, percent) {
            warn!(job_id = %self.job_id, error = %e, "Failed to store job progress");
        }
    }
}

pub struct ReceiptJobProcessor {
    pipeline: Arc<ReceiptPipeline>,
    enricher: Arc<ReceiptEnricher>,
    progress: ProgressConfig,
}

impl ReceiptJobProcessor {
    pub fn new(
        pipeline: Arc<ReceiptPipeline>,
        enricher: Arc<ReceiptEnricher>,
        progress: ProgressConfig,
    ) -> Self {
        Self {
            pipeline,
            enricher,
            progress,
        }
    }

    /// Runs one payload end to end.
    pub async fn run(
        &self,
        job_id: &str,
        payload: &ReceiptJobPayload,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<EnrichedReceipt, PipelineError> {
        let image = base64::engine::general_purpose::STANDARD.decode(payload.image_base64.trim())?;

        let tracker = ProgressTracker::new(&self.progress.stages, reporter)
            .with_token_cap(self.progress.token_cap);
        let events = PipelineEvents::for_job(job_id);
        let user_id = payload.user_id.as_deref();

        let processed = self
            .pipeline
            .process(&image, user_id, &tracker, &events)
            .await?;

        tracker.start_stage(STAGE_ENRICH);
        let enriched = self
            .enricher
            .enrich(processed, user_id, &events)
            .instrument(info_span!("enrich"))
            .await;
        tracker.complete_stage(STAGE_ENRICH);
        tracker.complete();

        Ok(enriched)
    }
}

#[async_trait]
impl JobHandler for ReceiptJobProcessor {
    async fn handle(
        &self,
        job: &JobRecord,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Value, JobFailure> {
        let enriched = self.run(&job.id, &job.payload, reporter).await?;
        serde_json::to_value(&enriched).map_err(|e| JobFailure::retryable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::domain::{Collaborators, InMemoryFinanceStore, UserContextFetcher};
    use crate::error::ExtractionError;
    use crate::ocr::{ExtractionResult, TextExtractor};
    use crate::parser::{ParserChain, RuleBasedParser};

    const RECEIPT: &str = "\
CORNER MARKET
123 Main Street
2026-04-15 09:05:44
Bread 2.50
Milk 2 x 1.25
Tax 0.40
TOTAL 5.00
";

    struct FixedText(&'static str);

    #[async_trait]
    impl TextExtractor for FixedText {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract_text(&self, _image: &[u8]) -> Result<ExtractionResult, ExtractionError> {
            Ok(ExtractionResult::new(self.0, 0.9))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u8>>);

    impl ProgressReporter for Recorder {
        fn report(&self, percent: u8) {
            self.0.lock().unwrap().push(percent);
        }
    }

    fn processor(text: &'static str) -> ReceiptJobProcessor {
        let store = Arc::new(InMemoryFinanceStore::new());
        let collaborators = Collaborators::from_store(store);
        let mut chain = ParserChain::new();
        chain.register(Box::new(RuleBasedParser::generic()));
        let pipeline = ReceiptPipeline::new(
            Arc::new(FixedText(text)),
            UserContextFetcher::from_collaborators(&collaborators),
            chain,
        );
        ReceiptJobProcessor::new(
            Arc::new(pipeline),
            Arc::new(ReceiptEnricher::new(&collaborators)),
            ProgressConfig::default(),
        )
    }

    fn job(image_base64: &str) -> JobRecord {
        JobRecord::new(
            ReceiptJobPayload {
                image_base64: image_base64.to_string(),
                user_id: None,
            },
            3,
        )
    }

    #[tokio::test]
    async fn test_handle_returns_enriched_json() {
        let recorder = Arc::new(Recorder::default());
        let value = processor(RECEIPT)
            .handle(&job("aGVsbG8="), recorder.clone())
            .await
            .unwrap();

        assert_eq!(value["store"]["name"], "CORNER MARKET");
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
        assert_eq!(value["parserUsed"], "generic");

        let reported = recorder.0.lock().unwrap().clone();
        assert_eq!(reported.last(), Some(&100));
        assert!(reported.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_bad_base64_is_permanent() {
        let failure = processor(RECEIPT)
            .handle(&job("not base64!!"), Arc::new(Recorder::default()))
            .await
            .unwrap_err();

        assert!(!failure.retryable);
        assert!(failure.reason.starts_with("Invalid image payload"));
    }

    #[tokio::test]
    async fn test_unparseable_text_is_retryable() {
        let failure = processor("nothing useful here")
            .handle(&job("aGVsbG8="), Arc::new(Recorder::default()))
            .await
            .unwrap_err();

        assert!(failure.retryable);
        assert!(!failure.reason.is_empty());
    }
}
