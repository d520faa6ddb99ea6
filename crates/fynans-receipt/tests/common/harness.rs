//! Test harness running real workers over scripted OCR and completion.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tempfile::TempDir;

use fynans_receipt::ai::{Completion, CompletionOptions};
use fynans_receipt::config::Config;
use fynans_receipt::worker::{JobStatusResponse, ReceiptJobPayload};
use fynans_receipt::{
    Collaborators, CompletionError, CompletionService, ExtractionError, ExtractionResult,
    InMemoryFinanceStore, JobQueue, JobStatus, ParserChain, ReceiptEnricher, ReceiptJobProcessor,
    ReceiptJobQueue, ReceiptPipeline, TextExtractor, UserContextFetcher, WorkerPool,
};

/// Completion service answering from a fixed script.
pub struct ScriptedCompletion {
    healthy: bool,
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn replying(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            healthy: true,
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn unhealthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: false,
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<Completion, CompletionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(tx) = &options.on_token {
            for tokens in [50, 150, 300] {
                let _ = tx.send(tokens).await;
            }
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Network("script exhausted".to_string())));
        reply.map(|text| Completion {
            text,
            total_duration: Some(1_000_000),
            token_count: Some(300),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

/// Extractor returning the same text, or the same error, on every call.
pub struct FixedText {
    outcome: Result<String, String>,
    calls: AtomicUsize,
}

impl FixedText {
    pub fn text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(reason.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for FixedText {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn extract_text(&self, _image: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(text) => Ok(ExtractionResult::new(text.clone(), 0.92)),
            Err(reason) => Err(ExtractionError::OcrFailed(reason.clone())),
        }
    }
}

/// A running queue and worker pool over scripted collaborators.
pub struct ReceiptHarness {
    pub queue: Arc<ReceiptJobQueue>,
    pub store: Arc<InMemoryFinanceStore>,
    pool: WorkerPool,
    /// Keeps file-backed stores alive for the test.
    temp_dir: TempDir,
}

impl ReceiptHarness {
    /// Must be called from inside a tokio runtime.
    pub fn start(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
        completion: Arc<dyn CompletionService>,
        store: Arc<InMemoryFinanceStore>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut queue_config = config.queue.clone();
        if queue_config.database_path.is_none() {
            queue_config.database_path = Some(
                temp_dir
                    .path()
                    .join("receipts.db")
                    .to_string_lossy()
                    .to_string(),
            );
        }

        let collaborators = Collaborators::from_store(Arc::clone(&store));
        let pipeline = ReceiptPipeline::new(
            extractor,
            UserContextFetcher::from_collaborators(&collaborators),
            ParserChain::standard(completion, config),
        );
        let processor = ReceiptJobProcessor::new(
            Arc::new(pipeline),
            Arc::new(ReceiptEnricher::new(&collaborators)),
            config.progress.clone(),
        );

        let queue = Arc::new(
            ReceiptJobQueue::from_config(&queue_config).expect("Failed to build job queue"),
        );
        let pool = WorkerPool::spawn(Arc::clone(&queue), Arc::new(processor), &config.worker);

        Self {
            queue,
            store,
            pool,
            temp_dir,
        }
    }

    pub async fn submit_image(&self, image: &[u8], user_id: Option<&str>) -> String {
        self.queue
            .enqueue(ReceiptJobPayload {
                image_base64: base64::engine::general_purpose::STANDARD.encode(image),
                user_id: user_id.map(str::to_string),
            })
            .await
            .expect("Failed to enqueue job")
    }

    /// Polls until the job is completed or failed.
    pub async fn wait_terminal(&self, job_id: &str) -> JobStatusResponse {
        wait_terminal(self.queue.as_ref(), job_id).await
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

pub async fn wait_terminal(queue: &dyn JobQueue, job_id: &str) -> JobStatusResponse {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let response = queue.fetch_result(job_id).await.expect("status lookup failed");
            if matches!(response.status, JobStatus::Completed | JobStatus::Failed) {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time")
}
