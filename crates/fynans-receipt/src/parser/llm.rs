use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info_span, Instrument};

use super::prompt;
use super::validate::{self, ReceiptDraft};
use super::{ParseError, ParsedReceipt, ReceiptParser};
use crate::ai::{CompletionOptions, CompletionService};
use crate::config::ParserConfig;
use crate::pipeline::{ParseContext, PipelineWarning};

pub const UNKNOWN_STORE: &str = "Unknown Store";

const MIN_TEXT_CHARS: usize = 20;
const TOKEN_CHANNEL_CAPACITY: usize = 64;

pub const STAGE_PARSE: &str = "llm-parse";
pub const STAGE_NORMALIZE: &str = "llm-normalize";

/// Two-phase model-driven parser: extract, then normalize.
pub struct GenerativeParser {
    completion: Arc<dyn CompletionService>,
    config: ParserConfig,
    temperature: f32,
}

impl GenerativeParser {
    pub fn new(completion: Arc<dyn CompletionService>, config: ParserConfig) -> Self {
        Self {
            completion,
            config,
            temperature: CompletionOptions::default().temperature,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Runs one completion with token progress attached to `stage`.
    async fn generate(
        &self,
        stage: &str,
        prompt: &str,
        expected_tokens: u32,
        ctx: &ParseContext<'_>,
    ) -> Result<ReceiptDraft, ParseError> {
        let (tokens_tx, tokens_rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let options = CompletionOptions {
            temperature: self.temperature,
            max_tokens: None,
            on_token: Some(tokens_tx),
        };

        let (completion, ()) = tokio::join!(
            self.completion.complete(prompt, options),
            ctx.tracker.track_tokens(stage, expected_tokens, tokens_rx),
        );
        let completion = completion?;
        debug!(
            stage,
            tokens = completion.token_count.unwrap_or(0),
            duration_ns = completion.total_duration.unwrap_or(0),
            "Completion finished"
        );

        let value = validate::extract_json(&completion.text)?;
        let draft = validate::draft_from_json(&value);
        if let Some(warning) = validate::cross_check(
            &draft.parsed_items(),
            draft.total_amount,
            self.config.cross_check_tolerance,
        ) {
            ctx.events.warn(warning);
        }
        Ok(draft)
    }

    async fn normalize(
        &self,
        draft: &ReceiptDraft,
        ctx: &ParseContext<'_>,
    ) -> Result<ReceiptDraft, ParseError> {
        let prompt =
            prompt::normalize_prompt(draft).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        self.generate(
            STAGE_NORMALIZE,
            &prompt,
            self.config.normalize_expected_tokens,
            ctx,
        )
        .await
    }

    fn into_receipt(&self, draft: ReceiptDraft) -> ParsedReceipt {
        let items = draft.parsed_items();
        let recorded_at = validate::parse_date_time(draft.date.as_deref(), draft.time.as_deref());
        ParsedReceipt {
            store_name: draft
                .store_name
                .unwrap_or_else(|| UNKNOWN_STORE.to_string()),
            store_location: draft.store_location.unwrap_or_default(),
            items,
            total_amount: draft.total_amount,
            date: draft.date,
            time: draft.time,
            recorded_at,
            suggested_expense_category: draft.suggested_expense_category,
            parser_used: self.name().to_string(),
        }
    }
}

#[async_trait]
impl ReceiptParser for GenerativeParser {
    fn name(&self) -> &str {
        "llm"
    }

    fn can_handle(&self, text: &str) -> bool {
        text.chars().count() > MIN_TEXT_CHARS
    }

    async fn parse(&self, text: &str, ctx: &ParseContext<'_>) -> Result<ParsedReceipt, ParseError> {
        if !self.completion.health_check().await {
            return Err(ParseError::ServiceUnavailable(
                "Ollama service is not available".to_string(),
            ));
        }

        ctx.tracker.start_stage(STAGE_PARSE);
        let parse_prompt =
            prompt::parse_prompt(text, ctx.user_context, self.config.prompt_context_items);
        let mut draft = self
            .generate(
                STAGE_PARSE,
                &parse_prompt,
                self.config.parse_expected_tokens,
                ctx,
            )
            .instrument(info_span!("llm_parse"))
            .await?;
        ctx.tracker.complete_stage(STAGE_PARSE);

        ctx.tracker.start_stage(STAGE_NORMALIZE);
        if self.config.normalize {
            match self
                .normalize(&draft, ctx)
                .instrument(info_span!("llm_normalize"))
                .await
            {
                Ok(normalized) => draft = normalized,
                Err(e) => ctx.events.warn(PipelineWarning::NormalizeFailed {
                    error: e.to_string(),
                }),
            }
        }
        ctx.tracker.complete_stage(STAGE_NORMALIZE);

        Ok(self.into_receipt(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Completion, CompletionError};
    use crate::pipeline::{PipelineEvents, ProgressReporter, ProgressTracker};
    use crate::config::default_stages;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        healthy: bool,
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(healthy: bool, replies: Vec<Result<&str, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                healthy,
                replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(
            &self,
            prompt: &str,
            options: CompletionOptions,
        ) -> Result<Completion, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(tx) = &options.on_token {
                for n in 1..=5 {
                    let _ = tx.send(n * 100).await;
                }
            }
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Network("no reply scripted".into())));
            reply.map(|text| Completion {
                text,
                total_duration: None,
                token_count: Some(5),
            })
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }
    }

    struct Recorder(Mutex<Vec<u8>>);

    impl ProgressReporter for Recorder {
        fn report(&self, percent: u8) {
            self.0.lock().unwrap().push(percent);
        }
    }

    const TEXT: &str = "CONAD CITY\nBUKE 1.20\nQUMESHT 2 x 1.50\nTOTALI 4.20";

    const PHASE_ONE: &str = r#"Here you go: {
        "storeName": "Conad Ctiy",
        "storeLocation": null,
        "items": [
            {"name": "Buke", "price": 1.2, "quantity": 1},
            {"name": "Qumesht", "price": 1.5, "quantity": 2, "suggestedItemCategory": "Dairy"},
            {"name": "TVSH", "price": 0}
        ],
        "totalAmount": 4.2,
        "date": "15/04/2026",
        "time": "14:30",
        "suggestedExpenseCategory": "Groceries"
    }"#;

    const PHASE_TWO: &str = r#"{
        "storeName": "Conad City",
        "storeLocation": "",
        "items": [
            {"name": "Bukë", "price": 1.2},
            {"name": "Qumësht", "price": 1.5, "quantity": 2, "suggestedItemCategory": "Dairy"}
        ],
        "totalAmount": 4.2,
        "date": "15/04/2026",
        "time": "14:30"
    }"#;

    fn parser(service: Arc<Scripted>) -> GenerativeParser {
        GenerativeParser::new(service, ParserConfig::default())
    }

    #[test]
    fn test_can_handle_requires_more_than_twenty_chars() {
        let p = parser(Scripted::new(true, vec![]));
        assert!(!p.can_handle("short text"));
        assert!(!p.can_handle("exactly twenty chars"));
        assert!(p.can_handle("twenty-one characters"));
    }

    #[tokio::test]
    async fn test_unhealthy_service_declines() {
        let p = parser(Scripted::new(false, vec![Ok(PHASE_ONE)]));
        let tracker = ProgressTracker::noop();
        let events = PipelineEvents::new();
        let err = p
            .parse(TEXT, &ParseContext::bare(&tracker, &events))
            .await
            .unwrap_err();
        assert!(matches!(err, ParseError::ServiceUnavailable(_)));
        assert_eq!(err.to_string(), "Ollama service is not available");
    }

    #[tokio::test]
    async fn test_two_phase_parse_uses_normalized_result() {
        let service = Scripted::new(true, vec![Ok(PHASE_ONE), Ok(PHASE_TWO)]);
        let p = parser(service.clone());
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let tracker = ProgressTracker::new(&default_stages(), rec.clone());
        let events = PipelineEvents::new();

        let receipt = p
            .parse(TEXT, &ParseContext::bare(&tracker, &events))
            .await
            .unwrap();

        assert_eq!(receipt.store_name, "Conad City");
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.items[0].name, "Bukë");
        assert_eq!(receipt.items[0].quantity, 1.0);
        assert_eq!(receipt.items[1].suggested_category.as_deref(), Some("Dairy"));
        assert_eq!(receipt.parser_used, "llm");
        assert_eq!(
            receipt.recorded_at.map(|t| t.to_string()).as_deref(),
            Some("2026-04-15 14:30:00")
        );
        assert!(events.warnings().is_empty());

        let prompts = service.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("\"storeName\": \"Conad Ctiy\""));
        // TVSH at price 0 was dropped before normalization.
        assert!(!prompts[1].contains("TVSH"));

        let reports = rec.0.lock().unwrap().clone();
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
        let normalize_end = ((5.0 + 1.0 + 45.0 + 35.0) / 90.0 * 100.0_f64).round() as u8;
        assert_eq!(reports.last(), Some(&normalize_end));
    }

    #[tokio::test]
    async fn test_normalize_failure_keeps_first_pass() {
        let service = Scripted::new(true, vec![Ok(PHASE_ONE), Ok("I cannot do that")]);
        let p = parser(service);
        let tracker = ProgressTracker::noop();
        let events = PipelineEvents::new();

        let receipt = p
            .parse(TEXT, &ParseContext::bare(&tracker, &events))
            .await
            .unwrap();

        assert_eq!(receipt.store_name, "Conad Ctiy");
        assert_eq!(receipt.store_location, "");
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.suggested_expense_category.as_deref(), Some("Groceries"));
        let warnings = events.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind(), "normalize_failed");
    }

    #[tokio::test]
    async fn test_first_phase_without_json_is_hard_failure() {
        let p = parser(Scripted::new(true, vec![Ok("no structured data")]));
        let tracker = ProgressTracker::noop();
        let events = PipelineEvents::new();

        let err = p
            .parse(TEXT, &ParseContext::bare(&tracker, &events))
            .await
            .unwrap_err();
        assert!(matches!(err, ParseError::NoJson));
    }

    #[tokio::test]
    async fn test_missing_store_defaults() {
        let reply = r#"{"items": [{"name": "Bread", "price": 2.0}], "date": null}"#;
        let p = GenerativeParser::new(
            Scripted::new(true, vec![Ok(reply)]),
            ParserConfig {
                normalize: false,
                ..Default::default()
            },
        );
        let tracker = ProgressTracker::noop();
        let events = PipelineEvents::new();

        let receipt = p
            .parse(TEXT, &ParseContext::bare(&tracker, &events))
            .await
            .unwrap();
        assert_eq!(receipt.store_name, UNKNOWN_STORE);
        assert_eq!(receipt.store_location, "");
        assert!(receipt.recorded_at.is_none());
    }

    #[tokio::test]
    async fn test_total_mismatch_is_warning_only() {
        let reply = r#"{"storeName": "X", "items": [{"name": "A", "price": 50.0}], "totalAmount": 60.0}"#;
        let p = GenerativeParser::new(
            Scripted::new(true, vec![Ok(reply)]),
            ParserConfig {
                normalize: false,
                ..Default::default()
            },
        );
        let tracker = ProgressTracker::noop();
        let events = PipelineEvents::new();

        let receipt = p
            .parse(TEXT, &ParseContext::bare(&tracker, &events))
            .await
            .unwrap();
        assert_eq!(receipt.total_amount, Some(60.0));
        let warnings = events.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind(), "total_mismatch");
    }
}
