use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

use super::context::{ParseContext, PipelineEvents};
use super::error::{PipelineError, PipelineWarning};
use super::progress::ProgressTracker;
use crate::ai::OllamaClient;
use crate::config::Config;
use crate::domain::{Collaborators, UserContextFetcher};
use crate::error::ReceiptError;
use crate::ocr::{build_extractor, TextExtractor};
use crate::parser::{ParsedReceipt, ParserChain};

pub const STAGE_OCR: &str = "ocr";
pub const STAGE_CONTEXT: &str = "context";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedReceipt {
    pub parsed: ParsedReceipt,
    pub extracted_text: String,
    pub confidence: f32,
}

/// OCR, then user context, then the parser chain.
pub struct ReceiptPipeline {
    extractor: Arc<dyn TextExtractor>,
    context: UserContextFetcher,
    parsers: ParserChain,
}

impl ReceiptPipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        context: UserContextFetcher,
        parsers: ParserChain,
    ) -> Self {
        Self {
            extractor,
            context,
            parsers,
        }
    }

    /// The configured OCR engine and completion model with the standard parser chain.
    pub fn from_config(config: &Config, collaborators: &Collaborators) -> Result<Self, ReceiptError> {
        let extractor = build_extractor(&config.ocr)?;
        let completion = Arc::new(OllamaClient::from_config(&config.llm)?);
        Ok(Self::new(
            extractor,
            UserContextFetcher::from_collaborators(collaborators),
            ParserChain::standard(completion, config),
        ))
    }

    pub fn parsers(&self) -> &ParserChain {
        &self.parsers
    }

    pub async fn process(
        &self,
        image: &[u8],
        user_id: Option<&str>,
        tracker: &ProgressTracker,
        events: &PipelineEvents,
    ) -> Result<ProcessedReceipt, PipelineError> {
        tracker.start_stage(STAGE_OCR);
        let extracted = self
            .extractor
            .extract_text(image)
            .instrument(info_span!("ocr", engine = self.extractor.name()))
            .await?;
        tracker.complete_stage(STAGE_OCR);
        info!(
            chars = extracted.text.chars().count(),
            confidence = extracted.confidence,
            "Text extracted"
        );

        let user_context = match user_id {
            Some(user_id) => {
                tracker.start_stage(STAGE_CONTEXT);
                let fetched = self
                    .context
                    .fetch(user_id)
                    .instrument(info_span!("user_context", user_id))
                    .await;
                tracker.complete_stage(STAGE_CONTEXT);
                match fetched {
                    Ok(context) => Some(context),
                    Err(e) => {
                        events.warn(PipelineWarning::ContextUnavailable {
                            error: e.to_string(),
                        });
                        None
                    }
                }
            }
            None => None,
        };

        let ctx = ParseContext {
            user_context: user_context.as_ref(),
            tracker,
            events,
        };
        let parsed = self
            .parsers
            .parse(&extracted.text, &ctx)
            .instrument(info_span!("parse"))
            .await?;

        Ok(ProcessedReceipt {
            parsed,
            extracted_text: extracted.text,
            confidence: extracted.confidence,
        })
    }
}
