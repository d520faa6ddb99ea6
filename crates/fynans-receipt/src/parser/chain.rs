use std::sync::Arc;

use tracing::{debug, info};

use super::{GenerativeParser, ParseError, ParsedReceipt, ReceiptParser, RuleBasedParser};
use crate::ai::CompletionService;
use crate::config::Config;
use crate::pipeline::{ParseContext, PipelineWarning};

/// Ordered fallback over registered parsers.
#[derive(Default)]
pub struct ParserChain {
    parsers: Vec<Box<dyn ReceiptParser>>,
}

impl ParserChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// `llm`, then `albanian`, then `generic`.
    pub fn standard(completion: Arc<dyn CompletionService>, config: &Config) -> Self {
        let tolerance = config.parser.cross_check_tolerance;
        let mut chain = Self::new();
        chain.register(Box::new(
            GenerativeParser::new(completion, config.parser.clone())
                .with_temperature(config.llm.temperature),
        ));
        chain.register(Box::new(RuleBasedParser::albanian().with_tolerance(tolerance)));
        chain.register(Box::new(RuleBasedParser::generic().with_tolerance(tolerance)));
        chain
    }

    pub fn register(&mut self, parser: Box<dyn ReceiptParser>) {
        self.parsers.push(parser);
    }

    pub fn parser_names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub async fn parse(&self, text: &str, ctx: &ParseContext<'_>) -> Result<ParsedReceipt, ParseError> {
        for parser in &self.parsers {
            if !parser.can_handle(text) {
                debug!(parser = parser.name(), "Parser declined receipt");
                continue;
            }

            match parser.parse(text, ctx).await {
                Ok(receipt) => {
                    info!(
                        parser = parser.name(),
                        items = receipt.items.len(),
                        "Receipt parsed"
                    );
                    return Ok(receipt);
                }
                Err(e) => ctx.events.warn(PipelineWarning::ParserFailed {
                    parser: parser.name().to_string(),
                    error: e.to_string(),
                }),
            }
        }

        Err(ParseError::NoSuitableParser)
    }
}
