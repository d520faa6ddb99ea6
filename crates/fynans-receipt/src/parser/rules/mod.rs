//! Deterministic parsers assembled from per-field extractors.

use async_trait::async_trait;

use super::llm::UNKNOWN_STORE;
use super::validate::{self, DEFAULT_CROSS_CHECK_TOLERANCE};
use super::{ParseError, ParsedItem, ParsedReceipt, ReceiptParser};
use crate::pipeline::ParseContext;

mod albanian;
pub mod fields;
mod generic;

/// Pulls one field out of a receipt's trimmed, non-empty lines.
pub trait FieldExtractor<T>: Send + Sync {
    fn extract(&self, lines: &[&str]) -> Option<T>;
}

impl<T, F> FieldExtractor<T> for F
where
    F: Fn(&[&str]) -> Option<T> + Send + Sync,
{
    fn extract(&self, lines: &[&str]) -> Option<T> {
        self(lines)
    }
}

pub type Detector = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct RuleBasedParser {
    name: String,
    detector: Detector,
    store_name: Box<dyn FieldExtractor<String>>,
    store_location: Box<dyn FieldExtractor<String>>,
    date: Box<dyn FieldExtractor<String>>,
    time: Box<dyn FieldExtractor<String>>,
    items: Box<dyn FieldExtractor<Vec<ParsedItem>>>,
    total: Box<dyn FieldExtractor<f64>>,
    tolerance: f64,
}

impl RuleBasedParser {
    /// A parser with no-op extractors for every field but `items`.
    pub fn new(
        name: impl Into<String>,
        detector: Detector,
        items: Box<dyn FieldExtractor<Vec<ParsedItem>>>,
    ) -> Self {
        Self {
            name: name.into(),
            detector,
            store_name: Box::new(|_: &[&str]| None::<String>),
            store_location: Box::new(|_: &[&str]| None::<String>),
            date: Box::new(fields::DateField),
            time: Box::new(fields::TimeField),
            items,
            total: Box::new(|_: &[&str]| None::<f64>),
            tolerance: DEFAULT_CROSS_CHECK_TOLERANCE,
        }
    }

    pub fn albanian() -> Self {
        albanian::parser()
    }

    pub fn generic() -> Self {
        generic::parser()
    }

    pub fn with_store_name(mut self, extractor: Box<dyn FieldExtractor<String>>) -> Self {
        self.store_name = extractor;
        self
    }

    pub fn with_store_location(mut self, extractor: Box<dyn FieldExtractor<String>>) -> Self {
        self.store_location = extractor;
        self
    }

    pub fn with_date(mut self, extractor: Box<dyn FieldExtractor<String>>) -> Self {
        self.date = extractor;
        self
    }

    pub fn with_time(mut self, extractor: Box<dyn FieldExtractor<String>>) -> Self {
        self.time = extractor;
        self
    }

    pub fn with_items(mut self, extractor: Box<dyn FieldExtractor<Vec<ParsedItem>>>) -> Self {
        self.items = extractor;
        self
    }

    pub fn with_total(mut self, extractor: Box<dyn FieldExtractor<f64>>) -> Self {
        self.total = extractor;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[async_trait]
impl ReceiptParser for RuleBasedParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, text: &str) -> bool {
        (self.detector)(text)
    }

    async fn parse(&self, text: &str, ctx: &ParseContext<'_>) -> Result<ParsedReceipt, ParseError> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let items = validate::retain_valid_items(self.items.extract(&lines).unwrap_or_default());
        if items.is_empty() {
            return Err(ParseError::NoItems);
        }

        let total_amount = self
            .total
            .extract(&lines)
            .filter(|t| validate::is_valid_amount(*t));
        if let Some(warning) = validate::cross_check(&items, total_amount, self.tolerance) {
            ctx.events.warn(warning);
        }

        let date = self.date.extract(&lines);
        let time = self.time.extract(&lines);
        let recorded_at = validate::parse_date_time(date.as_deref(), time.as_deref());

        Ok(ParsedReceipt {
            store_name: self
                .store_name
                .extract(&lines)
                .unwrap_or_else(|| UNKNOWN_STORE.to_string()),
            store_location: self.store_location.extract(&lines).unwrap_or_default(),
            items,
            total_amount,
            date,
            time,
            recorded_at,
            suggested_expense_category: None,
            parser_used: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineEvents, PipelineWarning, ProgressTracker};

    const ALBANIAN: &str = "\
SPAR ALBANIA
Rruga Myslym Shyri, Tiranë
NIPT K12345678L
Data 15.04.2026 Ora 14:30
BUKE 80 LEK
QUMESHT 2 x 150 LEK
TVSH 20% 63
TOTALI 380 LEK
";

    const GENERIC: &str = "\
CORNER MARKET
123 Main Street
2026-04-15 09:05:44
Bread 2.50
Milk 2 x 1.25
Tax 0.40
TOTAL 5.00
Cash 10.00
";

    async fn run(parser: &RuleBasedParser, text: &str) -> (Result<ParsedReceipt, ParseError>, Vec<PipelineWarning>) {
        let tracker = ProgressTracker::noop();
        let events = PipelineEvents::new();
        let result = parser.parse(text, &ParseContext::bare(&tracker, &events)).await;
        (result, events.warnings())
    }

    // ── Albanian ──

    #[test]
    fn test_albanian_detects_fiscal_markers() {
        let parser = RuleBasedParser::albanian();
        assert!(parser.can_handle(ALBANIAN));
        assert!(parser.can_handle("fature tatimore"));
        assert!(!parser.can_handle(GENERIC));
    }

    #[tokio::test]
    async fn test_albanian_parses_receipt() {
        let (result, warnings) = run(&RuleBasedParser::albanian(), ALBANIAN).await;
        let receipt = result.unwrap();

        assert_eq!(receipt.parser_used, "albanian");
        assert_eq!(receipt.store_name, "SPAR ALBANIA");
        assert_eq!(receipt.store_location, "Rruga Myslym Shyri, Tiranë");
        assert_eq!(
            receipt.items,
            vec![
                ParsedItem::new("BUKE", 80.0, 1.0),
                ParsedItem::new("QUMESHT", 150.0, 2.0),
            ]
        );
        assert_eq!(receipt.total_amount, Some(380.0));
        assert_eq!(receipt.date.as_deref(), Some("15/04/2026"));
        assert_eq!(receipt.time.as_deref(), Some("14:30"));
        assert_eq!(
            receipt.recorded_at.map(|t| t.to_string()).as_deref(),
            Some("2026-04-15 14:30:00")
        );
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_albanian_without_items_errors() {
        let (result, _) = run(&RuleBasedParser::albanian(), "NIPT K123\nTOTALI 100").await;
        assert!(matches!(result, Err(ParseError::NoItems)));
    }

    // ── Generic ──

    #[test]
    fn test_generic_needs_price_line() {
        let parser = RuleBasedParser::generic();
        assert!(parser.can_handle(GENERIC));
        assert!(!parser.can_handle("just words\nno prices"));
    }

    #[tokio::test]
    async fn test_generic_parses_receipt() {
        let (result, warnings) = run(&RuleBasedParser::generic(), GENERIC).await;
        let receipt = result.unwrap();

        assert_eq!(receipt.parser_used, "generic");
        assert_eq!(receipt.store_name, "CORNER MARKET");
        assert_eq!(receipt.store_location, "123 Main Street");
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.items[1], ParsedItem::new("Milk", 1.25, 2.0));
        assert_eq!(receipt.total_amount, Some(5.0));
        assert_eq!(receipt.date.as_deref(), Some("15/04/2026"));
        assert_eq!(receipt.time.as_deref(), Some("09:05"));
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_generic_total_mismatch_warns() {
        let text = "SHOP\nBread 2.50\nTOTAL 50.00";
        let (result, warnings) = run(&RuleBasedParser::generic(), text).await;

        assert!(result.is_ok());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind(), "total_mismatch");
    }

    // ── Extractor swapping ──

    #[tokio::test]
    async fn test_custom_extractors() {
        let parser = RuleBasedParser::new(
            "fixed",
            Box::new(|_: &str| true),
            Box::new(|_: &[&str]| Some(vec![ParsedItem::new("Thing", 3.0, 1.0)])),
        )
        .with_store_name(Box::new(|lines: &[&str]| lines.last().map(|l| l.to_string())));

        let (result, _) = run(&parser, "first\nlast").await;
        let receipt = result.unwrap();
        assert_eq!(receipt.store_name, "last");
        assert_eq!(receipt.store_location, "");
        assert_eq!(receipt.total_amount, None);
    }

    #[tokio::test]
    async fn test_missing_store_defaults() {
        let parser = RuleBasedParser::new(
            "fixed",
            Box::new(|_: &str| true),
            Box::new(|_: &[&str]| Some(vec![ParsedItem::new("Thing", 3.0, 1.0)])),
        );
        let (result, _) = run(&parser, "x").await;
        assert_eq!(result.unwrap().store_name, UNKNOWN_STORE);
    }
}
