use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] crate::error::ExtractionError),

    #[error(transparent)]
    Parse(#[from] crate::parser::ParseError),

    #[error("Invalid image payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Non-fatal issues collected while a receipt is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    ContextUnavailable { error: String },
    ParserFailed { parser: String, error: String },
    TotalMismatch { items_total: f64, receipt_total: f64, tolerance: f64 },
    NormalizeFailed { error: String },
    StoreLookupFailed { store: String, error: String },
    CategoryFailed { name: String, error: String },
    ExpenseCategoryLookupFailed { error: String },
    ItemLookupFailed { item: String, error: String },
}

impl PipelineWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineWarning::ContextUnavailable { .. } => "context_unavailable",
            PipelineWarning::ParserFailed { .. } => "parser_failed",
            PipelineWarning::TotalMismatch { .. } => "total_mismatch",
            PipelineWarning::NormalizeFailed { .. } => "normalize_failed",
            PipelineWarning::StoreLookupFailed { .. } => "store_lookup_failed",
            PipelineWarning::CategoryFailed { .. } => "category_failed",
            PipelineWarning::ExpenseCategoryLookupFailed { .. } => "expense_category_lookup_failed",
            PipelineWarning::ItemLookupFailed { .. } => "item_lookup_failed",
        }
    }
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::ContextUnavailable { error } => {
                write!(f, "Failed to fetch user context, continuing without it: {}", error)
            }
            PipelineWarning::ParserFailed { parser, error } => {
                write!(f, "Parser '{}' failed, trying next: {}", parser, error)
            }
            PipelineWarning::TotalMismatch {
                items_total,
                receipt_total,
                tolerance,
            } => write!(
                f,
                "Items total ({:.2}) differs from receipt total ({:.2}) by more than {}%",
                items_total,
                receipt_total,
                (tolerance * 100.0).round()
            ),
            PipelineWarning::NormalizeFailed { error } => {
                write!(f, "Normalization failed, using first-pass result: {}", error)
            }
            PipelineWarning::StoreLookupFailed { store, error } => {
                write!(f, "Store lookup for '{}' failed: {}", store, error)
            }
            PipelineWarning::CategoryFailed { name, error } => {
                write!(f, "Failed to auto-create item category '{}': {}", name, error)
            }
            PipelineWarning::ExpenseCategoryLookupFailed { error } => {
                write!(f, "Expense category lookup failed: {}", error)
            }
            PipelineWarning::ItemLookupFailed { item, error } => {
                write!(f, "Store item lookup for '{}' failed: {}", item, error)
            }
        }
    }
}
