//! Receipt text parsers and the fallback chain that runs them.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::CompletionError;
use crate::pipeline::ParseContext;

pub mod chain;
pub mod llm;
pub mod prompt;
pub mod rules;
pub mod validate;

pub use chain::ParserChain;
pub use llm::GenerativeParser;
pub use rules::RuleBasedParser;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("No JSON found in LLM response")]
    NoJson,

    #[error("Failed to parse JSON from LLM response: {0}")]
    InvalidJson(String),

    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("No line items found in receipt text")]
    NoItems,

    #[error("No suitable parser found for receipt")]
    NoSuitableParser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedItem {
    pub name: String,
    pub price: f64,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_existing_item: Option<String>,
}

impl ParsedItem {
    pub fn new(name: impl Into<String>, price: f64, quantity: f64) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
            suggested_category: None,
            matched_existing_item: None,
        }
    }

    pub fn line_total(&self) -> f64 {
        self.price * self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReceipt {
    pub store_name: String,
    pub store_location: String,
    pub items: Vec<ParsedItem>,
    pub total_amount: Option<f64>,
    /// `DD/MM/YYYY`
    pub date: Option<String>,
    /// `HH:MM`
    pub time: Option<String>,
    pub recorded_at: Option<NaiveDateTime>,
    pub suggested_expense_category: Option<String>,
    pub parser_used: String,
}

#[async_trait]
pub trait ReceiptParser: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap eligibility check run before `parse`.
    fn can_handle(&self, text: &str) -> bool;

    async fn parse(&self, text: &str, ctx: &ParseContext<'_>) -> Result<ParsedReceipt, ParseError>;
}
