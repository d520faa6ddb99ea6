use std::sync::LazyLock;

use regex::Regex;

use super::fields::{FirstTextLine, KeywordAmount, LineItems, MatchingLine, NumberStyle};
use super::RuleBasedParser;

static RE_PRICE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+[.,]\d{2}\b").unwrap());
static RE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\d+\s+.*\b(STREET|ST|AVENUE|AVE|ROAD|RD|BOULEVARD|BLVD|LANE|LN|DRIVE|DR|WAY|STRASSE|STR|VIA)\b",
    )
    .unwrap()
});
static RE_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(GRAND TOTAL|TOTAL|AMOUNT DUE|SUM)\b").unwrap());
static RE_TOTAL_EXCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(TAX|VAT)\b").unwrap());
static RE_SKIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(SUB\s*TOTAL|TOTAL|TAX|VAT|CASH|CHANGE|CARD|VISA|BALANCE|AMOUNT|DUE|PAID|PAYMENT|TENDER|DISCOUNT|SUM|TIP)\b",
    )
    .unwrap()
});

/// Fallback parser for any receipt with price-like lines.
pub(super) fn parser() -> RuleBasedParser {
    RuleBasedParser::new(
        "generic",
        Box::new(|text: &str| RE_PRICE_LINE.is_match(text)),
        Box::new(LineItems {
            skip: RE_SKIP.clone(),
            style: NumberStyle::DecimalDot,
        }),
    )
    .with_store_name(Box::new(FirstTextLine { skip: Vec::new() }))
    .with_store_location(Box::new(MatchingLine {
        pattern: RE_ADDRESS.clone(),
    }))
    .with_total(Box::new(KeywordAmount {
        keyword: RE_TOTAL.clone(),
        exclude: Some(RE_TOTAL_EXCLUDE.clone()),
        style: NumberStyle::DecimalDot,
    }))
}
