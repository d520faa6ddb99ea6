//! Checks shared by every parser: item bounds, total cross-check and
//! date handling.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ParseError, ParsedItem};
use crate::pipeline::PipelineWarning;

/// Exclusive upper bound for any single price or total.
pub const MAX_AMOUNT: f64 = 100_000.0;

pub const DEFAULT_CROSS_CHECK_TOLERANCE: f64 = 0.1;

static RE_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{4})").unwrap());
static RE_TIME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{2}):(\d{2})").unwrap());

pub fn is_valid_amount(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value < MAX_AMOUNT
}

/// Receipt as exchanged with the model, in its JSON shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDraft {
    pub store_name: Option<String>,
    pub store_location: Option<String>,
    pub items: Vec<DraftItem>,
    pub total_amount: Option<f64>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub suggested_expense_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftItem {
    pub name: String,
    pub price: f64,
    pub quantity: Option<f64>,
    pub suggested_item_category: Option<String>,
    pub matched_existing_item: Option<String>,
}

/// Locates the span from the first `{` to the last `}` and parses it.
pub fn extract_json(response: &str) -> Result<Value, ParseError> {
    let start = response.find('{').ok_or(ParseError::NoJson)?;
    let end = response.rfind('}').ok_or(ParseError::NoJson)?;
    if end < start {
        return Err(ParseError::NoJson);
    }
    serde_json::from_str(&response[start..=end]).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

/// Builds a draft from model JSON, dropping items that break the bounds.
///
/// An item survives only with a non-empty name and a numeric price in
/// `(0, 100000)`. A total outside that range is cleared.
pub fn draft_from_json(value: &Value) -> ReceiptDraft {
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(draft_item).collect())
        .unwrap_or_default();

    ReceiptDraft {
        store_name: text_field(value, "storeName"),
        store_location: text_field(value, "storeLocation"),
        items,
        total_amount: value
            .get("totalAmount")
            .and_then(Value::as_f64)
            .filter(|t| is_valid_amount(*t)),
        date: text_field(value, "date"),
        time: text_field(value, "time"),
        suggested_expense_category: text_field(value, "suggestedExpenseCategory"),
    }
}

fn draft_item(value: &Value) -> Option<DraftItem> {
    let name = text_field(value, "name")?;
    let price = value.get("price").and_then(Value::as_f64)?;
    if !is_valid_amount(price) {
        return None;
    }
    Some(DraftItem {
        name,
        price,
        quantity: value
            .get("quantity")
            .and_then(Value::as_f64)
            .filter(|q| q.is_finite() && *q > 0.0),
        suggested_item_category: text_field(value, "suggestedItemCategory"),
        matched_existing_item: text_field(value, "matchedExistingItem"),
    })
}

/// Drops items a rule-based extractor produced out of bounds.
pub fn retain_valid_items(items: Vec<ParsedItem>) -> Vec<ParsedItem> {
    items
        .into_iter()
        .filter(|item| !item.name.trim().is_empty() && is_valid_amount(item.price))
        .map(|mut item| {
            if !(item.quantity.is_finite() && item.quantity > 0.0) {
                item.quantity = 1.0;
            }
            item
        })
        .collect()
}

/// Compares the item sum against the declared total.
///
/// Returns a warning when they differ by more than `tolerance` of the total.
pub fn cross_check(items: &[ParsedItem], total: Option<f64>, tolerance: f64) -> Option<PipelineWarning> {
    let total = total.filter(|t| *t > 0.0)?;
    if items.is_empty() {
        return None;
    }

    let items_total: f64 = items.iter().map(ParsedItem::line_total).sum();
    if (items_total - total).abs() > total * tolerance {
        Some(PipelineWarning::TotalMismatch {
            items_total,
            receipt_total: total,
            tolerance,
        })
    } else {
        None
    }
}

/// Combines `DD/MM/YYYY` and an optional `HH:MM` into a timestamp.
pub fn parse_date_time(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let caps = RE_DATE.captures(date?.trim())?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    let time = time
        .and_then(|t| RE_TIME.captures(t.trim()))
        .and_then(|caps| {
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = caps[2].parse().ok()?;
            NaiveTime::from_hms_opt(hour, minute, 0)
        })
        .unwrap_or(NaiveTime::MIN);

    Some(date.and_time(time))
}

impl ReceiptDraft {
    pub fn parsed_items(&self) -> Vec<ParsedItem> {
        self.items
            .iter()
            .map(|item| ParsedItem {
                name: item.name.clone(),
                price: item.price,
                quantity: item.quantity.unwrap_or(1.0),
                suggested_category: item.suggested_item_category.clone(),
                matched_existing_item: item.matched_existing_item.clone(),
            })
            .collect()
    }
}
