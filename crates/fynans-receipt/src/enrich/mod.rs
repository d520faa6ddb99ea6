//! Resolves parsed receipt data against the user's stored finance data.
//!
//! Every lookup is best-effort: failures become warnings and the receipt
//! is returned with whatever could be resolved.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    Collaborators, ExpenseCategoryRepository, Store, StoreDirectory, StoreItemRepository,
};
use crate::parser::ParsedItem;
use crate::pipeline::{PipelineEvents, PipelineWarning, ProcessedReceipt};

mod categories;

pub use categories::CategoryResolver;

pub const STAGE_ENRICH: &str = "enrich";

const EXPENSE_CATEGORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStore {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_item_id: Option<String>,
    pub name: String,
    pub price: f64,
    pub quantity: f64,
    /// Category name the parser proposed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_category: Option<String>,
    /// Known item name the parser matched this line to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_existing_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_item_category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedExpenseCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedReceipt {
    pub store: ResolvedStore,
    pub items: Vec<EnrichedItem>,
    pub total_amount: Option<f64>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub recorded_at: Option<NaiveDateTime>,
    pub extracted_text: String,
    pub confidence: f32,
    pub parser_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_expense_category: Option<SuggestedExpenseCategory>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

pub struct ReceiptEnricher {
    stores: Arc<dyn StoreDirectory>,
    store_items: Arc<dyn StoreItemRepository>,
    expense_categories: Arc<dyn ExpenseCategoryRepository>,
    categories: CategoryResolver,
}

impl ReceiptEnricher {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            stores: collaborators.stores.clone(),
            store_items: collaborators.store_items.clone(),
            expense_categories: collaborators.expense_categories.clone(),
            categories: CategoryResolver::new(collaborators.item_categories.clone()),
        }
    }

    pub async fn enrich(
        &self,
        processed: ProcessedReceipt,
        user_id: Option<&str>,
        events: &PipelineEvents,
    ) -> EnrichedReceipt {
        let parsed = processed.parsed;
        let matched_store = self.find_store(&parsed.store_name, events).await;

        let category_ids = match user_id {
            Some(user_id) if parsed.items.iter().any(|i| i.suggested_category.is_some()) => {
                let names: Vec<&str> = parsed
                    .items
                    .iter()
                    .filter_map(|i| i.suggested_category.as_deref())
                    .collect();
                self.categories.resolve(&names, user_id, events).await
            }
            _ => HashMap::new(),
        };

        let suggested_expense_category = match (user_id, parsed.suggested_expense_category.as_deref()) {
            (Some(user_id), Some(suggestion)) => {
                self.match_expense_category(user_id, suggestion, events).await
            }
            _ => None,
        };

        let mut items = Vec::with_capacity(parsed.items.len());
        for item in &parsed.items {
            items.push(
                self.enrich_item(item, matched_store.as_ref(), &category_ids, events)
                    .await,
            );
        }

        let store = match matched_store {
            Some(store) => ResolvedStore {
                id: Some(store.id),
                name: store.name,
                location: store.location,
            },
            None => ResolvedStore {
                id: None,
                name: parsed.store_name,
                location: parsed.store_location,
            },
        };

        EnrichedReceipt {
            store,
            items,
            total_amount: parsed.total_amount,
            date: parsed.date,
            time: parsed.time,
            recorded_at: parsed.recorded_at,
            extracted_text: processed.extracted_text,
            confidence: processed.confidence,
            parser_used: parsed.parser_used,
            suggested_expense_category,
            warnings: events.warnings().iter().map(ToString::to_string).collect(),
        }
    }

    async fn find_store(&self, name: &str, events: &PipelineEvents) -> Option<Store> {
        match self.stores.find_by_similarity(name).await {
            Ok(found) => {
                debug!(store = name, matched = found.is_some(), "Store lookup finished");
                found
            }
            Err(e) => {
                events.warn(PipelineWarning::StoreLookupFailed {
                    store: name.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    async fn match_expense_category(
        &self,
        user_id: &str,
        suggestion: &str,
        events: &PipelineEvents,
    ) -> Option<SuggestedExpenseCategory> {
        let categories = match self
            .expense_categories
            .list_for_user(user_id, EXPENSE_CATEGORY_LIMIT)
            .await
        {
            Ok(categories) => categories,
            Err(e) => {
                events.warn(PipelineWarning::ExpenseCategoryLookupFailed {
                    error: e.to_string(),
                });
                return None;
            }
        };

        let suggestion = suggestion.trim().to_lowercase();
        categories
            .into_iter()
            .find(|c| c.name.to_lowercase() == suggestion)
            .map(|c| SuggestedExpenseCategory {
                id: c.id,
                name: c.name,
            })
    }

    async fn enrich_item(
        &self,
        item: &ParsedItem,
        store: Option<&Store>,
        category_ids: &HashMap<String, String>,
        events: &PipelineEvents,
    ) -> EnrichedItem {
        let existing = match store {
            Some(store) => {
                let lookup = item.matched_existing_item.as_deref().unwrap_or(&item.name);
                match self.store_items.find_by_store_and_name(&store.id, lookup).await {
                    Ok(found) => found,
                    Err(e) => {
                        events.warn(PipelineWarning::ItemLookupFailed {
                            item: item.name.clone(),
                            error: e.to_string(),
                        });
                        None
                    }
                }
            }
            None => None,
        };

        let (existing_item_id, category_id) = match existing {
            Some(found) => (Some(found.id), found.category_id),
            None => (None, None),
        };

        EnrichedItem {
            existing_item_id,
            name: item.name.clone(),
            price: item.price,
            quantity: item.quantity,
            suggested_category: item.suggested_category.clone(),
            matched_existing_item: item.matched_existing_item.clone(),
            category_id,
            suggested_item_category_id: item
                .suggested_category
                .as_deref()
                .and_then(|name| category_ids.get(name.trim()).cloned()),
        }
    }
}
