use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::{DomainError, ExpenseCategoryRepository, ItemCategoryRepository, ItemRepository};

/// Maximum number of entries fetched per list.
pub const CONTEXT_LIMIT: usize = 100;

const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub name: String,
    pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextExpenseCategory {
    pub id: String,
    pub name: String,
    pub requires_store: bool,
}

/// Snapshot of what the user already has, used to bias matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReceiptContext {
    pub items: Vec<ContextItem>,
    pub item_categories: Vec<ContextCategory>,
    pub expense_categories: Vec<ContextExpenseCategory>,
}

impl UserReceiptContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.item_categories.is_empty() && self.expense_categories.is_empty()
    }
}

pub struct UserContextFetcher {
    items: Arc<dyn ItemRepository>,
    item_categories: Arc<dyn ItemCategoryRepository>,
    expense_categories: Arc<dyn ExpenseCategoryRepository>,
    limit: usize,
}

impl UserContextFetcher {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        item_categories: Arc<dyn ItemCategoryRepository>,
        expense_categories: Arc<dyn ExpenseCategoryRepository>,
    ) -> Self {
        Self {
            items,
            item_categories,
            expense_categories,
            limit: CONTEXT_LIMIT,
        }
    }

    pub fn from_collaborators(collaborators: &super::Collaborators) -> Self {
        Self::new(
            collaborators.items.clone(),
            collaborators.item_categories.clone(),
            collaborators.expense_categories.clone(),
        )
    }

    /// Builds a fresh snapshot. Lookups run one after another.
    pub async fn fetch(&self, user_id: &str) -> Result<UserReceiptContext, DomainError> {
        let items = self.items.list_for_user(user_id, self.limit).await?;
        let categories = self.item_categories.list_for_user(user_id, self.limit).await?;
        let expense = self
            .expense_categories
            .list_for_user(user_id, self.limit)
            .await?;

        let names: HashMap<&str, &str> = categories
            .iter()
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();

        let items = items
            .iter()
            .take(self.limit)
            .map(|item| ContextItem {
                name: item.name.clone(),
                category_name: item
                    .category_id
                    .as_deref()
                    .and_then(|id| names.get(id))
                    .unwrap_or(&UNCATEGORIZED)
                    .to_string(),
            })
            .collect();

        Ok(UserReceiptContext {
            items,
            item_categories: categories
                .iter()
                .take(self.limit)
                .map(|c| ContextCategory {
                    id: c.id.clone(),
                    name: c.name.clone(),
                })
                .collect(),
            expense_categories: expense
                .into_iter()
                .take(self.limit)
                .map(|c| ContextExpenseCategory {
                    id: c.id,
                    name: c.name,
                    requires_store: c.requires_store,
                })
                .collect(),
        })
    }
}
