//! Finance-domain collaborators the pipeline reads from and writes to.
//!
//! Persistence lives outside this crate; these traits are the seam. The
//! in-memory implementation backs tests and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod context;
pub mod memory;

pub use context::{
    ContextCategory, ContextExpenseCategory, ContextItem, UserContextFetcher, UserReceiptContext,
};
pub use memory::InMemoryFinanceStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreItem {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseCategory {
    pub id: String,
    pub name: String,
    pub requires_store: bool,
}

/// An item the user has recorded before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserItem {
    pub id: String,
    pub name: String,
    pub category_id: Option<String>,
}

#[async_trait]
pub trait StoreDirectory: Send + Sync {
    /// Best fuzzy match for a store name, if any is close enough.
    async fn find_by_similarity(&self, name: &str) -> Result<Option<Store>, DomainError>;
}

#[async_trait]
pub trait StoreItemRepository: Send + Sync {
    async fn find_by_store_and_name(
        &self,
        store_id: &str,
        name: &str,
    ) -> Result<Option<StoreItem>, DomainError>;
}

#[async_trait]
pub trait ItemCategoryRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<ItemCategory>, DomainError>;
    async fn create(&self, name: &str) -> Result<ItemCategory, DomainError>;
    async fn link_to_user(&self, user_id: &str, category_id: &str) -> Result<(), DomainError>;
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ItemCategory>, DomainError>;
}

#[async_trait]
pub trait ExpenseCategoryRepository: Send + Sync {
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExpenseCategory>, DomainError>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn list_for_user(&self, user_id: &str, limit: usize)
        -> Result<Vec<UserItem>, DomainError>;
}

/// The full set of collaborators a pipeline needs.
#[derive(Clone)]
pub struct Collaborators {
    pub stores: Arc<dyn StoreDirectory>,
    pub store_items: Arc<dyn StoreItemRepository>,
    pub item_categories: Arc<dyn ItemCategoryRepository>,
    pub expense_categories: Arc<dyn ExpenseCategoryRepository>,
    pub items: Arc<dyn ItemRepository>,
}

impl Collaborators {
    /// Uses one backend for every role.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: StoreDirectory
            + StoreItemRepository
            + ItemCategoryRepository
            + ExpenseCategoryRepository
            + ItemRepository
            + 'static,
    {
        Self {
            stores: store.clone(),
            store_items: store.clone(),
            item_categories: store.clone(),
            expense_categories: store.clone(),
            items: store,
        }
    }
}
