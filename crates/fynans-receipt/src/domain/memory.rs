use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    DomainError, ExpenseCategory, ExpenseCategoryRepository, ItemCategory, ItemCategoryRepository,
    ItemRepository, Store, StoreDirectory, StoreItem, StoreItemRepository, UserItem,
};

/// Minimum trigram similarity for a store name to count as a match.
pub const STORE_SIMILARITY_THRESHOLD: f64 = 0.3;

#[derive(Default)]
struct Inner {
    stores: Vec<Store>,
    store_items: Vec<StoreItem>,
    item_categories: Vec<ItemCategory>,
    category_links: HashSet<(String, String)>,
    expense_categories: HashMap<String, Vec<ExpenseCategory>>,
    items: HashMap<String, Vec<UserItem>>,
    failures: HashSet<String>,
}

/// Process-local finance data with optional failure injection.
#[derive(Default)]
pub struct InMemoryFinanceStore {
    inner: RwLock<Inner>,
}

impl InMemoryFinanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            log::warn!("Finance store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            log::warn!("Finance store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn add_store(&self, name: &str, location: &str) -> Store {
        let store = Store {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            location: location.to_string(),
        };
        self.write().stores.push(store.clone());
        store
    }

    pub fn add_store_item(&self, store_id: &str, name: &str, category_id: Option<&str>) -> StoreItem {
        let item = StoreItem {
            id: uuid::Uuid::new_v4().to_string(),
            store_id: store_id.to_string(),
            name: name.to_string(),
            category_id: category_id.map(str::to_string),
        };
        self.write().store_items.push(item.clone());
        item
    }

    pub fn add_item_category(&self, name: &str) -> ItemCategory {
        let category = ItemCategory {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        self.write().item_categories.push(category.clone());
        category
    }

    pub fn link_category(&self, user_id: &str, category_id: &str) {
        self.write()
            .category_links
            .insert((user_id.to_string(), category_id.to_string()));
    }

    pub fn add_expense_category(&self, user_id: &str, name: &str, requires_store: bool) -> ExpenseCategory {
        let category = ExpenseCategory {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            requires_store,
        };
        self.write()
            .expense_categories
            .entry(user_id.to_string())
            .or_default()
            .push(category.clone());
        category
    }

    pub fn add_user_item(&self, user_id: &str, name: &str, category_id: Option<&str>) -> UserItem {
        let item = UserItem {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            category_id: category_id.map(str::to_string),
        };
        self.write()
            .items
            .entry(user_id.to_string())
            .or_default()
            .push(item.clone());
        item
    }

    /// Makes an operation fail. `op` is either a bare operation name such as
    /// `item_categories.create` or one scoped to a subject, `item_categories.create:Snacks`.
    pub fn fail_on(&self, op: &str) {
        self.write().failures.insert(op.to_string());
    }

    pub fn item_category_names(&self) -> Vec<String> {
        self.read()
            .item_categories
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_linked(&self, user_id: &str, category_id: &str) -> bool {
        self.read()
            .category_links
            .contains(&(user_id.to_string(), category_id.to_string()))
    }

    fn check(&self, op: &str, subject: &str) -> Result<(), DomainError> {
        let inner = self.read();
        if inner.failures.contains(op) || inner.failures.contains(&format!("{}:{}", op, subject)) {
            return Err(DomainError::Backend(format!("{} failed for '{}'", op, subject)));
        }
        Ok(())
    }
}

fn trigrams(value: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    let normalized = value.to_lowercase();
    for word in normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Trigram similarity in [0, 1], the shared-over-union ratio.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let union = left.union(&right).count() as f64;
    shared / union
}

#[async_trait]
impl StoreDirectory for InMemoryFinanceStore {
    async fn find_by_similarity(&self, name: &str) -> Result<Option<Store>, DomainError> {
        self.check("stores.similarity", name)?;
        let inner = self.read();
        let best = inner
            .stores
            .iter()
            .map(|store| (similarity(&store.name, name), store))
            .filter(|(score, _)| *score >= STORE_SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, store)| store.clone());
        Ok(best)
    }
}

#[async_trait]
impl StoreItemRepository for InMemoryFinanceStore {
    async fn find_by_store_and_name(
        &self,
        store_id: &str,
        name: &str,
    ) -> Result<Option<StoreItem>, DomainError> {
        self.check("store_items.find", name)?;
        let needle = name.trim().to_lowercase();
        Ok(self
            .read()
            .store_items
            .iter()
            .find(|item| item.store_id == store_id && item.name.to_lowercase() == needle)
            .cloned())
    }
}

#[async_trait]
impl ItemCategoryRepository for InMemoryFinanceStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<ItemCategory>, DomainError> {
        self.check("item_categories.find", name)?;
        Ok(self
            .read()
            .item_categories
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn create(&self, name: &str) -> Result<ItemCategory, DomainError> {
        self.check("item_categories.create", name)?;
        if self.read().item_categories.iter().any(|c| c.name == name) {
            return Err(DomainError::Conflict(format!(
                "item category '{}' already exists",
                name
            )));
        }
        Ok(self.add_item_category(name))
    }

    async fn link_to_user(&self, user_id: &str, category_id: &str) -> Result<(), DomainError> {
        self.check("item_categories.link", category_id)?;
        self.link_category(user_id, category_id);
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ItemCategory>, DomainError> {
        self.check("item_categories.list", user_id)?;
        let inner = self.read();
        Ok(inner
            .item_categories
            .iter()
            .filter(|c| {
                inner
                    .category_links
                    .contains(&(user_id.to_string(), c.id.clone()))
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExpenseCategoryRepository for InMemoryFinanceStore {
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExpenseCategory>, DomainError> {
        self.check("expense_categories.list", user_id)?;
        Ok(self
            .read()
            .expense_categories
            .get(user_id)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ItemRepository for InMemoryFinanceStore {
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<UserItem>, DomainError> {
        self.check("items.list", user_id)?;
        Ok(self
            .read()
            .items
            .get(user_id)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
