//! Builders and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use fynans_receipt::config::{Config, QueueStoreKind};
use fynans_receipt::InMemoryFinanceStore;

pub const USER: &str = "user-1";

pub const ALBANIAN_RECEIPT: &str = "\
SPAR ALBANIA
Rruga Myslym Shyri, Tiranë
NIPT K12345678L
Data 15.04.2026 Ora 14:30
BUKE 80 LEK
QUMESHT 2 x 150 LEK
TVSH 20% 63
TOTALI 380 LEK
";

pub const LLM_EXTRACT_REPLY: &str = r#"Sure, here is the receipt:
{
  "storeName": "Spar Albania",
  "storeLocation": "Rruga Myslym Shyri",
  "items": [
    {"name": "Buke", "price": 80, "quantity": 1, "suggestedItemCategory": "Bakery"},
    {"name": "Qumesht", "price": 150, "quantity": 2, "suggestedItemCategory": "Dairy"}
  ],
  "totalAmount": 380,
  "date": "15/04/2026",
  "time": "14:30",
  "suggestedExpenseCategory": "groceries"
}"#;

pub const LLM_NORMALIZE_REPLY: &str = r#"{
  "storeName": "SPAR Albania",
  "storeLocation": "Rruga Myslym Shyri",
  "items": [
    {"name": "Bukë", "price": 80, "quantity": 1, "suggestedItemCategory": "Bakery"},
    {"name": "Qumësht", "price": 150, "quantity": 2, "suggestedItemCategory": "Dairy"}
  ],
  "totalAmount": 380,
  "date": "15/04/2026",
  "time": "14:30",
  "suggestedExpenseCategory": "groceries"
}"#;

/// Builder for `Config` values tuned for fast tests.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.queue.backoff_base_ms = 10;
        config.worker.count = 2;
        config.worker.poll_interval_ms = 25;
        Self { config }
    }

    pub fn sqlite(mut self, path: &str) -> Self {
        self.config.queue.store = QueueStoreKind::Sqlite;
        self.config.queue.database_path = Some(path.to_string());
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.queue.max_attempts = attempts;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.worker.count = count;
        self
    }

    pub fn normalize(mut self, enabled: bool) -> Self {
        self.config.parser.normalize = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.config).expect("Failed to serialize config")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A finance store holding the SPAR store, one known item and the
/// user's categories.
pub fn seeded_store() -> Arc<InMemoryFinanceStore> {
    let store = InMemoryFinanceStore::new();
    let spar = store.add_store("SPAR Albania", "Rruga Myslym Shyri, Tiranë");
    let dairy = store.add_item_category("Dairy");
    store.link_category(USER, &dairy.id);
    store.add_store_item(&spar.id, "Qumësht", Some(&dairy.id));
    store.add_user_item(USER, "Qumësht", Some(&dairy.id));
    store.add_expense_category(USER, "Groceries", true);
    Arc::new(store)
}
