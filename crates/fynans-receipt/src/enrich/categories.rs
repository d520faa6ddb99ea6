use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{DomainError, ItemCategoryRepository};
use crate::pipeline::{PipelineEvents, PipelineWarning};

/// Ensures each suggested item category exists and is linked to the user.
pub struct CategoryResolver {
    repository: Arc<dyn ItemCategoryRepository>,
}

impl CategoryResolver {
    pub fn new(repository: Arc<dyn ItemCategoryRepository>) -> Self {
        Self { repository }
    }

    /// Returns a name → id map for every name that resolved.
    pub async fn resolve(
        &self,
        names: &[&str],
        user_id: &str,
        events: &PipelineEvents,
    ) -> HashMap<String, String> {
        let mut seen = HashSet::new();
        let mut resolved = HashMap::new();

        for &raw in names {
            let name = raw.trim();
            if name.is_empty() || !seen.insert(name) {
                continue;
            }
            match self.resolve_one(name, user_id).await {
                Ok(id) => {
                    resolved.insert(name.to_string(), id);
                }
                Err(e) => events.warn(PipelineWarning::CategoryFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        resolved
    }

    async fn resolve_one(&self, name: &str, user_id: &str) -> Result<String, DomainError> {
        let category = match self.repository.find_by_name(name).await? {
            Some(existing) => {
                debug!(category = name, "Item category exists");
                existing
            }
            None => {
                let created = self.repository.create(name).await?;
                info!(category = name, id = %created.id, "Auto-created item category");
                created
            }
        };

        if let Err(e) = self.repository.link_to_user(user_id, &category.id).await {
            warn!(category = name, error = %e, "Failed to link item category to user");
        }

        Ok(category.id)
    }
}
