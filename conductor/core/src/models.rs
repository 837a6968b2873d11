//! Model Catalog
//!
//! Descriptors for the language models the core can route topics to. The catalog
//! is supplied from outside (settings, a backend's model listing, tests); the core
//! only reads it.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::messages::IdentityId;

/// Description of an available model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier (backend-specific)
    pub id: String,
    /// Human-readable name, also used for the AI participant
    pub display_name: String,
    /// Context window in tokens (if known)
    #[serde(default)]
    pub context_window: Option<usize>,
    /// Synthetic identity bound to the model (if already known)
    #[serde(default)]
    pub identity: Option<IdentityId>,
}

impl ModelDescriptor {
    /// Create a descriptor without a known context window
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            context_window: None,
            identity: None,
        }
    }

    /// Set the context window
    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }
}

/// Source of model descriptors
pub trait ModelCatalog: Send + Sync {
    /// Descriptor for a model id
    fn model(&self, model_id: &str) -> Option<ModelDescriptor>;

    /// All known models
    fn models(&self) -> Vec<ModelDescriptor>;
}

/// Catalog held in memory
#[derive(Debug, Default)]
pub struct StaticModelCatalog {
    models: RwLock<BTreeMap<String, ModelDescriptor>>,
}

impl StaticModelCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog from descriptors
    #[must_use]
    pub fn with_models(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let catalog = Self::new();
        for model in models {
            catalog.insert(model);
        }
        catalog
    }

    /// Add or replace a descriptor
    pub fn insert(&self, model: ModelDescriptor) {
        self.models.write().insert(model.id.clone(), model);
    }
}

impl ModelCatalog for StaticModelCatalog {
    fn model(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.models.read().get(model_id).cloned()
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        self.models.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let catalog = StaticModelCatalog::with_models([
            ModelDescriptor::new("b", "Model B"),
            ModelDescriptor::new("a", "Model A").with_context_window(4096),
        ]);

        assert_eq!(catalog.model("a").unwrap().context_window, Some(4096));
        assert!(catalog.model("missing").is_none());

        let ids: Vec<_> = catalog.models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_insert_replaces() {
        let catalog = StaticModelCatalog::new();
        catalog.insert(ModelDescriptor::new("a", "Old"));
        catalog.insert(ModelDescriptor::new("a", "New"));
        assert_eq!(catalog.model("a").unwrap().display_name, "New");
        assert_eq!(catalog.models().len(), 1);
    }
}
