//! LLM Backend Integration
//!
//! Abstracted access to inference backends through a common trait, plus a registry
//! that maps model ids to the backend serving them.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use topic_conductor::backend::{BackendRegistry, OllamaBackend};
//!
//! let registry = BackendRegistry::new();
//! registry.set_fallback(Arc::new(OllamaBackend::from_env()));
//! let backend = registry.backend_for("llama3.2").unwrap();
//! ```

mod ollama;
mod traits;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

pub use ollama::OllamaBackend;
pub use traits::{LlmBackend, LlmRequest, ModelInfo, StreamingToken};

/// Model id -> backend routing table
///
/// Zero or more backends may be registered per model id; a fallback backend serves
/// every model without an explicit entry.
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<dyn LlmBackend>>,
    fallback: RwLock<Option<Arc<dyn LlmBackend>>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("models", &self.backends.len())
            .field("has_fallback", &self.fallback.read().is_some())
            .finish()
    }
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry where every model is served by one backend
    #[must_use]
    pub fn with_fallback(backend: Arc<dyn LlmBackend>) -> Self {
        let registry = Self::new();
        registry.set_fallback(backend);
        registry
    }

    /// Serve a specific model with a backend
    pub fn register(&self, model_id: impl Into<String>, backend: Arc<dyn LlmBackend>) {
        let model_id = model_id.into();
        tracing::debug!(model_id = %model_id, backend = backend.name(), "Registered backend");
        self.backends.insert(model_id, backend);
    }

    /// Set the backend used for models without an explicit entry
    pub fn set_fallback(&self, backend: Arc<dyn LlmBackend>) {
        *self.fallback.write() = Some(backend);
    }

    /// Backend serving a model
    #[must_use]
    pub fn backend_for(&self, model_id: &str) -> Option<Arc<dyn LlmBackend>> {
        self.backends
            .get(model_id)
            .map(|b| Arc::clone(b.value()))
            .or_else(|| self.fallback.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_routing() {
        let registry = BackendRegistry::new();
        assert!(registry.backend_for("llama3.2").is_none());

        registry.set_fallback(Arc::new(OllamaBackend::default()));
        assert!(registry.backend_for("anything").is_some());

        registry.register("remote", Arc::new(OllamaBackend::new("example.com", 8080)));
        assert_eq!(registry.backend_for("remote").unwrap().name(), "Ollama");
    }
}
