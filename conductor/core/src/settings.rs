//! Settings Store Collaborator
//!
//! Holds user-facing settings the core reads and writes. Only the default model is
//! needed here; persistence mechanics belong to the implementation.

use parking_lot::RwLock;

/// Settings store trait
pub trait SettingsStore: Send + Sync {
    /// Default model id used for default topics
    fn default_model(&self) -> Option<String>;

    /// Change the default model id
    fn set_default_model(&self, model_id: &str);
}

/// In-memory settings
#[derive(Debug, Default)]
pub struct InMemorySettings {
    default_model: RwLock<Option<String>>,
}

impl InMemorySettings {
    /// Create empty settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create settings with a default model
    pub fn with_default_model(model_id: impl Into<String>) -> Self {
        Self {
            default_model: RwLock::new(Some(model_id.into())),
        }
    }
}

impl SettingsStore for InMemorySettings {
    fn default_model(&self) -> Option<String> {
        self.default_model.read().clone()
    }

    fn set_default_model(&self, model_id: &str) {
        *self.default_model.write() = Some(model_id.to_string());
    }
}
