//! Contact Provisioning
//!
//! Ensures every distinct model has exactly one synthetic participant identity so
//! generated messages can be attributed like any other sender.
//!
//! # Concurrency
//!
//! Each model id maps to a shared `OnceCell`. The first caller runs provisioning
//! inside the cell; concurrent callers for the same model await that same cell and
//! observe its result. A failed attempt leaves the cell empty, so a later call can
//! try again. Different models never contend with each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::{OrchestratorError, Result};
use crate::identity::{IdentityProvisioner, IdentitySeed};
use crate::messages::IdentityId;
use crate::models::{ModelCatalog, ModelDescriptor};

/// Memoizing provisioner of synthetic AI identities
pub struct ContactProvisioner {
    provisioner: Arc<dyn IdentityProvisioner>,
    /// Display names for new identities
    catalog: Option<Arc<dyn ModelCatalog>>,
    /// model id -> in-flight or completed identity
    cells: DashMap<String, Arc<OnceCell<IdentityId>>>,
    /// identity -> model id (reverse lookup, filled when a cell completes)
    reverse: DashMap<IdentityId, String>,
}

impl std::fmt::Debug for ContactProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactProvisioner")
            .field("identities", &self.reverse.len())
            .finish_non_exhaustive()
    }
}

impl ContactProvisioner {
    /// Create a provisioner backed by the identity collaborator
    #[must_use]
    pub fn new(provisioner: Arc<dyn IdentityProvisioner>) -> Self {
        Self {
            provisioner,
            catalog: None,
            cells: DashMap::new(),
            reverse: DashMap::new(),
        }
    }

    /// Name new identities after the catalog's display names
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Get or create the identity for a model, named after its catalog entry
    ///
    /// Models missing from the catalog are named by their id.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ensure_identity_for_model`].
    pub async fn ensure_identity(&self, model_id: &str) -> Result<IdentityId> {
        let display_name = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.model(model_id))
            .map_or_else(|| model_id.to_string(), |m| m.display_name);
        self.ensure_identity_for_model(model_id, &display_name).await
    }

    /// Get or create the identity for a model
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidInput`] for an empty model id and
    /// [`OrchestratorError::Identity`] if the collaborator fails.
    pub async fn ensure_identity_for_model(
        &self,
        model_id: &str,
        display_name: &str,
    ) -> Result<IdentityId> {
        self.provision(model_id, display_name)
            .await
            .map(|(identity, _)| identity)
    }

    /// Resolve the identity; the flag is `true` only for the call that created it
    async fn provision(&self, model_id: &str, display_name: &str) -> Result<(IdentityId, bool)> {
        if model_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "model id must not be empty".to_string(),
            ));
        }

        let cell = self
            .cells
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let created = AtomicBool::new(false);
        let identity = cell
            .get_or_try_init(|| async {
                let seed = IdentitySeed::new(model_id, display_name);
                let identity = self.provisioner.create_identity(&seed).await.map_err(|e| {
                    tracing::warn!(model_id, error = %e, "Identity provisioning failed");
                    OrchestratorError::Identity {
                        model: model_id.to_string(),
                        message: format!("{e:#}"),
                    }
                })?;
                tracing::info!(model_id, identity = %identity, "Provisioned AI identity");
                created.store(true, Ordering::Relaxed);
                Ok::<_, OrchestratorError>(identity)
            })
            .await?
            .clone();

        self.reverse
            .entry(identity.clone())
            .or_insert_with(|| model_id.to_string());

        Ok((identity, created.load(Ordering::Relaxed)))
    }

    /// Identity for a model, without creating one
    #[must_use]
    pub fn identity_for_model(&self, model_id: &str) -> Option<IdentityId> {
        self.cells
            .get(model_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Model represented by an identity
    #[must_use]
    pub fn model_id_for_identity(&self, identity: &IdentityId) -> Option<String> {
        self.reverse.get(identity).map(|m| m.value().clone())
    }

    /// Whether the identity is one of our synthetic participants
    #[must_use]
    pub fn is_ai_identity(&self, identity: &IdentityId) -> bool {
        self.reverse.contains_key(identity)
    }

    /// Ensure identities for a batch of models
    ///
    /// Identities already carried by a descriptor are adopted instead of created.
    /// Returns the number of identities newly provisioned. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first provisioning error.
    pub async fn ensure_identities_for_models(&self, models: &[ModelDescriptor]) -> Result<usize> {
        let mut created = 0;
        for model in models {
            if let Some(known) = &model.identity {
                self.adopt_identity(&model.id, known.clone());
                continue;
            }
            let (_, fresh) = self.provision(&model.id, &model.display_name).await?;
            if fresh {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Record an identity that already exists for a model
    ///
    /// A model that is already cached keeps its identity.
    pub fn adopt_identity(&self, model_id: &str, identity: IdentityId) {
        let cell = self
            .cells
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        if cell.set(identity.clone()).is_ok() {
            tracing::debug!(model_id, identity = %identity, "Adopted known AI identity");
            self.reverse.insert(identity, model_id.to_string());
        }
    }

    /// Number of provisioned identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Whether no identity has been provisioned yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::identity::InMemoryIdentityProvisioner;
    use crate::models::StaticModelCatalog;

    /// Provisioner that yields before answering and never dedups on its own
    struct SlowProvisioner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvisioner for SlowProvisioner {
        async fn create_identity(&self, seed: &IdentitySeed) -> anyhow::Result<IdentityId> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(IdentityId::new(format!("{}-{n}", seed.model_id)))
        }
    }

    /// Provisioner that fails the first call
    struct FlakyProvisioner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvisioner for FlakyProvisioner {
        async fn create_identity(&self, seed: &IdentitySeed) -> anyhow::Result<IdentityId> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("profile store unavailable");
            }
            Ok(IdentityId::new(format!("id-{}", seed.model_id)))
        }
    }

    /// Provisioner that records the seeds it was given
    #[derive(Default)]
    struct RecordingProvisioner {
        seeds: parking_lot::Mutex<Vec<IdentitySeed>>,
    }

    #[async_trait]
    impl IdentityProvisioner for RecordingProvisioner {
        async fn create_identity(&self, seed: &IdentitySeed) -> anyhow::Result<IdentityId> {
            self.seeds.lock().push(seed.clone());
            Ok(IdentityId::new(format!("id-{}", seed.model_id)))
        }
    }

    #[tokio::test]
    async fn test_ensure_is_memoized() {
        let contacts = ContactProvisioner::new(Arc::new(InMemoryIdentityProvisioner::new()));

        let a = contacts
            .ensure_identity_for_model("model-a", "Model A")
            .await
            .unwrap();
        let again = contacts
            .ensure_identity_for_model("model-a", "Model A")
            .await
            .unwrap();

        assert_eq!(a, again);
        assert_eq!(contacts.identity_for_model("model-a"), Some(a.clone()));
        assert_eq!(contacts.model_id_for_identity(&a).as_deref(), Some("model-a"));
        assert!(contacts.is_ai_identity(&a));
        assert!(!contacts.is_ai_identity(&IdentityId::new("person")));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_one_identity() {
        let slow = Arc::new(SlowProvisioner {
            calls: AtomicUsize::new(0),
        });
        let contacts = Arc::new(ContactProvisioner::new(slow.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let contacts = contacts.clone();
            handles.push(tokio::spawn(async move {
                contacts
                    .ensure_identity_for_model("model-a", "Model A")
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(contacts.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_provisioning_can_retry() {
        let contacts = ContactProvisioner::new(Arc::new(FlakyProvisioner {
            calls: AtomicUsize::new(0),
        }));

        let err = contacts
            .ensure_identity_for_model("model-a", "Model A")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Identity { .. }));
        assert_eq!(contacts.identity_for_model("model-a"), None);

        let id = contacts
            .ensure_identity_for_model("model-a", "Model A")
            .await
            .unwrap();
        assert_eq!(id, IdentityId::new("id-model-a"));
    }

    #[tokio::test]
    async fn test_batch_counts_new_identities() {
        let contacts = ContactProvisioner::new(Arc::new(InMemoryIdentityProvisioner::new()));
        contacts
            .ensure_identity_for_model("model-a", "Model A")
            .await
            .unwrap();

        let models = vec![
            ModelDescriptor::new("model-a", "Model A"),
            ModelDescriptor::new("model-b", "Model B"),
            ModelDescriptor::new("model-b", "Model B"),
        ];
        let created = contacts.ensure_identities_for_models(&models).await.unwrap();

        assert_eq!(created, 1);
        assert_eq!(contacts.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_batches_count_each_model_once() {
        let slow = Arc::new(SlowProvisioner {
            calls: AtomicUsize::new(0),
        });
        let contacts = Arc::new(ContactProvisioner::new(slow.clone()));
        let models = vec![
            ModelDescriptor::new("model-a", "Model A"),
            ModelDescriptor::new("model-b", "Model B"),
        ];

        let mut handles = Vec::new();
        for _ in 0..4 {
            let contacts = contacts.clone();
            let models = models.clone();
            handles.push(tokio::spawn(async move {
                contacts.ensure_identities_for_models(&models).await.unwrap()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 2);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identity_named_after_catalog_entry() {
        let recording = Arc::new(RecordingProvisioner::default());
        let catalog = Arc::new(StaticModelCatalog::with_models([ModelDescriptor::new(
            "llama3.2",
            "Llama 3.2",
        )]));
        let contacts = ContactProvisioner::new(recording.clone()).with_catalog(catalog);

        contacts.ensure_identity("llama3.2").await.unwrap();
        contacts.ensure_identity("unlisted").await.unwrap();

        let names: Vec<_> = recording
            .seeds
            .lock()
            .iter()
            .map(|seed| seed.display_name.clone())
            .collect();
        assert_eq!(names, vec!["Llama 3.2".to_string(), "unlisted".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_adopts_known_identity() {
        let contacts = ContactProvisioner::new(Arc::new(InMemoryIdentityProvisioner::new()));
        let mut known = ModelDescriptor::new("model-a", "Model A");
        known.identity = Some(IdentityId::new("existing-a"));

        let created = contacts.ensure_identities_for_models(&[known]).await.unwrap();

        assert_eq!(created, 0);
        assert_eq!(
            contacts.identity_for_model("model-a"),
            Some(IdentityId::new("existing-a"))
        );
        assert!(contacts.is_ai_identity(&IdentityId::new("existing-a")));

        let id = contacts
            .ensure_identity_for_model("model-a", "Model A")
            .await
            .unwrap();
        assert_eq!(id, IdentityId::new("existing-a"));
    }

    #[tokio::test]
    async fn test_empty_model_id_rejected() {
        let contacts = ContactProvisioner::new(Arc::new(InMemoryIdentityProvisioner::new()));
        let err = contacts.ensure_identity_for_model("", "x").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
        assert!(contacts.is_empty());
    }
}
