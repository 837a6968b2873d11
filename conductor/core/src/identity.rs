//! Identity Provisioning
//!
//! Capability for creating durable sender identities. The core uses it only to
//! create synthetic AI participants; people's identities are managed elsewhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::messages::IdentityId;

/// Seed describing the identity to create
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdentitySeed {
    /// Model the identity represents
    pub model_id: String,
    /// Human-readable name for the participant
    pub display_name: String,
}

impl IdentitySeed {
    /// Create a seed for a model
    pub fn new(model_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Identity provisioning trait
///
/// Implementations are only assumed to be idempotent at their own storage
/// granularity; callers that need "one identity per model" must guard in memory.
#[async_trait]
pub trait IdentityProvisioner: Send + Sync {
    /// Create (or look up) a durable identity for the seed
    async fn create_identity(&self, seed: &IdentitySeed) -> anyhow::Result<IdentityId>;
}

/// In-memory identity provisioner
///
/// Returns the same identity for a repeated seed, mimicking a keyed profile store.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvisioner {
    identities: Mutex<HashMap<String, IdentityId>>,
    created: AtomicUsize,
}

impl InMemoryIdentityProvisioner {
    /// Create an empty provisioner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities created so far
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvisioner for InMemoryIdentityProvisioner {
    async fn create_identity(&self, seed: &IdentitySeed) -> anyhow::Result<IdentityId> {
        if seed.model_id.trim().is_empty() {
            anyhow::bail!("identity seed has an empty model id");
        }

        let mut identities = self.identities.lock();
        let id = identities
            .entry(seed.model_id.clone())
            .or_insert_with(|| {
                self.created.fetch_add(1, Ordering::SeqCst);
                IdentityId::new(format!("ai_{}", uuid::Uuid::new_v4().simple()))
            })
            .clone();
        Ok(id)
    }
}
