//! The Orchestrator
//!
//! Public façade of the core. It builds every component, resolves the
//! `PromptBuilder` / `MessageProcessor` cycle in a second wiring phase and owns
//! default-topic bootstrapping. Everything else delegates 1:1 to the components.
//!
//! # Lifecycle
//!
//! ```text
//! new()  -> components built with acyclic dependencies only
//! init() -> wiring, task channel, identities, recovery scan, default topics, resume
//! shutdown() -> in-flight generations cancelled, queues kept for the next init()
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(config, Collaborators::in_memory(backend));
//! orchestrator.init().await?;
//!
//! let mut events = orchestrator.subscribe();
//! orchestrator
//!     .process_incoming_message("lama", IncomingMessage::new(MessageId::new(), user, "Hello"))
//!     .await?;
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, OnceCell};

use crate::analysis::TopicAnalysis;
use crate::backend::{BackendRegistry, LlmBackend};
use crate::config::OrchestratorConfig;
use crate::contacts::ContactProvisioner;
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, OrchestratorEvent};
use crate::identity::{IdentityProvisioner, InMemoryIdentityProvisioner};
use crate::messages::{IdentityId, IncomingMessage, TopicId};
use crate::models::{ModelCatalog, StaticModelCatalog};
use crate::processor::{EnqueueOutcome, MessageProcessor};
use crate::prompt::PromptBuilder;
use crate::settings::{InMemorySettings, SettingsStore};
use crate::store::{ConversationStore, InMemoryConversationStore, NewMessage};
use crate::tasks::{TaskCoordinator, TaskType, TASK_CHANNEL_ID};
use crate::topics::{AiMode, TopicRegistry};

/// Topic greeting new users
pub const HI_TOPIC_ID: &str = "hi";

/// General conversation topic
pub const LAMA_TOPIC_ID: &str = "lama";

/// Default topics and their display names
pub const DEFAULT_TOPICS: [(&str, &str); 2] = [(HI_TOPIC_ID, "Hi"), (LAMA_TOPIC_ID, "LAMA")];

/// External capabilities the core consumes
#[derive(Clone)]
pub struct Collaborators {
    /// Durable conversation store
    pub store: Arc<dyn ConversationStore>,
    /// Identity provisioning capability
    pub identity: Arc<dyn IdentityProvisioner>,
    /// Inference backends by model id
    pub backends: Arc<BackendRegistry>,
    /// Model catalog
    pub catalog: Arc<dyn ModelCatalog>,
    /// Optional topic analysis service
    pub analysis: Option<Arc<dyn TopicAnalysis>>,
    /// Settings store
    pub settings: Arc<dyn SettingsStore>,
}

impl Collaborators {
    /// In-memory collaborators with one backend serving every model
    #[must_use]
    pub fn in_memory(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            store: Arc::new(InMemoryConversationStore::new()),
            identity: Arc::new(InMemoryIdentityProvisioner::new()),
            backends: Arc::new(BackendRegistry::with_fallback(backend)),
            catalog: Arc::new(StaticModelCatalog::new()),
            analysis: None,
            settings: Arc::new(InMemorySettings::new()),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("backends", &self.backends)
            .field("analysis", &self.analysis.is_some())
            .finish_non_exhaustive()
    }
}

/// Public façade of the orchestration core
pub struct Orchestrator {
    config: OrchestratorConfig,
    events: EventBus,
    registry: Arc<TopicRegistry>,
    contacts: Arc<ContactProvisioner>,
    tasks: Arc<TaskCoordinator>,
    prompt_builder: Arc<PromptBuilder>,
    processor: Arc<MessageProcessor>,
    store: Arc<dyn ConversationStore>,
    catalog: Arc<dyn ModelCatalog>,
    settings: Arc<dyn SettingsStore>,
    initialized: OnceCell<()>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("initialized", &self.initialized.initialized())
            .field("topics", &self.registry.list_all_topic_ids())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build every component (phase one)
    ///
    /// Nothing is usable until [`Self::init`] has completed.
    #[must_use]
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            identity,
            backends,
            catalog,
            analysis,
            settings,
        } = collaborators;

        if settings.default_model().is_none() {
            if let Some(model) = &config.default_model {
                settings.set_default_model(model);
            }
        }

        let events = EventBus::new(config.event_capacity);
        let registry = Arc::new(TopicRegistry::new(events.clone()));
        let contacts = Arc::new(ContactProvisioner::new(identity).with_catalog(catalog.clone()));
        let tasks = Arc::new(TaskCoordinator::new(store.clone(), analysis.clone()));
        let prompt_builder = Arc::new(PromptBuilder::new(
            config.prompt.clone(),
            registry.clone(),
            store.clone(),
            catalog.clone(),
            contacts.clone(),
            analysis,
        ));
        let processor = Arc::new(MessageProcessor::new(
            config.processing.clone(),
            registry.clone(),
            contacts.clone(),
            backends,
            store.clone(),
            events.clone(),
        ));

        Self {
            config,
            events,
            registry,
            contacts,
            tasks,
            prompt_builder,
            processor,
            store,
            catalog,
            settings,
            initialized: OnceCell::new(),
        }
    }

    /// Bind the circular references (phase two)
    fn wire(&self) {
        self.prompt_builder
            .set_message_processor(Arc::downgrade(&self.processor));
        self.processor
            .set_prompt_builder(Arc::clone(&self.prompt_builder));
        self.processor.set_task_manager(Arc::clone(&self.tasks));
    }

    /// Wire components, bootstrap topics and resume queued work
    ///
    /// Bootstrapping runs once; later calls only resume halted queues. Default
    /// topics are skipped with a warning when no default model is configured.
    ///
    /// # Errors
    ///
    /// Returns storage or identity errors from bootstrapping. A failed bootstrap
    /// is retried by the next call.
    pub async fn init(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.wire();
                self.tasks.initialize().await?;

                let models = self.catalog.models();
                let created = self.contacts.ensure_identities_for_models(&models).await?;

                let recovered = self.scan_existing_topics().await?;

                match self.ensure_default_topics().await {
                    Ok(()) => {}
                    Err(OrchestratorError::Configuration(reason)) => {
                        tracing::warn!(reason = %reason, "Default topics not created");
                    }
                    Err(e) => return Err(e),
                }

                tracing::info!(
                    models = models.len(),
                    identities_created = created,
                    topics_recovered = recovered,
                    "Orchestrator initialized"
                );
                Ok::<_, OrchestratorError>(())
            })
            .await?;

        let resumed = self.processor.resume();
        if resumed > 0 {
            tracing::info!(topics = resumed, "Resumed queued messages");
        }
        Ok(())
    }

    /// Whether bootstrapping has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Create and register the `hi` and `lama` topics
    ///
    /// `hi` is seeded once with a static welcome from the AI identity; it is
    /// stored directly and never triggers a generation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no default model is set, or storage and
    /// identity errors.
    pub async fn ensure_default_topics(&self) -> Result<()> {
        let model_id = self.settings.default_model().ok_or_else(|| {
            OrchestratorError::Configuration("no default model set".to_string())
        })?;
        let identity = self.contacts.ensure_identity(&model_id).await?;

        for (topic_id, display_name) in DEFAULT_TOPICS {
            let created = self
                .store
                .create_channel(topic_id, Some(&model_id))
                .await
                .map_err(|e| OrchestratorError::storage(&e))?;

            self.registry.register_topic(topic_id, &model_id);
            if self.registry.display_name(topic_id).is_none() {
                self.registry.set_display_name(topic_id, display_name);
            }

            if created && topic_id == HI_TOPIC_ID {
                self.store
                    .append_message(
                        topic_id,
                        NewMessage::new(identity.clone(), self.config.welcome_message.clone()),
                    )
                    .await
                    .map_err(|e| OrchestratorError::storage(&e))?;
                tracing::debug!(topic_id, "Seeded welcome message");
            }
        }
        Ok(())
    }

    /// Re-register AI topics found in storage
    ///
    /// Returns the number of topics registered.
    ///
    /// # Errors
    ///
    /// Returns a storage error if channels cannot be listed.
    pub async fn scan_existing_topics(&self) -> Result<usize> {
        let channels = self
            .store
            .channels()
            .await
            .map_err(|e| OrchestratorError::storage(&e))?;

        let mut count = 0;
        for channel in channels {
            if channel.topic_id == TASK_CHANNEL_ID {
                continue;
            }
            if let Some(model_id) = channel.model_id.filter(|m| !m.is_empty()) {
                self.registry.register_topic(&channel.topic_id, &model_id);
                count += 1;
            }
        }
        tracing::debug!(count, "Scanned existing topics");
        Ok(count)
    }

    /// Persist an inbound user message and queue it for a reply
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is stored; a storage error
    /// is returned if the delivery lookup fails or the message cannot be persisted.
    pub async fn process_incoming_message(
        &self,
        topic_id: &str,
        message: IncomingMessage,
    ) -> Result<EnqueueOutcome> {
        self.processor.validate(topic_id, &message)?;

        if self.contacts.is_ai_identity(&message.sender) {
            return Ok(EnqueueOutcome::IgnoredOwnMessage);
        }
        if !self.processor.claim(topic_id, &message.id).await? {
            tracing::debug!(topic_id, message_id = %message.id, "Duplicate delivery");
            return Ok(EnqueueOutcome::Duplicate);
        }

        if let Err(e) = self
            .store
            .append_message(
                topic_id,
                NewMessage::new(message.sender.clone(), message.text.clone())
                    .with_delivery_id(message.id.clone()),
            )
            .await
        {
            self.processor.release(&message.id);
            return Err(OrchestratorError::storage(&e));
        }

        Ok(self.processor.enqueue_claimed(topic_id, message))
    }

    /// Bind a topic to a model, creating its channel if needed
    ///
    /// # Errors
    ///
    /// Returns a storage error if the channel cannot be created.
    pub async fn register_topic(&self, topic_id: &str, model_id: &str) -> Result<()> {
        if model_id.trim().is_empty() {
            return Err(OrchestratorError::UnboundModel(topic_id.to_string()));
        }
        self.store
            .create_channel(topic_id, Some(model_id))
            .await
            .map_err(|e| OrchestratorError::storage(&e))?;
        self.registry.register_topic(topic_id, model_id);
        Ok(())
    }

    /// Change the default model and rebind the default topics to it
    ///
    /// # Errors
    ///
    /// Returns storage or identity errors from rebinding.
    pub async fn set_default_model(&self, model_id: &str) -> Result<()> {
        if model_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("empty model id".to_string()));
        }
        self.settings.set_default_model(model_id);
        tracing::info!(model_id, "Default model changed");
        if self.is_initialized() {
            self.ensure_default_topics().await?;
        }
        Ok(())
    }

    /// Current default model
    #[must_use]
    pub fn default_model(&self) -> Option<String> {
        self.settings.default_model()
    }

    /// Whether the topic is AI-backed
    #[must_use]
    pub fn is_ai_topic(&self, topic_id: &str) -> bool {
        self.registry.is_ai_topic(topic_id)
    }

    /// Model bound to a topic
    #[must_use]
    pub fn model_id_for_topic(&self, topic_id: &str) -> Option<String> {
        self.registry.model_id_for_topic(topic_id)
    }

    /// Display name of a topic
    #[must_use]
    pub fn topic_display_name(&self, topic_id: &str) -> Option<String> {
        self.registry.display_name(topic_id)
    }

    /// Rename a topic
    pub fn set_topic_display_name(&self, topic_id: &str, name: impl Into<String>) {
        self.registry.set_display_name(topic_id, name);
    }

    /// Change how the AI takes part in a topic
    pub fn set_topic_mode(&self, topic_id: &str, mode: AiMode) {
        self.registry.set_mode(topic_id, mode);
    }

    /// How the AI takes part in a topic
    #[must_use]
    pub fn topic_mode(&self, topic_id: &str) -> AiMode {
        self.registry.mode(topic_id)
    }

    /// All registered topic ids
    #[must_use]
    pub fn list_topics(&self) -> Vec<TopicId> {
        self.registry.list_all_topic_ids()
    }

    /// Add a background task to a topic
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before [`Self::init`].
    pub fn associate_task(&self, topic_id: &str, task_type: TaskType) -> Result<()> {
        self.tasks.associate_task(topic_id, task_type)
    }

    /// Whether an identity is a synthetic AI participant
    #[must_use]
    pub fn is_ai_contact(&self, identity: &IdentityId) -> bool {
        self.processor.is_ai_contact(identity)
    }

    /// Abort the topic's generation and halt its queue until the next `init()`
    pub fn cancel_topic(&self, topic_id: &str) -> bool {
        self.processor.cancel_topic(topic_id)
    }

    /// Wait until a topic has no queued or running work
    pub async fn wait_until_idle(&self, topic_id: &str) {
        self.processor.wait_until_idle(topic_id).await;
    }

    /// Register an observer for progress notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Cancel in-flight generations; queued messages stay queued
    pub fn shutdown(&self) {
        let cancelled = self.processor.cancel_all();
        tracing::info!(cancelled, "Orchestrator shut down");
    }

    /// Topic registry
    #[must_use]
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Identity cache
    #[must_use]
    pub fn contacts(&self) -> &Arc<ContactProvisioner> {
        &self.contacts
    }

    /// Task coordinator
    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskCoordinator> {
        &self.tasks
    }

    /// Prompt builder
    #[must_use]
    pub fn prompt_builder(&self) -> &Arc<PromptBuilder> {
        &self.prompt_builder
    }

    /// Message processor
    #[must_use]
    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.processor
    }
}
