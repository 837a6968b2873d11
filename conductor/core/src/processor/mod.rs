//! Message Processing
//!
//! Owns one FIFO queue per topic and drives each queued message through prompt
//! assembly, backend streaming, persistence and background tasks.
//!
//! # State Machine
//!
//! ```text
//! Idle -> Queued -> Generating -> Streaming -> Idle
//!                        |            |
//!                        +------------+--> Error
//! ```
//!
//! At most one generation is in flight per topic. Messages arriving while a topic
//! is busy wait in its queue and are drained strictly afterwards; topics never wait
//! on each other. A message id reaches the backend at most once: ids are tracked
//! while queued or generating, then remembered in a bounded window. Ids older than
//! the window are looked up in the store by delivery id.
//!
//! Cancelling a topic aborts the in-flight generation (nothing is persisted) and
//! halts the drain. Messages still queued stay queued until [`MessageProcessor::resume`].

mod queue;

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendRegistry, LlmRequest, StreamingToken};
use crate::contacts::ContactProvisioner;
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, OrchestratorEvent};
use crate::messages::{IdentityId, IncomingMessage, MessageId, TopicId};
use crate::prompt::PromptBuilder;
use crate::store::{ConversationStore, NewMessage, StoredMessage};
use crate::tasks::TaskCoordinator;
use crate::topics::{AiMode, GenerationState, TopicRegistry};

use queue::{DrainExit, ProcessorState};

/// Default number of processed message ids remembered for dedup
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Processing settings
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorConfig {
    /// Processed message ids remembered for dedup
    pub dedup_capacity: usize,
    /// Maximum response tokens (0 = backend default)
    pub max_tokens: u32,
    /// Sampling temperature (None = backend default)
    pub temperature: Option<f32>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            max_tokens: 0,
            temperature: None,
        }
    }
}

/// Result of handing a message to the processor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Topic was idle; draining started
    Started,
    /// Topic is busy or halted; message waits in the queue
    Queued,
    /// Message id already seen or in flight
    Duplicate,
    /// Message came from a synthetic AI identity
    IgnoredOwnMessage,
}

/// Per-topic message queueing and generation
pub struct MessageProcessor {
    config: ProcessorConfig,
    registry: Arc<TopicRegistry>,
    contacts: Arc<ContactProvisioner>,
    backends: Arc<BackendRegistry>,
    store: Arc<dyn ConversationStore>,
    events: EventBus,
    state: Mutex<ProcessorState>,
    prompt_builder: OnceLock<Arc<PromptBuilder>>,
    task_manager: OnceLock<Arc<TaskCoordinator>>,
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("config", &self.config)
            .field("topics", &self.state.lock().topics.len())
            .field("prompt_builder", &self.prompt_builder.get().is_some())
            .field("task_manager", &self.task_manager.get().is_some())
            .finish_non_exhaustive()
    }
}

impl MessageProcessor {
    /// Create a processor (phase one; wire it before handing messages to it)
    #[must_use]
    pub fn new(
        config: ProcessorConfig,
        registry: Arc<TopicRegistry>,
        contacts: Arc<ContactProvisioner>,
        backends: Arc<BackendRegistry>,
        store: Arc<dyn ConversationStore>,
        events: EventBus,
    ) -> Self {
        let state = ProcessorState::new(config.dedup_capacity);
        Self {
            config,
            registry,
            contacts,
            backends,
            store,
            events,
            state: Mutex::new(state),
            prompt_builder: OnceLock::new(),
            task_manager: OnceLock::new(),
        }
    }

    /// Bind the prompt builder (first call wins)
    pub fn set_prompt_builder(&self, builder: Arc<PromptBuilder>) {
        if self.prompt_builder.set(builder).is_err() {
            tracing::debug!("Prompt builder already bound");
        }
    }

    /// Bind the task coordinator (first call wins)
    pub fn set_task_manager(&self, tasks: Arc<TaskCoordinator>) {
        if self.task_manager.set(tasks).is_err() {
            tracing::debug!("Task manager already bound");
        }
    }

    fn prompt_builder(&self) -> Result<&Arc<PromptBuilder>> {
        let builder = self.prompt_builder.get();
        debug_assert!(builder.is_some(), "message processor used before wiring");
        builder.ok_or(OrchestratorError::NotWired("message processor"))
    }

    fn task_manager(&self) -> Result<&Arc<TaskCoordinator>> {
        let tasks = self.task_manager.get();
        debug_assert!(tasks.is_some(), "message processor used before wiring");
        tasks.ok_or(OrchestratorError::NotWired("message processor"))
    }

    /// Accept a message for a topic
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is queued; see
    /// [`Self::validate`]. A storage error is returned if the delivery lookup fails.
    pub async fn handle_topic_message(
        self: &Arc<Self>,
        topic_id: &str,
        message: IncomingMessage,
    ) -> Result<EnqueueOutcome> {
        self.validate(topic_id, &message)?;

        if self.contacts.is_ai_identity(&message.sender) {
            tracing::debug!(topic_id, message_id = %message.id, "Ignoring message from AI identity");
            return Ok(EnqueueOutcome::IgnoredOwnMessage);
        }
        if !self.claim(topic_id, &message.id).await? {
            tracing::debug!(topic_id, message_id = %message.id, "Duplicate message skipped");
            return Ok(EnqueueOutcome::Duplicate);
        }

        Ok(self.enqueue_claimed(topic_id, message))
    }

    /// Check that a message can be queued for a topic
    ///
    /// # Errors
    ///
    /// `UnknownTopic` for non-AI topics, `UnboundModel` when the topic has no
    /// model, `NoBackend` when nothing serves the model and `InvalidInput` for
    /// empty text.
    pub fn validate(&self, topic_id: &str, message: &IncomingMessage) -> Result<()> {
        let model_id = self
            .registry
            .model_id_for_topic(topic_id)
            .ok_or_else(|| OrchestratorError::UnknownTopic(topic_id.to_string()))?;
        if model_id.is_empty() {
            return Err(OrchestratorError::UnboundModel(topic_id.to_string()));
        }
        if self.backends.backend_for(&model_id).is_none() {
            return Err(OrchestratorError::NoBackend(model_id));
        }
        if message.text.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("empty message".to_string()));
        }
        Ok(())
    }

    /// Reserve a message id; `false` if it was already processed or is in flight
    ///
    /// Ids outside the in-memory window are checked against the topic's stored
    /// deliveries.
    ///
    /// # Errors
    ///
    /// Returns a storage error (and drops the reservation) if the lookup fails.
    pub(crate) async fn claim(&self, topic_id: &str, id: &MessageId) -> Result<bool> {
        if !self.state.lock().reserve(id) {
            return Ok(false);
        }

        match self.store.has_delivery(topic_id, id).await {
            Ok(false) => Ok(true),
            Ok(true) => {
                tracing::debug!(topic_id, message_id = %id, "Delivery already stored");
                self.state.lock().finish(id);
                Ok(false)
            }
            Err(e) => {
                self.release(id);
                Err(OrchestratorError::storage(&e))
            }
        }
    }

    /// Drop a reservation that will not be queued
    pub(crate) fn release(&self, id: &MessageId) {
        self.state.lock().release(id);
    }

    /// Queue a message whose id was reserved with [`Self::claim`]
    pub(crate) fn enqueue_claimed(
        self: &Arc<Self>,
        topic_id: &str,
        message: IncomingMessage,
    ) -> EnqueueOutcome {
        let outcome = if self.state.lock().enqueue(topic_id, message) {
            EnqueueOutcome::Started
        } else {
            EnqueueOutcome::Queued
        };

        tracing::debug!(topic_id, ?outcome, "Message accepted");
        if outcome == EnqueueOutcome::Started {
            self.registry.set_loading_state(topic_id, true);
            self.registry
                .set_generation_state(topic_id, GenerationState::Queued);
            self.spawn_drain(topic_id);
        }
        outcome
    }

    fn spawn_drain(self: &Arc<Self>, topic_id: &str) {
        let processor = Arc::clone(self);
        let topic_id = topic_id.to_string();
        tokio::spawn(async move {
            processor.drain(&topic_id).await;
        });
    }

    /// Process a topic's queue in order until it is empty or halted
    async fn drain(&self, topic_id: &str) {
        loop {
            let next = self.state.lock().next_message(topic_id);

            let Some((message, token)) = next else {
                // Loading is cleared before the drain is released so waiters
                // observe a settled topic.
                self.registry.set_loading_state(topic_id, false);
                let exit = self.state.lock().exit_drain(topic_id);
                match exit {
                    DrainExit::Continue => continue,
                    DrainExit::Idle => break,
                    DrainExit::Halted(queued) => {
                        tracing::info!(topic_id, queued, "Queue halted");
                        break;
                    }
                }
            };

            tracing::debug!(topic_id, message_id = %message.id, seq = message.seq, "Processing message");
            self.registry.set_loading_state(topic_id, true);
            let result = self
                .run_turn(topic_id, &message.text, &message.sender, Some(&message.id), &token)
                .await;

            self.state.lock().complete(topic_id, &message.id);

            if let Err(e) = &result {
                if !matches!(e, OrchestratorError::Cancelled(_)) {
                    tracing::warn!(topic_id, message_id = %message.id, error = %e, "Message failed, continuing with queue");
                }
            }
        }
    }

    /// Generate, persist and post-process a reply to `text`
    ///
    /// This is the turn executor used by the queue. Calling it directly bypasses
    /// queueing and dedup. Returns `Ok(None)` when the backend produced no content
    /// or the topic is a passive observer.
    ///
    /// # Errors
    ///
    /// Returns backend, storage and wiring errors; the topic moves to `Error`.
    pub async fn process_message(
        &self,
        topic_id: &str,
        text: &str,
        sender: &IdentityId,
    ) -> Result<Option<String>> {
        self.run_turn(topic_id, text, sender, None, &CancellationToken::new())
            .await
    }

    async fn run_turn(
        &self,
        topic_id: &str,
        text: &str,
        sender: &IdentityId,
        reply_to: Option<&MessageId>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let result = self.generate(topic_id, text, sender, reply_to, cancel).await;

        match &result {
            Ok(_) => {}
            Err(OrchestratorError::Cancelled(_)) => {
                tracing::info!(topic_id, "Generation cancelled");
                self.registry
                    .set_generation_state(topic_id, GenerationState::Idle);
                self.events.emit(OrchestratorEvent::GenerationCancelled {
                    topic_id: topic_id.to_string(),
                    reply_to: reply_to.cloned(),
                });
            }
            Err(e) => {
                self.registry
                    .set_generation_state(topic_id, GenerationState::Error);
                self.events.emit(OrchestratorEvent::GenerationFailed {
                    topic_id: topic_id.to_string(),
                    reply_to: reply_to.cloned(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn generate(
        &self,
        topic_id: &str,
        text: &str,
        sender: &IdentityId,
        reply_to: Option<&MessageId>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let builder = self.prompt_builder()?;
        let tasks = self.task_manager()?;
        let model_id = self
            .registry
            .model_id_for_topic(topic_id)
            .ok_or_else(|| OrchestratorError::UnknownTopic(topic_id.to_string()))?;

        if self.registry.mode(topic_id) == AiMode::PassiveObserver {
            let report = tasks.run_tasks_for_turn(topic_id, text).await;
            tracing::debug!(topic_id, ?report, "Passive observer turn");
            self.registry
                .set_generation_state(topic_id, GenerationState::Idle);
            self.registry.set_loading_state(topic_id, false);
            return Ok(None);
        }

        self.registry
            .set_generation_state(topic_id, GenerationState::Generating);

        let prompt = builder.build_prompt(topic_id, text, sender).await?;
        if prompt.restarted {
            tracing::info!(
                topic_id,
                estimated_tokens = prompt.unrestarted_tokens,
                restarted_tokens = prompt.estimated_tokens,
                "Context window exceeded, restarted with summary"
            );
            self.events.emit(OrchestratorEvent::ContextRestarted {
                topic_id: topic_id.to_string(),
                estimated_tokens: prompt.unrestarted_tokens,
                budget_tokens: prompt.budget_tokens,
            });
        }

        let backend = self
            .backends
            .backend_for(&model_id)
            .ok_or_else(|| OrchestratorError::NoBackend(model_id.clone()))?;

        let mut request = LlmRequest::new(prompt.turns, model_id.clone())
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let backend_error = |message: String| OrchestratorError::Backend {
            model: model_id.clone(),
            message,
        };

        let mut rx = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(OrchestratorError::Cancelled(topic_id.to_string())),
            rx = backend.send_streaming(&request) => rx.map_err(|e| backend_error(format!("{e:#}")))?,
        };

        let mut streamed = String::new();
        let mut first_token = true;
        let output = loop {
            let token = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(OrchestratorError::Cancelled(topic_id.to_string())),
                token = rx.recv() => token,
            };

            match token {
                Some(StreamingToken::Token(fragment)) => {
                    if first_token {
                        first_token = false;
                        self.registry
                            .set_generation_state(topic_id, GenerationState::Streaming);
                    }
                    streamed.push_str(&fragment);
                    self.events.emit(OrchestratorEvent::Token {
                        topic_id: topic_id.to_string(),
                        reply_to: reply_to.cloned(),
                        text: fragment,
                    });
                }
                Some(StreamingToken::Complete { message }) => {
                    let output = if message.is_empty() { streamed } else { message };
                    break output;
                }
                Some(StreamingToken::Error(message)) => return Err(backend_error(message)),
                None => {
                    return Err(backend_error(
                        "stream closed before completion".to_string(),
                    ))
                }
            }
        };
        drop(rx);

        if output.trim().is_empty() {
            tracing::debug!(topic_id, "Backend produced no content");
            self.registry
                .set_generation_state(topic_id, GenerationState::Idle);
            self.registry.set_loading_state(topic_id, false);
            return Ok(None);
        }

        let stored = self.persist(topic_id, &model_id, &output, reply_to).await?;
        self.events.emit(OrchestratorEvent::ResponsePersisted {
            topic_id: topic_id.to_string(),
            message_id: stored.id,
            reply_to: reply_to.cloned(),
        });

        self.registry
            .set_generation_state(topic_id, GenerationState::Idle);
        self.registry.set_loading_state(topic_id, false);

        let report = tasks.run_tasks_for_turn(topic_id, &output).await;
        if !report.all_succeeded() {
            tracing::debug!(topic_id, failed = report.failed.len(), "Some background tasks failed");
        }

        Ok(Some(output))
    }

    /// Save generated text under the model's synthetic identity
    async fn persist(
        &self,
        topic_id: &str,
        model_id: &str,
        text: &str,
        reply_to: Option<&MessageId>,
    ) -> Result<StoredMessage> {
        let persisting = self.state.lock().topic(topic_id).persisting.clone();
        persisting.send_replace(true);

        let result = async {
            let identity = self.contacts.ensure_identity(model_id).await?;
            let mut message = NewMessage::new(identity, text);
            if let Some(id) = reply_to {
                message = message.with_delivery_id(id.clone());
            }
            self.store
                .append_message(topic_id, message)
                .await
                .map_err(|e| OrchestratorError::storage(&e))
        }
        .await;

        persisting.send_replace(false);

        result.map_err(|e| {
            tracing::error!(
                topic_id,
                model_id,
                error = %e,
                chars = text.len(),
                "Generated response was not persisted"
            );
            self.events.emit(OrchestratorEvent::PersistFailed {
                topic_id: topic_id.to_string(),
                error: e.to_string(),
            });
            OrchestratorError::PersistFailed {
                topic: topic_id.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Wait until no generated text for the topic is waiting to be saved
    pub async fn wait_for_pending_persist(&self, topic_id: &str) {
        let mut rx = self.state.lock().topic(topic_id).persisting.subscribe();
        if rx.wait_for(|pending| !*pending).await.is_err() {
            tracing::trace!(topic_id, "Persist watch closed");
        }
    }

    /// Whether a stored message was written by a synthetic AI identity
    #[must_use]
    pub fn is_ai_message(&self, message: &StoredMessage) -> bool {
        self.contacts.is_ai_identity(&message.sender)
    }

    /// Whether an identity belongs to a model
    #[must_use]
    pub fn is_ai_contact(&self, identity: &IdentityId) -> bool {
        self.contacts.model_id_for_identity(identity).is_some()
    }

    /// Abort the topic's in-flight generation and halt its queue
    ///
    /// Returns `true` if a generation was running.
    pub fn cancel_topic(&self, topic_id: &str) -> bool {
        let token = self.state.lock().halt(topic_id);

        match token {
            Some(token) => {
                tracing::info!(topic_id, "Cancelling generation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every topic; returns the number of generations aborted
    pub fn cancel_all(&self) -> usize {
        let topic_ids: Vec<TopicId> = self.state.lock().topics.keys().cloned().collect();
        topic_ids
            .iter()
            .filter(|topic_id| self.cancel_topic(topic_id))
            .count()
    }

    /// Lift halts and restart draining for every topic with queued messages
    ///
    /// Returns the number of topics restarted.
    pub fn resume(self: &Arc<Self>) -> usize {
        let restart = self.state.lock().resume_all();

        for topic_id in &restart {
            tracing::info!(topic_id = %topic_id, "Resuming queue");
            self.registry
                .set_generation_state(topic_id, GenerationState::Queued);
            self.spawn_drain(topic_id);
        }
        restart.len()
    }

    /// Sender and text of every message waiting behind the current one
    pub(crate) fn queued_turns(&self, topic_id: &str) -> Vec<(IdentityId, String)> {
        self.state.lock().topics.get(topic_id).map_or_else(Vec::new, |t| {
            t.queue
                .iter()
                .map(|m| (m.sender.clone(), m.text.clone()))
                .collect()
        })
    }

    /// Messages waiting in a topic's queue
    #[must_use]
    pub fn queue_len(&self, topic_id: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic_id)
            .map_or(0, |t| t.queue.len())
    }

    /// Whether a generation is running for the topic
    #[must_use]
    pub fn is_generating(&self, topic_id: &str) -> bool {
        self.state
            .lock()
            .topics
            .get(topic_id)
            .is_some_and(|t| t.cancel.is_some())
    }

    /// Wait until the topic's queue has stopped draining
    pub async fn wait_until_idle(&self, topic_id: &str) {
        let mut rx = self.state.lock().topic(topic_id).active.subscribe();
        if rx.wait_for(|active| !*active).await.is_err() {
            tracing::trace!(topic_id, "Drain watch closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::backend::LlmBackend;
    use crate::identity::InMemoryIdentityProvisioner;
    use crate::models::StaticModelCatalog;
    use crate::prompt::PromptConfig;
    use crate::store::InMemoryConversationStore;

    /// Backend that replies with a fixed text
    struct ReplyBackend(&'static str);

    #[async_trait]
    impl LlmBackend for ReplyBackend {
        fn name(&self) -> &str {
            "Reply"
        }

        async fn send_streaming(
            &self,
            _request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            let (tx, rx) = mpsc::channel(4);
            let text = self.0.to_string();
            tokio::spawn(async move {
                if !text.is_empty() {
                    let _ = tx.send(StreamingToken::Token(text.clone())).await;
                }
                let _ = tx.send(StreamingToken::Complete { message: text }).await;
            });
            Ok(rx)
        }
    }

    struct Fixture {
        processor: Arc<MessageProcessor>,
        registry: Arc<TopicRegistry>,
        store: Arc<InMemoryConversationStore>,
        contacts: Arc<ContactProvisioner>,
    }

    async fn fixture(reply: &'static str, wired: bool) -> Fixture {
        fixture_with(reply, wired, ProcessorConfig::default()).await
    }

    async fn fixture_with(reply: &'static str, wired: bool, config: ProcessorConfig) -> Fixture {
        let events = EventBus::default();
        let registry = Arc::new(TopicRegistry::new(events.clone()));
        registry.register_topic("t", "m");
        let store = Arc::new(InMemoryConversationStore::new());
        let contacts = Arc::new(ContactProvisioner::new(Arc::new(
            InMemoryIdentityProvisioner::new(),
        )));
        let backends = Arc::new(BackendRegistry::with_fallback(Arc::new(ReplyBackend(reply))));

        let processor = Arc::new(MessageProcessor::new(
            config,
            registry.clone(),
            contacts.clone(),
            backends,
            store.clone(),
            events,
        ));

        if wired {
            let builder = Arc::new(PromptBuilder::new(
                PromptConfig::default(),
                registry.clone(),
                store.clone(),
                Arc::new(StaticModelCatalog::new()),
                contacts.clone(),
                None,
            ));
            builder.set_message_processor(Arc::downgrade(&processor));
            let tasks = Arc::new(TaskCoordinator::new(store.clone(), None));
            tasks.initialize().await.unwrap();
            processor.set_prompt_builder(builder);
            processor.set_task_manager(tasks);
        }

        Fixture {
            processor,
            registry,
            store,
            contacts,
        }
    }

    fn user(id: &str, text: &str) -> IncomingMessage {
        IncomingMessage::new(MessageId::from_string(id), IdentityId::new("alice"), text)
    }

    #[tokio::test]
    async fn test_validation_rejects_unknown_topic() {
        let f = fixture("ok", true).await;
        let err = f
            .processor
            .handle_topic_message("nope", user("1", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTopic(_)));
        assert_eq!(f.processor.queue_len("nope"), 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_text() {
        let f = fixture("ok", true).await;
        let err = f
            .processor
            .handle_topic_message("t", user("1", "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_process_message_persists_reply() {
        let f = fixture("pong", true).await;
        let reply = f
            .processor
            .process_message("t", "ping", &IdentityId::new("alice"))
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("pong"));
        let history = f.store.history("t").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(f.processor.is_ai_message(&history[0]));
        assert!(f.processor.is_ai_contact(&history[0].sender));
        assert_eq!(f.registry.generation_state("t"), GenerationState::Idle);
    }

    #[tokio::test]
    async fn test_empty_reply_returns_none() {
        let f = fixture("", true).await;
        let reply = f
            .processor
            .process_message("t", "ping", &IdentityId::new("alice"))
            .await
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(f.store.message_count("t"), 0);
    }

    #[tokio::test]
    async fn test_passive_observer_skips_generation() {
        let f = fixture("pong", true).await;
        f.registry.set_mode("t", AiMode::PassiveObserver);
        let reply = f
            .processor
            .process_message("t", "ping", &IdentityId::new("alice"))
            .await
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(f.store.message_count("t"), 0);
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let f = fixture("pong", true).await;
        let own = f.contacts.ensure_identity_for_model("m", "M").await.unwrap();
        let outcome = f
            .processor
            .handle_topic_message("t", IncomingMessage::new(MessageId::new(), own, "echo"))
            .await
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::IgnoredOwnMessage);
        assert_eq!(f.processor.queue_len("t"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_is_skipped() {
        let f = fixture("pong", true).await;
        let first = f.processor.handle_topic_message("t", user("dup", "hi")).await.unwrap();
        let second = f.processor.handle_topic_message("t", user("dup", "hi")).await.unwrap();
        assert_eq!(first, EnqueueOutcome::Started);
        assert_eq!(second, EnqueueOutcome::Duplicate);

        f.processor.wait_until_idle("t").await;
        let third = f.processor.handle_topic_message("t", user("dup", "hi")).await.unwrap();
        assert_eq!(third, EnqueueOutcome::Duplicate);
        assert_eq!(f.store.message_count("t"), 1);
    }

    #[tokio::test]
    async fn test_redelivery_after_window_rolls_over_is_skipped() {
        let config = ProcessorConfig {
            dedup_capacity: 1,
            ..ProcessorConfig::default()
        };
        let f = fixture_with("pong", true, config).await;

        let first = f.processor.handle_topic_message("t", user("x", "ping")).await.unwrap();
        assert_eq!(first, EnqueueOutcome::Started);
        f.processor.wait_until_idle("t").await;

        for i in 0..3 {
            let id = format!("other-{i}");
            f.processor.handle_topic_message("t", user(&id, "more")).await.unwrap();
            f.processor.wait_until_idle("t").await;
        }

        let again = f.processor.handle_topic_message("t", user("x", "ping")).await.unwrap();
        assert_eq!(again, EnqueueOutcome::Duplicate);
        assert_eq!(f.processor.queue_len("t"), 0);
        assert_eq!(f.store.message_count("t"), 4);
    }

    #[tokio::test]
    async fn test_cancel_without_generation_halts_queue() {
        let f = fixture("pong", true).await;
        assert!(!f.processor.cancel_topic("t"));

        let outcome = f.processor.handle_topic_message("t", user("1", "hi")).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Queued);
        assert_eq!(f.processor.queue_len("t"), 1);

        assert_eq!(f.processor.resume(), 1);
        f.processor.wait_until_idle("t").await;
        assert_eq!(f.processor.queue_len("t"), 0);
        assert_eq!(f.store.message_count("t"), 1);
    }

    #[tokio::test]
    #[cfg_attr(debug_assertions, should_panic(expected = "used before wiring"))]
    async fn test_unwired_processor_rejects_work() {
        let f = fixture("pong", false).await;
        let err = f
            .processor
            .process_message("t", "ping", &IdentityId::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotWired(_)));
    }
}
