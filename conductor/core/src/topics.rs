//! Topic Registry
//!
//! Tracks which conversation topics are AI-backed, the model each one is bound to,
//! per-topic loading and generation state, display names and interaction mode.
//!
//! # Thread Safety
//!
//! All state lives in `DashMap`s keyed by topic id, so every accessor is a single
//! atomic map operation and never blocks on another topic. The registry performs
//! no storage or network I/O; state-change notifications go to the [`EventBus`]
//! and are never awaited.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::{EventBus, OrchestratorEvent};
use crate::messages::TopicId;

/// Per-topic generation lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationState {
    /// Nothing queued or running
    #[default]
    Idle,
    /// Messages waiting behind a running generation
    Queued,
    /// Prompt assembly and backend call in progress
    Generating,
    /// Backend has produced at least one token
    Streaming,
    /// Last generation failed
    Error,
}

impl GenerationState {
    /// Whether a generation is currently running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Queued | Self::Generating | Self::Streaming)
    }
}

/// How the AI participates in a topic
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiMode {
    /// Answers every message
    #[default]
    Assistant,
    /// Observes and analyses, never replies
    PassiveObserver,
    /// Answers with emphasis on sharing what it knows from other topics
    KnowledgeSharing,
}

impl AiMode {
    /// Parse a mode label (`assistant`, `passive-observer`, `knowledge-sharing`)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "assistant" => Some(Self::Assistant),
            "passive-observer" | "passive" | "observer" => Some(Self::PassiveObserver),
            "knowledge-sharing" | "knowledge" => Some(Self::KnowledgeSharing),
            _ => None,
        }
    }
}

/// Snapshot of one topic's registry entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSnapshot {
    /// Topic identifier
    pub topic_id: TopicId,
    /// Bound model
    pub model_id: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Interaction mode
    pub mode: AiMode,
    /// Generation state
    pub state: GenerationState,
    /// Loading flag
    pub loading: bool,
}

/// Registry of AI topics and their per-topic state
#[derive(Debug)]
pub struct TopicRegistry {
    models: DashMap<TopicId, String>,
    display_names: DashMap<TopicId, String>,
    modes: DashMap<TopicId, AiMode>,
    loading: DashMap<TopicId, bool>,
    states: DashMap<TopicId, watch::Sender<GenerationState>>,
    events: EventBus,
}

impl TopicRegistry {
    /// Create an empty registry publishing to `events`
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            models: DashMap::new(),
            display_names: DashMap::new(),
            modes: DashMap::new(),
            loading: DashMap::new(),
            states: DashMap::new(),
            events,
        }
    }

    /// Register a topic as AI-backed, or rebind it to a different model
    ///
    /// Re-registering with the same model is a no-op.
    pub fn register_topic(&self, topic_id: &str, model_id: &str) {
        let previous = self
            .models
            .insert(topic_id.to_string(), model_id.to_string());

        match previous.as_deref() {
            Some(existing) if existing == model_id => return,
            Some(existing) => {
                tracing::info!(topic_id, from = existing, to = model_id, "Rebound AI topic");
            }
            None => {
                tracing::info!(topic_id, model_id, "Registered AI topic");
            }
        }

        self.states
            .entry(topic_id.to_string())
            .or_insert_with(|| watch::channel(GenerationState::Idle).0);

        self.events.emit(OrchestratorEvent::TopicRegistered {
            topic_id: topic_id.to_string(),
            model_id: model_id.to_string(),
        });
    }

    /// Whether the topic is AI-backed
    #[must_use]
    pub fn is_ai_topic(&self, topic_id: &str) -> bool {
        self.models.contains_key(topic_id)
    }

    /// Model bound to the topic
    #[must_use]
    pub fn model_id_for_topic(&self, topic_id: &str) -> Option<String> {
        self.models.get(topic_id).map(|m| m.value().clone())
    }

    /// Set the loading flag and notify observers when it changes
    pub fn set_loading_state(&self, topic_id: &str, loading: bool) {
        let previous = self.loading.insert(topic_id.to_string(), loading);
        if previous != Some(loading) {
            self.events.emit(OrchestratorEvent::LoadingChanged {
                topic_id: topic_id.to_string(),
                loading,
            });
        }
    }

    /// Whether a response is being prepared for the topic
    #[must_use]
    pub fn is_loading(&self, topic_id: &str) -> bool {
        self.loading.get(topic_id).is_some_and(|l| *l)
    }

    /// Display name of the topic
    #[must_use]
    pub fn display_name(&self, topic_id: &str) -> Option<String> {
        self.display_names.get(topic_id).map(|n| n.value().clone())
    }

    /// Set the display name of the topic
    pub fn set_display_name(&self, topic_id: &str, name: impl Into<String>) {
        self.display_names.insert(topic_id.to_string(), name.into());
    }

    /// All registered AI topic ids, sorted
    ///
    /// Each call returns a fresh snapshot.
    #[must_use]
    pub fn list_all_topic_ids(&self) -> Vec<TopicId> {
        let mut ids: Vec<TopicId> = self.models.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Set the interaction mode
    pub fn set_mode(&self, topic_id: &str, mode: AiMode) {
        self.modes.insert(topic_id.to_string(), mode);
    }

    /// Interaction mode (defaults to [`AiMode::Assistant`])
    #[must_use]
    pub fn mode(&self, topic_id: &str) -> AiMode {
        self.modes.get(topic_id).map(|m| *m).unwrap_or_default()
    }

    /// Record a generation state transition
    pub fn set_generation_state(&self, topic_id: &str, state: GenerationState) {
        let changed = {
            let entry = self
                .states
                .entry(topic_id.to_string())
                .or_insert_with(|| watch::channel(GenerationState::Idle).0);
            entry.send_if_modified(|current| {
                if *current == state {
                    false
                } else {
                    *current = state;
                    true
                }
            })
        };

        if changed {
            tracing::debug!(topic_id, state = ?state, "Generation state changed");
            self.events.emit(OrchestratorEvent::StateChanged {
                topic_id: topic_id.to_string(),
                state,
            });
        }
    }

    /// Current generation state
    #[must_use]
    pub fn generation_state(&self, topic_id: &str) -> GenerationState {
        self.states
            .get(topic_id)
            .map(|s| *s.borrow())
            .unwrap_or_default()
    }

    /// Watch the generation state of a topic
    #[must_use]
    pub fn subscribe_state(&self, topic_id: &str) -> watch::Receiver<GenerationState> {
        self.states
            .entry(topic_id.to_string())
            .or_insert_with(|| watch::channel(GenerationState::Idle).0)
            .subscribe()
    }

    /// Full snapshot of one topic
    #[must_use]
    pub fn snapshot(&self, topic_id: &str) -> Option<TopicSnapshot> {
        let model_id = self.model_id_for_topic(topic_id)?;
        Some(TopicSnapshot {
            topic_id: topic_id.to_string(),
            model_id: Some(model_id),
            display_name: self.display_name(topic_id),
            mode: self.mode(topic_id),
            state: self.generation_state(topic_id),
            loading: self.is_loading(topic_id),
        })
    }
}
