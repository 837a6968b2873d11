//! Orchestrator Events
//!
//! Notifications sent from the core to UI surfaces and other observers: loading
//! flags, generation state, streamed tokens and persistence outcomes.
//!
//! # Design Philosophy
//!
//! Delivery is best-effort. The core publishes on a broadcast channel and never
//! waits for a subscriber; a slow or missing observer loses events instead of
//! stalling a generation. Surfaces that fall behind receive a `Lagged` error from
//! their receiver and should resynchronise from the registry accessors.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::messages::{MessageId, TopicId};
use crate::topics::GenerationState;

/// Default capacity of the event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events from the core to observers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// A topic was registered or rebound to a model
    TopicRegistered {
        /// Topic identifier
        topic_id: TopicId,
        /// Model now bound to the topic
        model_id: String,
    },

    /// Loading flag changed for a topic
    LoadingChanged {
        /// Topic identifier
        topic_id: TopicId,
        /// Whether a response is being prepared
        loading: bool,
    },

    /// Generation state changed for a topic
    StateChanged {
        /// Topic identifier
        topic_id: TopicId,
        /// New state
        state: GenerationState,
    },

    /// Partial output from the backend
    Token {
        /// Topic identifier
        topic_id: TopicId,
        /// Message being answered (if known)
        reply_to: Option<MessageId>,
        /// Token text
        text: String,
    },

    /// A context-window restart replaced older history with a summary
    ContextRestarted {
        /// Topic identifier
        topic_id: TopicId,
        /// Estimated tokens of the full prompt
        estimated_tokens: usize,
        /// Budget the prompt had to fit into
        budget_tokens: usize,
    },

    /// A generated response was persisted
    ResponsePersisted {
        /// Topic identifier
        topic_id: TopicId,
        /// Id of the stored AI message
        message_id: MessageId,
        /// Message that was answered (if known)
        reply_to: Option<MessageId>,
    },

    /// Generation failed; the topic moved to the error state
    GenerationFailed {
        /// Topic identifier
        topic_id: TopicId,
        /// Message that was being answered (if known)
        reply_to: Option<MessageId>,
        /// Error description
        error: String,
    },

    /// Generation was cancelled; nothing was persisted
    GenerationCancelled {
        /// Topic identifier
        topic_id: TopicId,
        /// Message that was being answered (if known)
        reply_to: Option<MessageId>,
    },

    /// Generated text could not be saved (inconsistency)
    PersistFailed {
        /// Topic identifier
        topic_id: TopicId,
        /// Error description
        error: String,
    },
}

impl OrchestratorEvent {
    /// Topic this event belongs to
    #[must_use]
    pub fn topic_id(&self) -> &str {
        match self {
            Self::TopicRegistered { topic_id, .. }
            | Self::LoadingChanged { topic_id, .. }
            | Self::StateChanged { topic_id, .. }
            | Self::Token { topic_id, .. }
            | Self::ContextRestarted { topic_id, .. }
            | Self::ResponsePersisted { topic_id, .. }
            | Self::GenerationFailed { topic_id, .. }
            | Self::GenerationCancelled { topic_id, .. }
            | Self::PersistFailed { topic_id, .. } => topic_id,
        }
    }
}

/// Fire-and-forget event publisher
///
/// Cloning shares the underlying channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event without waiting
    pub fn emit(&self, event: OrchestratorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Register an observer
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
