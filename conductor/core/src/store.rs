//! Conversation Store
//!
//! The durable, append-only message store is an external collaborator. This module
//! defines the trait the core consumes and an in-memory implementation used by the
//! daemon and the tests.
//!
//! # Design Philosophy
//!
//! The core never resolves conflicts or edits history. It appends messages and reads
//! the latest consistent view of a channel. Each topic maps to one channel; a
//! channel may carry the model it was created for so AI topics can be recovered
//! after a restart.
//!
//! Messages that stem from an inbound delivery carry its id. The processor asks the
//! store about ids that have left its in-memory dedup window, so a redelivered
//! message is recognized however old it is.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::messages::{IdentityId, MessageId, TopicId};

/// A persisted message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Topic the message belongs to
    pub topic_id: TopicId,
    /// Sender identity
    pub sender: IdentityId,
    /// Message content
    pub content: String,
    /// When the message was stored (Unix timestamp ms)
    pub timestamp: u64,
    /// Inbound delivery this message stems from
    #[serde(default)]
    pub delivery_id: Option<MessageId>,
}

/// A message to append
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    /// Sender identity
    pub sender: IdentityId,
    /// Message content
    pub content: String,
    /// Inbound delivery this message stems from
    pub delivery_id: Option<MessageId>,
}

impl NewMessage {
    /// Create a new message
    pub fn new(sender: IdentityId, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            delivery_id: None,
        }
    }

    /// Tag the message with the delivery it stems from
    #[must_use]
    pub fn with_delivery_id(mut self, id: MessageId) -> Self {
        self.delivery_id = Some(id);
        self
    }
}

/// Channel metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Topic identifier
    pub topic_id: TopicId,
    /// Model the channel was created for (AI topics only)
    pub model_id: Option<String>,
    /// When the channel was created (Unix timestamp ms)
    pub created_at: u64,
}

/// Durable conversation store
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a channel if it does not exist
    ///
    /// Returns `true` if the channel was created by this call.
    async fn create_channel(&self, topic_id: &str, model_id: Option<&str>) -> anyhow::Result<bool>;

    /// All channels
    async fn channels(&self) -> anyhow::Result<Vec<ChannelInfo>>;

    /// Append a message to a channel, creating the channel if needed
    async fn append_message(&self, topic_id: &str, message: NewMessage)
        -> anyhow::Result<StoredMessage>;

    /// Ordered history of a channel (oldest first, empty if unknown)
    async fn history(&self, topic_id: &str) -> anyhow::Result<Vec<StoredMessage>>;

    /// Whether a channel holds a message stemming from the delivery
    ///
    /// The default scans the history; indexed stores should override it.
    async fn has_delivery(&self, topic_id: &str, delivery_id: &MessageId) -> anyhow::Result<bool> {
        Ok(self
            .history(topic_id)
            .await?
            .iter()
            .any(|m| m.delivery_id.as_ref() == Some(delivery_id)))
    }
}

#[derive(Debug, Default)]
struct Channel {
    info: Option<ChannelInfo>,
    messages: Vec<StoredMessage>,
}

/// In-memory conversation store
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    channels: RwLock<HashMap<TopicId, Channel>>,
}

impl InMemoryConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages in a channel
    #[must_use]
    pub fn message_count(&self, topic_id: &str) -> usize {
        self.channels
            .read()
            .get(topic_id)
            .map_or(0, |c| c.messages.len())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_channel(&self, topic_id: &str, model_id: Option<&str>) -> anyhow::Result<bool> {
        if topic_id.is_empty() {
            anyhow::bail!("channel id must not be empty");
        }

        let mut channels = self.channels.write();
        let channel = channels.entry(topic_id.to_string()).or_default();
        if channel.info.is_some() {
            return Ok(false);
        }
        channel.info = Some(ChannelInfo {
            topic_id: topic_id.to_string(),
            model_id: model_id.map(str::to_string),
            created_at: now_ms(),
        });
        Ok(true)
    }

    async fn channels(&self) -> anyhow::Result<Vec<ChannelInfo>> {
        let mut infos: Vec<ChannelInfo> = self
            .channels
            .read()
            .values()
            .filter_map(|c| c.info.clone())
            .collect();
        infos.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));
        Ok(infos)
    }

    async fn append_message(
        &self,
        topic_id: &str,
        message: NewMessage,
    ) -> anyhow::Result<StoredMessage> {
        let stored = StoredMessage {
            id: MessageId::new(),
            topic_id: topic_id.to_string(),
            sender: message.sender,
            content: message.content,
            timestamp: now_ms(),
            delivery_id: message.delivery_id,
        };

        let mut channels = self.channels.write();
        let channel = channels.entry(topic_id.to_string()).or_default();
        if channel.info.is_none() {
            channel.info = Some(ChannelInfo {
                topic_id: topic_id.to_string(),
                model_id: None,
                created_at: stored.timestamp,
            });
        }
        channel.messages.push(stored.clone());
        Ok(stored)
    }

    async fn history(&self, topic_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        Ok(self
            .channels
            .read()
            .get(topic_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default())
    }

    async fn has_delivery(&self, topic_id: &str, delivery_id: &MessageId) -> anyhow::Result<bool> {
        Ok(self.channels.read().get(topic_id).is_some_and(|c| {
            c.messages
                .iter()
                .any(|m| m.delivery_id.as_ref() == Some(delivery_id))
        }))
    }
}

/// Current timestamp in milliseconds
pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
