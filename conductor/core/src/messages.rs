//! Conversation Message Types
//!
//! Identifiers and message shapes shared by every component: topic and message
//! identifiers, synthetic identity ids, roles, inbound messages and prompt turns.
//!
//! # Design Philosophy
//!
//! Topics are opaque strings owned by the storage layer; the core never invents
//! topic ids except for the default topics it bootstraps. Message and identity ids
//! are newtypes so they cannot be confused with free-form text at call sites.

use serde::{Deserialize, Serialize};

/// Conversation topic identifier (opaque, owned by the storage layer)
pub type TopicId = String;

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing identifier (e.g. one assigned by the transport)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message sender (a person or a synthetic AI participant)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(pub String);

impl IdentityId {
    /// Create an identity ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Role of a turn in a prompt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Human participant
    User,
    /// AI participant
    Assistant,
    /// Instructions or injected context
    System,
}

impl MessageRole {
    /// Wire label used by chat-style backends
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A message delivered to the core for a topic
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Message identity used for deduplication
    pub id: MessageId,
    /// Sender of the message
    pub sender: IdentityId,
    /// Raw text
    pub text: String,
}

impl IncomingMessage {
    /// Create an incoming message
    pub fn new(id: MessageId, sender: IdentityId, text: impl Into<String>) -> Self {
        Self {
            id,
            sender,
            text: text.into(),
        }
    }
}

/// A role-tagged turn ready for backend consumption
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTurn {
    /// Who the turn is attributed to
    pub role: MessageRole,
    /// Turn text
    pub content: String,
}

impl PromptTurn {
    /// Create a turn with an explicit role
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// User turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// System turn
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_unique() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("msg_"));
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
        assert_eq!(
            serde_json::to_string(&MessageRole::System).unwrap(),
            "\"system\""
        );
    }

    #[test]
    fn test_prompt_turn_constructors() {
        assert_eq!(PromptTurn::user("hi").role, MessageRole::User);
        assert_eq!(PromptTurn::assistant("hello").content, "hello");
    }
}
