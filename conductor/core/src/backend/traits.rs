//! LLM Backend Traits
//!
//! Trait definitions for inference backends. This abstraction lets the core drive
//! different providers (Ollama, hosted APIs, test doubles) without changing the
//! processing logic.
//!
//! # Design Philosophy
//!
//! The LlmBackend trait provides a common interface for:
//! - Sending role-tagged prompts and receiving streamed responses
//! - Health checking the backend
//! - Querying available models
//!
//! Only streaming is required. Backends that cannot list models report none and are
//! assumed healthy.
//!
//! Streaming responses arrive on an `mpsc` channel. Dropping the receiver is the
//! cancellation signal: implementations must stop producing once a send fails.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::PromptTurn;

/// Token stream events from LLM backends
#[derive(Clone, Debug)]
pub enum StreamingToken {
    /// A token from the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// A chat request
#[derive(Clone, Debug)]
pub struct LlmRequest {
    /// Ordered prompt turns (system, history, new message)
    pub messages: Vec<PromptTurn>,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            model: String::new(),
            max_tokens: 0,
            temperature: 0.7,
        }
    }
}

impl LlmRequest {
    /// Create a new request with turns and model
    pub fn new(messages: Vec<PromptTurn>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Information about an available model
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count (if known)
    pub parameters: Option<String>,
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that will receive tokens as they arrive.
    /// The channel will be closed when the response is complete or an error occurs.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// List available models
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }

    /// Check if a specific model is available
    ///
    /// A name without a tag matches its `:latest` variant.
    async fn has_model(&self, model: &str) -> anyhow::Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| {
            m.name == model || m.name.strip_suffix(":latest") == Some(model)
        }))
    }
}
