//! Topic Conductor - AI Conversation Orchestration for ai-way
//!
//! This crate routes conversation turns to language-model backends, keeps
//! per-topic processing state, assembles prompts from stored history and
//! provisions a synthetic participant identity per model so generated messages
//! are attributed like any other sender. It is independent of any UI or storage
//! engine: both are consumed as trait objects.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │   new() builds components       init() wires the cycle below     │
//! │                                                                  │
//! │  ┌──────────────┐   Weak    ┌──────────────────┐                 │
//! │  │PromptBuilder │◄─────────►│ MessageProcessor │──► TaskCoord.   │
//! │  └──────┬───────┘   Arc     └───┬──────────┬───┘                 │
//! │         │                       │          │                     │
//! │  ┌──────┴───────┐        ┌──────┴─────┐ ┌──┴────────────────┐    │
//! │  │TopicRegistry │        │  Backends  │ │ContactProvisioner │    │
//! │  └──────────────┘        └────────────┘ └───────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//!        ▲ ConversationStore / IdentityProvisioner / ModelCatalog /
//!          TopicAnalysis / SettingsStore (collaborators)
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: Public façade; two-phase construction and bootstrap
//! - [`TopicRegistry`]: Which topics are AI-backed and their per-topic state
//! - [`ContactProvisioner`]: One synthetic identity per model, memoized
//! - [`TaskCoordinator`]: Background analysis tasks after each turn
//! - [`PromptBuilder`]: History to prompt, with context-window restarts
//! - [`MessageProcessor`]: Per-topic FIFO queues, dedup and generation
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use topic_conductor::{
//!     Collaborators, IdentityId, IncomingMessage, MessageId, OllamaBackend, Orchestrator,
//!     OrchestratorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(OllamaBackend::from_env());
//!     let orchestrator = Orchestrator::new(
//!         OrchestratorConfig::with_default_model("llama3.2"),
//!         Collaborators::in_memory(backend),
//!     );
//!     orchestrator.init().await?;
//!
//!     let mut events = orchestrator.subscribe();
//!     orchestrator
//!         .process_incoming_message(
//!             "lama",
//!             IncomingMessage::new(MessageId::new(), IdentityId::new("me"), "Hello!"),
//!         )
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         // Render tokens, loading flags, ...
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`topics`]: Topic registry and generation state
//! - [`contacts`]: Synthetic identity cache
//! - [`tasks`]: Background task coordination
//! - [`prompt`]: Prompt assembly and context-window restarts
//! - [`processor`]: Queueing, dedup and generation lifecycle
//! - [`orchestrator`]: Façade and bootstrapping
//! - [`backend`]: LLM backend abstraction (Ollama, etc.)
//! - [`store`], [`identity`], [`models`], [`analysis`], [`settings`]: Collaborator traits
//! - [`events`]: Progress notifications
//! - [`config`]: TOML / environment configuration
//! - [`error`]: Error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod backend;
pub mod config;
pub mod contacts;
pub mod error;
pub mod events;
pub mod identity;
pub mod messages;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod prompt;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod topics;

// Re-exports for convenience
pub use analysis::TopicAnalysis;
pub use backend::{
    BackendRegistry, LlmBackend, LlmRequest, ModelInfo, OllamaBackend,
    StreamingToken,
};
pub use contacts::ContactProvisioner;
pub use error::{ErrorKind, OrchestratorError, Result};
pub use events::{EventBus, OrchestratorEvent};
pub use identity::{IdentityProvisioner, IdentitySeed, InMemoryIdentityProvisioner};
pub use messages::{IdentityId, IncomingMessage, MessageId, MessageRole, PromptTurn, TopicId};
pub use models::{ModelCatalog, ModelDescriptor, StaticModelCatalog};
pub use orchestrator::{Collaborators, Orchestrator, HI_TOPIC_ID, LAMA_TOPIC_ID};
pub use processor::{EnqueueOutcome, MessageProcessor, ProcessorConfig};
pub use prompt::{
    CharTokenEstimator, PromptBuilder, PromptConfig, PromptResult, RestartContext,
    TokenEstimator,
};
pub use settings::{InMemorySettings, SettingsStore};
pub use store::{ChannelInfo, ConversationStore, InMemoryConversationStore, NewMessage, StoredMessage};
pub use tasks::{Task, TaskConfig, TaskCoordinator, TaskId, TaskRunReport, TaskStatus, TaskType};
pub use topics::{AiMode, GenerationState, TopicRegistry};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConductorToml, ConfigError,
    ConfigOverrides, ConfigSource, OrchestratorConfig,
};
