//! Orchestration Errors
//!
//! Every fallible operation in the core returns [`OrchestratorError`]. Collaborator
//! traits (store, backend, identity provisioning, analysis) return `anyhow::Result`
//! and are mapped into this type at the component boundary so callers can match on
//! an [`ErrorKind`] without knowing which collaborator failed.

use thiserror::Error;

/// Broad error category, used by callers to decide how to surface a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected synchronously (unknown topic, unbound model, bad input)
    Validation,
    /// Missing or invalid configuration (e.g. no default model)
    Configuration,
    /// Inference backend failed or produced malformed output
    Backend,
    /// History read or persist failure
    Storage,
    /// Background task failure
    Task,
    /// Wiring or lifecycle misuse inside the core itself
    Internal,
}

/// Errors produced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Topic is not registered as an AI topic
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Topic is registered but has no model bound to it
    #[error("topic {0} has no bound model")]
    UnboundModel(String),

    /// Message or argument failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Required configuration is missing
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No backend is registered for the requested model
    #[error("no backend registered for model {0}")]
    NoBackend(String),

    /// Backend invocation failed
    #[error("backend error for model {model}: {message}")]
    Backend {
        /// Model the request was sent to
        model: String,
        /// Backend-provided failure description
        message: String,
    },

    /// Generation was cancelled before completion
    #[error("generation cancelled for topic {0}")]
    Cancelled(String),

    /// Storage read or write failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Generated text exists but could not be persisted
    #[error("generated response for topic {topic} was not persisted: {message}")]
    PersistFailed {
        /// Topic the response belongs to
        topic: String,
        /// Underlying storage failure
        message: String,
    },

    /// Identity provisioning failed
    #[error("identity provisioning failed for model {model}: {message}")]
    Identity {
        /// Model the identity was requested for
        model: String,
        /// Underlying failure
        message: String,
    },

    /// Background task failed
    #[error("task {task} failed: {message}")]
    Task {
        /// Task type label
        task: String,
        /// Underlying failure
        message: String,
    },

    /// A component was used before two-phase wiring completed
    #[error("{0} used before wiring completed")]
    NotWired(&'static str),

    /// Task coordinator used before `initialize()`
    #[error("task coordinator is not initialized")]
    NotInitialized,
}

impl OrchestratorError {
    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTopic(_)
            | Self::UnboundModel(_)
            | Self::InvalidInput(_)
            | Self::NotInitialized => ErrorKind::Validation,
            Self::Configuration(_) | Self::NoBackend(_) => ErrorKind::Configuration,
            Self::Backend { .. } | Self::Cancelled(_) => ErrorKind::Backend,
            Self::Storage(_) | Self::PersistFailed { .. } | Self::Identity { .. } => {
                ErrorKind::Storage
            }
            Self::Task { .. } => ErrorKind::Task,
            Self::NotWired(_) => ErrorKind::Internal,
        }
    }

    /// Wrap a store failure
    pub(crate) fn storage(err: &anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, OrchestratorError>;
