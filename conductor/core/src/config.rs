//! TOML Configuration File Support
//!
//! Loads the orchestrator configuration from
//! `$XDG_CONFIG_HOME/ai-way/topic-conductor.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [models]
//! default_model = "llama3.2"
//! context_window = 8192
//!
//! [prompt]
//! system_prompt = "You are a helpful assistant."
//! safety_margin = 0.2
//! max_summary_chars = 2000
//!
//! [processing]
//! dedup_capacity = 1024
//! max_tokens = 512
//! temperature = 0.7
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::processor::ProcessorConfig;
use crate::prompt::PromptConfig;

/// Name of the configuration file inside the `ai-way` config directory
pub const CONFIG_FILE_NAME: &str = "topic-conductor.toml";

/// Default welcome text seeded into the `hi` topic
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Hi! I'm your AI assistant. Ask me anything, or open LAMA to start a longer conversation.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Models section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsToml {
    /// Model bound to the default topics
    pub default_model: Option<String>,

    /// Context window used when the catalog has none for a model
    pub context_window: Option<usize>,
}

/// Prompt section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptToml {
    /// System prompt prepended to every request
    pub system_prompt: Option<String>,

    /// Fraction of the context window kept free
    pub safety_margin: Option<f32>,

    /// Maximum length of a fallback summary
    pub max_summary_chars: Option<usize>,

    /// Static welcome seeded into the `hi` topic
    pub welcome_message: Option<String>,
}

/// Processing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingToml {
    /// Processed message ids remembered for dedup
    pub dedup_capacity: Option<usize>,

    /// Maximum response tokens
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Event channel capacity
    pub event_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Models section
    pub models: ModelsToml,

    /// Prompt section
    pub prompt: PromptToml,

    /// Processing section
    pub processing: ProcessingToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Orchestrator configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Default model (seeds the settings store when it has none)
    pub default_model: Option<String>,

    /// Prompt assembly settings
    pub prompt: PromptConfig,

    /// Queue and generation settings
    pub processing: ProcessorConfig,

    /// Event channel capacity
    pub event_capacity: usize,

    /// Static welcome seeded into the `hi` topic
    pub welcome_message: String,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            prompt: PromptConfig::default(),
            processing: ProcessorConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with a default model
    #[must_use]
    pub fn with_default_model(model: impl Into<String>) -> Self {
        Self {
            default_model: Some(model.into()),
            ..Self::default()
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a safety margin outside
    /// `[0, 1)`, a zero context window or a zero event capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let margin = self.prompt.safety_margin;
        if !(0.0..1.0).contains(&margin) {
            return Err(ConfigError::ValidationError(format!(
                "safety_margin must be in [0, 1), got {margin}"
            )));
        }
        if self.prompt.default_context_window == 0 {
            return Err(ConfigError::ValidationError(
                "context_window must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ai-way/topic-conductor.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ai-way").join(CONFIG_FILE_NAME))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting values are out of range. A missing file is not an error.
pub fn load_config() -> Result<OrchestratorConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the resulting
/// values are out of range.
pub fn load_config_from_path(path: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Defaults plus the TOML file at `path` (if it exists)
fn load_file(path: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    let mut config = OrchestratorConfig::default();

    let Some(config_path) = path else {
        return Ok(config);
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        return Ok(config);
    }

    let content = std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.to_path_buf(),
        source: e,
    })?;
    let toml_config: ConductorToml = toml::from_str(&content)?;
    apply_toml_config(&mut config, &toml_config);
    config.config_file_path = Some(config_path.to_path_buf());
    config.source = ConfigSource::File;

    tracing::info!(path = %config_path.display(), "Loaded configuration from file");
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut OrchestratorConfig, toml: &ConductorToml) {
    if toml.models.default_model.is_some() {
        config.default_model = toml.models.default_model.clone();
    }
    if let Some(window) = toml.models.context_window {
        config.prompt.default_context_window = window;
    }

    if let Some(prompt) = &toml.prompt.system_prompt {
        config.prompt.system_prompt = prompt.clone();
    }
    if let Some(margin) = toml.prompt.safety_margin {
        config.prompt.safety_margin = margin;
    }
    if let Some(chars) = toml.prompt.max_summary_chars {
        config.prompt.max_summary_chars = chars;
    }
    if let Some(welcome) = &toml.prompt.welcome_message {
        config.welcome_message = welcome.clone();
    }

    if let Some(capacity) = toml.processing.dedup_capacity {
        config.processing.dedup_capacity = capacity;
    }
    if let Some(max_tokens) = toml.processing.max_tokens {
        config.processing.max_tokens = max_tokens;
    }
    if toml.processing.temperature.is_some() {
        config.processing.temperature = toml.processing.temperature;
    }
    if let Some(capacity) = toml.processing.event_capacity {
        config.event_capacity = capacity;
    }
}

/// Apply environment overrides read through `var`
///
/// Unparseable values are ignored with a warning.
fn apply_env_config(config: &mut OrchestratorConfig, var: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
        let value = value?;
        let parsed = value.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value = %value, "Ignoring unparseable environment override");
        }
        parsed
    }

    if let Some(model) = var("CONDUCTOR_DEFAULT_MODEL").filter(|m| !m.trim().is_empty()) {
        config.default_model = Some(model);
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = var("CONDUCTOR_SYSTEM_PROMPT") {
        config.prompt.system_prompt = prompt;
        config.source = ConfigSource::Env;
    }
    if let Some(window) = parsed("CONDUCTOR_CONTEXT_WINDOW", var("CONDUCTOR_CONTEXT_WINDOW")) {
        config.prompt.default_context_window = window;
        config.source = ConfigSource::Env;
    }
    if let Some(margin) = parsed("CONDUCTOR_SAFETY_MARGIN", var("CONDUCTOR_SAFETY_MARGIN")) {
        config.prompt.safety_margin = margin;
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = parsed("CONDUCTOR_DEDUP_CAPACITY", var("CONDUCTOR_DEDUP_CAPACITY")) {
        config.processing.dedup_capacity = capacity;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Default model override
    pub default_model: Option<String>,

    /// System prompt override
    pub system_prompt: Option<String>,

    /// Context window override
    pub context_window: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set system prompt override
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set context window override
    #[must_use]
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.default_model.is_none() && self.system_prompt.is_none() && self.context_window.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns a validation error if the result is out of range.
    pub fn apply(&self, config: &mut OrchestratorConfig) -> Result<(), ConfigError> {
        if let Some(model) = &self.default_model {
            config.default_model = Some(model.clone());
        }
        if let Some(prompt) = &self.system_prompt {
            config.prompt.system_prompt = prompt.clone();
        }
        if let Some(window) = self.context_window {
            config.prompt.default_context_window = window;
        }
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.default_model, None);
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.processing.dedup_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("ai-way/topic-conductor.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[models]
default_model = "custom-model"
context_window = 8192

[prompt]
system_prompt = "Be brief."
safety_margin = 0.1
max_summary_chars = 500
welcome_message = "Hello there"

[processing]
dedup_capacity = 64
max_tokens = 256
temperature = 0.3
"#,
        );

        let config = load_file(Some(file.path())).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("custom-model"));
        assert_eq!(config.prompt.default_context_window, 8192);
        assert_eq!(config.prompt.system_prompt, "Be brief.");
        assert!((config.prompt.safety_margin - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.prompt.max_summary_chars, 500);
        assert_eq!(config.welcome_message, "Hello there");
        assert_eq!(config.processing.dedup_capacity, 64);
        assert_eq!(config.processing.max_tokens, 256);
        assert!(config
            .processing
            .temperature
            .is_some_and(|t| (t - 0.3).abs() < f32::EPSILON));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = toml_file("[models]\ndefault_model = \"partial\"\n");
        let config = load_file(Some(file.path())).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("partial"));
        assert_eq!(config.prompt, PromptConfig::default());
    }

    #[test]
    fn test_missing_file_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let config = load_file(Some(missing.as_path())).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[models\ndefault_model = ");
        let err = load_file(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("[models]\ndefault_model = \"file-model\"\ncontext_window = 100\n");
        let mut config = load_file(Some(file.path())).unwrap();

        apply_env_config(
            &mut config,
            env(&[
                ("CONDUCTOR_DEFAULT_MODEL", "env-model"),
                ("CONDUCTOR_SAFETY_MARGIN", "0.5"),
                ("CONDUCTOR_DEDUP_CAPACITY", "not-a-number"),
            ]),
        );

        assert_eq!(config.default_model.as_deref(), Some("env-model"));
        assert_eq!(config.prompt.default_context_window, 100);
        assert!((config.prompt.safety_margin - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.processing.dedup_capacity, 1024);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_validation_rejects_bad_margin() {
        let mut config = OrchestratorConfig::default();
        config.prompt.safety_margin = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.prompt.safety_margin = 0.2;
        config.prompt.default_context_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = OrchestratorConfig::default();
        apply_env_config(&mut config, env(&[("CONDUCTOR_DEFAULT_MODEL", "env-model")]));

        ConfigOverrides::new()
            .with_default_model("cli-model")
            .with_context_window(2048)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.default_model.as_deref(), Some("cli-model"));
        assert_eq!(config.prompt.default_context_window, 2048);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = OrchestratorConfig::with_default_model("m");
        let overrides = ConfigOverrides::new();
        assert!(overrides.is_empty());
        overrides.apply(&mut config).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("m"));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
