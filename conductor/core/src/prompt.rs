//! Prompt Assembly
//!
//! Turns a topic's stored history plus the incoming message into an ordered list of
//! role-tagged turns for the backend, restarting the context with a summary when the
//! bound model's window would overflow.
//!
//! # Context Restart
//!
//! The window check is a pure computation: it estimates the assembled prompt with a
//! [`TokenEstimator`], compares it against `window * (1 - safety_margin)` and, when
//! over budget, picks the longest history suffix that still fits next to a summary
//! of everything before it. Nothing about a restart is stored; every build decides
//! again from the current history.

use std::sync::{Arc, OnceLock, Weak};

use crate::analysis::TopicAnalysis;
use crate::contacts::ContactProvisioner;
use crate::error::{OrchestratorError, Result};
use crate::messages::{IdentityId, MessageRole, PromptTurn};
use crate::models::ModelCatalog;
use crate::processor::MessageProcessor;
use crate::store::ConversationStore;
use crate::topics::{AiMode, TopicRegistry};

/// Fixed per-turn overhead used by [`CharTokenEstimator`]
pub const TOKENS_PER_TURN: usize = 4;

/// Default context window when the model does not declare one
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Default fraction of the window kept free for the response
pub const DEFAULT_SAFETY_MARGIN: f32 = 0.2;

/// Default maximum length of a fallback summary, in characters
pub const DEFAULT_MAX_SUMMARY_CHARS: usize = 2000;

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant taking part in a group conversation.";

/// Instruction appended in knowledge-sharing mode
pub const KNOWLEDGE_SHARING_PROMPT: &str =
    "Share relevant background knowledge proactively and point out related topics the participants may want to explore.";

const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:";

/// Estimates the token cost of a prompt
///
/// Implementations must be monotonic: adding a turn or lengthening one never
/// lowers the estimate.
pub trait TokenEstimator: Send + Sync {
    /// Estimated tokens for the given turns
    fn estimate(&self, turns: &[PromptTurn]) -> usize;
}

/// Roughly four characters per token plus a fixed overhead per turn
#[derive(Clone, Copy, Debug, Default)]
pub struct CharTokenEstimator;

impl TokenEstimator for CharTokenEstimator {
    fn estimate(&self, turns: &[PromptTurn]) -> usize {
        turns
            .iter()
            .map(|t| t.content.chars().count().div_ceil(4) + TOKENS_PER_TURN)
            .sum()
    }
}

/// Prompt assembly settings
#[derive(Clone, Debug, PartialEq)]
pub struct PromptConfig {
    /// System prompt (empty = none)
    pub system_prompt: String,
    /// Window used when the catalog has no value for the model
    pub default_context_window: usize,
    /// Fraction of the window kept free, in `[0, 1)`
    pub safety_margin: f32,
    /// Maximum length of a fallback summary in characters
    pub max_summary_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_context_window: DEFAULT_CONTEXT_WINDOW,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            max_summary_chars: DEFAULT_MAX_SUMMARY_CHARS,
        }
    }
}

impl PromptConfig {
    /// Token budget for a window
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn budget_for(&self, window: usize) -> usize {
        let margin = f64::from(self.safety_margin.clamp(0.0, 0.99));
        (window as f64 * (1.0 - margin)).floor() as usize
    }
}

/// Outcome of a window check
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestartContext {
    /// Whether older history must be replaced by a summary
    pub needs_restart: bool,
    /// Summary of the dropped history (None if no restart or nothing useful)
    pub summary: Option<String>,
    /// Estimated tokens of the full, unrestarted prompt
    pub estimated_tokens: usize,
    /// Token budget the prompt must fit into
    pub budget_tokens: usize,
    /// Index of the first conversation turn kept verbatim
    pub retained_from: usize,
}

/// An assembled prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptResult {
    /// Ordered turns, new message last
    pub turns: Vec<PromptTurn>,
    /// Whether a context restart was applied
    pub restarted: bool,
    /// Summary substituted for older turns
    pub summary: Option<String>,
    /// Estimated tokens of `turns`
    pub estimated_tokens: usize,
    /// Estimated tokens of the prompt without a restart
    pub unrestarted_tokens: usize,
    /// Token budget of the topic's model
    pub budget_tokens: usize,
}

/// Builds prompts from stored history
pub struct PromptBuilder {
    config: PromptConfig,
    registry: Arc<TopicRegistry>,
    store: Arc<dyn ConversationStore>,
    catalog: Arc<dyn ModelCatalog>,
    contacts: Arc<ContactProvisioner>,
    analysis: Option<Arc<dyn TopicAnalysis>>,
    estimator: Arc<dyn TokenEstimator>,
    processor: OnceLock<Weak<MessageProcessor>>,
}

impl std::fmt::Debug for PromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBuilder")
            .field("config", &self.config)
            .field("wired", &self.processor.get().is_some())
            .finish_non_exhaustive()
    }
}

impl PromptBuilder {
    /// Create a builder (phase one; call [`Self::set_message_processor`] before use)
    #[must_use]
    pub fn new(
        config: PromptConfig,
        registry: Arc<TopicRegistry>,
        store: Arc<dyn ConversationStore>,
        catalog: Arc<dyn ModelCatalog>,
        contacts: Arc<ContactProvisioner>,
        analysis: Option<Arc<dyn TopicAnalysis>>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            catalog,
            contacts,
            analysis,
            estimator: Arc::new(CharTokenEstimator),
            processor: OnceLock::new(),
        }
    }

    /// Replace the token estimator
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Prompt settings
    #[must_use]
    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Bind the message processor
    ///
    /// Only the first call takes effect.
    pub fn set_message_processor(&self, processor: Weak<MessageProcessor>) {
        if self.processor.set(processor).is_err() {
            tracing::debug!("Prompt builder already wired");
        }
    }

    fn message_processor(&self) -> Result<Arc<MessageProcessor>> {
        let processor = self.processor.get().and_then(Weak::upgrade);
        debug_assert!(processor.is_some(), "prompt builder used before wiring");
        processor.ok_or(OrchestratorError::NotWired("prompt builder"))
    }

    /// Assemble the prompt for a new message
    ///
    /// # Errors
    ///
    /// Returns `NotWired` before wiring and a storage error if history cannot be
    /// read.
    pub async fn build_prompt(
        &self,
        topic_id: &str,
        new_text: &str,
        sender: &IdentityId,
    ) -> Result<PromptResult> {
        let processor = self.message_processor()?;
        processor.wait_for_pending_persist(topic_id).await;

        let stored = self
            .store
            .history(topic_id)
            .await
            .map_err(|e| OrchestratorError::storage(&e))?;

        // User turns still waiting in the queue, plus this one, are usually
        // already stored; they sit among the latest non-AI messages.
        let mut pending = processor.queued_turns(topic_id);
        pending.push((sender.clone(), new_text.to_string()));
        let mut unanswered = pending.len();
        let mut skip = vec![false; stored.len()];
        for (i, m) in stored.iter().enumerate().rev() {
            if unanswered == 0 {
                break;
            }
            if self.contacts.is_ai_identity(&m.sender) {
                continue;
            }
            unanswered -= 1;
            if let Some(p) = pending
                .iter()
                .position(|(s, t)| *s == m.sender && *t == m.content)
            {
                pending.swap_remove(p);
                skip[i] = true;
            }
        }

        let mut conversation: Vec<PromptTurn> = stored
            .iter()
            .zip(skip)
            .filter(|(_, skipped)| !skipped)
            .map(|(m, _)| {
                let role = if self.contacts.is_ai_identity(&m.sender) {
                    MessageRole::Assistant
                } else {
                    MessageRole::User
                };
                PromptTurn::new(role, m.content.clone())
            })
            .collect();
        conversation.push(PromptTurn::user(new_text));

        let context = self.check_window(topic_id, &conversation).await?;

        let mut turns = Vec::with_capacity(conversation.len() + 2);
        turns.extend(self.system_turn(topic_id));
        if context.needs_restart {
            turns.extend(context.summary.as_deref().map(summary_turn));
        }
        turns.extend_from_slice(&conversation[context.retained_from..]);

        let estimated_tokens = self.estimator.estimate(&turns);
        tracing::debug!(
            topic_id,
            turns = turns.len(),
            estimated_tokens,
            restarted = context.needs_restart,
            "Built prompt"
        );

        Ok(PromptResult {
            turns,
            restarted: context.needs_restart,
            summary: context.summary,
            estimated_tokens,
            unrestarted_tokens: context.estimated_tokens,
            budget_tokens: context.budget_tokens,
        })
    }

    /// Decide whether `conversation` fits the topic's model window
    ///
    /// `conversation` holds the history turns with the new message last; the
    /// system turn is added internally. The last turn is always retained.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for catalog lookups that can
    /// fail.
    pub async fn check_window(
        &self,
        topic_id: &str,
        conversation: &[PromptTurn],
    ) -> Result<RestartContext> {
        let system: Vec<PromptTurn> = self.system_turn(topic_id).into_iter().collect();
        let window = self.context_window(topic_id);
        let budget_tokens = self.config.budget_for(window);

        let full: Vec<PromptTurn> = system.iter().chain(conversation).cloned().collect();
        let estimated_tokens = self.estimator.estimate(&full);

        if estimated_tokens <= budget_tokens || conversation.len() <= 1 {
            return Ok(RestartContext {
                needs_restart: false,
                summary: None,
                estimated_tokens,
                budget_tokens,
                retained_from: 0,
            });
        }

        let reserve = self
            .estimator
            .estimate(&[summary_turn(&"x".repeat(self.config.max_summary_chars))]);
        let retained_from =
            self.retained_from(&system, conversation, budget_tokens.saturating_sub(reserve));

        let dropped = &conversation[..retained_from];
        let mut summary = Some(self.generate_summary(topic_id, dropped).await)
            .filter(|s| !s.trim().is_empty());

        // A summary must never make the prompt larger than the original
        if let Some(text) = summary.as_deref() {
            let restarted: Vec<PromptTurn> = system
                .iter()
                .cloned()
                .chain(std::iter::once(summary_turn(text)))
                .chain(conversation[retained_from..].iter().cloned())
                .collect();
            if self.estimator.estimate(&restarted) >= estimated_tokens {
                tracing::debug!(topic_id, "Summary does not shrink prompt, dropping it");
                summary = None;
            }
        }

        Ok(RestartContext {
            needs_restart: true,
            summary,
            estimated_tokens,
            budget_tokens,
            retained_from,
        })
    }

    /// First index of the longest suffix that fits `budget`, always dropping at least one turn
    fn retained_from(
        &self,
        system: &[PromptTurn],
        conversation: &[PromptTurn],
        budget: usize,
    ) -> usize {
        let last = conversation.len() - 1;
        let mut start = last;
        while start > 1 {
            let candidate: Vec<PromptTurn> = system
                .iter()
                .chain(&conversation[start - 1..])
                .cloned()
                .collect();
            if self.estimator.estimate(&candidate) > budget {
                break;
            }
            start -= 1;
        }
        start
    }

    /// Summarise history that is about to be dropped
    ///
    /// Prefers the analysis service's structured summary and falls back to the
    /// most recent `max_summary_chars` of the concatenated turns.
    pub async fn generate_summary(&self, topic_id: &str, history: &[PromptTurn]) -> String {
        if let Some(analysis) = &self.analysis {
            match analysis.summary(topic_id).await {
                Ok(Some(summary)) if !summary.trim().is_empty() => return summary,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(topic_id, error = %e, "Topic summary unavailable, using fallback");
                }
            }
        }

        let joined = history
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.content))
            .collect::<Vec<_>>()
            .join("\n");
        truncate_tail(&joined, self.config.max_summary_chars)
    }

    /// System turn for the topic's mode
    fn system_turn(&self, topic_id: &str) -> Option<PromptTurn> {
        let base = self.config.system_prompt.trim();
        let content = match self.registry.mode(topic_id) {
            AiMode::KnowledgeSharing if base.is_empty() => KNOWLEDGE_SHARING_PROMPT.to_string(),
            AiMode::KnowledgeSharing => format!("{base}\n\n{KNOWLEDGE_SHARING_PROMPT}"),
            AiMode::Assistant | AiMode::PassiveObserver => base.to_string(),
        };
        (!content.is_empty()).then(|| PromptTurn::system(content))
    }

    /// Context window of the topic's model
    fn context_window(&self, topic_id: &str) -> usize {
        self.registry
            .model_id_for_topic(topic_id)
            .and_then(|model| self.catalog.model(&model))
            .and_then(|d| d.context_window)
            .unwrap_or(self.config.default_context_window)
    }
}

fn summary_turn(summary: &str) -> PromptTurn {
    PromptTurn::system(format!("{SUMMARY_PREFIX}\n{summary}"))
}

/// Keep the last `max_chars` characters
fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::events::EventBus;
    use crate::identity::InMemoryIdentityProvisioner;
    use crate::models::{ModelDescriptor, StaticModelCatalog};
    use crate::store::InMemoryConversationStore;
    use crate::tasks::TaskConfig;

    struct FixedSummary(String);

    #[async_trait]
    impl TopicAnalysis for FixedSummary {
        async fn summary(&self, _topic_id: &str) -> anyhow::Result<Option<String>> {
            Ok(Some(self.0.clone()))
        }

        async fn run_task(
            &self,
            _topic_id: &str,
            _task: &TaskConfig,
            _message_text: &str,
        ) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    struct BrokenAnalysis;

    #[async_trait]
    impl TopicAnalysis for BrokenAnalysis {
        async fn summary(&self, _topic_id: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("analysis offline")
        }

        async fn run_task(
            &self,
            _topic_id: &str,
            _task: &TaskConfig,
            _message_text: &str,
        ) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    fn builder(window: usize, analysis: Option<Arc<dyn TopicAnalysis>>) -> PromptBuilder {
        let registry = Arc::new(TopicRegistry::new(EventBus::default()));
        registry.register_topic("t", "small");
        let catalog = Arc::new(StaticModelCatalog::with_models([
            ModelDescriptor::new("small", "Small").with_context_window(window),
        ]));
        let contacts = Arc::new(ContactProvisioner::new(Arc::new(
            InMemoryIdentityProvisioner::new(),
        )));
        PromptBuilder::new(
            PromptConfig {
                system_prompt: "sys".into(),
                safety_margin: 0.0,
                max_summary_chars: 40,
                ..PromptConfig::default()
            },
            registry,
            Arc::new(InMemoryConversationStore::new()),
            catalog,
            contacts,
            analysis,
        )
    }

    fn conversation(n: usize) -> Vec<PromptTurn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    PromptTurn::user(format!("question number {i} with some padding text"))
                } else {
                    PromptTurn::assistant(format!("answer number {i} with some padding text"))
                }
            })
            .collect()
    }

    #[test]
    fn test_char_estimator_is_monotonic() {
        let est = CharTokenEstimator;
        assert_eq!(est.estimate(&[]), 0);
        assert_eq!(est.estimate(&[PromptTurn::user("abcd")]), 1 + TOKENS_PER_TURN);
        assert_eq!(est.estimate(&[PromptTurn::user("abcde")]), 2 + TOKENS_PER_TURN);

        let short = conversation(3);
        let long = conversation(4);
        assert!(est.estimate(&long) > est.estimate(&short));
    }

    #[test]
    fn test_budget_applies_margin() {
        let config = PromptConfig {
            safety_margin: 0.25,
            ..PromptConfig::default()
        };
        assert_eq!(config.budget_for(1000), 750);
    }

    #[test]
    fn test_truncate_tail_keeps_recent_text() {
        assert_eq!(truncate_tail("abcdef", 3), "def");
        assert_eq!(truncate_tail("abc", 10), "abc");
        assert_eq!(truncate_tail("héllo", 4), "éllo");
    }

    #[tokio::test]
    async fn test_no_restart_when_within_budget() {
        let builder = builder(10_000, None);
        let ctx = builder.check_window("t", &conversation(4)).await.unwrap();
        assert!(!ctx.needs_restart);
        assert_eq!(ctx.retained_from, 0);
        assert_eq!(ctx.budget_tokens, 10_000);
    }

    #[tokio::test]
    async fn test_restart_when_over_budget() {
        let builder = builder(80, None);
        let turns = conversation(10);
        let ctx = builder.check_window("t", &turns).await.unwrap();

        assert!(ctx.needs_restart);
        assert!(ctx.estimated_tokens > ctx.budget_tokens);
        assert!(ctx.retained_from >= 1);
        assert!(ctx.retained_from < turns.len());
        assert!(ctx.summary.as_deref().unwrap().chars().count() <= 40);
    }

    #[tokio::test]
    async fn test_single_oversized_message_is_not_restarted() {
        let builder = builder(8, None);
        let turns = vec![PromptTurn::user("x".repeat(400))];
        let ctx = builder.check_window("t", &turns).await.unwrap();
        assert!(!ctx.needs_restart);
    }

    #[tokio::test]
    async fn test_check_window_is_idempotent() {
        let builder = builder(80, None);
        let turns = conversation(10);
        let first = builder.check_window("t", &turns).await.unwrap();
        let second = builder.check_window("t", &turns).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_summary_prefers_analysis() {
        let builder = builder(80, Some(Arc::new(FixedSummary("structured".into()))));
        let summary = builder.generate_summary("t", &conversation(2)).await;
        assert_eq!(summary, "structured");
    }

    #[tokio::test]
    async fn test_summary_falls_back_on_analysis_error() {
        let builder = builder(80, Some(Arc::new(BrokenAnalysis)));
        let summary = builder
            .generate_summary("t", &[PromptTurn::user("hello"), PromptTurn::assistant("hi")])
            .await;
        assert_eq!(summary, "user: hello\nassistant: hi");
    }

    #[tokio::test]
    async fn test_oversized_summary_is_dropped() {
        let builder = builder(80, Some(Arc::new(FixedSummary("s".repeat(4000)))));
        let ctx = builder.check_window("t", &conversation(10)).await.unwrap();
        assert!(ctx.needs_restart);
        assert_eq!(ctx.summary, None);
    }

    #[test]
    fn test_system_turn_per_mode() {
        let builder = builder(80, None);
        assert_eq!(builder.system_turn("t").unwrap().content, "sys");

        builder.registry.set_mode("t", AiMode::KnowledgeSharing);
        let turn = builder.system_turn("t").unwrap();
        assert_eq!(turn.role, MessageRole::System);
        assert!(turn.content.starts_with("sys\n\n"));
        assert!(turn.content.ends_with(KNOWLEDGE_SHARING_PROMPT));
    }
}
