//! Topic Analysis Collaborator
//!
//! Optional service that produces structured summaries of a topic and runs
//! background analysis tasks (keyword and subject extraction) after each turn.
//! When absent, prompt building falls back to a naive summary and tasks are
//! skipped.

use async_trait::async_trait;

use crate::tasks::TaskConfig;

/// Topic analysis trait
#[async_trait]
pub trait TopicAnalysis: Send + Sync {
    /// Previously computed structured summary of the topic, if any
    async fn summary(&self, topic_id: &str) -> anyhow::Result<Option<String>>;

    /// Run one background task for a completed turn
    ///
    /// Returns an optional short result description for bookkeeping.
    async fn run_task(
        &self,
        topic_id: &str,
        task: &TaskConfig,
        message_text: &str,
    ) -> anyhow::Result<Option<String>>;
}
