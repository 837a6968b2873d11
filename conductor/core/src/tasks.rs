//! Background Task Coordination
//!
//! Associates background analysis tasks (keyword and subject extraction, topic
//! summaries) with topics and runs them after every completed AI turn.
//!
//! # Design Philosophy
//!
//! Tasks are enrichment, never part of the turn's success criteria. Each task runs
//! in isolation: a failure is logged and recorded, and the remaining tasks and the
//! calling turn carry on. Every run is tracked as a [`Task`] record and a short
//! bookkeeping line is appended to a shared channel so runs across topics can be
//! audited in one place.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::analysis::TopicAnalysis;
use crate::error::{OrchestratorError, Result};
use crate::messages::{IdentityId, TopicId};
use crate::store::{now_ms, ConversationStore, NewMessage};

/// Channel used for cross-topic task bookkeeping
pub const TASK_CHANNEL_ID: &str = "ai-task-bookkeeping";

/// Sender identity of bookkeeping entries
pub const TASK_BOOKKEEPER: &str = "task-coordinator";

/// Default number of task records kept in memory
pub const DEFAULT_MAX_TASK_RECORDS: usize = 256;

/// Task identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new task ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique task ID
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);

        Self(format!("task_{}_{count}", now_ms()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of background analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    /// Extract keywords from the turn
    KeywordExtraction,
    /// Detect the subjects discussed
    SubjectExtraction,
    /// Refresh the structured topic summary
    Summary,
}

impl TaskType {
    /// Stable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::KeywordExtraction => "keyword-extraction",
            Self::SubjectExtraction => "subject-extraction",
            Self::Summary => "summary",
        }
    }

    /// Parse a label
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyword-extraction" | "keywords" => Some(Self::KeywordExtraction),
            "subject-extraction" | "subjects" => Some(Self::SubjectExtraction),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Configuration of one task for one topic
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task kind
    pub task_type: TaskType,
    /// Whether the task runs after each turn
    pub enabled: bool,
    /// Free-form parameters passed to the analysis collaborator
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TaskConfig {
    /// Enabled task without parameters
    #[must_use]
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            enabled: true,
            parameters: BTreeMap::new(),
        }
    }
}

/// Status of a background task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task created but not started
    Pending,
    /// Task is actively running
    Running,
    /// Task completed successfully
    Done,
    /// Task failed
    Failed,
}

impl TaskStatus {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    /// Whether this status indicates the task is complete (done or failed)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether this status indicates the task is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Record of one task run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Topic the task ran for
    pub topic_id: TopicId,
    /// Task kind
    pub task_type: TaskType,
    /// Current status
    pub status: TaskStatus,
    /// Result output (when complete)
    pub output: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
    /// When the task was created (Unix timestamp ms)
    pub created_at: u64,
    /// When the task was last updated (Unix timestamp ms)
    pub updated_at: u64,
}

impl Task {
    /// Create a new pending task
    #[must_use]
    pub fn new(id: TaskId, topic_id: TopicId, task_type: TaskType) -> Self {
        let now = now_ms();
        Self {
            id,
            topic_id,
            task_type,
            status: TaskStatus::Pending,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update task status
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// Mark task as completed
    pub fn complete(&mut self, output: Option<String>) {
        self.output = output;
        self.set_status(TaskStatus::Done);
    }

    /// Mark task as failed
    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.set_status(TaskStatus::Failed);
    }
}

/// Outcome of running a topic's tasks for one turn
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskRunReport {
    /// Tasks that completed
    pub succeeded: Vec<TaskType>,
    /// Tasks that failed, with their error
    pub failed: Vec<(TaskType, String)>,
    /// Enabled tasks that could not run (no analysis collaborator)
    pub skipped: Vec<TaskType>,
}

impl TaskRunReport {
    /// Whether every attempted task succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bounded log of task records, oldest evicted first
#[derive(Debug)]
struct TaskLog {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    max_records: usize,
}

impl TaskLog {
    fn insert(&mut self, task: Task) {
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        self.order.push(id);

        if self.max_records > 0 && self.order.len() > self.max_records {
            let excess = self.order.len() - self.max_records;
            for old in self.order.drain(..excess) {
                self.tasks.remove(&old);
            }
        }
    }

    fn update(&mut self, id: &TaskId, f: impl FnOnce(&mut Task)) {
        if let Some(task) = self.tasks.get_mut(id) {
            f(task);
        }
    }
}

/// Coordinates background analysis tasks per topic
pub struct TaskCoordinator {
    store: Arc<dyn ConversationStore>,
    analysis: Option<Arc<dyn TopicAnalysis>>,
    initialized: OnceCell<()>,
    configs: DashMap<TopicId, Vec<TaskConfig>>,
    log: Mutex<TaskLog>,
}

impl std::fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCoordinator")
            .field("initialized", &self.is_initialized())
            .field("topics", &self.configs.len())
            .finish_non_exhaustive()
    }
}

impl TaskCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        analysis: Option<Arc<dyn TopicAnalysis>>,
    ) -> Self {
        Self::with_max_records(store, analysis, DEFAULT_MAX_TASK_RECORDS)
    }

    /// Create a coordinator keeping at most `max_records` task records (0 = unlimited)
    #[must_use]
    pub fn with_max_records(
        store: Arc<dyn ConversationStore>,
        analysis: Option<Arc<dyn TopicAnalysis>>,
        max_records: usize,
    ) -> Self {
        Self {
            store,
            analysis,
            initialized: OnceCell::new(),
            configs: DashMap::new(),
            log: Mutex::new(TaskLog {
                tasks: HashMap::new(),
                order: Vec::new(),
                max_records,
            }),
        }
    }

    /// Prepare the shared bookkeeping channel
    ///
    /// Safe to call repeatedly; only the first successful call touches storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the channel cannot be created.
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                let created = self
                    .store
                    .create_channel(TASK_CHANNEL_ID, None)
                    .await
                    .map_err(|e| OrchestratorError::storage(&e))?;
                tracing::info!(channel = TASK_CHANNEL_ID, created, "Task coordinator initialized");
                Ok::<_, OrchestratorError>(())
            })
            .await?;
        Ok(())
    }

    /// Whether `initialize()` has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Add a task type to a topic (no-op if already associated)
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotInitialized`] before `initialize()`.
    pub fn associate_task(&self, topic_id: &str, task_type: TaskType) -> Result<()> {
        if !self.is_initialized() {
            return Err(OrchestratorError::NotInitialized);
        }

        let mut configs = self.configs.entry(topic_id.to_string()).or_default();
        if configs.iter().any(|c| c.task_type == task_type) {
            return Ok(());
        }
        configs.push(TaskConfig::new(task_type));
        tracing::debug!(topic_id, task = %task_type, "Associated task with topic");
        Ok(())
    }

    /// Enable or disable an associated task
    ///
    /// Returns `false` if the task is not associated with the topic.
    pub fn set_task_enabled(&self, topic_id: &str, task_type: TaskType, enabled: bool) -> bool {
        self.update_config(topic_id, task_type, |c| c.enabled = enabled)
    }

    /// Set a parameter on an associated task
    ///
    /// Returns `false` if the task is not associated with the topic.
    pub fn set_task_parameter(
        &self,
        topic_id: &str,
        task_type: TaskType,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> bool {
        let (key, value) = (key.into(), value.into());
        self.update_config(topic_id, task_type, |c| {
            c.parameters.insert(key, value);
        })
    }

    fn update_config(
        &self,
        topic_id: &str,
        task_type: TaskType,
        f: impl FnOnce(&mut TaskConfig),
    ) -> bool {
        let Some(mut configs) = self.configs.get_mut(topic_id) else {
            return false;
        };
        match configs.iter_mut().find(|c| c.task_type == task_type) {
            Some(config) => {
                f(config);
                true
            }
            None => false,
        }
    }

    /// Task configurations of a topic (empty if none)
    #[must_use]
    pub fn tasks_for(&self, topic_id: &str) -> Vec<TaskConfig> {
        self.configs
            .get(topic_id)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    /// Run every enabled task of a topic for a completed turn
    ///
    /// Never fails: each task's error is logged and recorded in the report.
    pub async fn run_tasks_for_turn(&self, topic_id: &str, final_text: &str) -> TaskRunReport {
        let mut report = TaskRunReport::default();
        let enabled: Vec<TaskConfig> = self
            .tasks_for(topic_id)
            .into_iter()
            .filter(|c| c.enabled)
            .collect();

        if enabled.is_empty() {
            return report;
        }

        let Some(analysis) = self.analysis.as_ref() else {
            tracing::debug!(topic_id, count = enabled.len(), "No analysis service, skipping tasks");
            report.skipped = enabled.iter().map(|c| c.task_type).collect();
            return report;
        };

        for config in &enabled {
            let id = TaskId::generate();
            let mut task = Task::new(id.clone(), topic_id.to_string(), config.task_type);
            task.set_status(TaskStatus::Running);
            self.log.lock().insert(task);

            match analysis.run_task(topic_id, config, final_text).await {
                Ok(output) => {
                    tracing::debug!(topic_id, task = %config.task_type, "Task completed");
                    self.log.lock().update(&id, |t| t.complete(output));
                    report.succeeded.push(config.task_type);
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::warn!(topic_id, task = %config.task_type, error = %error, "Task failed");
                    self.log.lock().update(&id, |t| t.fail(error.clone()));
                    report.failed.push((config.task_type, error));
                }
            }

            self.record(topic_id, &id).await;
        }

        report
    }

    /// Append a bookkeeping line for a finished task (best effort)
    async fn record(&self, topic_id: &str, id: &TaskId) {
        if !self.is_initialized() {
            return;
        }
        let Some(task) = self.task(id) else {
            return;
        };

        let line = format!("{topic_id}\t{}\t{}\t{id}", task.task_type, task.status);
        if let Err(e) = self
            .store
            .append_message(
                TASK_CHANNEL_ID,
                NewMessage::new(IdentityId::new(TASK_BOOKKEEPER), line),
            )
            .await
        {
            tracing::warn!(topic_id, task_id = %id, error = %e, "Failed to record task run");
        }
    }

    /// A task record by id
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.log.lock().tasks.get(id).cloned()
    }

    /// Most recent task records, newest last
    #[must_use]
    pub fn recent_tasks(&self, limit: usize) -> Vec<Task> {
        let log = self.log.lock();
        let start = log.order.len().saturating_sub(limit);
        log.order[start..]
            .iter()
            .filter_map(|id| log.tasks.get(id).cloned())
            .collect()
    }

    /// Number of tasks currently pending or running
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.log
            .lock()
            .tasks
            .values()
            .filter(|t| t.status.is_active())
            .count()
    }
}
