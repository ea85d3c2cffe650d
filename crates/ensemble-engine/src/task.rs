use chrono::{DateTime, Utc};
use ensemble_core::AgentType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an [`AgentTask`].
///
/// Transitions are monotonic and one-directional:
/// `pending → running → {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is executing the invocation (including local retries).
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Explicitly cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One tracked asynchronous agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique identifier for this task.
    pub id: Uuid,
    /// The agent being invoked.
    pub agent_type: AgentType,
    /// The capability being performed.
    pub task_type: String,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Queue priority; higher runs first.
    pub priority: i32,
    /// Input payload.
    pub input: serde_json::Value,
    /// Output payload, set on completion.
    pub output: Option<serde_json::Value>,
    /// Error label or message, set on failure or cancellation.
    pub error: Option<String>,
    /// Progress percentage, 0–100, monotonic non-decreasing while running.
    pub progress: u8,
    /// Zero-based attempt currently (or last) executed.
    pub attempt: u32,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When a worker first picked the task up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    /// Wall-clock execution time, once started.
    pub fn execution_time_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let ended = self.completed_at.unwrap_or_else(Utc::now);
        (ended - started).num_milliseconds().try_into().ok()
    }
}

/// Per-task options accepted by [`TaskEngine::submit`].
///
/// [`TaskEngine::submit`]: crate::engine::TaskEngine::submit
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Queue priority; higher runs first.
    pub priority: i32,
    /// Wall-clock timeout; falls back to the engine default when unset.
    pub timeout_ms: Option<u64>,
    /// Local retry budget for transient failures; falls back to the
    /// engine's retry policy when unset.
    pub max_retries: Option<u32>,
}

impl SubmitOptions {
    /// Sets the queue priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the wall-clock timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the local retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}
