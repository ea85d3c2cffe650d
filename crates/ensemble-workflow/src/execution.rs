use chrono::{DateTime, Utc};
use ensemble_core::AgentType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet scheduled.
    Pending,
    /// Submitted to the task engine.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Not run: its condition was false or an upstream skip policy
    /// applied. Skipped steps satisfy their own dependents.
    Skipped,
}

impl StepStatus {
    /// Whether a dependent may treat this step as satisfied.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// The recorded outcome of one step attempt.
///
/// Written once per attempt; a retried attempt overwrites the record only
/// after it concludes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepResult {
    /// The step this result belongs to.
    pub step_id: String,
    /// Step lifecycle state.
    pub status: StepStatus,
    /// Output payload, set on completion.
    pub output: Option<serde_json::Value>,
    /// Error label or message, set on failure.
    pub error: Option<String>,
    /// Wall-clock execution time of the recorded attempt.
    pub execution_time_ms: u64,
    /// The agent that produced the result (the fallback agent when one
    /// was substituted).
    pub agent_type: AgentType,
}

impl WorkflowStepResult {
    /// A result in the given non-terminal state.
    pub fn status_only(step_id: impl Into<String>, status: StepStatus, agent: AgentType) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            output: None,
            error: None,
            execution_time_ms: 0,
            agent_type: agent,
        }
    }
}

/// Lifecycle state of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not yet driven.
    Pending,
    /// The driver is scheduling steps.
    Running,
    /// Every step reached a satisfied terminal state.
    Completed,
    /// A step failure, timeout, or cancellation ended the run.
    Failed,
}

impl WorkflowStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

/// One run of a workflow definition.
///
/// Partial results from completed steps remain available in
/// `step_results` even when the run fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier for this run.
    pub id: Uuid,
    /// The definition being executed.
    pub workflow_id: String,
    /// Session the run belongs to, if any.
    pub session_id: Option<Uuid>,
    /// Run lifecycle state.
    pub status: WorkflowStatus,
    /// The step most recently submitted.
    pub current_step: Option<String>,
    /// Per-step results, keyed by step id.
    #[serde(default)]
    pub step_results: HashMap<String, WorkflowStepResult>,
    /// Step ids in the order they completed.
    #[serde(default)]
    pub completion_order: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// The failure that ended the run, when it failed.
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Creates a running execution for the given definition.
    pub fn new(workflow_id: impl Into<String>, session_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            session_id,
            status: WorkflowStatus::Running,
            current_step: None,
            step_results: HashMap::new(),
            completion_order: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Whether the named dependency is satisfied for its dependents.
    pub fn dependency_satisfied(&self, step_id: &str) -> bool {
        self.step_results
            .get(step_id)
            .is_some_and(|r| r.status.satisfies_dependents())
    }

    /// Whether the named step failed terminally.
    pub fn dependency_failed(&self, step_id: &str) -> bool {
        self.step_results
            .get(step_id)
            .is_some_and(|r| r.status == StepStatus::Failed)
    }

    /// Ids of steps with results in the given status.
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.step_results
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.step_id.as_str())
            .collect()
    }
}
