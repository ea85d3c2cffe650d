use thiserror::Error;

/// A convenience `Result` alias using [`EnsembleError`].
pub type EnsembleResult<T> = Result<T, EnsembleError>;

/// Top-level error type for the Ensemble engine.
///
/// Each variant corresponds to a subsystem or error class that can surface
/// to callers. The [`kind`](EnsembleError::kind) label is what task and
/// workflow records carry in their `error` fields.
#[derive(Debug, Error)]
pub enum EnsembleError {
    /// Malformed input rejected at an orchestration boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// An agent capability invocation threw.
    #[error("tool error: {0}")]
    Tool(String),

    /// A wall-clock deadline elapsed before the operation finished.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An upstream workflow dependency never reached completion.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// The operation was explicitly cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An error related to session lookup or mutation.
    #[error("session error: {0}")]
    Session(String),

    /// An error from the long-term memory store.
    #[error("memory error: {0}")]
    Memory(String),

    /// An error from the inter-agent message bus.
    #[error("bus error: {0}")]
    Bus(String),

    /// An error from the workflow orchestrator.
    #[error("workflow error: {0}")]
    Workflow(String),

    /// An error in configuration parsing or validation.
    #[error("config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnsembleError {
    /// Short snake_case label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Tool(_) => "tool_error",
            Self::Timeout(_) => "timeout",
            Self::DependencyFailed(_) => "dependency_failed",
            Self::Cancelled(_) => "cancelled",
            Self::Session(_) => "session_error",
            Self::Memory(_) => "memory_error",
            Self::Bus(_) => "bus_error",
            Self::Workflow(_) => "workflow_error",
            Self::Config(_) => "config_error",
            Self::Json(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether a task-level failure of this class may be retried locally.
    ///
    /// Dependency failures and cancellations propagate immediately and are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Tool(_) | Self::Timeout(_))
    }
}
