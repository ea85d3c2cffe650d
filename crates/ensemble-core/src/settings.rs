use crate::error::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};

/// Configures retry behaviour for failed capability invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries before a task is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Computes the backoff delay for the given attempt, capped at
    /// `backoff_max_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.backoff_max_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

/// Configuration of the task execution engine's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of parallel task executors.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Timeout applied to tasks that do not set one, in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Retry policy applied to tasks that do not override the budget.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_timeout_ms: default_task_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_task_timeout_ms() -> u64 {
    300_000
}

/// Configuration of the inter-agent message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum number of transcript messages carried by a
    /// history-preserving handoff; `None` disables truncation.
    #[serde(default = "default_max_handoff_history")]
    pub max_handoff_history: Option<usize>,
    /// How long a request waits for its correlated response, in
    /// milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_handoff_history: default_max_handoff_history(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_max_handoff_history() -> Option<usize> {
    Some(50)
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Configuration of the memory store's background maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Interval between background eviction sweeps, in seconds.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

fn default_eviction_interval_secs() -> u64 {
    300
}

/// Configuration of the workflow orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Timeout applied to steps that do not set one, in milliseconds.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
        }
    }
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

/// Aggregated runtime settings for the whole engine.
///
/// Constructed explicitly at startup and passed to each component —
/// there is no ambient global configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Task execution engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Message bus settings.
    #[serde(default)]
    pub bus: BusConfig,
    /// Memory store settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Workflow orchestrator settings.
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl EngineSettings {
    /// Parses settings from a TOML document.
    pub fn from_toml_str(raw: &str) -> EnsembleResult<Self> {
        toml::from_str(raw).map_err(|e| EnsembleError::Config(format!("invalid settings: {e}")))
    }
}
