use ensemble_core::{AgentType, EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a step condition is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    /// The step always runs.
    Always,
    /// The step runs when the expression holds.
    If,
    /// The step runs when the expression does not hold.
    Unless,
}

/// A condition gating a step's execution.
///
/// The supported expression grammar is `steps.<id>`, which holds when the
/// referenced step completed. Unknown expressions evaluate true with a
/// warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCondition {
    /// How the expression is interpreted.
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// The expression, when the kind uses one.
    pub expression: Option<String>,
}

impl StepCondition {
    /// A condition that always holds.
    pub fn always() -> Self {
        Self {
            kind: ConditionKind::Always,
            expression: None,
        }
    }

    /// Runs the step only when `steps.<id>` completed.
    pub fn if_completed(step_id: impl std::fmt::Display) -> Self {
        Self {
            kind: ConditionKind::If,
            expression: Some(format!("steps.{step_id}")),
        }
    }

    /// Runs the step only when `steps.<id>` did not complete.
    pub fn unless_completed(step_id: impl std::fmt::Display) -> Self {
        Self {
            kind: ConditionKind::Unless,
            expression: Some(format!("steps.{step_id}")),
        }
    }
}

/// What happens when a step fails terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepErrorPolicy {
    /// Propagate the failure per the workflow's global strategy.
    Fail,
    /// Record the failure but mark downstream dependents skipped.
    Skip,
    /// Re-run the step with the declared fallback agent.
    Fallback,
}

impl Default for StepErrorPolicy {
    fn default() -> Self {
        StepErrorPolicy::Fail
    }
}

/// Workflow-wide error handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Stop scheduling new steps the moment any step fails terminally.
    FailFast,
    /// Keep independent branches progressing; failed-dependency branches
    /// stay blocked.
    Continue,
    /// Re-submit a failed step up to its `retries` bound, then behave
    /// like `fail_fast`.
    Retry,
    /// Like `continue`, additionally attempting each failed step's
    /// fallback agent when one is declared.
    Fallback,
}

impl Default for ErrorStrategy {
    fn default() -> Self {
        ErrorStrategy::FailFast
    }
}

/// One step of a workflow, bound to a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id, unique within the workflow.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The agent performing this step.
    pub agent: AgentType,
    /// The capability (task type) the agent performs.
    pub action: String,
    /// Step input; may contain `{{...}}` references resolved at
    /// submission time.
    #[serde(default = "default_input")]
    pub input: serde_json::Value,
    /// Steps that must be satisfied before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional execution condition.
    pub condition: Option<StepCondition>,
    /// Per-step timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retry budget for this step.
    #[serde(default)]
    pub retries: u32,
    /// Per-step failure policy.
    #[serde(default)]
    pub on_error: StepErrorPolicy,
    /// Agent substituted on fallback.
    pub fallback_agent: Option<AgentType>,
}

fn default_input() -> serde_json::Value {
    serde_json::json!({})
}

impl WorkflowStep {
    /// Creates a step with empty input and no dependencies.
    pub fn new(id: impl Into<String>, agent: AgentType, action: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            agent,
            action: action.into(),
            input: serde_json::json!({}),
            depends_on: Vec::new(),
            condition: None,
            timeout_ms: None,
            retries: 0,
            on_error: StepErrorPolicy::default(),
            fallback_agent: None,
        }
    }

    /// Sets the step input.
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Declares the steps this one depends on.
    pub fn depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Gates the step on a condition.
    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the per-step timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the per-step failure policy.
    pub fn on_error(mut self, policy: StepErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Declares the fallback agent.
    pub fn with_fallback(mut self, agent: AgentType) -> Self {
        self.fallback_agent = Some(agent);
        self
    }
}

/// A named, versioned DAG of steps executed under a shared error-handling
/// strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the workflow does.
    #[serde(default)]
    pub description: String,
    /// Definition version.
    #[serde(default = "default_version")]
    pub version: String,
    /// The steps of the DAG.
    pub steps: Vec<WorkflowStep>,
    /// Workflow-wide error handling strategy.
    #[serde(default)]
    pub error_handling: ErrorStrategy,
    /// Overall wall-clock timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl WorkflowDefinition {
    /// Creates a definition with the default strategy and no timeout.
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            steps,
            error_handling: ErrorStrategy::default(),
            timeout_ms: None,
        }
    }

    /// Sets the error handling strategy.
    pub fn with_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_handling = strategy;
        self
    }

    /// Sets the overall timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Returns the step with the given id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Validates the definition at load time.
    ///
    /// Rejects empty definitions, duplicate step ids, unknown or self
    /// dependencies, fallback policies with no fallback agent, and cyclic
    /// graphs — the step schema alone cannot rule out cycles expressed by
    /// mistake.
    pub fn validate(&self) -> EnsembleResult<()> {
        if self.steps.is_empty() {
            return Err(EnsembleError::Validation(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(EnsembleError::Validation(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(EnsembleError::Validation(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(EnsembleError::Validation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
            if step.on_error == StepErrorPolicy::Fallback && step.fallback_agent.is_none() {
                return Err(EnsembleError::Validation(format!(
                    "step '{}' uses the fallback policy but declares no fallback agent",
                    step.id
                )));
            }
        }

        if self.has_cycle() {
            return Err(EnsembleError::Validation(format!(
                "workflow '{}' contains a dependency cycle",
                self.id
            )));
        }

        Ok(())
    }

    /// Depth-first cycle check over the dependency edges.
    fn has_cycle(&self) -> bool {
        let mut visited: HashMap<&str, u8> = HashMap::new();
        for step in &self.steps {
            if self.dfs_cycle(&step.id, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle<'a>(&'a self, id: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
        match visited.get(id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(step) = self.step(id) {
            for dep in &step.depends_on {
                if self.dfs_cycle(dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "wf-1",
            "chain",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather"),
                WorkflowStep::new("s2", AgentType::Writing, "draft")
                    .depends_on(vec!["s1".into()]),
                WorkflowStep::new("s3", AgentType::Planner, "review")
                    .depends_on(vec!["s1".into(), "s2".into()]),
            ],
        )
    }

    #[test]
    fn test_valid_chain() {
        assert!(chain().validate().is_ok());
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let wf = WorkflowDefinition::new("wf", "empty", vec![]);
        assert_eq!(wf.validate().unwrap_err().kind(), "validation_error");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let wf = WorkflowDefinition::new(
            "wf",
            "dup",
            vec![
                WorkflowStep::new("s1", AgentType::Task, "a"),
                WorkflowStep::new("s1", AgentType::Task, "b"),
            ],
        );
        assert!(wf.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let wf = WorkflowDefinition::new(
            "wf",
            "unknown-dep",
            vec![WorkflowStep::new("s1", AgentType::Task, "a")
                .depends_on(vec!["ghost".into()])],
        );
        assert!(wf.validate().unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let wf = WorkflowDefinition::new(
            "wf",
            "self-dep",
            vec![WorkflowStep::new("s1", AgentType::Task, "a")
                .depends_on(vec!["s1".into()])],
        );
        assert!(wf.validate().is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let wf = WorkflowDefinition::new(
            "wf",
            "cycle",
            vec![
                WorkflowStep::new("s1", AgentType::Task, "a").depends_on(vec!["s2".into()]),
                WorkflowStep::new("s2", AgentType::Task, "b").depends_on(vec!["s1".into()]),
            ],
        );
        let err = wf.validate().unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_fallback_policy_requires_agent() {
        let wf = WorkflowDefinition::new(
            "wf",
            "fallback",
            vec![WorkflowStep::new("s1", AgentType::Grant, "score")
                .on_error(StepErrorPolicy::Fallback)],
        );
        assert!(wf.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let json = serde_json::json!({
            "id": "wf",
            "name": "minimal",
            "steps": [
                {"id": "s1", "name": "s1", "agent": "task", "action": "triage"}
            ]
        });
        let wf: WorkflowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(wf.version, "1.0");
        assert_eq!(wf.error_handling, ErrorStrategy::FailFast);
        assert_eq!(wf.steps[0].on_error, StepErrorPolicy::Fail);
        assert_eq!(wf.steps[0].retries, 0);
    }
}
