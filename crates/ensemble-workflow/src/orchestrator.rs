use crate::definition::{
    ConditionKind, ErrorStrategy, StepCondition, StepErrorPolicy, WorkflowDefinition, WorkflowStep,
};
use crate::execution::{StepStatus, WorkflowExecution, WorkflowStatus, WorkflowStepResult};
use crate::resolve::resolve_references;
use chrono::Utc;
use ensemble_core::{EnsembleError, EnsembleResult, InvokeContext, TaskRequest, WorkflowConfig};
use ensemble_engine::{AgentTask, SubmitOptions, TaskEngine, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handle to a running workflow execution.
#[derive(Debug)]
pub struct WorkflowHandle {
    /// The execution's id.
    pub execution_id: Uuid,
    shared: Arc<RwLock<WorkflowExecution>>,
    driver: tokio::task::JoinHandle<()>,
}

impl WorkflowHandle {
    /// Returns the current state of the execution.
    pub async fn snapshot(&self) -> WorkflowExecution {
        self.shared.read().await.clone()
    }

    /// Awaits the driver and returns the final execution state.
    pub async fn wait(self) -> WorkflowExecution {
        let _ = self.driver.await;
        self.shared.read().await.clone()
    }
}

/// Executes workflow definitions against the task engine.
///
/// The orchestrator holds no thread of its own: each execution runs as a
/// spawned driver that reacts to step-completion events from the engine.
pub struct Orchestrator {
    engine: Arc<TaskEngine>,
    config: WorkflowConfig,
    executions: Arc<RwLock<HashMap<Uuid, Arc<RwLock<WorkflowExecution>>>>>,
    cancels: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl Orchestrator {
    /// Creates an orchestrator submitting to the given engine.
    pub fn new(engine: Arc<TaskEngine>, config: WorkflowConfig) -> Self {
        Self {
            engine,
            config,
            executions: Arc::new(RwLock::new(HashMap::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validates a definition and starts executing it in the background.
    ///
    /// Validation errors surface synchronously; the returned handle polls
    /// or awaits the run.
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        input: serde_json::Value,
    ) -> EnsembleResult<WorkflowHandle> {
        self.execute_with_context(definition, input, InvokeContext::default())
            .await
    }

    /// Like [`execute`](Self::execute), with an authorized invocation
    /// context propagated to every step.
    pub async fn execute_with_context(
        &self,
        definition: WorkflowDefinition,
        input: serde_json::Value,
        context: InvokeContext,
    ) -> EnsembleResult<WorkflowHandle> {
        definition.validate()?;

        let execution = WorkflowExecution::new(definition.id.clone(), context.session_id);
        let execution_id = execution.id;
        let shared = Arc::new(RwLock::new(execution));
        let token = CancellationToken::new();

        {
            let mut executions = self.executions.write().await;
            executions.insert(execution_id, Arc::clone(&shared));
        }
        {
            let mut cancels = self.cancels.write().await;
            cancels.insert(execution_id, token.clone());
        }

        info!(
            execution_id = %execution_id,
            workflow = %definition.id,
            steps = definition.steps.len(),
            "workflow execution started"
        );

        let driver = Driver::new(
            Arc::clone(&self.engine),
            self.config.clone(),
            definition,
            input,
            context,
            Arc::clone(&shared),
            token,
            execution_id,
            Arc::clone(&self.cancels),
        );
        let join = tokio::spawn(driver.run());

        Ok(WorkflowHandle {
            execution_id,
            shared,
            driver: join,
        })
    }

    /// Returns the state of an execution, running or finished.
    pub async fn status(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        let executions = self.executions.read().await;
        match executions.get(&execution_id) {
            Some(shared) => Some(shared.read().await.clone()),
            None => None,
        }
    }

    /// Cancels an execution, cancelling all of its non-terminal steps.
    /// Cancelling a finished execution is a no-op.
    pub async fn cancel(&self, execution_id: Uuid) -> EnsembleResult<()> {
        let token = {
            let cancels = self.cancels.read().await;
            cancels.get(&execution_id).cloned()
        };
        if let Some(token) = token {
            token.cancel();
            return Ok(());
        }
        let executions = self.executions.read().await;
        if executions.contains_key(&execution_id) {
            Ok(())
        } else {
            Err(EnsembleError::Validation(format!(
                "unknown execution: {execution_id}"
            )))
        }
    }

    /// Number of executions that have not yet finished.
    pub async fn active_count(&self) -> usize {
        let executions = self.executions.read().await;
        let mut active = 0;
        for shared in executions.values() {
            if !shared.read().await.status.is_terminal() {
                active += 1;
            }
        }
        active
    }
}

/// Outcome of one step's underlying task, fed back to the driver.
type StepOutcome = (String, AgentTask, bool);

struct Driver {
    engine: Arc<TaskEngine>,
    config: WorkflowConfig,
    definition: WorkflowDefinition,
    input: serde_json::Value,
    context: InvokeContext,
    shared: Arc<RwLock<WorkflowExecution>>,
    token: CancellationToken,
    execution_id: Uuid,
    cancels: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    tx: mpsc::UnboundedSender<StepOutcome>,
    rx: Option<mpsc::UnboundedReceiver<StepOutcome>>,
    /// Step ids not yet scheduled or resolved.
    unscheduled: Vec<String>,
    /// Step id -> underlying task id, for in-flight steps.
    in_flight: HashMap<String, Uuid>,
    /// Whole-step resubmissions used under the `retry` strategy.
    resubmits: HashMap<String, u32>,
    halted: bool,
    first_error: Option<String>,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    fn new(
        engine: Arc<TaskEngine>,
        config: WorkflowConfig,
        definition: WorkflowDefinition,
        input: serde_json::Value,
        context: InvokeContext,
        shared: Arc<RwLock<WorkflowExecution>>,
        token: CancellationToken,
        execution_id: Uuid,
        cancels: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let unscheduled = definition.steps.iter().map(|s| s.id.clone()).collect();
        Self {
            engine,
            config,
            definition,
            input,
            context,
            shared,
            token,
            execution_id,
            cancels,
            tx,
            rx: Some(rx),
            unscheduled,
            in_flight: HashMap::new(),
            resubmits: HashMap::new(),
            halted: false,
            first_error: None,
        }
    }

    async fn run(mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        // A local clone keeps the select! arms from borrowing `self`.
        let token = self.token.clone();
        let deadline = self
            .definition
            .timeout_ms
            .map(|ms| tokio::time::Instant::now() + std::time::Duration::from_millis(ms));

        loop {
            if !self.halted {
                self.schedule_ready().await;
            }

            if self.in_flight.is_empty() {
                if self.halted || self.unscheduled.is_empty() {
                    break;
                }
                // Validation rules out cycles, so a stall here means the
                // remaining steps reference results that can no longer
                // materialize.
                warn!(execution_id = %self.execution_id, "workflow stalled with unmet dependencies");
                self.first_error
                    .get_or_insert_with(|| "unresolvable step dependencies".to_string());
                break;
            }

            tokio::select! {
                _ = token.cancelled() => {
                    self.abort_in_flight("cancelled").await;
                    self.first_error = Some("cancelled".to_string());
                    break;
                }
                _ = sleep_until_or_forever(deadline) => {
                    warn!(execution_id = %self.execution_id, "workflow timeout exceeded");
                    self.abort_in_flight("cancelled").await;
                    self.first_error = Some("workflow_timeout".to_string());
                    break;
                }
                outcome = rx.recv() => {
                    let Some((step_id, task, was_fallback)) = outcome else { break };
                    self.handle_outcome(&step_id, task, was_fallback).await;
                }
            }
        }

        self.finalize().await;
    }

    /// Submits every unscheduled step whose dependencies are satisfied,
    /// marking condition-false steps skipped and failed-dependency steps
    /// failed, until no further progress is possible.
    async fn schedule_ready(&mut self) {
        let mut progressed = true;
        while progressed && !self.halted {
            progressed = false;
            let snapshot = self.shared.read().await.clone();
            let candidates: Vec<String> = self.unscheduled.clone();

            for step_id in candidates {
                if self.halted {
                    break;
                }
                // A submit failure earlier in this pass may already have
                // resolved this step through its skip policy.
                if !self.unscheduled.contains(&step_id) {
                    continue;
                }
                let Some(step) = self.definition.step(&step_id).cloned() else {
                    continue;
                };

                if step
                    .depends_on
                    .iter()
                    .any(|dep| snapshot.dependency_failed(dep))
                {
                    // Upstream failure propagates immediately; blocked
                    // branches are never retried.
                    debug!(step = %step_id, "dependency failed; blocking step");
                    self.record_result(WorkflowStepResult {
                        step_id: step_id.clone(),
                        status: StepStatus::Failed,
                        output: None,
                        error: Some("dependency_failed".to_string()),
                        execution_time_ms: 0,
                        agent_type: step.agent,
                    })
                    .await;
                    self.unscheduled.retain(|id| id != &step_id);
                    progressed = true;
                    continue;
                }

                if !step
                    .depends_on
                    .iter()
                    .all(|dep| snapshot.dependency_satisfied(dep))
                {
                    continue;
                }

                if !condition_holds(&step.condition, &snapshot) {
                    debug!(step = %step_id, "condition false; skipping step");
                    self.record_result(WorkflowStepResult::status_only(
                        step_id.clone(),
                        StepStatus::Skipped,
                        step.agent,
                    ))
                    .await;
                    self.unscheduled.retain(|id| id != &step_id);
                    progressed = true;
                    continue;
                }

                self.unscheduled.retain(|id| id != &step_id);
                if let Err(e) = self.submit_step(&step, None, false).await {
                    let message = e.to_string();
                    self.on_step_failure(&step_id, &message, false, 0).await;
                }
                progressed = true;
            }
        }
    }

    /// Resolves the step input and submits it to the engine, spawning a
    /// waiter that reports the terminal task back to the driver.
    async fn submit_step(
        &mut self,
        step: &WorkflowStep,
        agent_override: Option<ensemble_core::AgentType>,
        is_fallback: bool,
    ) -> EnsembleResult<()> {
        let agent = agent_override.unwrap_or(step.agent);
        let resolved = {
            let snapshot = self.shared.read().await;
            resolve_references(&step.input, &snapshot, &self.input)
        };

        let mut context = self.context.clone();
        context.workflow_execution_id = Some(self.execution_id);
        let request = TaskRequest::new(agent, &step.action, resolved).with_context(context);

        let opts = SubmitOptions::default()
            .with_timeout_ms(step.timeout_ms.unwrap_or(self.config.default_step_timeout_ms))
            // Under the `retry` strategy the step's budget is consumed by
            // whole-step resubmission instead of engine-local retries.
            .with_max_retries(if self.definition.error_handling == ErrorStrategy::Retry {
                0
            } else {
                step.retries
            });

        let task_id = self.engine.submit(request, opts).await?;
        self.in_flight.insert(step.id.clone(), task_id);

        {
            let mut execution = self.shared.write().await;
            execution.current_step = Some(step.id.clone());
            execution.step_results.insert(
                step.id.clone(),
                WorkflowStepResult::status_only(step.id.clone(), StepStatus::Running, agent),
            );
        }

        debug!(step = %step.id, agent = %agent, task_id = %task_id, "step submitted");

        let engine = Arc::clone(&self.engine);
        let tx = self.tx.clone();
        let step_id = step.id.clone();
        tokio::spawn(async move {
            match engine.wait(task_id).await {
                Ok(task) => {
                    let _ = tx.send((step_id, task, is_fallback));
                }
                Err(e) => {
                    error!(step = %step_id, error = %e, "step waiter lost its task");
                }
            }
        });
        Ok(())
    }

    async fn handle_outcome(&mut self, step_id: &str, task: AgentTask, was_fallback: bool) {
        self.in_flight.remove(step_id);
        let elapsed = task.execution_time_ms().unwrap_or(0);

        match task.status {
            TaskStatus::Completed => {
                debug!(step = %step_id, elapsed_ms = elapsed, "step completed");
                self.record_result(WorkflowStepResult {
                    step_id: step_id.to_string(),
                    status: StepStatus::Completed,
                    output: task.output,
                    error: None,
                    execution_time_ms: elapsed,
                    agent_type: task.agent_type,
                })
                .await;
                let mut execution = self.shared.write().await;
                execution.completion_order.push(step_id.to_string());
            }
            _ => {
                let message = task
                    .error
                    .unwrap_or_else(|| "capability invocation failed".to_string());
                self.on_step_failure(step_id, &message, was_fallback, elapsed)
                    .await;
            }
        }
    }

    /// Applies fallback, retry, and per-step/global failure policies to a
    /// terminally failed step attempt.
    async fn on_step_failure(
        &mut self,
        step_id: &str,
        message: &str,
        was_fallback: bool,
        elapsed: u64,
    ) {
        let Some(step) = self.definition.step(step_id).cloned() else {
            return;
        };
        let mut message = message.to_string();
        // Cancellation is terminal at every layer: never replayed through
        // a fallback or a resubmission.
        let replayable = message != "cancelled";

        let fallback_wanted = step.on_error == StepErrorPolicy::Fallback
            || self.definition.error_handling == ErrorStrategy::Fallback;
        if replayable && !was_fallback && fallback_wanted {
            if let Some(fallback_agent) = step.fallback_agent {
                info!(
                    step = %step_id,
                    from = %step.agent,
                    to = %fallback_agent,
                    "step failed; invoking fallback agent"
                );
                match self.submit_step(&step, Some(fallback_agent), true).await {
                    Ok(()) => return,
                    Err(e) => message = format!("fallback submission failed: {e}"),
                }
            }
        }

        if replayable && self.definition.error_handling == ErrorStrategy::Retry {
            let used = self.resubmits.entry(step_id.to_string()).or_insert(0);
            if *used < step.retries {
                *used += 1;
                warn!(
                    step = %step_id,
                    resubmission = *used,
                    budget = step.retries,
                    error = %message,
                    "step failed; resubmitting"
                );
                match self.submit_step(&step, None, false).await {
                    Ok(()) => return,
                    Err(e) => message = format!("resubmission failed: {e}"),
                }
            }
        }

        warn!(step = %step_id, error = %message, "step failed terminally");
        self.record_result(WorkflowStepResult {
            step_id: step_id.to_string(),
            status: StepStatus::Failed,
            output: None,
            error: Some(message.clone()),
            execution_time_ms: elapsed,
            agent_type: step.agent,
        })
        .await;

        if step.on_error == StepErrorPolicy::Skip {
            // The failure is absorbed: direct dependents are skipped and
            // (being satisfied dependencies themselves) unblock their own
            // dependents.
            let dependents: Vec<(String, ensemble_core::AgentType)> = self
                .definition
                .steps
                .iter()
                .filter(|s| s.depends_on.iter().any(|d| d == step_id))
                .filter(|s| self.unscheduled.contains(&s.id))
                .map(|s| (s.id.clone(), s.agent))
                .collect();
            for (dependent, agent) in dependents {
                debug!(step = %dependent, "skipping dependent of absorbed failure");
                self.record_result(WorkflowStepResult::status_only(
                    dependent.clone(),
                    StepStatus::Skipped,
                    agent,
                ))
                .await;
                self.unscheduled.retain(|id| id != &dependent);
            }
            return;
        }

        if self.first_error.is_none() {
            self.first_error = Some(format!("step '{step_id}' failed: {message}"));
            let mut execution = self.shared.write().await;
            execution.current_step = Some(step_id.to_string());
        }
        if matches!(
            self.definition.error_handling,
            ErrorStrategy::FailFast | ErrorStrategy::Retry
        ) {
            // Stop scheduling anything new; already-running steps are
            // allowed to finish.
            self.halted = true;
        }
    }

    /// Cancels every in-flight task and records its step as failed.
    async fn abort_in_flight(&mut self, label: &str) {
        let in_flight: Vec<(String, Uuid)> = self.in_flight.drain().collect();
        for (step_id, task_id) in in_flight {
            if let Err(e) = self.engine.cancel(task_id).await {
                warn!(step = %step_id, error = %e, "failed to cancel step task");
            }
            let agent = self
                .definition
                .step(&step_id)
                .map(|s| s.agent)
                .unwrap_or(ensemble_core::AgentType::Orchestrator);
            self.record_result(WorkflowStepResult {
                step_id: step_id.clone(),
                status: StepStatus::Failed,
                output: None,
                error: Some(label.to_string()),
                execution_time_ms: 0,
                agent_type: agent,
            })
            .await;
        }
    }

    async fn record_result(&self, result: WorkflowStepResult) {
        let mut execution = self.shared.write().await;
        execution.step_results.insert(result.step_id.clone(), result);
    }

    async fn finalize(mut self) {
        {
            let mut execution = self.shared.write().await;
            execution.completed_at = Some(Utc::now());
            match self.first_error.take() {
                Some(err) => {
                    execution.status = WorkflowStatus::Failed;
                    execution.error = Some(err);
                }
                None => {
                    execution.status = WorkflowStatus::Completed;
                }
            }
            info!(
                execution_id = %self.execution_id,
                status = ?execution.status,
                steps = execution.step_results.len(),
                "workflow execution finished"
            );
        }
        let mut cancels = self.cancels.write().await;
        cancels.remove(&self.execution_id);
    }
}

async fn sleep_until_or_forever(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Evaluates a step condition against the execution so far.
///
/// Unknown expressions evaluate true with a warning rather than blocking
/// the workflow.
fn condition_holds(condition: &Option<StepCondition>, execution: &WorkflowExecution) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    match condition.kind {
        ConditionKind::Always => true,
        ConditionKind::If | ConditionKind::Unless => {
            let Some(expression) = condition.expression.as_deref() else {
                return true;
            };
            let Some(rest) = expression.strip_prefix("steps.") else {
                warn!(expression, "unknown condition expression; treating as true");
                return true;
            };
            let step_id = rest.split('.').next().unwrap_or(rest);
            let completed = execution
                .step_results
                .get(step_id)
                .is_some_and(|r| r.status == StepStatus::Completed);
            match condition.kind {
                ConditionKind::If => completed,
                _ => !completed,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ensemble_core::{AgentInvoker, AgentType, EngineConfig, RetryPolicy};
    use ensemble_registry::{AgentCapability, CapabilityRegistry, RegistryBuilder};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// Scripted agent backend: records every request, fails configured
    /// (agent, action) pairs a set number of times, and can stall forever.
    struct ScriptedInvoker {
        log: Arc<StdMutex<Vec<TaskRequest>>>,
        fail: StdMutex<HashMap<String, u32>>,
        stall: HashSet<String>,
    }

    impl ScriptedInvoker {
        fn new() -> Self {
            Self {
                log: Arc::new(StdMutex::new(Vec::new())),
                fail: StdMutex::new(HashMap::new()),
                stall: HashSet::new(),
            }
        }

        fn failing(mut self, agent: AgentType, action: &str, times: u32) -> Self {
            self.fail
                .get_mut()
                .unwrap()
                .insert(format!("{agent}:{action}"), times);
            self
        }

        fn stalling(mut self, agent: AgentType, action: &str) -> Self {
            self.stall.insert(format!("{agent}:{action}"));
            self
        }

        fn invocations(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .map(|r| format!("{}:{}", r.agent_type, r.task_type))
                .collect()
        }

        fn requests(&self) -> Vec<TaskRequest> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, request: &TaskRequest) -> EnsembleResult<serde_json::Value> {
            let key = format!("{}:{}", request.agent_type, request.task_type);
            self.log.lock().unwrap().push(request.clone());

            if self.stall.contains(&key) {
                std::future::pending::<()>().await;
            }

            {
                let mut fail = self.fail.lock().unwrap();
                if let Some(remaining) = fail.get_mut(&key) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(EnsembleError::Tool(format!("{key} refused")));
                    }
                }
            }

            Ok(serde_json::json!({
                "by": request.agent_type.as_str(),
                "action": request.task_type,
            }))
        }
    }

    fn cap(name: &str) -> AgentCapability {
        AgentCapability::new(name, name)
    }

    fn registry(invoker: Arc<ScriptedInvoker>) -> Arc<CapabilityRegistry> {
        Arc::new(
            RegistryBuilder::new()
                .register(
                    AgentType::Research,
                    vec![cap("gather")],
                    vec![],
                    Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
                )
                .register(
                    AgentType::Writing,
                    vec![cap("draft"), cap("score")],
                    vec![],
                    Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
                )
                .register(
                    AgentType::Planner,
                    vec![cap("review")],
                    vec![],
                    Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
                )
                .register(
                    AgentType::Grant,
                    vec![cap("score")],
                    vec![],
                    invoker as Arc<dyn AgentInvoker>,
                )
                .build(),
        )
    }

    async fn setup(invoker: Arc<ScriptedInvoker>) -> (Arc<TaskEngine>, Orchestrator) {
        let config = EngineConfig {
            workers: 4,
            default_timeout_ms: 5_000,
            retry: RetryPolicy {
                max_retries: 0,
                backoff_base_ms: 1,
                backoff_max_ms: 2,
            },
        };
        let engine = Arc::new(TaskEngine::new(config, registry(invoker)));
        engine.start().await;
        let orchestrator = Orchestrator::new(Arc::clone(&engine), WorkflowConfig::default());
        (engine, orchestrator)
    }

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "chain",
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

    #[tokio::test]
    async fn test_chain_runs_in_dependency_order() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let handle = orchestrator
            .execute(chain(), serde_json::json!({}))
            .await
            .unwrap();
        let execution = handle.wait().await;

        assert_eq!(execution.status, WorkflowStatus::Completed);
        for step in ["s1", "s2", "s3"] {
            assert_eq!(
                execution.step_results[step].status,
                StepStatus::Completed,
                "step {step}"
            );
        }
        // s2 never starts before s1 is terminal, s3 never before s2.
        assert_eq!(
            invoker.invocations(),
            vec!["research:gather", "writing:draft", "planner:review"]
        );
        assert_eq!(
            execution.completion_order,
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_fallback_agent_substituted() {
        let invoker =
            Arc::new(ScriptedInvoker::new().failing(AgentType::Grant, "score", 99));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "fallback",
            "fallback",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather"),
                WorkflowStep::new("s2", AgentType::Grant, "score")
                    .depends_on(vec!["s1".into()])
                    .on_error(StepErrorPolicy::Fallback)
                    .with_fallback(AgentType::Writing),
                WorkflowStep::new("s3", AgentType::Planner, "review")
                    .depends_on(vec!["s2".into()]),
            ],
        );

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(execution.status, WorkflowStatus::Completed);
        let s2 = &execution.step_results["s2"];
        assert_eq!(s2.status, StepStatus::Completed);
        // The fallback's result became the step's result.
        assert_eq!(s2.agent_type, AgentType::Writing);
        assert_eq!(s2.output.as_ref().unwrap()["by"], serde_json::json!("writing"));
        assert_eq!(execution.step_results["s3"].status, StepStatus::Completed);

        let calls = invoker.invocations();
        assert!(calls.contains(&"grant:score".to_string()));
        assert!(calls.contains(&"writing:score".to_string()));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_fail_fast_halts_scheduling() {
        let invoker =
            Arc::new(ScriptedInvoker::new().failing(AgentType::Research, "gather", 99));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let execution = orchestrator
            .execute(chain(), serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert!(execution.error.as_ref().unwrap().contains("s1"));
        assert_eq!(execution.step_results["s1"].status, StepStatus::Failed);
        // Downstream steps were never scheduled.
        assert!(!execution.step_results.contains_key("s2"));
        assert!(!execution.step_results.contains_key("s3"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_continue_isolates_failed_branch() {
        let invoker =
            Arc::new(ScriptedInvoker::new().failing(AgentType::Research, "gather", 99));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "branches",
            "branches",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather"),
                WorkflowStep::new("s2", AgentType::Writing, "draft")
                    .depends_on(vec!["s1".into()]),
                WorkflowStep::new("s3", AgentType::Planner, "review"),
            ],
        )
        .with_strategy(ErrorStrategy::Continue);

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        // The independent branch finished; the blocked branch is failed
        // with a dependency error; the run as a whole is failed.
        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert_eq!(execution.step_results["s3"].status, StepStatus::Completed);
        assert_eq!(execution.step_results["s2"].status, StepStatus::Failed);
        assert_eq!(
            execution.step_results["s2"].error.as_deref(),
            Some("dependency_failed")
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_strategy_resubmits_whole_step() {
        let invoker =
            Arc::new(ScriptedInvoker::new().failing(AgentType::Research, "gather", 2));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "retry",
            "retry",
            vec![WorkflowStep::new("s1", AgentType::Research, "gather").with_retries(2)],
        )
        .with_strategy(ErrorStrategy::Retry);

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(execution.status, WorkflowStatus::Completed);
        assert_eq!(execution.step_results["s1"].status, StepStatus::Completed);
        // Two failed attempts plus the successful resubmission.
        assert_eq!(invoker.invocations().len(), 3);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_exhaustion_falls_through_to_fail_fast() {
        let invoker =
            Arc::new(ScriptedInvoker::new().failing(AgentType::Research, "gather", 99));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "retry",
            "retry",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather").with_retries(1),
                WorkflowStep::new("s2", AgentType::Writing, "draft")
                    .depends_on(vec!["s1".into()]),
            ],
        )
        .with_strategy(ErrorStrategy::Retry);

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert_eq!(invoker.invocations().len(), 2);
        assert!(!execution.step_results.contains_key("s2"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_skip_policy_skips_dependents_transitively() {
        let invoker =
            Arc::new(ScriptedInvoker::new().failing(AgentType::Research, "gather", 99));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "skip",
            "skip",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather")
                    .on_error(StepErrorPolicy::Skip),
                WorkflowStep::new("s2", AgentType::Writing, "draft")
                    .depends_on(vec!["s1".into()]),
                WorkflowStep::new("s3", AgentType::Planner, "review")
                    .depends_on(vec!["s2".into()]),
            ],
        );

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        // The absorbed failure does not fail the run; the direct
        // dependent is skipped and, being satisfied, unblocks its own
        // dependent.
        assert_eq!(execution.status, WorkflowStatus::Completed);
        assert_eq!(execution.step_results["s1"].status, StepStatus::Failed);
        assert_eq!(execution.step_results["s2"].status, StepStatus::Skipped);
        assert_eq!(execution.step_results["s3"].status, StepStatus::Completed);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unless_condition_skips_after_completion() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "conditional",
            "conditional",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather"),
                WorkflowStep::new("s2", AgentType::Writing, "draft")
                    .depends_on(vec!["s1".into()])
                    .with_condition(StepCondition::unless_completed("s1")),
                WorkflowStep::new("s3", AgentType::Planner, "review")
                    .depends_on(vec!["s2".into()]),
            ],
        );

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(execution.status, WorkflowStatus::Completed);
        assert_eq!(execution.step_results["s2"].status, StepStatus::Skipped);
        // Skipped via condition satisfies dependents.
        assert_eq!(execution.step_results["s3"].status, StepStatus::Completed);
        let calls = invoker.invocations();
        assert!(!calls.contains(&"writing:draft".to_string()));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_workflow_timeout_cancels_steps() {
        let invoker =
            Arc::new(ScriptedInvoker::new().stalling(AgentType::Research, "gather"));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "slow",
            "slow",
            vec![WorkflowStep::new("s1", AgentType::Research, "gather")],
        )
        .with_timeout_ms(100);

        let execution = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("workflow_timeout"));
        assert_eq!(execution.step_results["s1"].status, StepStatus::Failed);
        assert_eq!(
            execution.step_results["s1"].error.as_deref(),
            Some("cancelled")
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_execution() {
        let invoker =
            Arc::new(ScriptedInvoker::new().stalling(AgentType::Research, "gather"));
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let handle = orchestrator
            .execute(
                WorkflowDefinition::new(
                    "hang",
                    "hang",
                    vec![WorkflowStep::new("s1", AgentType::Research, "gather")],
                ),
                serde_json::json!({}),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        orchestrator.cancel(handle.execution_id).await.unwrap();
        let execution = handle.wait().await;

        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("cancelled"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reference_resolution_between_steps() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (engine, orchestrator) = setup(Arc::clone(&invoker)).await;

        let definition = WorkflowDefinition::new(
            "refs",
            "refs",
            vec![
                WorkflowStep::new("s1", AgentType::Research, "gather")
                    .with_input(serde_json::json!({"topic": "{{input.topic}}"})),
                WorkflowStep::new("s2", AgentType::Writing, "draft")
                    .depends_on(vec!["s1".into()])
                    .with_input(serde_json::json!({
                        "source": "{{steps.s1.output.by}}",
                        "note": "from {{prev.action}}",
                    })),
            ],
        );

        let execution = orchestrator
            .execute(definition, serde_json::json!({"topic": "coral reefs"}))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(execution.status, WorkflowStatus::Completed);

        let requests = invoker.requests();
        assert_eq!(requests[0].input["topic"], serde_json::json!("coral reefs"));
        assert_eq!(requests[1].input["source"], serde_json::json!("research"));
        assert_eq!(requests[1].input["note"], serde_json::json!("from gather"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cyclic_definition_rejected_synchronously() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (engine, orchestrator) = setup(invoker).await;

        let definition = WorkflowDefinition::new(
            "cycle",
            "cycle",
            vec![
                WorkflowStep::new("a", AgentType::Research, "gather")
                    .depends_on(vec!["b".into()]),
                WorkflowStep::new("b", AgentType::Writing, "draft")
                    .depends_on(vec!["a".into()]),
            ],
        );

        let err = orchestrator
            .execute(definition, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_and_active_count() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (engine, orchestrator) = setup(invoker).await;

        let handle = orchestrator
            .execute(chain(), serde_json::json!({}))
            .await
            .unwrap();
        let execution_id = handle.execution_id;
        let final_state = handle.wait().await;
        assert_eq!(final_state.status, WorkflowStatus::Completed);

        let polled = orchestrator.status(execution_id).await.unwrap();
        assert_eq!(polled.status, WorkflowStatus::Completed);
        assert_eq!(orchestrator.active_count().await, 0);
        assert!(orchestrator.status(Uuid::new_v4()).await.is_none());
        engine.shutdown().await;
    }
}
