use crate::task::{AgentTask, SubmitOptions, TaskStatus};
use chrono::Utc;
use ensemble_core::{EngineConfig, EnsembleError, EnsembleResult, TaskRequest};
use ensemble_memory::{MemoryScope, MemoryStore};
use ensemble_registry::CapabilityRegistry;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How many memories are attached to an invocation context.
const MEMORY_ENRICHMENT_LIMIT: usize = 10;

struct QueuedRun {
    priority: i32,
    seq: u64,
    task_id: Uuid,
    attempt: u32,
}

impl PartialEq for QueuedRun {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRun {}

impl PartialOrd for QueuedRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRun {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, earlier submission breaking
        // ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Clone)]
struct Submitted {
    request: TaskRequest,
    timeout_ms: u64,
    max_retries: u32,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<CapabilityRegistry>,
    memory: Option<Arc<dyn MemoryStore>>,
    tasks: RwLock<HashMap<Uuid, AgentTask>>,
    submitted: RwLock<HashMap<Uuid, Submitted>>,
    queue: Mutex<BinaryHeap<QueuedRun>>,
    seq: AtomicU64,
    notify: Notify,
    watchers: RwLock<HashMap<Uuid, watch::Sender<TaskStatus>>>,
    cancels: RwLock<HashMap<Uuid, CancellationToken>>,
}

/// Asynchronous task execution engine.
///
/// A fixed pool of workers drains a shared priority queue. Everything
/// apart from the agent capability call itself — queue admission, status
/// transitions, dependency checks upstream — is non-blocking.
pub struct TaskEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TaskEngine {
    /// Creates an engine over the given registry. Call
    /// [`start`](Self::start) to spawn the worker pool.
    pub fn new(config: EngineConfig, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                memory: None,
                tasks: RwLock::new(HashMap::new()),
                submitted: RwLock::new(HashMap::new()),
                queue: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                notify: Notify::new(),
                watchers: RwLock::new(HashMap::new()),
                cancels: RwLock::new(HashMap::new()),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Attaches a memory store used to enrich invocation contexts.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        // Safe while the engine has not been shared yet: `new` hands back
        // the sole owner.
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.memory = Some(memory);
        }
        self
    }

    /// Spawns the worker pool. Idempotent.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        info!(workers = self.inner.config.workers, "task engine starting");
        for _ in 0..self.inner.config.workers.max(1) {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(async move {
                loop {
                    let run = { inner.queue.lock().await.pop() };
                    match run {
                        Some(run) => Arc::clone(&inner).execute(run).await,
                        None => inner.notify.notified().await,
                    }
                }
            }));
        }
    }

    /// Aborts the worker pool. In-flight tasks are dropped mid-call;
    /// queued tasks remain pending.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
    }

    /// Validates and enqueues a request, returning the new task's id.
    pub async fn submit(
        &self,
        request: TaskRequest,
        opts: SubmitOptions,
    ) -> EnsembleResult<Uuid> {
        self.inner.registry.validate(&request)?;

        let task = AgentTask {
            id: Uuid::new_v4(),
            agent_type: request.agent_type,
            task_type: request.task_type.clone(),
            status: TaskStatus::Pending,
            priority: opts.priority,
            input: request.input.clone(),
            output: None,
            error: None,
            progress: 0,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let task_id = task.id;

        let spec = Submitted {
            request,
            timeout_ms: opts
                .timeout_ms
                .unwrap_or(self.inner.config.default_timeout_ms),
            max_retries: opts
                .max_retries
                .unwrap_or(self.inner.config.retry.max_retries),
        };

        {
            let mut tasks = self.inner.tasks.write().await;
            tasks.insert(task_id, task);
        }
        {
            let mut submitted = self.inner.submitted.write().await;
            submitted.insert(task_id, spec);
        }
        {
            let mut watchers = self.inner.watchers.write().await;
            watchers.insert(task_id, watch::channel(TaskStatus::Pending).0);
        }
        {
            let mut cancels = self.inner.cancels.write().await;
            cancels.insert(task_id, CancellationToken::new());
        }

        self.inner.enqueue(task_id, opts.priority, 0).await;
        debug!(task_id = %task_id, priority = opts.priority, "task submitted");
        Ok(task_id)
    }

    /// Returns a snapshot of a task.
    pub async fn status(&self, task_id: Uuid) -> Option<AgentTask> {
        let tasks = self.inner.tasks.read().await;
        tasks.get(&task_id).cloned()
    }

    /// Awaits a task's terminal state and returns its final snapshot.
    pub async fn wait(&self, task_id: Uuid) -> EnsembleResult<AgentTask> {
        let mut rx = {
            let watchers = self.inner.watchers.read().await;
            watchers.get(&task_id).map(|tx| tx.subscribe())
        };

        loop {
            {
                let tasks = self.inner.tasks.read().await;
                match tasks.get(&task_id) {
                    Some(task) if task.status.is_terminal() => return Ok(task.clone()),
                    Some(_) => {}
                    None => {
                        return Err(EnsembleError::Validation(format!(
                            "unknown task: {task_id}"
                        )))
                    }
                }
            }
            match rx.as_mut() {
                Some(rx) => {
                    // A closed channel means the terminal transition
                    // already happened; re-check the snapshot above.
                    if rx.changed().await.is_err() {
                        continue;
                    }
                }
                None => {
                    return Err(EnsembleError::Validation(format!(
                        "unknown task: {task_id}"
                    )))
                }
            }
        }
    }

    /// Cancels a task. Honored only while pending or running; once
    /// terminal this is a no-op returning the existing terminal snapshot.
    pub async fn cancel(&self, task_id: Uuid) -> EnsembleResult<AgentTask> {
        let (snapshot, transitioned) = {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(&task_id)
                .ok_or_else(|| EnsembleError::Validation(format!("unknown task: {task_id}")))?;
            if task.status.is_terminal() {
                (task.clone(), false)
            } else {
                task.status = TaskStatus::Cancelled;
                task.error = Some("cancelled".into());
                task.completed_at = Some(Utc::now());
                (task.clone(), true)
            }
        };

        if transitioned {
            info!(task_id = %task_id, "task cancelled");
            if let Some(token) = self.inner.cancels.read().await.get(&task_id) {
                token.cancel();
            }
            self.inner.publish_status(task_id, TaskStatus::Cancelled).await;
            self.inner.cleanup(task_id).await;
        }
        Ok(snapshot)
    }

    /// Reports progress for a running task. Decreases are ignored so the
    /// observed value is monotonic; values above 100 are clamped.
    pub async fn report_progress(&self, task_id: Uuid, percent: u8) -> EnsembleResult<()> {
        let mut tasks = self.inner.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or_else(|| EnsembleError::Validation(format!("unknown task: {task_id}")))?;
        if task.status == TaskStatus::Running {
            task.progress = task.progress.max(percent.min(100));
        }
        Ok(())
    }

    /// Number of queued runs not yet picked up by a worker.
    pub async fn queue_depth(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Counts of tasks by status: (pending, running, completed, failed,
    /// cancelled).
    pub async fn summary(&self) -> (usize, usize, usize, usize, usize) {
        let tasks = self.inner.tasks.read().await;
        let mut counts = (0, 0, 0, 0, 0);
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.0 += 1,
                TaskStatus::Running => counts.1 += 1,
                TaskStatus::Completed => counts.2 += 1,
                TaskStatus::Failed => counts.3 += 1,
                TaskStatus::Cancelled => counts.4 += 1,
            }
        }
        counts
    }
}

impl EngineInner {
    async fn enqueue(&self, task_id: Uuid, priority: i32, attempt: u32) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut queue = self.queue.lock().await;
            queue.push(QueuedRun {
                priority,
                seq,
                task_id,
                attempt,
            });
        }
        self.notify.notify_one();
    }

    async fn publish_status(&self, task_id: Uuid, status: TaskStatus) {
        let watchers = self.watchers.read().await;
        if let Some(tx) = watchers.get(&task_id) {
            let _ = tx.send(status);
        }
    }

    /// Drops per-task bookkeeping once the task is terminal. The task
    /// record itself is retained for status queries.
    async fn cleanup(&self, task_id: Uuid) {
        self.submitted.write().await.remove(&task_id);
        self.cancels.write().await.remove(&task_id);
        self.watchers.write().await.remove(&task_id);
    }

    async fn execute(self: Arc<Self>, run: QueuedRun) {
        let task_id = run.task_id;

        let proceed = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&task_id) {
                Some(task) if !task.status.is_terminal() => {
                    if task.status == TaskStatus::Pending {
                        task.status = TaskStatus::Running;
                        task.started_at = Some(Utc::now());
                    }
                    task.attempt = run.attempt;
                    true
                }
                // Cancelled while queued, or unknown.
                _ => false,
            }
        };
        if !proceed {
            return;
        }
        self.publish_status(task_id, TaskStatus::Running).await;

        let spec = {
            let submitted = self.submitted.read().await;
            submitted.get(&task_id).cloned()
        };
        let Some(spec) = spec else {
            // Cancellation raced the dequeue and already cleaned up.
            return;
        };

        let Some(invoker) = self.registry.invoker(spec.request.agent_type) else {
            self.finalize_failure(task_id, "no invoker registered".into())
                .await;
            return;
        };

        let request = self.enrich(spec.request.clone(), task_id).await;
        let token = {
            let cancels = self.cancels.read().await;
            cancels.get(&task_id).cloned().unwrap_or_default()
        };

        debug!(
            task_id = %task_id,
            agent = %request.agent_type,
            task_type = %request.task_type,
            attempt = run.attempt,
            "invoking agent"
        );

        let timeout = std::time::Duration::from_millis(spec.timeout_ms);
        let result = tokio::select! {
            _ = token.cancelled() => Err(EnsembleError::Cancelled("task cancelled".into())),
            invoked = tokio::time::timeout(timeout, invoker.invoke(&request)) => match invoked {
                Ok(res) => res,
                Err(_) => Err(EnsembleError::Timeout(format!(
                    "capability call exceeded {}ms",
                    spec.timeout_ms
                ))),
            },
        };

        match result {
            Ok(output) => self.finalize_success(task_id, output).await,
            Err(EnsembleError::Cancelled(_)) => {
                // cancel() already wrote the terminal state.
                debug!(task_id = %task_id, "invocation interrupted by cancel");
            }
            Err(e) => {
                if e.is_retryable() && run.attempt < spec.max_retries {
                    let delay = self.config.retry.backoff_ms(run.attempt);
                    warn!(
                        task_id = %task_id,
                        attempt = run.attempt,
                        delay_ms = delay,
                        error = %e,
                        "task attempt failed; retrying"
                    );
                    let inner = Arc::clone(&self);
                    let priority = run.priority;
                    let next_attempt = run.attempt + 1;
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                        inner.enqueue(task_id, priority, next_attempt).await;
                    });
                } else {
                    let label = match &e {
                        EnsembleError::Timeout(_) => "timeout".to_string(),
                        other => other.to_string(),
                    };
                    error!(task_id = %task_id, error = %e, "task failed");
                    self.finalize_failure(task_id, label).await;
                }
            }
        }
    }

    /// Attaches workspace/agent-scoped memories and the task id to the
    /// invocation context.
    async fn enrich(&self, mut request: TaskRequest, task_id: Uuid) -> TaskRequest {
        request.context.task_id = Some(task_id);

        let Some(memory) = &self.memory else {
            return request;
        };
        if request.context.workspace_id.is_empty() {
            return request;
        }

        let mut scope = MemoryScope::workspace(request.context.workspace_id.clone())
            .with_agent(request.agent_type);
        if !request.context.user_id.is_empty() {
            scope = scope.with_user(request.context.user_id.clone());
        }

        match memory.query(&scope, None, MEMORY_ENRICHMENT_LIMIT).await {
            Ok(memories) => {
                request.context.memories = memories
                    .iter()
                    .filter_map(|m| serde_json::to_value(m).ok())
                    .collect();
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "memory enrichment failed"),
        }
        request
    }

    async fn finalize_success(&self, task_id: Uuid, output: serde_json::Value) {
        {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            task.status = TaskStatus::Completed;
            task.output = Some(output);
            task.progress = 100;
            task.completed_at = Some(Utc::now());
        }
        debug!(task_id = %task_id, "task completed");
        self.publish_status(task_id, TaskStatus::Completed).await;
        self.cleanup(task_id).await;
    }

    async fn finalize_failure(&self, task_id: Uuid, error: String) {
        {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            task.completed_at = Some(Utc::now());
        }
        self.publish_status(task_id, TaskStatus::Failed).await;
        self.cleanup(task_id).await;
    }
}
