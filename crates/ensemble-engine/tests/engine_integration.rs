//! Task engine integration test: a worker pool draining a mixed queue.

use async_trait::async_trait;
use ensemble_core::{
    AgentInvoker, AgentType, EngineConfig, EnsembleResult, InvokeContext, RetryPolicy, TaskRequest,
};
use ensemble_engine::{SubmitOptions, TaskEngine, TaskStatus};
use ensemble_registry::{AgentCapability, RegistryBuilder};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Sleeps briefly, then echoes; counts concurrent invocations.
struct SlowEcho {
    in_flight: AtomicU32,
    peak: AtomicU32,
}

#[async_trait]
impl AgentInvoker for SlowEcho {
    async fn invoke(&self, request: &TaskRequest) -> EnsembleResult<serde_json::Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(serde_json::json!({"echo": request.input}))
    }
}

#[tokio::test]
async fn test_worker_pool_drains_queue_in_parallel() {
    let invoker = Arc::new(SlowEcho {
        in_flight: AtomicU32::new(0),
        peak: AtomicU32::new(0),
    });
    let registry = Arc::new(
        RegistryBuilder::new()
            .register(
                AgentType::Task,
                vec![AgentCapability::new("triage", "Triage a task")],
                vec!["task".into()],
                Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
            )
            .build(),
    );
    let engine = TaskEngine::new(
        EngineConfig {
            workers: 4,
            default_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        },
        registry,
    );
    engine.start().await;

    let mut ids = Vec::new();
    for i in 0..20 {
        let request = TaskRequest::new(
            AgentType::Task,
            "triage",
            serde_json::json!({"item": i}),
        )
        .with_context(InvokeContext::new("ws-1", "u-1"));
        ids.push(
            engine
                .submit(request, SubmitOptions::default())
                .await
                .unwrap(),
        );
    }

    for id in &ids {
        let task = engine.wait(*id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
    }

    let (pending, running, completed, failed, cancelled) = engine.summary().await;
    assert_eq!((pending, running), (0, 0));
    assert_eq!(completed, 20);
    assert_eq!((failed, cancelled), (0, 0));

    // More than one worker actually ran at once.
    assert!(invoker.peak.load(Ordering::SeqCst) > 1);
    engine.shutdown().await;
}
