use crate::agent::AgentType;
use crate::error::EnsembleResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Context handed to an agent capability invocation.
///
/// Carries the already-authorized workspace/user pair, linkage to the
/// session, task, or workflow that triggered the call, and any long-term
/// memories the engine attached before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeContext {
    /// Workspace the invocation acts within.
    pub workspace_id: String,
    /// User on whose behalf the invocation runs.
    pub user_id: String,
    /// Session this invocation belongs to, if any.
    pub session_id: Option<Uuid>,
    /// Task record tracking this invocation, if any.
    pub task_id: Option<Uuid>,
    /// Workflow execution this invocation is a step of, if any.
    pub workflow_execution_id: Option<Uuid>,
    /// Long-term memories attached by the engine before dispatch.
    #[serde(default)]
    pub memories: Vec<serde_json::Value>,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InvokeContext {
    /// Creates a context for the given workspace and user.
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Links the context to a session.
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Links the context to a workflow execution.
    pub fn with_workflow(mut self, execution_id: Uuid) -> Self {
        self.workflow_execution_id = Some(execution_id);
        self
    }
}

/// A request for one agent capability invocation.
///
/// Requests are validated against the capability registry at the
/// orchestration boundary before any agent code runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The agent to invoke.
    pub agent_type: AgentType,
    /// The declared capability (task type) to perform.
    pub task_type: String,
    /// Capability input payload.
    pub input: serde_json::Value,
    /// Invocation context.
    #[serde(default)]
    pub context: InvokeContext,
}

impl TaskRequest {
    /// Creates a request for the given agent, task type, and input.
    pub fn new(
        agent_type: AgentType,
        task_type: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            agent_type,
            task_type: task_type.into(),
            input,
            context: InvokeContext::default(),
        }
    }

    /// Attaches an invocation context.
    pub fn with_context(mut self, context: InvokeContext) -> Self {
        self.context = context;
        self
    }
}

/// Uniform entry point the engine uses to call into an agent implementation.
///
/// The model or tool backend behind this call is an external collaborator;
/// the engine only consumes success or failure and never manages prompts.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Performs the requested capability and returns its output payload.
    async fn invoke(&self, request: &TaskRequest) -> EnsembleResult<serde_json::Value>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = TaskRequest::new(
            AgentType::Grant,
            "score_fit",
            serde_json::json!({"grant_id": "g-1"}),
        )
        .with_context(InvokeContext::new("ws-1", "u-1"));
        assert_eq!(req.agent_type, AgentType::Grant);
        assert_eq!(req.task_type, "score_fit");
        assert_eq!(req.context.workspace_id, "ws-1");
    }

    #[test]
    fn test_context_links() {
        let session = Uuid::new_v4();
        let exec = Uuid::new_v4();
        let ctx = InvokeContext::new("ws", "u")
            .with_session(session)
            .with_workflow(exec);
        assert_eq!(ctx.session_id, Some(session));
        assert_eq!(ctx.workflow_execution_id, Some(exec));
    }
}
