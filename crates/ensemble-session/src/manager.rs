use crate::session::{AgentSession, SessionStatus, SessionType};
use crate::store::SessionStore;
use ensemble_core::{AgentMessage, AgentType, EnsembleError, EnsembleResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A partial update applied to a session's context.
///
/// `Some` fields are set, list fields are appended, and map entries are
/// merged; everything else is left untouched.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    /// New active agent.
    pub active_agent: Option<AgentType>,
    /// New active task.
    pub active_task_id: Option<Uuid>,
    /// New active project.
    pub active_project_id: Option<String>,
    /// New inferred goal.
    pub current_goal: Option<String>,
    /// New inferred intent.
    pub user_intent: Option<String>,
    /// Tasks to add to the mention list.
    pub mentioned_tasks: Vec<String>,
    /// Projects to add to the mention list.
    pub mentioned_projects: Vec<String>,
    /// People to add to the mention list.
    pub mentioned_people: Vec<String>,
    /// Dates to add to the mention list.
    pub mentioned_dates: Vec<String>,
    /// Intermediate results to merge in.
    pub intermediate_results: HashMap<String, serde_json::Value>,
}

impl ContextPatch {
    /// Sets the inferred goal.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.current_goal = Some(goal.into());
        self
    }

    /// Sets the active agent.
    pub fn with_active_agent(mut self, agent: AgentType) -> Self {
        self.active_agent = Some(agent);
        self
    }

    /// Adds an intermediate result.
    pub fn with_result(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.intermediate_results.insert(key.into(), value);
        self
    }
}

/// Manages session lifecycle and ordered per-session mutation.
///
/// All mutations acquire the manager's write lock, so mutations to one
/// session apply in the order received; sessions are otherwise
/// independent. An optional [`SessionStore`] receives best-effort
/// write-through persistence.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, AgentSession>>,
    /// (workspace, user) -> active (non-archived) session.
    index: RwLock<HashMap<(String, String), Uuid>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionManager {
    /// Creates a manager with no durable store.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Attaches a durable store for write-through persistence.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn persist(&self, session: &AgentSession) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(session).await {
                warn!(session_id = %session.id, error = %e, "session persistence failed");
            }
        }
    }

    /// Returns the active session for (workspace, user), creating one if
    /// none exists.
    pub async fn get_or_create(
        &self,
        workspace_id: &str,
        user_id: &str,
        session_type: SessionType,
    ) -> AgentSession {
        let key = (workspace_id.to_string(), user_id.to_string());

        let session = {
            let mut sessions = self.sessions.write().await;
            let mut index = self.index.write().await;
            if let Some(id) = index.get(&key) {
                if let Some(session) = sessions.get(id) {
                    if !session.archived {
                        return session.clone();
                    }
                }
            }
            let session = AgentSession::new(workspace_id, user_id, session_type);
            info!(session_id = %session.id, workspace = workspace_id, "session created");
            sessions.insert(session.id, session.clone());
            index.insert(key, session.id);
            session
        };
        self.persist(&session).await;
        session
    }

    /// Returns a snapshot of a session.
    pub async fn get(&self, session_id: Uuid) -> Option<AgentSession> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).cloned()
    }

    /// Appends a message to a session's transcript.
    pub async fn append_message(
        &self,
        session_id: Uuid,
        message: AgentMessage,
    ) -> EnsembleResult<()> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| EnsembleError::Session(format!("unknown session: {session_id}")))?;
            session.append(message);
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Applies a partial update to a session's context.
    pub async fn update_context(
        &self,
        session_id: Uuid,
        patch: ContextPatch,
    ) -> EnsembleResult<AgentSession> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| EnsembleError::Session(format!("unknown session: {session_id}")))?;

            let ctx = &mut session.context;
            if let Some(agent) = patch.active_agent {
                ctx.active_agent = Some(agent);
            }
            if let Some(task_id) = patch.active_task_id {
                ctx.active_task_id = Some(task_id);
            }
            if let Some(project_id) = patch.active_project_id {
                ctx.active_project_id = Some(project_id);
            }
            if let Some(goal) = patch.current_goal {
                ctx.working_memory.current_goal = Some(goal);
            }
            if let Some(intent) = patch.user_intent {
                ctx.working_memory.user_intent = Some(intent);
            }
            ctx.working_memory.mentioned_tasks.extend(patch.mentioned_tasks);
            ctx.working_memory
                .mentioned_projects
                .extend(patch.mentioned_projects);
            ctx.working_memory.mentioned_people.extend(patch.mentioned_people);
            ctx.working_memory.mentioned_dates.extend(patch.mentioned_dates);
            ctx.working_memory
                .intermediate_results
                .extend(patch.intermediate_results);

            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(snapshot)
    }

    /// Sets a session's lifecycle status.
    pub async fn set_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> EnsembleResult<()> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| EnsembleError::Session(format!("unknown session: {session_id}")))?;
            session.status = status;
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Archives a session, discarding its working context. The transcript
    /// record itself is retained.
    pub async fn archive(&self, session_id: Uuid) -> EnsembleResult<()> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| EnsembleError::Session(format!("unknown session: {session_id}")))?;
            session.archive();
            let key = (session.workspace_id.clone(), session.user_id.clone());
            let snapshot = session.clone();
            drop(sessions);

            let mut index = self.index.write().await;
            if index.get(&key) == Some(&session_id) {
                index.remove(&key);
            }
            snapshot
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Returns a session's transcript.
    pub async fn history(&self, session_id: Uuid) -> EnsembleResult<Vec<AgentMessage>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|s| s.messages.clone())
            .ok_or_else(|| EnsembleError::Session(format!("unknown session: {session_id}")))
    }

    /// Transfers the session's active-agent pointer to `to`.
    pub async fn apply_handoff(&self, session_id: Uuid, to: AgentType) -> EnsembleResult<()> {
        debug!(session_id = %session_id, to = %to, "applying handoff");
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| EnsembleError::Session(format!("unknown session: {session_id}")))?;
            session.context.active_agent = Some(to);
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Number of sessions held by the manager, archived included.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
