use chrono::{DateTime, Utc};
use ensemble_core::{AgentMessage, AgentType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The interaction mode a session was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// A direct conversational exchange.
    Chat,
    /// An asynchronous task run.
    Task,
    /// A multi-step workflow run.
    Workflow,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No work in flight.
    Idle,
    /// An agent is planning its approach.
    Planning,
    /// An agent is executing.
    Executing,
    /// Waiting on user feedback.
    AwaitingFeedback,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Short-term memory extracted from the conversation so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    /// Task names or ids mentioned in the conversation.
    #[serde(default)]
    pub mentioned_tasks: Vec<String>,
    /// Project names or ids mentioned.
    #[serde(default)]
    pub mentioned_projects: Vec<String>,
    /// People mentioned.
    #[serde(default)]
    pub mentioned_people: Vec<String>,
    /// Dates mentioned.
    #[serde(default)]
    pub mentioned_dates: Vec<String>,
    /// The goal currently inferred for the user.
    pub current_goal: Option<String>,
    /// The user's inferred intent for the latest turn.
    pub user_intent: Option<String>,
    /// Documents relevant to the conversation.
    #[serde(default)]
    pub relevant_documents: Vec<String>,
    /// Intermediate results shared between sequential agent invocations.
    #[serde(default)]
    pub intermediate_results: HashMap<String, serde_json::Value>,
}

/// Ephemeral, session-scoped state shared across sequential agent
/// invocations. Owned exclusively by its session and discarded when the
/// session is archived.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// The agent currently holding control of the session.
    pub active_agent: Option<AgentType>,
    /// The task currently in flight, if any.
    pub active_task_id: Option<Uuid>,
    /// The project the conversation is about, if any.
    pub active_project_id: Option<String>,
    /// Number of messages appended so far.
    pub message_count: u64,
    /// When the session last saw activity.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Short-term extracted memory.
    #[serde(default)]
    pub working_memory: WorkingMemory,
}

/// One user+workspace conversation.
///
/// Sessions are never hard-deleted, only archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    /// Unique identifier for this session.
    pub id: Uuid,
    /// Workspace the session belongs to.
    pub workspace_id: String,
    /// User the session belongs to.
    pub user_id: String,
    /// Interaction mode.
    pub session_type: SessionType,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Ephemeral working context.
    pub context: SessionContext,
    /// Conversation transcript, ordered by creation time.
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Whether the session has been archived.
    #[serde(default)]
    pub archived: bool,
}

impl AgentSession {
    /// Creates a new idle session for the given workspace and user.
    pub fn new(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        session_type: SessionType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            session_type,
            status: SessionStatus::Idle,
            context: SessionContext::default(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            archived: false,
        }
    }

    /// Appends a message, updating the message count and activity
    /// timestamp as one logical operation.
    pub fn append(&mut self, mut message: AgentMessage) {
        let now = Utc::now();
        message.session_id = self.id;
        self.messages.push(message);
        self.context.message_count += 1;
        self.context.last_activity_at = Some(now);
        self.updated_at = now;
    }

    /// Archives the session, discarding its working context.
    pub fn archive(&mut self) {
        self.archived = true;
        self.context = SessionContext::default();
        self.updated_at = Utc::now();
    }

    /// Number of messages in the transcript.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
