use chrono::{DateTime, Utc};
use ensemble_core::{AgentMessage, AgentType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default priority assigned to messages that do not set one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// The kind of an [`InterAgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Expects a correlated response.
    Request,
    /// Answers a prior request.
    Response,
    /// Fans out to every subscribed agent.
    Broadcast,
    /// Transfers the active agent within a session.
    Handoff,
    /// A one-way status notification.
    Status,
}

/// Where a message is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    /// A specific agent.
    Agent(AgentType),
    /// The orchestrator.
    Orchestrator,
    /// Every currently subscribed agent.
    All,
}

/// Linkage of a message to its session, task, or workflow, plus the
/// request it answers and any carried transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    /// Session the message relates to.
    pub session_id: Option<Uuid>,
    /// Task the message relates to.
    pub task_id: Option<Uuid>,
    /// Workflow execution the message relates to.
    pub workflow_execution_id: Option<Uuid>,
    /// For responses: the id of the request being answered.
    pub parent_message_id: Option<Uuid>,
    /// Transcript carried by a history-preserving handoff.
    #[serde(default)]
    pub history: Vec<AgentMessage>,
}

/// Payload of a [`MessageKind::Handoff`] message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    /// Why control is being transferred.
    pub reason: String,
    /// Payload handed to the recipient.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Whether the recipient receives the full session transcript.
    #[serde(default = "default_preserve_history")]
    pub preserve_history: bool,
}

fn default_preserve_history() -> bool {
    true
}

/// One message routed between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterAgentMessage {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The agent that sent the message.
    pub sender: AgentType,
    /// Where the message is addressed.
    pub recipient: Recipient,
    /// The kind of message.
    pub message_type: MessageKind,
    /// Message payload.
    pub content: serde_json::Value,
    /// Session/task/workflow linkage.
    #[serde(default)]
    pub context: MessageContext,
    /// Urgency; higher is delivered first.
    pub priority: i32,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl InterAgentMessage {
    /// Creates a message with the default priority.
    pub fn new(
        sender: AgentType,
        recipient: Recipient,
        message_type: MessageKind,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            recipient,
            message_type,
            content,
            context: MessageContext::default(),
            priority: DEFAULT_PRIORITY,
            timestamp: Utc::now(),
        }
    }

    /// Creates a request addressed to a specific agent.
    pub fn request(sender: AgentType, to: AgentType, content: serde_json::Value) -> Self {
        Self::new(sender, Recipient::Agent(to), MessageKind::Request, content)
    }

    /// Creates the response to a request, inheriting its linkage.
    pub fn response_to(request: &InterAgentMessage, content: serde_json::Value) -> Self {
        let mut msg = Self::new(
            match request.recipient {
                Recipient::Agent(agent) => agent,
                _ => request.sender,
            },
            Recipient::Agent(request.sender),
            MessageKind::Response,
            content,
        );
        msg.context.parent_message_id = Some(request.id);
        msg.context.session_id = request.context.session_id;
        msg.context.task_id = request.context.task_id;
        msg.context.workflow_execution_id = request.context.workflow_execution_id;
        msg
    }

    /// Creates a broadcast to every subscribed agent.
    pub fn broadcast(sender: AgentType, content: serde_json::Value) -> Self {
        Self::new(sender, Recipient::All, MessageKind::Broadcast, content)
    }

    /// Creates a status notification.
    pub fn status(sender: AgentType, to: Recipient, content: serde_json::Value) -> Self {
        Self::new(sender, to, MessageKind::Status, content)
    }

    /// Creates a handoff transferring the session's active agent to `to`.
    pub fn handoff(
        sender: AgentType,
        to: AgentType,
        session_id: Uuid,
        handoff: &HandoffRequest,
    ) -> ensemble_core::EnsembleResult<Self> {
        let mut msg = Self::new(
            sender,
            Recipient::Agent(to),
            MessageKind::Handoff,
            serde_json::to_value(handoff)?,
        );
        msg.context.session_id = Some(session_id);
        Ok(msg)
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the context linkage.
    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_correlates_to_request() {
        let request = InterAgentMessage::request(
            AgentType::Planner,
            AgentType::Grant,
            serde_json::json!({"q": "deadlines"}),
        );
        let response =
            InterAgentMessage::response_to(&request, serde_json::json!({"a": "March 1"}));

        assert_eq!(response.message_type, MessageKind::Response);
        assert_eq!(response.context.parent_message_id, Some(request.id));
        assert_eq!(response.recipient, Recipient::Agent(AgentType::Planner));
        assert_eq!(response.sender, AgentType::Grant);
    }

    #[test]
    fn test_handoff_carries_session() {
        let session_id = Uuid::new_v4();
        let msg = InterAgentMessage::handoff(
            AgentType::Planner,
            AgentType::Writing,
            session_id,
            &HandoffRequest {
                reason: "drafting needed".into(),
                data: serde_json::json!({"topic": "aims"}),
                preserve_history: true,
            },
        )
        .unwrap();

        assert_eq!(msg.message_type, MessageKind::Handoff);
        assert_eq!(msg.context.session_id, Some(session_id));
        let payload: HandoffRequest = serde_json::from_value(msg.content).unwrap();
        assert!(payload.preserve_history);
    }

    #[test]
    fn test_serde_recipient_variants() {
        let all = serde_json::to_string(&Recipient::All).unwrap();
        assert_eq!(all, "\"all\"");
        let orch = serde_json::to_string(&Recipient::Orchestrator).unwrap();
        assert_eq!(orch, "\"orchestrator\"");
        let agent = serde_json::to_string(&Recipient::Agent(AgentType::Grant)).unwrap();
        assert!(agent.contains("grant"));
    }
}
