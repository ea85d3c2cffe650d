use crate::agent::AgentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The role of the participant that authored an [`AgentMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
    /// A system-level instruction or prompt.
    System,
    /// Output produced by a tool invocation.
    Tool,
}

/// A request from an agent to invoke a specific tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned to this tool call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The output produced by the tool.
    pub result: serde_json::Value,
    /// Error message when the tool execution failed.
    pub error: Option<String>,
    /// Wall-clock execution time of the tool call.
    pub execution_time_ms: Option<u64>,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            result,
            error: None,
            execution_time_ms: None,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            result: serde_json::Value::Null,
            error: Some(message.into()),
            execution_time_ms: None,
        }
    }
}

/// A single turn within a conversation session.
///
/// Messages are immutable once appended and are totally ordered by
/// `created_at` within their session; no ordering holds across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The session this message belongs to.
    pub session_id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// The agent that produced this message, when authored by one.
    pub agent_type: Option<AgentType>,
    /// The textual content of the message.
    pub content: String,
    /// Tool calls issued as part of this turn.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Results of tool calls issued in a prior turn.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    /// Arbitrary key-value metadata attached to the message.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTC timestamp of when the message was created.
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Creates a new message with the given role, content, and session ID.
    pub fn new(role: Role, content: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            agent_type: None,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>, session_id: Uuid) -> Self {
        Self::new(Role::User, content, session_id)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>, session_id: Uuid) -> Self {
        Self::new(Role::Assistant, content, session_id)
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>, session_id: Uuid) -> Self {
        Self::new(Role::System, content, session_id)
    }

    /// Tags the message with the agent that authored it.
    pub fn with_agent(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let session_id = Uuid::new_v4();
        let msg = AgentMessage::user("Hello", session_id);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.session_id, session_id);
        assert!(msg.agent_type.is_none());
    }

    #[test]
    fn test_message_with_agent() {
        let msg = AgentMessage::assistant("Draft ready", Uuid::new_v4())
            .with_agent(AgentType::Writing);
        assert_eq!(msg.agent_type, Some(AgentType::Writing));
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let msg = AgentMessage::user("test", Uuid::new_v4());
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: AgentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, "test");
        assert_eq!(parsed.role, Role::User);
    }

    #[test]
    fn test_tool_result_helpers() {
        let ok = ToolResult::success("call_1", serde_json::json!({"rows": 3}));
        assert!(ok.error.is_none());
        let err = ToolResult::error("call_2", "unknown tool");
        assert_eq!(err.error.as_deref(), Some("unknown tool"));
    }
}
