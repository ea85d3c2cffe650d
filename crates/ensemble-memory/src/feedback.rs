use crate::store::MemoryStore;
use crate::types::{MemoryKind, MemoryScope, UpsertOptions};
use chrono::{DateTime, Utc};
use ensemble_core::AgentType;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// The kind of reaction a user gave to an agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Positive reaction.
    ThumbsUp,
    /// Negative reaction.
    ThumbsDown,
    /// The user corrected the agent's output.
    Correction,
    /// The user suggested an improvement.
    Suggestion,
    /// A numeric rating.
    Rating,
}

/// A user reaction tied to one message in a session. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFeedback {
    /// Unique identifier for this record.
    pub id: Uuid,
    /// Workspace the feedback belongs to.
    pub workspace_id: String,
    /// Session the message belongs to.
    pub session_id: Uuid,
    /// The message being reacted to.
    pub message_id: Uuid,
    /// The reacting user.
    pub user_id: String,
    /// Kind of reaction.
    pub feedback_type: FeedbackKind,
    /// Numeric rating, when `feedback_type` is `rating`.
    pub rating: Option<u8>,
    /// Free-form comment.
    pub comment: Option<String>,
    /// Corrected output, when `feedback_type` is `correction`.
    pub correction: Option<String>,
    /// When the feedback was submitted.
    pub created_at: DateTime<Utc>,
}

impl AgentFeedback {
    /// Creates a feedback record for the given message.
    pub fn new(
        workspace_id: impl Into<String>,
        session_id: Uuid,
        message_id: Uuid,
        user_id: impl Into<String>,
        feedback_type: FeedbackKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            session_id,
            message_id,
            user_id: user_id.into(),
            feedback_type,
            rating: None,
            comment: None,
            correction: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches a numeric rating.
    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Attaches a free-form comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Attaches a corrected output.
    pub fn with_correction(mut self, correction: impl Into<String>) -> Self {
        self.correction = Some(correction.into());
        self
    }
}

/// Append-only log of user feedback.
///
/// Recording a reaction derives exactly one `feedback`-kind memory entry
/// keyed to the message, so future invocations of the same agent see it.
pub struct FeedbackLog {
    entries: RwLock<Vec<AgentFeedback>>,
}

impl FeedbackLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Appends a feedback record and derives its memory entry.
    ///
    /// The memory is scoped to the workspace, user, and (when known) the
    /// agent that authored the message, keyed by the message id — so
    /// repeated reactions to one message update a single entry.
    pub async fn record(
        &self,
        feedback: AgentFeedback,
        agent_type: Option<AgentType>,
        store: &dyn MemoryStore,
    ) -> ensemble_core::EnsembleResult<crate::types::AgentMemory> {
        let mut scope = MemoryScope::workspace(feedback.workspace_id.clone())
            .with_user(feedback.user_id.clone());
        if let Some(agent) = agent_type {
            scope = scope.with_agent(agent);
        }

        let key = format!("feedback:{}", feedback.message_id);
        let value = serde_json::json!({
            "feedback_type": feedback.feedback_type,
            "session_id": feedback.session_id,
            "message_id": feedback.message_id,
            "rating": feedback.rating,
            "comment": feedback.comment.clone(),
            "correction": feedback.correction.clone(),
        });

        info!(
            message_id = %feedback.message_id,
            feedback = ?feedback.feedback_type,
            "recording feedback"
        );

        {
            let mut entries = self.entries.write().await;
            entries.push(feedback);
        }

        store
            .upsert(
                scope,
                &key,
                MemoryKind::Feedback,
                value,
                UpsertOptions::default().with_relevance(0.8),
            )
            .await
    }

    /// All feedback recorded for a session, in submission order.
    pub async fn for_session(&self, session_id: Uuid) -> Vec<AgentFeedback> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Total number of records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for FeedbackLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryMemoryStore;

    #[tokio::test]
    async fn test_thumbs_down_derives_exactly_one_feedback_memory() {
        let store = InMemoryMemoryStore::new();
        let log = FeedbackLog::new();
        let session_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();

        let feedback = AgentFeedback::new(
            "ws-1",
            session_id,
            message_id,
            "u-1",
            FeedbackKind::ThumbsDown,
        );
        let memory = log
            .record(feedback, Some(AgentType::Writing), &store)
            .await
            .unwrap();

        assert_eq!(memory.memory_type, MemoryKind::Feedback);
        assert_eq!(memory.scope.agent_type, Some(AgentType::Writing));
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_repeat_feedback_updates_same_memory() {
        let store = InMemoryMemoryStore::new();
        let log = FeedbackLog::new();
        let session_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();

        for kind in [FeedbackKind::ThumbsDown, FeedbackKind::ThumbsUp] {
            let feedback = AgentFeedback::new("ws-1", session_id, message_id, "u-1", kind);
            log.record(feedback, Some(AgentType::Writing), &store)
                .await
                .unwrap();
        }

        // The log is append-only; the derived memory is keyed by message.
        assert_eq!(log.len().await, 2);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_correction_payload_carried_into_memory() {
        let store = InMemoryMemoryStore::new();
        let log = FeedbackLog::new();
        let feedback = AgentFeedback::new(
            "ws-1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "u-1",
            FeedbackKind::Correction,
        )
        .with_correction("The deadline is March, not May");

        let memory = log.record(feedback, None, &store).await.unwrap();
        assert_eq!(
            memory.value["correction"],
            serde_json::json!("The deadline is March, not May")
        );
        assert!(memory.scope.agent_type.is_none());
    }

    #[tokio::test]
    async fn test_for_session_filters() {
        let store = InMemoryMemoryStore::new();
        let log = FeedbackLog::new();
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();

        for session in [session_a, session_a, session_b] {
            let feedback = AgentFeedback::new(
                "ws-1",
                session,
                Uuid::new_v4(),
                "u-1",
                FeedbackKind::ThumbsUp,
            );
            log.record(feedback, None, &store).await.unwrap();
        }

        assert_eq!(log.for_session(session_a).await.len(), 2);
        assert_eq!(log.for_session(session_b).await.len(), 1);
    }
}
