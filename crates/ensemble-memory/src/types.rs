use chrono::{DateTime, Utc};
use ensemble_core::AgentType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of knowledge a memory entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// A user preference (tone, format, cadence).
    Preference,
    /// A recurring behavioral pattern.
    Pattern,
    /// Derived from explicit user feedback.
    Feedback,
    /// An insight an agent extracted from prior work.
    Insight,
    /// A named entity (person, project, grant).
    Entity,
    /// A relationship between entities.
    Relationship,
}

/// The scope a memory entry belongs to.
///
/// Workspace is mandatory; user and agent narrow the scope further.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    /// Workspace owning the entry.
    pub workspace_id: String,
    /// User the entry is about, when user-specific.
    pub user_id: Option<String>,
    /// Agent the entry belongs to, when agent-specific.
    pub agent_type: Option<AgentType>,
}

impl MemoryScope {
    /// A workspace-wide scope.
    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            user_id: None,
            agent_type: None,
        }
    }

    /// Narrows the scope to a user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Narrows the scope to an agent.
    pub fn with_agent(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    /// Whether an entry in this scope is visible to a query in `other`.
    ///
    /// Workspace must match exactly; an unset user or agent on the entry
    /// makes it visible to every narrower query.
    pub fn visible_to(&self, other: &MemoryScope) -> bool {
        self.workspace_id == other.workspace_id
            && self
                .user_id
                .as_ref()
                .map_or(true, |u| other.user_id.as_ref() == Some(u))
            && self
                .agent_type
                .map_or(true, |a| other.agent_type == Some(a))
    }
}

/// One stored fact with its access metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// Scope the entry belongs to.
    pub scope: MemoryScope,
    /// Lookup key, unique within the scope.
    pub key: String,
    /// Kind of knowledge stored.
    pub memory_type: MemoryKind,
    /// The stored value.
    pub value: serde_json::Value,
    /// Optional embedding for semantic retrieval.
    pub embedding: Option<Vec<f32>>,
    /// Caller-supplied relevance score; the store only sorts by it.
    pub relevance_score: f32,
    /// Number of successful lookups of this entry.
    pub access_count: u64,
    /// When the entry was last read.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// When the entry was last written.
    pub updated_at: DateTime<Utc>,
    /// When the entry stops being visible and becomes evictable.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentMemory {
    /// Whether the entry has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Optional fields accepted by an upsert.
#[derive(Debug, Clone)]
pub struct UpsertOptions {
    /// Caller-computed relevance score.
    pub relevance_score: f32,
    /// Optional embedding.
    pub embedding: Option<Vec<f32>>,
    /// Optional expiry instant.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            relevance_score: 0.5,
            embedding: None,
            expires_at: None,
        }
    }
}

impl UpsertOptions {
    /// Sets the relevance score.
    pub fn with_relevance(mut self, score: f32) -> Self {
        self.relevance_score = score;
        self
    }

    /// Sets the expiry instant.
    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_visibility() {
        let workspace = MemoryScope::workspace("ws-1");
        let user = MemoryScope::workspace("ws-1").with_user("u-1");
        let agent = MemoryScope::workspace("ws-1")
            .with_user("u-1")
            .with_agent(AgentType::Grant);

        // Broader entries are visible to narrower queries.
        assert!(workspace.visible_to(&agent));
        assert!(user.visible_to(&agent));
        // Narrower entries are not visible to broader queries.
        assert!(!agent.visible_to(&workspace));
        // Different workspaces never see each other.
        assert!(!workspace.visible_to(&MemoryScope::workspace("ws-2")));
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let mut entry = AgentMemory {
            id: Uuid::new_v4(),
            scope: MemoryScope::workspace("ws"),
            key: "k".into(),
            memory_type: MemoryKind::Insight,
            value: serde_json::json!("v"),
            embedding: None,
            relevance_score: 0.5,
            access_count: 0,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        };
        assert!(!entry.is_expired(now));
        entry.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(entry.is_expired(now));
        entry.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!entry.is_expired(now));
    }
}
