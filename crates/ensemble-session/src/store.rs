use crate::session::AgentSession;
use async_trait::async_trait;
use ensemble_core::{EnsembleError, EnsembleResult};
use std::path::PathBuf;
use uuid::Uuid;

/// Durable persistence boundary for sessions.
///
/// Sessions are never hard-deleted, so the trait exposes no delete;
/// archival is a flag on the saved record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Writes a session snapshot, replacing any previous one.
    async fn save(&self, session: &AgentSession) -> EnsembleResult<()>;
    /// Reads a session by id.
    async fn get(&self, id: Uuid) -> EnsembleResult<Option<AgentSession>>;
    /// Lists all stored session ids.
    async fn list(&self) -> EnsembleResult<Vec<Uuid>>;
}

/// File-based session store, one JSON file per session.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Opens or creates a store rooted at `dir`.
    pub async fn new(dir: PathBuf) -> EnsembleResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &AgentSession) -> EnsembleResult<()> {
        let path = self.session_path(session.id);
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EnsembleResult<Option<AgentSession>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let session: AgentSession = serde_json::from_str(&data)
            .map_err(|e| EnsembleError::Session(format!("failed to parse session: {e}")))?;
        Ok(Some(session))
    }

    async fn list(&self) -> EnsembleResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}
