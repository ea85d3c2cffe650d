use crate::types::{AgentMemory, MemoryKind, MemoryScope, UpsertOptions};
use async_trait::async_trait;
use chrono::Utc;
use ensemble_core::{EnsembleError, EnsembleResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for long-term memory backends.
///
/// The store is the one piece of state mutated by multiple concurrent
/// agents for the same key, so implementations must apply the
/// `access_count` bump in `lookup` as a single atomic read-modify-write
/// per entry.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Inserts or updates the entry at (scope, key).
    ///
    /// Updating preserves `created_at` and `access_count`.
    async fn upsert(
        &self,
        scope: MemoryScope,
        key: &str,
        kind: MemoryKind,
        value: serde_json::Value,
        opts: UpsertOptions,
    ) -> EnsembleResult<AgentMemory>;

    /// Reads the entry at (scope, key), bumping its access metadata.
    ///
    /// Expired entries are invisible and return `None`.
    async fn lookup(&self, scope: &MemoryScope, key: &str) -> EnsembleResult<Option<AgentMemory>>;

    /// Returns up to `limit` entries visible to `scope`, optionally
    /// filtered by kind, sorted by relevance score descending.
    async fn query(
        &self,
        scope: &MemoryScope,
        kind: Option<MemoryKind>,
        limit: usize,
    ) -> EnsembleResult<Vec<AgentMemory>>;

    /// Removes expired entries; returns how many were evicted.
    async fn evict_expired(&self) -> EnsembleResult<usize>;

    /// Number of live (unexpired) entries.
    async fn len(&self) -> EnsembleResult<usize>;
}

/// Process-local memory store.
///
/// A single `RwLock` over the entry map; the write lock taken by both
/// `upsert` and `lookup` serializes every read-modify-write, so concurrent
/// lookups never lose an `access_count` increment.
pub struct InMemoryMemoryStore {
    entries: RwLock<HashMap<(MemoryScope, String), AgentMemory>>,
}

impl InMemoryMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert_raw(&self, entry: AgentMemory) {
        let mut entries = self.entries.write().await;
        entries.insert((entry.scope.clone(), entry.key.clone()), entry);
    }

    pub(crate) async fn all_entries(&self) -> Vec<AgentMemory> {
        let entries = self.entries.read().await;
        entries.values().cloned().collect()
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn upsert(
        &self,
        scope: MemoryScope,
        key: &str,
        kind: MemoryKind,
        value: serde_json::Value,
        opts: UpsertOptions,
    ) -> EnsembleResult<AgentMemory> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = match entries.get_mut(&(scope.clone(), key.to_string())) {
            Some(existing) => {
                existing.memory_type = kind;
                existing.value = value;
                existing.embedding = opts.embedding;
                existing.relevance_score = opts.relevance_score;
                existing.expires_at = opts.expires_at;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let entry = AgentMemory {
                    id: Uuid::new_v4(),
                    scope: scope.clone(),
                    key: key.to_string(),
                    memory_type: kind,
                    value,
                    embedding: opts.embedding,
                    relevance_score: opts.relevance_score,
                    access_count: 0,
                    last_accessed_at: None,
                    created_at: now,
                    updated_at: now,
                    expires_at: opts.expires_at,
                };
                entries.insert((scope, key.to_string()), entry.clone());
                entry
            }
        };
        Ok(entry)
    }

    async fn lookup(&self, scope: &MemoryScope, key: &str) -> EnsembleResult<Option<AgentMemory>> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&(scope.clone(), key.to_string())) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        entry.access_count += 1;
        entry.last_accessed_at = Some(now);
        Ok(Some(entry.clone()))
    }

    async fn query(
        &self,
        scope: &MemoryScope,
        kind: Option<MemoryKind>,
        limit: usize,
    ) -> EnsembleResult<Vec<AgentMemory>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut matched: Vec<AgentMemory> = entries
            .values()
            .filter(|e| !e.is_expired(now))
            .filter(|e| e.scope.visible_to(scope))
            .filter(|e| kind.map_or(true, |k| e.memory_type == k))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matched.truncate(limit);
        Ok(matched)
    }

    async fn evict_expired(&self) -> EnsembleResult<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> EnsembleResult<usize> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count())
    }
}

/// JSONL-backed memory store.
///
/// Appends one line per upsert; on load, later lines win for the same
/// (scope, key). Eviction compacts the file, folding in access metadata
/// accumulated since the last rewrite.
pub struct FileMemoryStore {
    path: std::path::PathBuf,
    inner: InMemoryMemoryStore,
}

impl FileMemoryStore {
    /// Opens or creates a store at the given path, loading existing
    /// entries.
    pub async fn new(path: std::path::PathBuf) -> EnsembleResult<Self> {
        let inner = InMemoryMemoryStore::new();

        if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| EnsembleError::Memory(format!("failed to read memory store: {e}")))?;
            for line in data.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: AgentMemory = serde_json::from_str(line)
                    .map_err(|e| EnsembleError::Memory(format!("invalid JSONL entry: {e}")))?;
                inner.insert_raw(entry).await;
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EnsembleError::Memory(format!("failed to create dir: {e}")))?;
        }

        Ok(Self { path, inner })
    }

    async fn append_to_file(&self, entry: &AgentMemory) -> EnsembleResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EnsembleError::Memory(format!("failed to open memory store: {e}")))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| EnsembleError::Memory(format!("failed to write entry: {e}")))?;
        Ok(())
    }

    async fn rewrite_file(&self) -> EnsembleResult<()> {
        let entries = self.inner.all_entries().await;
        let mut data = String::new();
        for entry in &entries {
            data.push_str(&serde_json::to_string(entry)?);
            data.push('\n');
        }
        tokio::fs::write(&self.path, data.as_bytes())
            .await
            .map_err(|e| EnsembleError::Memory(format!("failed to rewrite memory store: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn upsert(
        &self,
        scope: MemoryScope,
        key: &str,
        kind: MemoryKind,
        value: serde_json::Value,
        opts: UpsertOptions,
    ) -> EnsembleResult<AgentMemory> {
        let entry = self.inner.upsert(scope, key, kind, value, opts).await?;
        self.append_to_file(&entry).await?;
        Ok(entry)
    }

    async fn lookup(&self, scope: &MemoryScope, key: &str) -> EnsembleResult<Option<AgentMemory>> {
        // Access bumps are folded into the file on the next compaction.
        self.inner.lookup(scope, key).await
    }

    async fn query(
        &self,
        scope: &MemoryScope,
        kind: Option<MemoryKind>,
        limit: usize,
    ) -> EnsembleResult<Vec<AgentMemory>> {
        self.inner.query(scope, kind, limit).await
    }

    async fn evict_expired(&self) -> EnsembleResult<usize> {
        let evicted = self.inner.evict_expired().await?;
        self.rewrite_file().await?;
        Ok(evicted)
    }

    async fn len(&self) -> EnsembleResult<usize> {
        self.inner.len().await
    }
}
