use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::metrics::record_cache_operation;
use crate::models::{Question, Session, SessionSnapshot};

/// Fixed key the recovery snapshot is stored under.
pub const SNAPSHOT_KEY: &str = "exam-session.snapshot";

/// Durable key/value storage for recovery snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write(&self, key: &str, value: String) -> Result<()>;
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// One JSON file per key inside a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write(&self, key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        // Write-then-rename so a crash never leaves a torn snapshot
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read snapshot"),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove snapshot"),
        }
    }
}

/// Process-local store, used by tests and headless runs.
#[derive(Default, Clone)]
pub struct MemorySnapshotStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn write(&self, key: &str, value: String) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot store poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot store poisoned"))?
            .get(key)
            .cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot store poisoned"))?
            .remove(key);
        Ok(())
    }
}

/// Best-effort recovery snapshot of the in-progress session.
///
/// `put` and `clear` never fail: storage errors are logged and counted so the
/// surrounding load/finalize/abandon step is never blocked by them.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn SnapshotStore>,
}

impl LocalCache {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileSnapshotStore::new(dir)))
    }

    pub async fn put(&self, session: &Session, questions: &[Question]) {
        let snapshot = SessionSnapshot {
            session: session.clone(),
            questions: questions.to_vec(),
            loaded_at: Utc::now(),
        };

        let result = match serde_json::to_string(&snapshot) {
            Ok(json) => self.store.write(SNAPSHOT_KEY, json).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                record_cache_operation("put", true);
                tracing::debug!(session_id = %session.id, "Recovery snapshot written");
            }
            Err(e) => {
                record_cache_operation("put", false);
                tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "Failed to write recovery snapshot"
                );
            }
        }
    }

    pub async fn clear(&self) {
        match self.store.remove(SNAPSHOT_KEY).await {
            Ok(()) => {
                record_cache_operation("clear", true);
                tracing::debug!("Recovery snapshot cleared");
            }
            Err(e) => {
                record_cache_operation("clear", false);
                tracing::warn!(error = %e, "Failed to clear recovery snapshot");
            }
        }
    }

    /// Reads the snapshot back for diagnostics. Never used to resolve state.
    pub async fn peek(&self) -> Option<SessionSnapshot> {
        match self.store.read(SNAPSHOT_KEY).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(error = %e, "Recovery snapshot is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read recovery snapshot");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, QuestionOption, SessionPhase};

    fn session() -> Session {
        Session {
            id: "s1".to_string(),
            subject: Some("biology".to_string()),
            question_count: 1,
            duration_seconds: 60,
            created_at: Utc::now(),
            phase: SessionPhase::Active,
        }
    }

    fn questions() -> Vec<Question> {
        vec![Question {
            id: "q1".to_string(),
            body: "Powerhouse of the cell?".to_string(),
            options: vec![
                QuestionOption {
                    id: "a".to_string(),
                    label: "A".to_string(),
                    text: "Mitochondria".to_string(),
                },
                QuestionOption {
                    id: "b".to_string(),
                    label: "B".to_string(),
                    text: "Ribosome".to_string(),
                },
            ],
            difficulty: Difficulty::Easy,
        }]
    }

    struct BrokenStore;

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        async fn write(&self, _key: &str, _value: String) -> Result<()> {
            anyhow::bail!("disk full")
        }
        async fn read(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("disk gone")
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            anyhow::bail!("read-only")
        }
    }

    #[tokio::test]
    async fn put_then_clear_in_memory() {
        let store = MemorySnapshotStore::new();
        let cache = LocalCache::new(Arc::new(store.clone()));

        cache.put(&session(), &questions()).await;
        assert!(store.contains(SNAPSHOT_KEY));
        let snapshot = cache.peek().await.unwrap();
        assert_eq!(snapshot.session.id, "s1");
        assert_eq!(snapshot.questions.len(), 1);

        cache.clear().await;
        assert!(!store.contains(SNAPSHOT_KEY));
        assert!(cache.peek().await.is_none());
    }

    #[tokio::test]
    async fn file_store_round_trips_and_clear_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("examprep-cache-{}", uuid::Uuid::new_v4()));
        let cache = LocalCache::file(&dir);

        cache.put(&session(), &questions()).await;
        assert!(dir.join(format!("{}.json", SNAPSHOT_KEY)).exists());

        cache.clear().await;
        cache.clear().await;
        assert!(!dir.join(format!("{}.json", SNAPSHOT_KEY)).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn storage_failures_are_swallowed() {
        let cache = LocalCache::new(Arc::new(BrokenStore));
        cache.put(&session(), &questions()).await;
        cache.clear().await;
        assert!(cache.peek().await.is_none());
    }
}
