//! # Recovery snapshot store.
//!
//! [`JsonFileStore`] keeps the state map in memory and rewrites the whole map
//! as JSON on every save:
//!
//! ```json
//! {"report-42":{"state":"running","updated_at":"2026-01-05T10:00:00Z"}}
//! ```
//!
//! ## Rules
//! - The snapshot is replaced atomically: written to a sibling temp file, then renamed
//! - A missing snapshot loads as an empty map
//! - Loading merges into memory without overwriting states saved since startup
//! - A snapshot that cannot be decoded is reported as [`RecoveryError::Malformed`]
//!   and leaves the in-memory map untouched

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::error::RecoveryError;

const SNAPSHOT_FILE: &str = "task_states.json";

/// Last known state of one identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    /// State label (`queued`, `running`, `retrying`, `succeeded`, `failed`, `canceled`).
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    /// State stamped with the current time.
    pub fn now(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Storage contract for task states.
#[async_trait]
pub trait RecoveryStore: Send + Sync + 'static {
    /// Records `state` for `id` and persists it.
    async fn save(&self, id: &str, state: &str) -> Result<(), RecoveryError>;

    /// Loads the persisted snapshot.
    ///
    /// Loaded entries fill in identities not yet saved by this process; states
    /// saved since startup are newer and win.
    async fn load(&self) -> Result<HashMap<String, TaskState>, RecoveryError>;

    /// Last state held in memory for `id`.
    async fn recover(&self, id: &str) -> Option<TaskState>;
}

/// JSON snapshot store rooted at a directory.
pub struct JsonFileStore {
    path: PathBuf,
    states: RwLock<HashMap<String, TaskState>>,
    persist: Mutex<()>,
}

impl JsonFileStore {
    /// Store persisting to `<dir>/task_states.json`. The directory must exist.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE),
            states: RwLock::new(HashMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), RecoveryError> {
        let _guard = self.persist.lock().await;
        let data = {
            let states = self.states.read().await;
            serde_json::to_vec(&*states)?
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecoveryStore for JsonFileStore {
    async fn save(&self, id: &str, state: &str) -> Result<(), RecoveryError> {
        self.states
            .write()
            .await
            .insert(id.to_string(), TaskState::now(state));
        self.persist().await
    }

    async fn load(&self) -> Result<HashMap<String, TaskState>, RecoveryError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let loaded: HashMap<String, TaskState> = serde_json::from_slice(&data)?;
        let mut states = self.states.write().await;
        for (id, state) in &loaded {
            states.entry(id.clone()).or_insert_with(|| state.clone());
        }
        Ok(loaded)
    }

    async fn recover(&self, id: &str) -> Option<TaskState> {
        self.states.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_in_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save("a", "running").await.unwrap();
        store.save("a", "succeeded").await.unwrap();
        store.save("b", "queued").await.unwrap();

        let reopened = JsonFileStore::new(dir.path());
        assert!(reopened.recover("a").await.is_none());
        let states = reopened.load().await.unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states["a"].state, "succeeded");
        assert_eq!(reopened.recover("b").await.unwrap().state, "queued");
    }

    #[tokio::test]
    async fn missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"{not json").unwrap();

        let store = JsonFileStore::new(dir.path());
        let err = store.load().await.unwrap_err();
        assert_eq!(err.as_label(), "recovery_malformed");
    }
}
