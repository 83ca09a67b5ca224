//! Result Persister (C9): the "small key/value persistence contract"
//! spec.md §1 assumes. `KvStore` is the injected seam; `ResultPersister`
//! builds the documented `(user_id, task_id, step_index) -> TaskStepResult`
//! schema plus the `(user_id, task_id) -> index` auxiliary entry on top of
//! it (spec §6, "Persisted state layout").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use switchboard_shared::error::{SwitchboardError, SwitchboardResult};
use switchboard_shared::status::{TaskStatus, TaskStepResult};

/// Opaque key/value persistence contract. Implementations may back onto a
/// relational store, a kv store, or (as here) nothing durable at all — the
/// concrete engine is out of core scope (spec §1).
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> SwitchboardResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> SwitchboardResult<()>;
}

/// A no-durability `KvStore` backed by an in-process map — the default
/// provider, and sufficient for local development and tests.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    data: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> SwitchboardResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> SwitchboardResult<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }
}

/// The auxiliary `(user_id, task_id) -> {status, created_at, updated_at}`
/// index (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIndexEntry {
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn step_key(user_id: &str, task_id: &str, step_index: i64) -> String {
    format!("step:{user_id}:{task_id}:{step_index}")
}

fn index_key(user_id: &str, task_id: &str) -> String {
    format!("index:{user_id}:{task_id}")
}

/// Builds the documented persistence schema on top of a `KvStore`.
/// `persist` is idempotent by `(user_id, task_id, step_index)` — writing
/// the same key twice with the same result simply overwrites in place.
#[derive(Debug, Clone)]
pub struct ResultPersister {
    store: Arc<dyn KvStore>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKvStore::default()))
    }

    /// Persist one step result and refresh the task's index entry.
    ///
    /// Spec §4.9: "Failures to persist are logged but MUST NOT fail the
    /// task" — this method still returns `Err` on a `KvStore` failure; it
    /// is the caller's (the executor's) job to catch it, log, and set
    /// `persistence_degraded` rather than propagate it as a task failure.
    pub async fn persist(&self, user_id: &str, task_id: &str, step_index: i64, result: &TaskStepResult) -> SwitchboardResult<()> {
        let bytes = serde_json::to_vec(result)
            .map_err(|e| SwitchboardError::Persistence(format!("failed to encode step result: {e}")))?;
        self.store.put(&step_key(user_id, task_id, step_index), bytes).await?;
        self.update_index(user_id, task_id, result.status).await
    }

    async fn update_index(&self, user_id: &str, task_id: &str, status: TaskStatus) -> SwitchboardResult<()> {
        let key = index_key(user_id, task_id);
        let now = chrono::Utc::now();
        let created_at = match self.store.get(&key).await? {
            Some(bytes) => serde_json::from_slice::<TaskIndexEntry>(&bytes)
                .map(|entry| entry.created_at)
                .unwrap_or(now),
            None => now,
        };
        let entry = TaskIndexEntry {
            status,
            created_at,
            updated_at: now,
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| SwitchboardError::Persistence(format!("failed to encode index entry: {e}")))?;
        self.store.put(&key, bytes).await
    }

    pub async fn get_step(&self, user_id: &str, task_id: &str, step_index: i64) -> SwitchboardResult<Option<TaskStepResult>> {
        match self.store.get(&step_key(user_id, task_id, step_index)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                SwitchboardError::Persistence(format!("failed to decode step result: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub async fn get_index(&self, user_id: &str, task_id: &str) -> SwitchboardResult<Option<TaskIndexEntry>> {
        match self.store.get(&index_key(user_id, task_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                SwitchboardError::Persistence(format!("failed to decode index entry: {e}"))
            })?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_shared::error::ErrorCode;

    #[tokio::test]
    async fn persist_and_read_back_round_trip() {
        let persister = ResultPersister::in_memory();
        let result = TaskStepResult::success("text_analyzer.analyze_text", serde_json::json!({"x": 1}), "ok");
        persister.persist("u1", "t1", 0, &result).await.unwrap();

        let read_back = persister.get_step("u1", "t1", 0).await.unwrap().unwrap();
        assert_eq!(read_back, result);
    }

    #[tokio::test]
    async fn persist_is_idempotent_by_key() {
        let persister = ResultPersister::in_memory();
        let result = TaskStepResult::success("s", serde_json::json!({}), "ok");
        persister.persist("u1", "t1", 0, &result).await.unwrap();
        persister.persist("u1", "t1", 0, &result).await.unwrap();

        assert!(persister.get_step("u1", "t1", 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn index_tracks_latest_status_and_preserves_created_at() {
        let persister = ResultPersister::in_memory();
        let running = TaskStepResult::success("s0", serde_json::json!({}), "ok");
        persister.persist("u1", "t1", 0, &running).await.unwrap();
        let first_index = persister.get_index("u1", "t1").await.unwrap().unwrap();

        let failed = TaskStepResult::failure("s1", TaskStatus::Failed, ErrorCode::NotFound, "missing");
        persister.persist("u1", "t1", 1, &failed).await.unwrap();
        let second_index = persister.get_index("u1", "t1").await.unwrap().unwrap();

        assert_eq!(second_index.created_at, first_index.created_at);
        assert_eq!(second_index.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn missing_step_is_none() {
        let persister = ResultPersister::in_memory();
        assert!(persister.get_step("u1", "missing", 0).await.unwrap().is_none());
    }
}
