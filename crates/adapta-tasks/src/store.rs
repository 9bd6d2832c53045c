use crate::task::{TaskRecord, TaskState, TaskUpdate};
use adapta_core::{AdaptaError, AdaptaResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Storage for task records.
///
/// All mutation goes through checked transitions, so a record that reached
/// a terminal state can no longer change.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new record. Fails if the id is taken.
    async fn insert(&self, record: TaskRecord) -> AdaptaResult<()>;

    /// Fetches a snapshot of a record.
    async fn get(&self, id: Uuid) -> AdaptaResult<Option<TaskRecord>>;

    /// Applies `update` atomically, returning the updated record.
    async fn transition(&self, id: Uuid, update: TaskUpdate) -> AdaptaResult<TaskRecord>;

    /// Appends a streamed chunk to the output of a `Working` record.
    async fn append_output(&self, id: Uuid, chunk: &str) -> AdaptaResult<TaskRecord>;

    /// Deletes a terminal record, returning it.
    async fn remove(&self, id: Uuid) -> AdaptaResult<TaskRecord>;

    /// All records, oldest first.
    async fn list(&self) -> AdaptaResult<Vec<TaskRecord>>;
}

/// Task store held in memory for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn invalid(record: &TaskRecord, to: TaskState) -> AdaptaError {
    AdaptaError::InvalidTransition {
        task_id: record.id,
        from: record.state.to_string(),
        to: to.to_string(),
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> AdaptaResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&record.id) {
            return Err(AdaptaError::DuplicateTask(record.id));
        }
        tasks.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AdaptaResult<Option<TaskRecord>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn transition(&self, id: Uuid, update: TaskUpdate) -> AdaptaResult<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(&id).ok_or(AdaptaError::TaskNotFound(id))?;
        let from = record.state;
        record
            .apply(update)
            .map_err(|target| invalid(record, target))?;
        debug!(task_id = %id, from = %from, to = %record.state, "Task transitioned");
        Ok(record.clone())
    }

    async fn append_output(&self, id: Uuid, chunk: &str) -> AdaptaResult<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(&id).ok_or(AdaptaError::TaskNotFound(id))?;
        if record.state != TaskState::Working {
            return Err(invalid(record, TaskState::Working));
        }
        record.output.push_str(chunk);
        record.updated_at = chrono::Utc::now();
        Ok(record.clone())
    }

    async fn remove(&self, id: Uuid) -> AdaptaResult<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get(&id).ok_or(AdaptaError::TaskNotFound(id))?;
        if !record.state.is_terminal() {
            return Err(AdaptaError::InvalidTransition {
                task_id: id,
                from: record.state.to_string(),
                to: "removed".into(),
            });
        }
        tasks.remove(&id).ok_or(AdaptaError::TaskNotFound(id))
    }

    async fn list(&self) -> AdaptaResult<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self.tasks.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
