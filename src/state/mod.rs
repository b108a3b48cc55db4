//! Task status store
//!
//! The only state shared between concurrently running tasks. Records only
//! move forward (queued → running → completed | failed) and are evicted a
//! fixed TTL after reaching a terminal status.

use crate::error::OrchestrationError;
use crate::models::{TaskRecord, TaskStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A single mutation applied to a stored record.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    /// Progress marker; status unchanged.
    Stage(String),
    Start,
    Complete { output: String, knowledge: Value },
    Fail { error: String, knowledge: Option<Value> },
}

impl TaskUpdate {
    fn target(&self) -> Option<TaskStatus> {
        match self {
            TaskUpdate::Stage(_) => None,
            TaskUpdate::Start => Some(TaskStatus::Running),
            TaskUpdate::Complete { .. } => Some(TaskStatus::Completed),
            TaskUpdate::Fail { .. } => Some(TaskStatus::Failed),
        }
    }

    /// Validate against `record` and apply in place.
    fn apply_to(self, record: &mut TaskRecord, now: DateTime<Utc>) -> Result<()> {
        match self.target() {
            Some(next) if !record.status.can_advance_to(next) => {
                return Err(OrchestrationError::InvalidTransition {
                    from: record.status.to_string(),
                    to: next.to_string(),
                });
            }
            None if record.status.is_terminal() => {
                return Err(OrchestrationError::InvalidTransition {
                    from: record.status.to_string(),
                    to: record.status.to_string(),
                });
            }
            _ => {}
        }

        match self {
            TaskUpdate::Stage(stage) => record.stage = stage,
            TaskUpdate::Start => {
                record.status = TaskStatus::Running;
                record.stage = "running".to_string();
            }
            TaskUpdate::Complete { output, knowledge } => {
                record.status = TaskStatus::Completed;
                record.stage = "completed".to_string();
                record.output = Some(output);
                record.knowledge = knowledge;
            }
            TaskUpdate::Fail { error, knowledge } => {
                record.status = TaskStatus::Failed;
                record.stage = "failed".to_string();
                record.error = Some(error);
                if let Some(knowledge) = knowledge {
                    record.knowledge = knowledge;
                }
            }
        }
        record.updated_at = now;
        Ok(())
    }
}

/// Trait for task status persistence
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, record: TaskRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>>;
    /// Apply `update` atomically and return the new snapshot.
    async fn update(&self, id: Uuid, update: TaskUpdate) -> Result<TaskRecord>;
    /// Drop terminal records whose last transition is older than `ttl`.
    async fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize>;
    async fn len(&self) -> usize;
}

/// True once a terminal record has outlived `ttl`.
pub fn is_expired(record: &TaskRecord, now: DateTime<Utc>, ttl: Duration) -> bool {
    if !record.status.is_terminal() {
        return false;
    }
    let age = now.signed_duration_since(record.updated_at);
    age.to_std().map(|age| age > ttl).unwrap_or(false)
}

/// In-memory task store (store-wide lock)
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    records: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: TaskUpdate) -> Result<TaskRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(OrchestrationError::TaskNotFound(id))?;

        update.apply_to(record, Utc::now())?;
        debug!(task_id = %id, status = %record.status, stage = %record.stage, "Task updated");
        Ok(record.clone())
    }

    async fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !is_expired(record, now, ttl));
        Ok(before - records.len())
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}
