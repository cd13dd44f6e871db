use async_trait::async_trait;
use autopilot_core::{Task, TaskField, TaskId, TaskRef, TaskStatus, TaskUpdate};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TrackerError};
use crate::traits::TaskTracker;

/// In-process tracker with a true compare-and-swap claim.
///
/// Used for dry runs against a snapshot and as the tracker in tests.
#[derive(Default)]
pub struct MemoryTracker {
    tasks: Mutex<HashMap<TaskId, Task>>,
    failing_writes: AtomicU32,
    write_count: AtomicUsize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: Task) {
        self.tasks.lock().await.insert(task.id.clone(), task);
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.lock().await.get(id).cloned()
    }

    /// Make the next `n` writes fail with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Successful writes, claims included.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(TrackerError::Unavailable("write rejected".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl TaskTracker for MemoryTracker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_tasks(&self, status: TaskStatus) -> Result<Vec<TaskRef>> {
        let tasks = self.tasks.lock().await;
        let mut refs: Vec<TaskRef> = tasks
            .values()
            .filter(|t| t.status == status)
            .map(Task::to_ref)
            .collect();
        refs.sort_by(|a, b| a.last_transition_at.cmp(&b.last_transition_at));
        Ok(refs)
    }

    async fn read_task(&self, id: &TaskId) -> Result<Task> {
        self.get(id)
            .await
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))
    }

    async fn write_fields(&self, id: &TaskId, update: &TaskUpdate) -> Result<()> {
        self.take_injected_failure()?;

        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        task.apply(update, Utc::now())?;
        self.write_count.fetch_add(1, Ordering::SeqCst);

        debug!(task_id = %id, status = ?update.status, "Memory tracker updated");
        Ok(())
    }

    async fn claim(&self, observed: &TaskRef, to: TaskStatus, token: &str) -> Result<bool> {
        self.take_injected_failure()?;

        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(&observed.id)
            .ok_or_else(|| TrackerError::NotFound(observed.id.to_string()))?;

        if task.status != observed.status || task.last_transition_at > observed.last_transition_at
        {
            return Ok(false);
        }

        let update = TaskUpdate::new()
            .status(to)
            .replace(TaskField::ClaimToken, token);
        task.apply(&update, Utc::now())?;
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
