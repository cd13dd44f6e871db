//! In-process lease on a task.
//!
//! The tracker claim keeps separate processes apart; the lease keeps a
//! scheduler from dispatching a task that one of its own workers still holds.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use autopilot_core::TaskId;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct TaskLeases {
    held: Arc<Mutex<HashSet<TaskId>>>,
}

impl TaskLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the task is already leased.
    pub fn try_acquire(&self, task_id: &TaskId) -> Option<TaskLease> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(task_id.clone()) {
            return None;
        }
        debug!(task_id = %task_id, "Task lease acquired");
        Some(TaskLease {
            task_id: task_id.clone(),
            leases: self.clone(),
            released: false,
        })
    }

    pub fn is_held(&self, task_id: &TaskId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, task_id: &TaskId) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
    }
}

/// Held while a worker drives one task. Dropping it frees the task; a drop
/// without [`TaskLease::release`] means the run ended abnormally.
pub struct TaskLease {
    task_id: TaskId,
    leases: TaskLeases,
    released: bool,
}

impl TaskLease {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn release(mut self) {
        self.released = true;
        debug!(task_id = %self.task_id, "Task lease released");
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        if !self.released {
            warn!(task_id = %self.task_id, "Task run ended without releasing its lease");
        }
        self.leases.remove(&self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive() {
        let leases = TaskLeases::new();
        let id = TaskId::new("t1");

        let lease = leases.try_acquire(&id).unwrap();
        assert!(leases.try_acquire(&id).is_none());
        assert!(leases.is_held(&id));
        assert!(leases.try_acquire(&TaskId::new("t2")).is_some());

        lease.release();
        assert!(!leases.is_held(&id));
        assert!(leases.try_acquire(&id).is_some());
    }

    #[test]
    fn test_drop_frees_task() {
        let leases = TaskLeases::new();
        let id = TaskId::new("t1");
        {
            let lease = leases.try_acquire(&id).unwrap();
            assert_eq!(lease.task_id(), &id);
        }
        assert!(leases.is_empty());
    }
}
