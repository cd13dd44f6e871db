use async_trait::async_trait;
use autopilot_core::{Task, TaskId, TaskRef, TaskStatus, TaskUpdate};

use crate::error::Result;

#[async_trait]
pub trait TaskTracker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_tasks(&self, status: TaskStatus) -> Result<Vec<TaskRef>>;

    async fn read_task(&self, id: &TaskId) -> Result<Task>;

    /// Apply one logical update. Status and identifier fields are replaced,
    /// narrative fields are appended, labels are added. Re-delivering the same
    /// update leaves the task unchanged.
    async fn write_fields(&self, id: &TaskId, update: &TaskUpdate) -> Result<()>;

    /// Conditionally move a task to `to`, stamping `token` as its claim.
    ///
    /// Succeeds only if the task is still in `observed.status` and has not
    /// transitioned since `observed.last_transition_at`. Returns `false` when
    /// another run got there first.
    async fn claim(&self, observed: &TaskRef, to: TaskStatus, token: &str) -> Result<bool>;
}
