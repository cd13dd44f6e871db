//! RAII guards for per-task resources.
//!
//! - [`TaskLease`] - keeps a task from being driven twice by one process

mod task_lease;

pub use task_lease::{TaskLease, TaskLeases};
