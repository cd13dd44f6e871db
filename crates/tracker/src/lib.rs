//! Task-tracker clients.
//!
//! [`TaskTracker`] is the contract the orchestrator drives: list by status,
//! read, write fields (append or replace per field), and an atomic claim.

pub mod error;
pub mod memory;
pub mod notion;
mod traits;

pub use error::{Result, TrackerError};
pub use memory::MemoryTracker;
pub use notion::{NotionSchema, NotionTracker, StatusNames};
pub use traits::TaskTracker;
