//! Lifecycle events emitted by the orchestrator.
//!
//! Events are informational. Nothing in the lifecycle depends on a
//! subscriber being present.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
