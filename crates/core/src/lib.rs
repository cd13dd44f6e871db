//! Domain types shared by the agent crates: tasks and their lifecycle
//! status, tracker writebacks, mock contracts and transition records.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::CoreError;
