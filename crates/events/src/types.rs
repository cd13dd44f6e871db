//! Event types for the task lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Task ids are the tracker's opaque identifiers, so they travel as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The agent won the claim on a task and owns it until the next transition lands.
    #[serde(rename = "task.claimed")]
    TaskClaimed { task_id: String, status: String },

    #[serde(rename = "task.status_changed")]
    TaskStatusChanged {
        task_id: String,
        from_status: String,
        to_status: String,
    },

    #[serde(rename = "task.blocked")]
    TaskBlocked { task_id: String, reason: String },

    #[serde(rename = "task.completed")]
    TaskCompleted { task_id: String },

    /// A transition record's tracker write was confirmed.
    #[serde(rename = "writeback.committed")]
    WritebackCommitted { task_id: String, record_id: Uuid },

    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Event::TaskClaimed { task_id, .. }
            | Event::TaskStatusChanged { task_id, .. }
            | Event::TaskBlocked { task_id, .. }
            | Event::TaskCompleted { task_id }
            | Event::WritebackCommitted { task_id, .. } => Some(task_id),
            Event::Error { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::TaskClaimed { .. } => "task.claimed",
            Event::TaskStatusChanged { .. } => "task.status_changed",
            Event::TaskBlocked { .. } => "task.blocked",
            Event::TaskCompleted { .. } => "task.completed",
            Event::WritebackCommitted { .. } => "writeback.committed",
            Event::Error { .. } => "error",
        }
    }
}
