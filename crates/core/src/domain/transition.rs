use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::{TaskId, TaskStatus};
use crate::domain::update::TaskUpdate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Recorded before the external write; replayed on restart.
    #[default]
    Uncommitted,
    Committed,
    Failed,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uncommitted => "uncommitted",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uncommitted" => Some(Self::Uncommitted),
            "committed" => Some(Self::Committed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable log entry for one attempted transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub task_id: TaskId,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub attempted_at: DateTime<Utc>,
    pub outcome: TransitionOutcome,
    /// The writeback that carries this transition, replayed verbatim on recovery.
    pub update: TaskUpdate,
    pub error: Option<String>,
}

impl TransitionRecord {
    pub fn begin(
        task_id: TaskId,
        from_status: TaskStatus,
        to_status: TaskStatus,
        update: TaskUpdate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            from_status,
            to_status,
            attempted_at: Utc::now(),
            outcome: TransitionOutcome::Uncommitted,
            update,
            error: None,
        }
    }

    /// A phase attempt that failed before any writeback was issued.
    pub fn failed(
        task_id: TaskId,
        from_status: TaskStatus,
        to_status: TaskStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            outcome: TransitionOutcome::Failed,
            error: Some(error.into()),
            ..Self::begin(task_id, from_status, to_status, TaskUpdate::default())
        }
    }

    pub fn is_committed(&self) -> bool {
        self.outcome == TransitionOutcome::Committed
    }
}
