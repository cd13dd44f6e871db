use autopilot_core::{TaskId, TaskStatus, TaskUpdate, TransitionOutcome, TransitionRecord};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::DbError;

const TABLE: &str = "transition_records";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransitionRow {
    pub id: String,
    pub task_id: String,
    pub from_status: String,
    pub to_status: String,
    pub attempted_at: i64,
    pub outcome: String,
    pub payload: String,
    pub error: Option<String>,
}

impl TransitionRow {
    pub fn into_domain(self) -> Result<TransitionRecord, DbError> {
        Ok(TransitionRecord {
            id: Uuid::parse_str(&self.id).map_err(|e| invalid(format!("id: {}", e)))?,
            task_id: TaskId::new(self.task_id),
            from_status: parse_status(&self.from_status)?,
            to_status: parse_status(&self.to_status)?,
            attempted_at: millis_to_datetime(self.attempted_at),
            outcome: TransitionOutcome::parse(&self.outcome)
                .ok_or_else(|| invalid(format!("outcome: {}", self.outcome)))?,
            update: serde_json::from_str::<TaskUpdate>(&self.payload)
                .map_err(|e| invalid(format!("payload: {}", e)))?,
            error: self.error,
        })
    }
}

impl From<&TransitionRecord> for TransitionRow {
    fn from(record: &TransitionRecord) -> Self {
        Self {
            id: record.id.to_string(),
            task_id: record.task_id.to_string(),
            from_status: record.from_status.as_str().to_string(),
            to_status: record.to_status.as_str().to_string(),
            attempted_at: datetime_to_millis(record.attempted_at),
            outcome: record.outcome.as_str().to_string(),
            payload: serde_json::to_string(&record.update).unwrap_or_else(|_| "{}".to_string()),
            error: record.error.clone(),
        }
    }
}

fn parse_status(value: &str) -> Result<TaskStatus, DbError> {
    TaskStatus::parse(value).ok_or_else(|| invalid(format!("status: {}", value)))
}

fn invalid(reason: String) -> DbError {
    DbError::InvalidRow {
        table: TABLE,
        reason,
    }
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_round_trip() {
        let record = TransitionRecord::begin(
            TaskId::new("t1"),
            TaskStatus::Testing,
            TaskStatus::AwaitingTestStatus,
            TaskUpdate::new().status(TaskStatus::AwaitingTestStatus),
        );

        let row = TransitionRow::from(&record);
        assert_eq!(row.to_status, "awaiting_test_status");

        let back = row.into_domain().unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.update, record.update);
        assert_eq!(
            back.attempted_at.timestamp_millis(),
            record.attempted_at.timestamp_millis()
        );
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let record = TransitionRecord::begin(
            TaskId::new("t1"),
            TaskStatus::Pending,
            TaskStatus::Drafting,
            TaskUpdate::default(),
        );
        let mut row = TransitionRow::from(&record);
        row.to_status = "flying".to_string();

        assert!(matches!(
            row.into_domain(),
            Err(DbError::InvalidRow { .. })
        ));
    }
}
