use crate::error::DbError;
use crate::models::transition::datetime_to_millis;
use crate::models::TransitionRow;
use autopilot_core::{TaskId, TaskStatus, TransitionOutcome, TransitionRecord};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

const COLUMNS: &str =
    "id, task_id, from_status, to_status, attempted_at, outcome, payload, error";

#[derive(Clone)]
pub struct TransitionRepository {
    pool: SqlitePool,
}

impl TransitionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, record: &TransitionRecord) -> Result<TransitionRecord, DbError> {
        let row = TransitionRow::from(record);

        sqlx::query(
            r#"
            INSERT INTO transition_records (id, task_id, from_status, to_status, attempted_at, outcome, payload, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.task_id)
        .bind(&row.from_status)
        .bind(&row.to_status)
        .bind(row.attempted_at)
        .bind(&row.outcome)
        .bind(&row.payload)
        .bind(&row.error)
        .execute(&self.pool)
        .await?;

        debug!(
            record_id = %record.id,
            task_id = %record.task_id,
            to = %record.to_status,
            outcome = record.outcome.as_str(),
            "Transition record stored"
        );

        Ok(record.clone())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<TransitionRecord>, DbError> {
        let row: Option<TransitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transition_records WHERE id = ?",
            COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransitionRow::into_domain).transpose()
    }

    /// Attempt history for a task, oldest first.
    pub async fn find_by_task(&self, task_id: &TaskId) -> Result<Vec<TransitionRecord>, DbError> {
        let rows: Vec<TransitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transition_records WHERE task_id = ? ORDER BY attempted_at ASC, rowid ASC",
            COLUMNS
        ))
        .bind(task_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRow::into_domain).collect()
    }

    /// Records whose external write was never confirmed, oldest first.
    pub async fn find_uncommitted(&self) -> Result<Vec<TransitionRecord>, DbError> {
        let rows: Vec<TransitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transition_records WHERE outcome = ? ORDER BY attempted_at ASC, rowid ASC",
            COLUMNS
        ))
        .bind(TransitionOutcome::Uncommitted.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRow::into_domain).collect()
    }

    pub async fn mark_committed(&self, id: Uuid) -> Result<(), DbError> {
        self.set_outcome(id, TransitionOutcome::Committed, None).await
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DbError> {
        self.set_outcome(id, TransitionOutcome::Failed, Some(error))
            .await
    }

    async fn set_outcome(
        &self,
        id: Uuid,
        outcome: TransitionOutcome,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let committed_at = (outcome == TransitionOutcome::Committed)
            .then(|| datetime_to_millis(Utc::now()));

        let result = sqlx::query(
            r#"
            UPDATE transition_records
            SET outcome = ?, error = COALESCE(?, error), committed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(outcome.as_str())
        .bind(error)
        .bind(committed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::TransitionNotFound(id));
        }
        Ok(())
    }

    /// Committed retry edges from `from` back into `Implementing` for a task.
    pub async fn count_retries(&self, task_id: &TaskId, from: TaskStatus) -> Result<u32, DbError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM transition_records
            WHERE task_id = ? AND outcome = ? AND to_status = ? AND from_status = ?
            "#,
        )
        .bind(task_id.as_str())
        .bind(TransitionOutcome::Committed.as_str())
        .bind(TaskStatus::Implementing.as_str())
        .bind(from.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count.0).unwrap_or(u32::MAX))
    }

    /// Failed attempts toward `to` made while the task sat in `status`.
    ///
    /// Counting starts at the latest committed record that moved the task
    /// into `status`; same-status re-claims do not reset it. With no such
    /// record every failure toward `to` counts.
    pub async fn count_failures_in_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        to: TaskStatus,
    ) -> Result<u32, DbError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM transition_records
            WHERE task_id = ? AND outcome = ? AND from_status = ? AND to_status = ?
              AND attempted_at >= COALESCE((
                  SELECT MAX(attempted_at) FROM transition_records
                  WHERE task_id = ? AND outcome = ? AND to_status = ?
                    AND from_status != to_status
              ), 0)
            "#,
        )
        .bind(task_id.as_str())
        .bind(TransitionOutcome::Failed.as_str())
        .bind(status.as_str())
        .bind(to.as_str())
        .bind(task_id.as_str())
        .bind(TransitionOutcome::Committed.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count.0).unwrap_or(u32::MAX))
    }
}
