use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Transition record not found: {0}")]
    TransitionNotFound(Uuid),

    #[error("Invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },
}
