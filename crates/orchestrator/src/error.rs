use autopilot_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Transient collaborator failure: {0}")]
    Transient(String),

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    FatalConfig(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] tracker::TrackerError),

    #[error("Code host error: {0}")]
    CodeHost(#[from] github::GitHubError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl OrchestratorError {
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Retried with backoff before surfacing.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout { .. } => true,
            Self::Tracker(e) => e.is_transient(),
            Self::CodeHost(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Aborts the whole run rather than one task.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FatalConfig(_) => true,
            Self::Tracker(tracker::TrackerError::Api { status, .. }) => {
                *status == 401 || *status == 403
            }
            Self::CodeHost(github::GitHubError::Authentication(_))
            | Self::CodeHost(github::GitHubError::Config(_)) => true,
            _ => false,
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_is_transient() {
        let err = OrchestratorError::timeout("tracker.read_task", Duration::from_millis(1500));
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "tracker.read_task timed out after 1500ms");
    }

    #[test]
    fn test_validation_is_neither() {
        let err = OrchestratorError::Validation("mock missing cases".into());
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_auth_failures_are_fatal() {
        let err: OrchestratorError = tracker::TrackerError::Api {
            status: 401,
            message: "API token is invalid.".into(),
        }
        .into();
        assert!(err.is_fatal());

        let err: OrchestratorError =
            github::GitHubError::Authentication("Bad credentials".into()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_collaborator_classification_passes_through() {
        let err: OrchestratorError = tracker::TrackerError::Api {
            status: 503,
            message: "unavailable".into(),
        }
        .into();
        assert!(err.is_transient());

        let err: OrchestratorError = github::GitHubError::Api("Validation Failed".into()).into();
        assert!(!err.is_transient());
    }
}
