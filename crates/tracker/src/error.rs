use autopilot_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tracker API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown status option: {0}")]
    UnknownStatus(String),

    #[error("Rejected update: {0}")]
    Update(#[from] CoreError),

    #[error("Injected failure: {0}")]
    Unavailable(String),
}

impl TrackerError {
    /// Network failures, rate limiting and server errors are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TrackerError::Api { status, .. } => *status == 429 || *status >= 500,
            TrackerError::Unavailable(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
