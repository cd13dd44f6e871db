use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Not a repository: {0}")]
    NotInitialized(String),

    #[error("Invalid branch name: {0}")]
    InvalidBranch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VcsError>;
