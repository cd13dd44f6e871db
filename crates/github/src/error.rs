use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Pull request not found: #{number}")]
    PrNotFound { number: u64 },

    #[error("Not a pull request link: {0}")]
    InvalidPrLink(String),

    #[error("Rate limit exceeded, resets at {reset_at}")]
    RateLimitExceeded { reset_at: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("VCS error: {0}")]
    Vcs(#[from] vcs::VcsError),
}

impl GitHubError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GitHubError::Network(_) | GitHubError::RateLimitExceeded { .. }
        )
    }
}

impl From<octocrab::Error> for GitHubError {
    fn from(err: octocrab::Error) -> Self {
        match &err {
            octocrab::Error::GitHub { source, .. } => {
                if source.message.contains("rate limit") {
                    GitHubError::RateLimitExceeded {
                        reset_at: "unknown".to_string(),
                    }
                } else if source.status_code.is_server_error() {
                    GitHubError::Network(source.message.clone())
                } else if source.status_code.as_u16() == 401 {
                    GitHubError::Authentication(source.message.clone())
                } else {
                    GitHubError::Api(source.message.clone())
                }
            }
            _ => GitHubError::Network(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GitHubError>;
