pub mod client;
pub mod code_host;
pub mod error;
pub mod types;

pub use client::GitHubClient;
pub use code_host::{branch_name, parse_pr_number, CodeHost, GitHubCodeHost};
pub use error::{GitHubError, Result};
pub use types::{
    Changeset, CheckRun, CiState, CiStatus, CreatePrRequest, PrState, PullRequest, RepoConfig,
};
