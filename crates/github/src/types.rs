use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: PrState,
    pub head_branch: String,
    pub head_sha: String,
    pub base_branch: String,
    pub html_url: String,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiStatus {
    pub state: CiState,
    pub total_count: u32,
    pub checks: Vec<CheckRun>,
}

/// Aggregate CI result for a pull request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiState {
    Pending,
    Success,
    Failure,
}

impl CiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiState::Pending => "pending",
            CiState::Success => "success",
            CiState::Failure => "failure",
        }
    }
}

impl std::fmt::Display for CiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    /// Lowercased without separators, e.g. `success`, `timedout`. `None` while running.
    pub conclusion: Option<String>,
    pub html_url: Option<String>,
}

/// Files already written to the working tree that make up one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub message: String,
    pub paths: Vec<PathBuf>,
}

impl Changeset {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreatePrRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
}

impl CreatePrRequest {
    pub fn new(title: impl Into<String>, head: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: String::new(),
            head: head.into(),
            base: base.into(),
            draft: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub owner: String,
    pub repo: String,
}

impl RepoConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse `owner/repo`.
    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let parts: Vec<&str> = full_name.trim().split('/').collect();
        match parts.as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Some(Self::new(*owner, *repo)),
            _ => None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_config_from_full_name() {
        let config = RepoConfig::from_full_name("owner/repo").unwrap();
        assert_eq!(config.owner, "owner");
        assert_eq!(config.repo, "repo");
        assert_eq!(config.full_name(), "owner/repo");
    }

    #[test]
    fn test_repo_config_from_invalid_name() {
        assert!(RepoConfig::from_full_name("invalid").is_none());
        assert!(RepoConfig::from_full_name("a/b/c").is_none());
        assert!(RepoConfig::from_full_name("/repo").is_none());
    }

    #[test]
    fn test_create_pr_request_builder() {
        let req = CreatePrRequest::new("Title", "feature/x", "main").with_body("Body");
        assert_eq!(req.head, "feature/x");
        assert_eq!(req.body, "Body");
        assert!(!req.draft);
    }

    #[test]
    fn test_changeset_builder() {
        let cs = Changeset::new("msg").with_path("mocks/a.mock.json");
        assert_eq!(cs.paths, vec![PathBuf::from("mocks/a.mock.json")]);
    }
}
