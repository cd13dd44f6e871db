use async_trait::async_trait;
use autopilot_core::Task;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use vcs::VersionControl;

use crate::client::GitHubClient;
use crate::error::{GitHubError, Result};
use crate::types::{Changeset, CiState, CreatePrRequest};

const MAX_SLUG_LEN: usize = 40;

/// Branch, commit, pull request and CI operations the lifecycle needs.
///
/// Every mutating call is safe to repeat: re-running a phase must not create a
/// second branch or a second pull request.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Create (or reuse) the task's branch and return its name.
    async fn create_branch(&self, task: &Task) -> Result<String>;

    /// Commit the changeset on `branch`, returning the head sha.
    async fn commit(&self, branch: &str, changeset: &Changeset) -> Result<String>;

    /// Open a pull request for `branch`, or return the link of the one already open.
    async fn open_pr(&self, branch: &str, title: &str, body: &str) -> Result<String>;

    async fn find_pr(&self, branch: &str) -> Result<Option<String>>;

    async fn read_ci_status(&self, pr_link: &str) -> Result<CiState>;

    async fn add_label(&self, pr_link: &str, label: &str) -> Result<()>;

    async fn is_merged(&self, pr_link: &str) -> Result<bool>;
}

/// `<prefix>/<first id segment>-<slug>`; the slug keeps alphanumerics, `-`
/// and `_`, turns spaces into dashes and is capped at 40 characters.
pub fn branch_name(prefix: &str, task: &Task) -> String {
    let slug: String = task
        .title
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "task" } else { slug };

    format!("{}/{}-{}", prefix.trim_end_matches('/'), task.id.short(), slug)
}

/// `https://github.com/o/r/pull/42` -> 42
pub fn parse_pr_number(pr_link: &str) -> Result<u64> {
    let trimmed = pr_link.trim().trim_end_matches('/');
    let mut parts = trimmed.rsplit('/');
    match (parts.next(), parts.next()) {
        (Some(number), Some("pull")) => number
            .parse::<u64>()
            .map_err(|_| GitHubError::InvalidPrLink(pr_link.to_string())),
        _ => Err(GitHubError::InvalidPrLink(pr_link.to_string())),
    }
}

pub struct GitHubCodeHost {
    client: GitHubClient,
    vcs: Arc<dyn VersionControl>,
    branch_prefix: String,
    base_branch: String,
}

impl GitHubCodeHost {
    pub fn new(client: GitHubClient, vcs: Arc<dyn VersionControl>) -> Self {
        let base_branch = vcs.main_branch().to_string();
        Self {
            client,
            vcs,
            branch_prefix: "feature".to_string(),
            base_branch,
        }
    }

    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = base.into();
        self
    }
}

#[async_trait]
impl CodeHost for GitHubCodeHost {
    async fn create_branch(&self, task: &Task) -> Result<String> {
        let branch = branch_name(&self.branch_prefix, task);
        self.vcs.ensure_branch(&branch, &self.base_branch).await?;
        Ok(branch)
    }

    async fn commit(&self, branch: &str, changeset: &Changeset) -> Result<String> {
        self.vcs.ensure_branch(branch, &self.base_branch).await?;
        let paths: Vec<&Path> = changeset.paths.iter().map(|p| p.as_path()).collect();
        let sha = self.vcs.commit(&paths, &changeset.message).await?;
        debug!(branch, sha = %sha, "Changeset committed");
        Ok(sha)
    }

    async fn open_pr(&self, branch: &str, title: &str, body: &str) -> Result<String> {
        if let Some(existing) = self.client.find_open_pr_for_head(branch).await? {
            info!(branch, pr = %existing.html_url, "Reusing open pull request");
            return Ok(existing.html_url);
        }

        self.vcs.push(branch).await?;
        let request = CreatePrRequest::new(title, branch, &self.base_branch).with_body(body);
        let pr = self.client.create_pull_request(request).await?;
        Ok(pr.html_url)
    }

    async fn find_pr(&self, branch: &str) -> Result<Option<String>> {
        Ok(self
            .client
            .find_open_pr_for_head(branch)
            .await?
            .map(|pr| pr.html_url))
    }

    async fn read_ci_status(&self, pr_link: &str) -> Result<CiState> {
        let number = parse_pr_number(pr_link)?;
        Ok(self.client.get_pr_ci_status(number).await?.state)
    }

    async fn add_label(&self, pr_link: &str, label: &str) -> Result<()> {
        let number = parse_pr_number(pr_link)?;
        self.client.add_label(number, label).await
    }

    async fn is_merged(&self, pr_link: &str) -> Result<bool> {
        let number = parse_pr_number(pr_link)?;
        self.client.is_merged(number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name() {
        let task = Task::new("1a2b3c-4d5e", "Add Login Page!", "");
        assert_eq!(branch_name("feature", &task), "feature/1a2b3c-add-login-page");
    }

    #[test]
    fn test_branch_name_keeps_unicode_and_falls_back_when_empty() {
        let task = Task::new("abc-def", "登录 页面", "");
        assert_eq!(branch_name("feature/", &task), "feature/abc-登录-页面");

        let task = Task::new("abc-def", "!!!", "");
        assert_eq!(branch_name("feature", &task), "feature/abc-task");
    }

    #[test]
    fn test_branch_name_truncates_slug() {
        let task = Task::new("abc", &"x".repeat(100), "");
        let name = branch_name("feature", &task);
        assert_eq!(name, format!("feature/abc-{}", "x".repeat(40)));
    }

    #[test]
    fn test_parse_pr_number() {
        assert_eq!(
            parse_pr_number("https://github.com/o/r/pull/42").unwrap(),
            42
        );
        assert_eq!(
            parse_pr_number("https://github.com/o/r/pull/7/").unwrap(),
            7
        );
        assert!(parse_pr_number("https://github.com/o/r/issues/42").is_err());
        assert!(parse_pr_number("not a link").is_err());
    }
}
