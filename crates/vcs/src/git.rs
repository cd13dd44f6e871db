use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, VcsError};
use crate::traits::VersionControl;

pub struct GitVcs {
    repo_path: PathBuf,
    main_branch: String,
    remote: String,
}

impl GitVcs {
    pub fn new(repo_path: PathBuf) -> Self {
        Self {
            repo_path,
            main_branch: "main".to_string(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_main_branch(mut self, branch: impl Into<String>) -> Self {
        self.main_branch = branch.into();
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        debug!("Running git {:?} in {:?}", args, self.repo_path);

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => VcsError::CommandNotFound("git".to_string()),
                _ => VcsError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcsError::CommandFailed(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `git diff --cached --quiet` exits 1 when something is staged.
    async fn has_staged_changes(&self) -> Result<bool> {
        let status = Command::new("git")
            .args(["diff", "--cached", "--quiet"])
            .current_dir(&self.repo_path)
            .status()
            .await?;
        Ok(!status.success())
    }
}

fn validate_branch(branch: &str) -> Result<()> {
    let invalid = branch.is_empty()
        || branch.starts_with('-')
        || branch.contains("..")
        || branch.chars().any(|c| c.is_whitespace() || "~^:?*[\\".contains(c));
    if invalid {
        return Err(VcsError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

#[async_trait]
impl VersionControl for GitVcs {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn is_available(&self) -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn is_initialized(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.repo_path.join(".git")).await?)
    }

    async fn current_branch(&self) -> Result<String> {
        let out = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        validate_branch(branch)?;
        let reference = format!("refs/heads/{}", branch);
        match self
            .run_git(&["show-ref", "--verify", "--quiet", &reference])
            .await
        {
            Ok(_) => Ok(true),
            Err(VcsError::CommandFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ensure_branch(&self, branch: &str, base: &str) -> Result<()> {
        if !self.is_initialized().await? {
            return Err(VcsError::NotInitialized(self.repo_path.display().to_string()));
        }

        if self.branch_exists(branch).await? {
            if self.current_branch().await? != branch {
                self.run_git(&["checkout", branch]).await?;
            }
            debug!(branch, "Branch already exists");
            return Ok(());
        }

        self.run_git(&["checkout", "-b", branch, base]).await?;
        info!(branch, base, "Created branch");
        Ok(())
    }

    async fn commit(&self, paths: &[&Path], message: &str) -> Result<String> {
        if !paths.is_empty() {
            let mut args: Vec<&str> = vec!["add", "--"];
            for path in paths {
                args.push(
                    path.to_str()
                        .ok_or_else(|| VcsError::CommandFailed(format!("non-utf8 path {:?}", path)))?,
                );
            }
            self.run_git(&args).await?;
        }

        if !self.has_staged_changes().await? {
            debug!("Nothing staged, reusing HEAD");
            return self.head_sha().await;
        }

        self.run_git(&["commit", "-m", message]).await?;
        let sha = self.head_sha().await?;
        info!(sha = %sha, "Committed changes");
        Ok(sha)
    }

    async fn head_sha(&self) -> Result<String> {
        let output = self.run_git(&["rev-parse", "HEAD"]).await?;
        Ok(output.trim().to_string())
    }

    async fn push(&self, branch: &str) -> Result<()> {
        validate_branch(branch)?;
        self.run_git(&["push", "-u", &self.remote, branch]).await?;
        Ok(())
    }

    fn main_branch(&self) -> &str {
        &self.main_branch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo() -> Option<(TempDir, GitVcs)> {
        let dir = TempDir::new().unwrap();
        let vcs = GitVcs::new(dir.path().to_path_buf());
        if !vcs.is_available().await {
            return None;
        }
        vcs.run_git(&["init", "-b", "main"]).await.ok()?;
        vcs.run_git(&["config", "user.email", "agent@example.com"])
            .await
            .ok()?;
        vcs.run_git(&["config", "user.name", "Agent"]).await.ok()?;
        tokio::fs::write(dir.path().join("README.md"), "hello\n")
            .await
            .unwrap();
        vcs.commit(&[Path::new("README.md")], "initial").await.ok()?;
        Some((dir, vcs))
    }

    #[test]
    fn test_with_main_branch() {
        let vcs = GitVcs::new(PathBuf::from("/repo")).with_main_branch("master");
        assert_eq!(vcs.main_branch(), "master");
    }

    #[test]
    fn test_validate_branch() {
        assert!(validate_branch("feature/abc-login").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("-x").is_err());
        assert!(validate_branch("a..b").is_err());
        assert!(validate_branch("has space").is_err());
    }

    #[tokio::test]
    async fn test_ensure_branch_is_idempotent() {
        let Some((_dir, vcs)) = init_repo().await else {
            return;
        };

        vcs.ensure_branch("feature/t1-login", "main").await.unwrap();
        assert_eq!(vcs.current_branch().await.unwrap(), "feature/t1-login");

        vcs.ensure_branch("feature/t1-login", "main").await.unwrap();
        assert_eq!(vcs.current_branch().await.unwrap(), "feature/t1-login");
    }

    #[tokio::test]
    async fn test_commit_without_changes_returns_head() {
        let Some((dir, vcs)) = init_repo().await else {
            return;
        };
        let head = vcs.head_sha().await.unwrap();

        let again = vcs
            .commit(&[Path::new("README.md")], "no-op")
            .await
            .unwrap();
        assert_eq!(again, head);

        tokio::fs::write(dir.path().join("README.md"), "changed\n")
            .await
            .unwrap();
        let next = vcs
            .commit(&[Path::new("README.md")], "change")
            .await
            .unwrap();
        assert_ne!(next, head);
    }
}
