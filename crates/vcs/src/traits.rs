use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Local repository operations used to stage a task's change on its own branch.
#[async_trait]
pub trait VersionControl: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backing command exists on this machine.
    async fn is_available(&self) -> bool;

    async fn is_initialized(&self) -> Result<bool>;

    async fn current_branch(&self) -> Result<String>;

    async fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Check out `branch`, creating it from `base` when it does not exist yet.
    /// Calling it again for the same branch only switches to it.
    async fn ensure_branch(&self, branch: &str, base: &str) -> Result<()>;

    /// Stage `paths` and commit them. Returns the resulting HEAD; when nothing
    /// is staged no commit is made and the current HEAD is returned.
    async fn commit(&self, paths: &[&Path], message: &str) -> Result<String>;

    async fn head_sha(&self) -> Result<String>;

    async fn push(&self, branch: &str) -> Result<()>;

    fn main_branch(&self) -> &str;
}
