//! Mock artifact storage.
//!
//! Mocks live at `<repo>/<mocks_dir>/<task id without dashes>.mock.json`, so
//! whether a task has a mock is a plain existence check.

use std::path::{Path, PathBuf};

use autopilot_core::{MockArtifact, MockSchemaError, Task, TaskId};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

pub const DEFAULT_MOCKS_DIR: &str = "mocks";

#[derive(Debug, Error)]
pub enum MockError {
    #[error("failed to read mock: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Schema(#[from] MockSchemaError),
}

/// Read a mock file and check it against the required schema.
pub async fn validate_mock(path: &Path) -> std::result::Result<MockArtifact, MockError> {
    let content = fs::read_to_string(path).await?;
    Ok(MockArtifact::from_json(&content)?)
}

#[derive(Debug, Clone)]
pub struct MockStore {
    repo_root: PathBuf,
    mocks_dir: PathBuf,
}

impl MockStore {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            mocks_dir: PathBuf::from(DEFAULT_MOCKS_DIR),
        }
    }

    pub fn with_mocks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mocks_dir = dir.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Repository-relative path, as committed and written back to the tracker.
    pub fn relative_path(&self, task_id: &TaskId) -> PathBuf {
        self.mocks_dir.join(MockArtifact::file_name(task_id))
    }

    pub fn path(&self, task_id: &TaskId) -> PathBuf {
        self.repo_root.join(self.relative_path(task_id))
    }

    pub async fn exists(&self, task_id: &TaskId) -> bool {
        fs::try_exists(self.path(task_id)).await.unwrap_or(false)
    }

    pub async fn validate(&self, task_id: &TaskId) -> std::result::Result<MockArtifact, MockError> {
        validate_mock(&self.path(task_id)).await
    }

    /// Write the mock produced by `generate` unless one already exists.
    ///
    /// Returns the relative path and whether a new file was written.
    pub async fn ensure<F>(&self, task: &Task, generate: F) -> Result<(PathBuf, bool)>
    where
        F: FnOnce(&Task) -> MockArtifact,
    {
        let relative = self.relative_path(&task.id);
        if self.exists(&task.id).await {
            debug!(task_id = %task.id, path = ?relative, "Mock already exists");
            return Ok((relative, false));
        }

        let mock = generate(task);
        self.write_atomic(&task.id, &mock.to_pretty_json()).await?;
        info!(task_id = %task.id, path = ?relative, "Wrote mock");
        Ok((relative, true))
    }

    async fn write_atomic(&self, task_id: &TaskId, content: &str) -> Result<()> {
        let dir = self.repo_root.join(&self.mocks_dir);
        fs::create_dir_all(&dir).await.map_err(|e| {
            OrchestratorError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create mocks directory {:?}: {}", dir, e),
            ))
        })?;

        let path = self.path(task_id);
        let temp_path = dir.join(format!(".{}.tmp", task_id.compact()));
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}
