//! Code host used in dry-run mode: branch names are computed, nothing is
//! pushed, committed or opened.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use autopilot_core::Task;
use github::{branch_name, Changeset, CiState, CodeHost, Result};
use tracing::info;

pub const DRY_RUN_SHA: &str = "dry-run";

pub struct DryRunCodeHost {
    branch_prefix: String,
    opened: Mutex<HashMap<String, String>>,
}

impl DryRunCodeHost {
    pub fn new(branch_prefix: impl Into<String>) -> Self {
        Self {
            branch_prefix: branch_prefix.into(),
            opened: Mutex::new(HashMap::new()),
        }
    }

    fn opened(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CodeHost for DryRunCodeHost {
    async fn create_branch(&self, task: &Task) -> Result<String> {
        let branch = branch_name(&self.branch_prefix, task);
        info!(branch = %branch, "Dry run: skipping branch creation");
        Ok(branch)
    }

    async fn commit(&self, branch: &str, changeset: &Changeset) -> Result<String> {
        info!(
            branch,
            paths = ?changeset.paths,
            message = %changeset.message,
            "Dry run: skipping commit"
        );
        Ok(DRY_RUN_SHA.to_string())
    }

    async fn open_pr(&self, branch: &str, title: &str, _body: &str) -> Result<String> {
        let mut opened = self.opened();
        let next = opened.len() + 1;
        let link = opened
            .entry(branch.to_string())
            .or_insert_with(|| format!("https://dry-run.invalid/pull/{}", next))
            .clone();
        info!(branch, title, link = %link, "Dry run: skipping pull request");
        Ok(link)
    }

    async fn find_pr(&self, branch: &str) -> Result<Option<String>> {
        Ok(self.opened().get(branch).cloned())
    }

    async fn read_ci_status(&self, _pr_link: &str) -> Result<CiState> {
        Ok(CiState::Pending)
    }

    async fn add_label(&self, pr_link: &str, label: &str) -> Result<()> {
        info!(pr_link, label, "Dry run: skipping label");
        Ok(())
    }

    async fn is_merged(&self, _pr_link: &str) -> Result<bool> {
        Ok(false)
    }
}
