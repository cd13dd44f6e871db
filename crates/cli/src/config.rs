use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use github::RepoConfig;
use orchestrator::{ExecutorConfig, OrchestratorError, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracker::NotionSchema;

pub const AUTOPILOT_DIR: &str = ".autopilot";
pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "transitions.db";

/// `.autopilot/config.toml`. Secrets never live here; they come from the
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub tracker: TrackerConfig,
    pub github: GitHubConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Falls back to `NOTION_DATABASE_ID`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub properties: NotionSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// `owner/repo`; falls back to `GITHUB_REPO`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub remote: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub dry_run: bool,
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    pub retry_budget: u32,
    pub stale_after_secs: u64,
    pub call_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub branch_prefix: String,
    pub base_branch: String,
    pub mocks_dir: String,
    pub test_command: String,
    pub needs_fix_label: String,
    pub blocked_label: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            dry_run: false,
            concurrency: 2,
            poll_interval_secs: 60,
            retry_budget: 3,
            stale_after_secs: 1800,
            call_timeout_secs: 120,
            test_timeout_secs: 1800,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            branch_prefix: "feature".to_string(),
            base_branch: "main".to_string(),
            mocks_dir: "mocks".to_string(),
            test_command: "cargo test".to_string(),
            needs_fix_label: "needs-fix".to_string(),
            blocked_label: "blocked".to_string(),
        }
    }
}

/// Values taken from flags and the environment, applied over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dry_run: bool,
    pub concurrency: Option<usize>,
    pub branch_prefix: Option<String>,
    pub database_id: Option<String>,
    pub github_repo: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub notion_token: Option<String>,
    pub github_token: Option<String>,
}

impl AutopilotConfig {
    pub fn dir(repo_root: &Path) -> PathBuf {
        repo_root.join(AUTOPILOT_DIR)
    }

    pub fn path(repo_root: &Path) -> PathBuf {
        Self::dir(repo_root).join(CONFIG_FILE)
    }

    pub fn db_path(repo_root: &Path) -> PathBuf {
        Self::dir(repo_root).join(DB_FILE)
    }

    /// Missing file means defaults; a file that does not parse is an error.
    pub async fn load(repo_root: &Path) -> Result<Self> {
        let path = Self::path(repo_root);
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub async fn write(&self, repo_root: &Path) -> Result<PathBuf> {
        let dir = Self::dir(repo_root);
        tokio::fs::create_dir_all(&dir).await?;

        let path = Self::path(repo_root);
        tokio::fs::write(&path, toml::to_string_pretty(self)?).await?;
        Ok(path)
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        self.agent.dry_run |= overrides.dry_run;
        if let Some(concurrency) = overrides.concurrency {
            self.agent.concurrency = concurrency;
        }
        if let Some(prefix) = overrides.branch_prefix {
            self.agent.branch_prefix = prefix;
        }
        if overrides.database_id.is_some() {
            self.tracker.database_id = overrides.database_id;
        }
        if overrides.github_repo.is_some() {
            self.github.repo = overrides.github_repo;
        }
        self
    }

    pub fn executor_config(&self, repo_root: &Path) -> ExecutorConfig {
        let agent = &self.agent;
        let mut config = ExecutorConfig::new(repo_root)
            .with_dry_run(agent.dry_run)
            .with_retry_budget(agent.retry_budget)
            .with_call_timeout(Duration::from_secs(agent.call_timeout_secs))
            .with_test_timeout(Duration::from_secs(agent.test_timeout_secs))
            .with_backoff(
                Duration::from_millis(agent.backoff_initial_ms),
                Duration::from_millis(agent.backoff_max_ms),
            );
        if let Some(agent_id) = &agent.agent_id {
            config = config.with_agent_id(agent_id.clone());
        }
        config.needs_fix_label = agent.needs_fix_label.clone();
        config.blocked_label = agent.blocked_label.clone();
        config
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: self.agent.concurrency.max(1),
            poll_interval: Duration::from_secs(self.agent.poll_interval_secs),
            stale_after: Duration::from_secs(self.agent.stale_after_secs),
        }
    }

    /// Tracker identifiers; fatal when absent.
    pub fn notion(&self, credentials: &Credentials) -> Result<(String, String), OrchestratorError> {
        let token = required(credentials.notion_token.as_deref(), "NOTION_TOKEN")?;
        let database_id = required(self.tracker.database_id.as_deref(), "NOTION_DATABASE_ID")?;
        Ok((token, database_id))
    }

    /// Code-host identifiers; fatal when absent or malformed.
    pub fn github(&self, credentials: &Credentials) -> Result<(String, RepoConfig), OrchestratorError> {
        let token = required(credentials.github_token.as_deref(), "GITHUB_TOKEN")?;
        let full_name = required(self.github.repo.as_deref(), "GITHUB_REPO")?;
        let repo = RepoConfig::from_full_name(&full_name).ok_or_else(|| {
            OrchestratorError::FatalConfig(format!(
                "GITHUB_REPO must look like owner/repo, got {:?}",
                full_name
            ))
        })?;
        Ok((token, repo))
    }
}

fn required(value: Option<&str>, name: &str) -> Result<String, OrchestratorError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(OrchestratorError::FatalConfig(format!("{} is not set", name))),
    }
}
