use std::path::Path;

use async_trait::async_trait;
use autopilot_core::TestReport;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

const MAX_DETAILS_LEN: usize = 8000;

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, working_dir: &Path) -> Result<TestReport>;
}

/// Runs a shell command and reports its exit status and output.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: String,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, working_dir: &Path) -> Result<TestReport> {
        if self.command.trim().is_empty() {
            return Err(OrchestratorError::FatalConfig(
                "test command is empty".to_string(),
            ));
        }
        debug!(command = %self.command, dir = ?working_dir, "Running tests");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(working_dir)
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let summary = combined
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output")
            .to_string();
        let details = truncate_chars(&combined, MAX_DETAILS_LEN);

        info!(passed = output.status.success(), summary = %summary, "Tests finished");
        Ok(if output.status.success() {
            TestReport {
                passed: true,
                summary,
                details,
            }
        } else {
            TestReport::failed(summary, details)
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("测试输出", 2), "测试");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[tokio::test]
    async fn test_passing_command() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("echo running; echo '3 passed'");

        let report = runner.run(dir.path()).await.unwrap();
        assert!(report.passed);
        assert_eq!(report.summary, "3 passed");
        assert!(report.details.contains("running"));
    }

    #[tokio::test]
    async fn test_failing_command() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("echo 'assertion failed' >&2; exit 1");

        let report = runner.run(dir.path()).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.summary, "assertion failed");
    }

    #[tokio::test]
    async fn test_empty_command_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = CommandTestRunner::new(" ").run(dir.path()).await;
        assert!(matches!(result, Err(OrchestratorError::FatalConfig(_))));
    }
}
