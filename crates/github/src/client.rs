use octocrab::models::IssueState as OctocrabIssueState;
use octocrab::Octocrab;
use tracing::{debug, info};

use crate::error::{GitHubError, Result};
use crate::types::{CheckRun, CiState, CiStatus, CreatePrRequest, PrState, PullRequest, RepoConfig};

pub struct GitHubClient {
    octocrab: Octocrab,
    repo: RepoConfig,
}

impl GitHubClient {
    pub fn new(token: &str, repo: RepoConfig) -> Result<Self> {
        let octocrab = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| GitHubError::Config(e.to_string()))?;

        Ok(Self { octocrab, repo })
    }

    pub fn repo(&self) -> &RepoConfig {
        &self.repo
    }
}

impl GitHubClient {
    pub async fn create_pull_request(&self, request: CreatePrRequest) -> Result<PullRequest> {
        info!(
            "Creating PR: {} ({} -> {})",
            request.title, request.head, request.base
        );

        let pr = self
            .octocrab
            .pulls(&self.repo.owner, &self.repo.repo)
            .create(&request.title, &request.head, &request.base)
            .body(&request.body)
            .draft(request.draft)
            .send()
            .await?;

        Ok(convert_pr(pr))
    }

    pub async fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        debug!("Getting PR #{}", number);

        let pr = self
            .octocrab
            .pulls(&self.repo.owner, &self.repo.repo)
            .get(number)
            .await?;

        Ok(convert_pr(pr))
    }

    /// The open PR whose head is `branch` in this repository, if any.
    pub async fn find_open_pr_for_head(&self, branch: &str) -> Result<Option<PullRequest>> {
        let head = format!("{}:{}", self.repo.owner, branch);
        debug!("Looking up open PR for head {}", head);

        let page = self
            .octocrab
            .pulls(&self.repo.owner, &self.repo.repo)
            .list()
            .state(octocrab::params::State::Open)
            .head(head)
            .send()
            .await?;

        Ok(page.items.into_iter().next().map(convert_pr))
    }

    pub async fn add_label(&self, number: u64, label: &str) -> Result<()> {
        info!("Adding label {} to #{}", label, number);

        self.octocrab
            .issues(&self.repo.owner, &self.repo.repo)
            .add_labels(number, &[label.to_string()])
            .await?;

        Ok(())
    }

    pub async fn is_merged(&self, number: u64) -> Result<bool> {
        let pr = self.get_pull_request(number).await?;
        Ok(pr.state == PrState::Merged)
    }
}

impl GitHubClient {
    pub async fn get_ci_status(&self, ref_name: &str) -> Result<CiStatus> {
        debug!("Getting CI status for ref: {}", ref_name);

        let checks = self
            .octocrab
            .checks(&self.repo.owner, &self.repo.repo)
            .list_check_runs_for_git_ref(ref_name.to_string().into())
            .send()
            .await?;

        let check_runs: Vec<CheckRun> = checks
            .check_runs
            .into_iter()
            .map(|cr| CheckRun {
                name: cr.name,
                conclusion: cr.conclusion.map(|c| normalize_conclusion(&format!("{:?}", c))),
                html_url: cr.html_url.map(|u| u.to_string()),
            })
            .collect();

        Ok(CiStatus {
            state: compute_aggregate_state(&check_runs),
            total_count: check_runs.len() as u32,
            checks: check_runs,
        })
    }

    pub async fn get_pr_ci_status(&self, pr_number: u64) -> Result<CiStatus> {
        let pr = self.get_pull_request(pr_number).await?;
        self.get_ci_status(&pr.head_sha).await
    }
}

fn convert_pr(pr: octocrab::models::pulls::PullRequest) -> PullRequest {
    let state = if pr.merged_at.is_some() {
        PrState::Merged
    } else {
        match &pr.state {
            Some(OctocrabIssueState::Closed) => PrState::Closed,
            _ => PrState::Open,
        }
    };

    PullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        state,
        head_branch: pr.head.ref_field,
        head_sha: pr.head.sha,
        base_branch: pr.base.ref_field,
        html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        merged_at: pr.merged_at,
    }
}

/// `"TimedOut"`, `"timed_out"` and `"\"timed_out\""` all become `timedout`.
fn normalize_conclusion(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Any failing check fails the head; no checks or any unfinished check is pending.
pub(crate) fn compute_aggregate_state(checks: &[CheckRun]) -> CiState {
    if checks.is_empty() {
        return CiState::Pending;
    }

    let mut has_pending = false;
    let mut has_failure = false;

    for check in checks {
        match check.conclusion.as_deref() {
            None => has_pending = true,
            Some("success") | Some("skipped") | Some("neutral") => {}
            Some("failure") | Some("cancelled") | Some("timedout") | Some("startupfailure") => {
                has_failure = true
            }
            Some(_) => has_pending = true,
        }
    }

    if has_failure {
        CiState::Failure
    } else if has_pending {
        CiState::Pending
    } else {
        CiState::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            name: "ci".to_string(),
            conclusion: conclusion.map(normalize_conclusion),
            html_url: None,
        }
    }

    #[test]
    fn test_normalize_conclusion() {
        assert_eq!(normalize_conclusion("TimedOut"), "timedout");
        assert_eq!(normalize_conclusion("\"timed_out\""), "timedout");
        assert_eq!(normalize_conclusion("Success"), "success");
    }

    #[test]
    fn test_aggregate_empty_is_pending() {
        assert_eq!(compute_aggregate_state(&[]), CiState::Pending);
    }

    #[test]
    fn test_aggregate_all_success() {
        let checks = vec![check(Some("Success")), check(Some("skipped"))];
        assert_eq!(compute_aggregate_state(&checks), CiState::Success);
    }

    #[test]
    fn test_aggregate_failure_wins_over_pending() {
        let checks = vec![check(None), check(Some("cancelled")), check(Some("success"))];
        assert_eq!(compute_aggregate_state(&checks), CiState::Failure);
    }

    #[test]
    fn test_aggregate_in_progress_is_pending() {
        let checks = vec![check(Some("success")), check(None)];
        assert_eq!(compute_aggregate_state(&checks), CiState::Pending);

        let checks = vec![check(Some("action_required"))];
        assert_eq!(compute_aggregate_state(&checks), CiState::Pending);
    }
}
