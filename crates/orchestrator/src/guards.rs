//! Transition guards.
//!
//! Each guard is a pure predicate over a [`Task`] plus the result of one
//! collaborator query. A query that errored or timed out yields
//! [`GuardOutcome::Unavailable`], which never lets a transition through.

use std::fmt;

use autopilot_core::{MockArtifact, Task, TestReport};
use github::CiState;

use crate::error::OrchestratorError;
use crate::files::MockError;

/// Heading the drafted spec is appended under.
pub const SPEC_SECTION: &str = "Spec";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Satisfied,
    /// Not yet; try again next cycle.
    Pending(String),
    /// Definitively failed; counts against the retry budget.
    Failed(String),
    /// The collaborator could not answer.
    Unavailable(String),
}

impl GuardOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Satisfied => None,
            Self::Pending(r) | Self::Failed(r) | Self::Unavailable(r) => Some(r),
        }
    }

    fn unavailable(err: &OrchestratorError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl fmt::Display for GuardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => f.write_str("satisfied"),
            Self::Pending(r) => write!(f, "pending: {}", r),
            Self::Failed(r) => write!(f, "failed: {}", r),
            Self::Unavailable(r) => write!(f, "unavailable: {}", r),
        }
    }
}

/// `-> Drafting`: the claim write was confirmed by the tracker.
pub fn claimed(won: Result<bool, &OrchestratorError>) -> GuardOutcome {
    match won {
        Ok(true) => GuardOutcome::Satisfied,
        Ok(false) => GuardOutcome::Failed("task claimed by another run".to_string()),
        Err(e) => GuardOutcome::unavailable(e),
    }
}

/// `-> Implementing`: the drafted spec is visible on the task as read back.
pub fn spec_written(read_back: Result<&Task, &OrchestratorError>) -> GuardOutcome {
    let task = match read_back {
        Ok(task) => task,
        Err(e) => return GuardOutcome::unavailable(e),
    };
    let heading = format!("## {}\n", SPEC_SECTION);
    match task.spec.as_deref() {
        Some(spec) if spec.contains(&heading) => GuardOutcome::Satisfied,
        _ => GuardOutcome::Pending("spec not yet visible on the task".to_string()),
    }
}

/// `-> SelfReview` (first half): the task's mock parses and belongs to it.
pub fn mock_valid(task: &Task, validated: Result<&MockArtifact, &MockError>) -> GuardOutcome {
    match validated {
        Ok(mock) => match mock.ensure_owned_by(&task.id) {
            Ok(()) => GuardOutcome::Satisfied,
            Err(e) => GuardOutcome::Failed(e.to_string()),
        },
        Err(MockError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            GuardOutcome::Failed("mock file does not exist".to_string())
        }
        Err(e @ MockError::Io(_)) => GuardOutcome::Unavailable(e.to_string()),
        Err(e @ MockError::Schema(_)) => GuardOutcome::Failed(e.to_string()),
    }
}

/// `-> SelfReview` (second half): a commit exists on the task branch.
pub fn commit_exists(sha: Result<&str, &OrchestratorError>) -> GuardOutcome {
    match sha {
        Ok(sha) if !sha.trim().is_empty() => GuardOutcome::Satisfied,
        Ok(_) => GuardOutcome::Failed("no commit recorded".to_string()),
        Err(e) => GuardOutcome::unavailable(e),
    }
}

/// `-> Testing`: the self-review checklist passed.
pub fn review_passed(failures: &[String]) -> GuardOutcome {
    if failures.is_empty() {
        GuardOutcome::Satisfied
    } else {
        GuardOutcome::Failed(failures.join("; "))
    }
}

/// `-> AwaitingTestStatus` (first half): the test run passed.
pub fn tests_passed(report: Result<&TestReport, &OrchestratorError>) -> GuardOutcome {
    match report {
        Ok(r) if r.passed => GuardOutcome::Satisfied,
        Ok(r) => GuardOutcome::Failed(format!("tests failed: {}", r.summary)),
        Err(e) => GuardOutcome::unavailable(e),
    }
}

/// `-> AwaitingTestStatus` (second half): an open PR exists for the branch.
pub fn pr_open(found: Result<Option<&str>, &OrchestratorError>) -> GuardOutcome {
    match found {
        Ok(Some(_)) => GuardOutcome::Satisfied,
        Ok(None) => GuardOutcome::Pending("no open pull request for branch".to_string()),
        Err(e) => GuardOutcome::unavailable(e),
    }
}

/// `-> AwaitingHumanMerge`: CI on the PR head is green.
pub fn ci_green(status: Result<CiState, &OrchestratorError>) -> GuardOutcome {
    match status {
        Ok(CiState::Success) => GuardOutcome::Satisfied,
        Ok(CiState::Pending) => GuardOutcome::Pending("CI still running".to_string()),
        Ok(CiState::Failure) => GuardOutcome::Failed("CI reported failure".to_string()),
        Err(e) => GuardOutcome::unavailable(e),
    }
}

/// `-> Completed`: a human merged the PR.
pub fn merged(merged: Result<bool, &OrchestratorError>) -> GuardOutcome {
    match merged {
        Ok(true) => GuardOutcome::Satisfied,
        Ok(false) => GuardOutcome::Pending("waiting for human merge".to_string()),
        Err(e) => GuardOutcome::unavailable(e),
    }
}
