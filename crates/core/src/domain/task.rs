use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::update::{FieldWrite, TaskField, TaskUpdate};
use crate::error::CoreError;

/// Stable identifier assigned by the task tracker (a Notion page id, for example).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier with dashes stripped, used for file names.
    pub fn compact(&self) -> String {
        self.0.replace('-', "")
    }

    /// First dash-separated segment, used for branch names.
    pub fn short(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Drafting,
    Implementing,
    SelfReview,
    Testing,
    AwaitingTestStatus,
    AwaitingHumanMerge,
    Completed,
    /// Off the forward chain; waits for a human to reset the task.
    Blocked,
}

impl TaskStatus {
    /// The forward lifecycle, in order.
    pub const LIFECYCLE: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::Drafting,
        TaskStatus::Implementing,
        TaskStatus::SelfReview,
        TaskStatus::Testing,
        TaskStatus::AwaitingTestStatus,
        TaskStatus::AwaitingHumanMerge,
        TaskStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Drafting => "drafting",
            Self::Implementing => "implementing",
            Self::SelfReview => "self_review",
            Self::Testing => "testing",
            Self::AwaitingTestStatus => "awaiting_test_status",
            Self::AwaitingHumanMerge => "awaiting_human_merge",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "drafting" => Some(Self::Drafting),
            "implementing" => Some(Self::Implementing),
            "self_review" => Some(Self::SelfReview),
            "testing" => Some(Self::Testing),
            "awaiting_test_status" => Some(Self::AwaitingTestStatus),
            "awaiting_human_merge" => Some(Self::AwaitingHumanMerge),
            "completed" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Position in the forward lifecycle. `Blocked` has none.
    pub fn ordinal(&self) -> Option<usize> {
        Self::LIFECYCLE.iter().position(|s| s == self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// States the agent keeps polling without any local work pending.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::AwaitingTestStatus | Self::AwaitingHumanMerge)
    }

    /// States in which an agent run is actively driving the task.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Drafting | Self::Implementing | Self::SelfReview | Self::Testing
        )
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub title: String,
    pub description: String,
    pub spec: Option<String>,
    pub mock_path: Option<String>,
    pub pr_link: Option<String>,
    pub test_report: Option<String>,
    pub user_doc: Option<String>,
    pub notes: Option<String>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub claim_token: Option<String>,
    pub labels: BTreeSet<String>,
    pub last_transition_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::default(),
            title: title.into(),
            description: description.into(),
            spec: None,
            mock_path: None,
            pr_link: None,
            test_report: None,
            user_doc: None,
            notes: None,
            branch: None,
            commit_sha: None,
            claim_token: None,
            labels: BTreeSet::new(),
            last_transition_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_last_transition_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_transition_at = at;
        self
    }

    pub fn to_ref(&self) -> TaskRef {
        TaskRef {
            id: self.id.clone(),
            status: self.status,
            last_transition_at: self.last_transition_at,
        }
    }

    pub fn field(&self, field: TaskField) -> Option<&str> {
        match field {
            TaskField::Spec => self.spec.as_deref(),
            TaskField::MockPath => self.mock_path.as_deref(),
            TaskField::PrLink => self.pr_link.as_deref(),
            TaskField::TestReport => self.test_report.as_deref(),
            TaskField::UserDoc => self.user_doc.as_deref(),
            TaskField::Notes => self.notes.as_deref(),
            TaskField::Branch => self.branch.as_deref(),
            TaskField::CommitSha => self.commit_sha.as_deref(),
            TaskField::ClaimToken => self.claim_token.as_deref(),
        }
    }

    fn field_mut(&mut self, field: TaskField) -> &mut Option<String> {
        match field {
            TaskField::Spec => &mut self.spec,
            TaskField::MockPath => &mut self.mock_path,
            TaskField::PrLink => &mut self.pr_link,
            TaskField::TestReport => &mut self.test_report,
            TaskField::UserDoc => &mut self.user_doc,
            TaskField::Notes => &mut self.notes,
            TaskField::Branch => &mut self.branch,
            TaskField::CommitSha => &mut self.commit_sha,
            TaskField::ClaimToken => &mut self.claim_token,
        }
    }

    /// The most recent PR link recorded in the narrative field.
    pub fn latest_pr_url(&self) -> Option<&str> {
        self.pr_link
            .as_deref()
            .and_then(|text| text.lines().rev().find(|l| l.trim().starts_with("http")))
            .map(str::trim)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_transition_at) > threshold
    }

    /// Apply an update the way a tracker does: status replaced, narrative
    /// fields appended, identifier fields replaced, labels unioned.
    ///
    /// The whole update is validated before anything is applied.
    pub fn apply(&mut self, update: &TaskUpdate, now: DateTime<Utc>) -> Result<(), CoreError> {
        update.validate()?;

        for write in &update.fields {
            match write {
                FieldWrite::Replace { field, value } => {
                    *self.field_mut(*field) = Some(value.clone());
                }
                FieldWrite::Append { field, title, body } => {
                    let slot = self.field_mut(*field);
                    *slot = Some(append_section(slot.as_deref(), title, body));
                }
            }
        }

        self.labels.extend(update.add_labels.iter().cloned());

        if let Some(status) = update.status {
            self.status = status;
            self.last_transition_at = now;
        }

        Ok(())
    }
}

/// Lightweight listing entry returned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: TaskId,
    pub status: TaskStatus,
    pub last_transition_at: DateTime<Utc>,
}

pub fn build_section(title: &str, body: &str) -> String {
    format!("## {}\n{}\n", title, body.trim())
}

/// Append a titled section to narrative text.
///
/// Returns the existing text unchanged when the identical section is
/// already present, so re-delivered appends do not duplicate content.
pub fn append_section(existing: Option<&str>, title: &str, body: &str) -> String {
    let section = build_section(title, body);
    match existing {
        None => section,
        Some(text) if text.trim().is_empty() => section,
        Some(text) if has_section(text, &section) => text.to_string(),
        Some(text) => format!("{}{}{}", text.trim_end(), SECTION_SEPARATOR, section),
    }
}

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Whole-section match; a body that itself holds a separator must match
/// as a contiguous run.
fn has_section(text: &str, section: &str) -> bool {
    let present: Vec<&str> = text.split(SECTION_SEPARATOR).map(str::trim).collect();
    let wanted: Vec<&str> = section.split(SECTION_SEPARATOR).map(str::trim).collect();
    present.windows(wanted.len()).any(|run| run == wanted.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("abc-123", "Test Task", "Test Description");

        assert_eq!(task.title, "Test Task");
        assert_eq!(task.description, "Test Description");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.spec.is_none());
        assert!(task.labels.is_empty());
    }

    #[test]
    fn test_task_status_serialization() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::SelfReview.as_str(), "self_review");
        assert_eq!(
            serde_json::to_string(&TaskStatus::AwaitingHumanMerge).unwrap(),
            "\"awaiting_human_merge\""
        );
    }

    #[test]
    fn test_task_status_parsing() {
        for status in TaskStatus::LIFECYCLE {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("blocked"), Some(TaskStatus::Blocked));
        assert_eq!(TaskStatus::parse("invalid"), None);
        assert!("invalid".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_ordinal_follows_lifecycle() {
        assert_eq!(TaskStatus::Pending.ordinal(), Some(0));
        assert_eq!(TaskStatus::Completed.ordinal(), Some(7));
        assert_eq!(TaskStatus::Blocked.ordinal(), None);
    }

    #[test]
    fn test_task_id_helpers() {
        let id = TaskId::new("1a2b3c4d-5e6f-7081-92a3-b4c5d6e7f809");
        assert_eq!(id.short(), "1a2b3c4d");
        assert_eq!(id.compact(), "1a2b3c4d5e6f708192a3b4c5d6e7f809");
    }

    #[test]
    fn test_append_section_first_and_subsequent() {
        let first = append_section(None, "Spec", "body one");
        assert_eq!(first, "## Spec\nbody one\n");

        let second = append_section(Some(&first), "PR", "https://example.com/pull/1");
        assert_eq!(
            second,
            "## Spec\nbody one\n\n---\n\n## PR\nhttps://example.com/pull/1\n"
        );
    }

    #[test]
    fn test_append_section_matches_whole_sections() {
        let existing = append_section(None, "PR", "https://github.com/o/r/pull/12");
        let appended = append_section(Some(&existing), "PR", "https://github.com/o/r/pull/1");

        assert_ne!(appended, existing);
        assert!(appended.ends_with("## PR\nhttps://github.com/o/r/pull/1\n"));
        assert_eq!(
            append_section(Some(&appended), "PR", "https://github.com/o/r/pull/1"),
            appended
        );
    }

    #[test]
    fn test_append_section_is_idempotent() {
        let once = append_section(None, "Spec", "body");
        let twice = append_section(Some(&once), "Spec", "body");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_appends_and_replaces() {
        let mut task = Task::new("t1", "Title", "Desc");
        task.spec = Some("original acceptance".to_string());

        let update = TaskUpdate::new()
            .status(TaskStatus::Implementing)
            .append(TaskField::Spec, "Spec", "generated")
            .replace(TaskField::Branch, "feature/t1-title")
            .label("agent");

        let now = Utc::now();
        task.apply(&update, now).unwrap();

        assert_eq!(task.status, TaskStatus::Implementing);
        assert_eq!(task.last_transition_at, now);
        assert!(task.spec.as_deref().unwrap().starts_with("original acceptance"));
        assert!(task.spec.as_deref().unwrap().contains("## Spec\ngenerated"));
        assert_eq!(task.branch.as_deref(), Some("feature/t1-title"));
        assert!(task.labels.contains("agent"));
    }

    #[test]
    fn test_apply_rejects_empty_narrative() {
        let mut task = Task::new("t1", "Title", "Desc");
        task.user_doc = Some("kept".to_string());

        let update = TaskUpdate::new().append(TaskField::UserDoc, "Docs", "   ");
        assert!(task.apply(&update, Utc::now()).is_err());
        assert_eq!(task.user_doc.as_deref(), Some("kept"));
    }

    #[test]
    fn test_latest_pr_url() {
        let mut task = Task::new("t1", "Title", "Desc");
        assert!(task.latest_pr_url().is_none());

        task.pr_link = Some(append_section(None, "PR", "https://github.com/o/r/pull/7"));
        assert_eq!(task.latest_pr_url(), Some("https://github.com/o/r/pull/7"));
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let task = Task::new("t1", "Title", "Desc")
            .with_last_transition_at(now - Duration::minutes(45));

        assert!(task.is_stale(now, Duration::minutes(30)));
        assert!(!task.is_stale(now, Duration::hours(1)));
    }
}
