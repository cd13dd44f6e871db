use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::task::TaskStatus;
use crate::error::CoreError;

/// How a tracker field is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Replace,
    Append,
}

/// Task fields the agent writes besides status and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskField {
    Spec,
    MockPath,
    PrLink,
    TestReport,
    UserDoc,
    Notes,
    Branch,
    CommitSha,
    ClaimToken,
}

impl TaskField {
    pub const ALL: [TaskField; 9] = [
        TaskField::Spec,
        TaskField::MockPath,
        TaskField::PrLink,
        TaskField::TestReport,
        TaskField::UserDoc,
        TaskField::Notes,
        TaskField::Branch,
        TaskField::CommitSha,
        TaskField::ClaimToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::MockPath => "mock_path",
            Self::PrLink => "pr_link",
            Self::TestReport => "test_report",
            Self::UserDoc => "user_doc",
            Self::Notes => "notes",
            Self::Branch => "branch",
            Self::CommitSha => "commit_sha",
            Self::ClaimToken => "claim_token",
        }
    }

    /// Narrative fields keep history and only accept appends.
    pub fn write_mode(&self) -> WriteMode {
        match self {
            Self::Spec | Self::PrLink | Self::TestReport | Self::UserDoc | Self::Notes => {
                WriteMode::Append
            }
            Self::MockPath | Self::Branch | Self::CommitSha | Self::ClaimToken => {
                WriteMode::Replace
            }
        }
    }
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FieldWrite {
    Replace {
        field: TaskField,
        value: String,
    },
    Append {
        field: TaskField,
        title: String,
        body: String,
    },
}

impl FieldWrite {
    pub fn field(&self) -> TaskField {
        match self {
            Self::Replace { field, .. } | Self::Append { field, .. } => *field,
        }
    }

    pub fn mode(&self) -> WriteMode {
        match self {
            Self::Replace { .. } => WriteMode::Replace,
            Self::Append { .. } => WriteMode::Append,
        }
    }

    fn content(&self) -> &str {
        match self {
            Self::Replace { value, .. } => value,
            Self::Append { body, .. } => body,
        }
    }
}

/// One logical writeback: an optional status replacement plus field writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub fields: Vec<FieldWrite>,
    #[serde(default)]
    pub add_labels: BTreeSet<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn replace(mut self, field: TaskField, value: impl Into<String>) -> Self {
        self.fields.push(FieldWrite::Replace {
            field,
            value: value.into(),
        });
        self
    }

    pub fn append(
        mut self,
        field: TaskField,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldWrite::Append {
            field,
            title: title.into(),
            body: body.into(),
        });
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.add_labels.insert(label.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.fields.is_empty() && self.add_labels.is_empty()
    }

    /// Reject writes that would blank a field or bypass the field's write mode.
    pub fn validate(&self) -> Result<(), CoreError> {
        for write in &self.fields {
            let field = write.field();
            if write.content().trim().is_empty() {
                return Err(CoreError::EmptyWrite {
                    field: field.to_string(),
                });
            }
            if write.mode() != field.write_mode() {
                return Err(CoreError::WriteModeMismatch {
                    field: field.to_string(),
                    expected: field.write_mode(),
                });
            }
        }
        if self.add_labels.iter().any(|l| l.trim().is_empty()) {
            return Err(CoreError::EmptyWrite {
                field: "labels".to_string(),
            });
        }
        Ok(())
    }
}
