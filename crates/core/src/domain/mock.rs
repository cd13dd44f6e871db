use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::task::{Task, TaskId};

/// Keys every mock document must carry.
pub const REQUIRED_MOCK_FIELDS: [&str; 7] = [
    "task_id",
    "title",
    "description",
    "inputs",
    "outputs",
    "cases",
    "notes",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockCase {
    pub name: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub expected: Value,
}

/// Input/output contract produced for a task and committed with the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockArtifact {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub inputs: Value,
    pub outputs: Value,
    pub cases: Vec<MockCase>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockSchemaError {
    #[error("mock is not valid JSON: {0}")]
    Malformed(String),

    #[error("mock must be a JSON object")]
    NotAnObject,

    #[error("mock missing required fields: {}", .missing_fields.join(", "))]
    MissingFields { missing_fields: Vec<String> },

    #[error("mock must contain at least one case")]
    EmptyCases,

    #[error("mock field {field} is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("mock task_id {found} does not match task {expected}")]
    TaskMismatch { expected: TaskId, found: TaskId },
}

impl MockArtifact {
    /// Default contract written when a task has no mock yet.
    pub fn scaffold(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: "mock purpose and scope".to_string(),
            inputs: json!({ "params": {}, "body": {} }),
            outputs: json!({ "status": 200, "body": {} }),
            cases: vec![MockCase {
                name: "happy-path".to_string(),
                inputs: json!({}),
                expected: json!({}),
            }],
            notes: "edge cases / exclusions".to_string(),
        }
    }

    /// Deterministic file name for a task's mock.
    pub fn file_name(task_id: &TaskId) -> String {
        format!("{}.mock.json", task_id.compact())
    }

    /// Parse and check a mock document.
    ///
    /// Required keys are checked on the raw object first so the error names
    /// every missing key rather than the first one serde trips over.
    pub fn from_json(content: &str) -> Result<Self, MockSchemaError> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| MockSchemaError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, MockSchemaError> {
        let object = value.as_object().ok_or(MockSchemaError::NotAnObject)?;

        let missing_fields: Vec<String> = REQUIRED_MOCK_FIELDS
            .iter()
            .filter(|key| !object.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing_fields.is_empty() {
            return Err(MockSchemaError::MissingFields { missing_fields });
        }

        match object.get("cases") {
            Some(Value::Array(cases)) if cases.is_empty() => {
                return Err(MockSchemaError::EmptyCases)
            }
            Some(Value::Array(_)) => {}
            _ => {
                return Err(MockSchemaError::InvalidField {
                    field: "cases".to_string(),
                    reason: "expected an array".to_string(),
                })
            }
        }

        serde_json::from_value(value).map_err(|e| MockSchemaError::InvalidField {
            field: "document".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn ensure_owned_by(&self, task_id: &TaskId) -> Result<(), MockSchemaError> {
        if &self.task_id == task_id {
            Ok(())
        } else {
            Err(MockSchemaError::TaskMismatch {
                expected: task_id.clone(),
                found: self.task_id.clone(),
            })
        }
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_pretty_json(&self) -> String {
        let mut out = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        out.push('\n');
        out
    }
}
