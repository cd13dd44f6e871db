use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: bool,
    pub summary: String,
    pub details: String,
}

impl TestReport {
    pub fn passed(summary: impl Into<String>) -> Self {
        Self {
            passed: true,
            summary: summary.into(),
            details: String::new(),
        }
    }

    pub fn failed(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            summary: summary.into(),
            details: details.into(),
        }
    }

    /// Markdown body appended to the task's test report field.
    pub fn render(&self) -> String {
        let verdict = if self.passed { "passed" } else { "failed" };
        let mut out = format!("- Result: {}\n- Summary: {}\n", verdict, self.summary.trim());
        if !self.details.trim().is_empty() {
            out.push_str("\n```\n");
            out.push_str(self.details.trim());
            out.push_str("\n```\n");
        }
        out
    }
}
