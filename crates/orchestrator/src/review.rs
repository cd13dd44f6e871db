//! Self-review checklist run before a change goes to testing.

use autopilot_core::{MockArtifact, Task};

use crate::files::MockError;
use crate::guards::SPEC_SECTION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    pub name: &'static str,
    pub passed: bool,
    pub detail: Option<String>,
}

impl CheckItem {
    fn pass(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            detail: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewReport {
    pub items: Vec<CheckItem>,
}

impl ReviewReport {
    pub fn passed(&self) -> bool {
        self.items.iter().all(|i| i.passed)
    }

    pub fn failures(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| !i.passed)
            .map(|i| match &i.detail {
                Some(d) => format!("{}: {}", i.name, d),
                None => i.name.to_string(),
            })
            .collect()
    }

    /// Markdown checklist for the task's notes.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|i| {
                let mark = if i.passed { "x" } else { " " };
                match &i.detail {
                    Some(d) => format!("- [{}] {} ({})", mark, i.name, d),
                    None => format!("- [{}] {}", mark, i.name),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct SelfReview;

impl SelfReview {
    pub fn run(task: &Task, mock: Result<&MockArtifact, &MockError>) -> ReviewReport {
        let heading = format!("## {}\n", SPEC_SECTION);
        let mut items = Vec::new();

        items.push(match task.spec.as_deref() {
            Some(spec) if spec.contains(&heading) => CheckItem::pass("spec drafted"),
            _ => CheckItem::fail("spec drafted", "no Spec section"),
        });

        items.push(match mock {
            Ok(m) => match m.ensure_owned_by(&task.id) {
                Ok(()) => CheckItem::pass("mock valid"),
                Err(e) => CheckItem::fail("mock valid", e.to_string()),
            },
            Err(e) => CheckItem::fail("mock valid", e.to_string()),
        });

        items.push(match task.mock_path.as_deref() {
            Some(_) => CheckItem::pass("mock path recorded"),
            None => CheckItem::fail("mock path recorded", "missing"),
        });

        items.push(match task.branch.as_deref() {
            Some(_) => CheckItem::pass("branch recorded"),
            None => CheckItem::fail("branch recorded", "missing"),
        });

        items.push(match task.commit_sha.as_deref() {
            Some(_) => CheckItem::pass("commit recorded"),
            None => CheckItem::fail("commit recorded", "missing"),
        });

        ReviewReport { items }
    }
}
