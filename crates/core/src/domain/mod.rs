mod mock;
mod report;
mod task;
mod transition;
mod update;

pub use mock::{MockArtifact, MockCase, MockSchemaError, REQUIRED_MOCK_FIELDS};
pub use report::TestReport;
pub use task::{append_section, build_section, Task, TaskId, TaskRef, TaskStatus};
pub use transition::{TransitionOutcome, TransitionRecord};
pub use update::{FieldWrite, TaskField, TaskUpdate, WriteMode};
