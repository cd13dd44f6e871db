//! Task lifecycle engine.
//!
//! [`TaskExecutor`] drives one task through the guarded lifecycle, writing
//! every transition back through the [`WritebackSequencer`]; [`Scheduler`]
//! finds eligible tasks and runs them with bounded concurrency.

pub mod dry_run;
pub mod error;
pub mod executor;
pub mod files;
pub mod generator;
pub mod guards;
pub mod resources;
pub mod retry;
pub mod review;
pub mod scheduler;
pub mod services;
pub mod state_machine;
pub mod test_runner;
pub mod writeback;

pub use dry_run::DryRunCodeHost;
pub use error::{OrchestratorError, Result};
pub use executor::{Dispatch, ExecutorConfig, PhaseResult, TaskExecutor};
pub use files::{validate_mock, MockError, MockStore};
pub use generator::{ArtifactGenerator, TemplateGenerator};
pub use guards::GuardOutcome;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerConfig, TickSummary};
pub use services::ExecutorContext;
pub use state_machine::TaskStateMachine;
pub use test_runner::{CommandTestRunner, TestRunner};
pub use writeback::{RecoverySummary, WritebackSequencer};
