use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate, TransitionRecord};
use chrono::Utc;
use db::TransitionRepository;
use events::EventBus;
use github::CodeHost;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracker::TaskTracker;

use crate::error::{OrchestratorError, Result};
use crate::executor::PhaseResult;
use crate::files::MockStore;
use crate::generator::{ArtifactGenerator, TemplateGenerator};
use crate::guards::GuardOutcome;
use crate::retry::{with_timeout, RetryPolicy};
use crate::test_runner::{CommandTestRunner, TestRunner};
use crate::writeback::WritebackSequencer;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub repo_path: PathBuf,
    pub agent_id: String,
    pub dry_run: bool,
    pub retry_budget: u32,
    pub call_timeout: Duration,
    pub test_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub needs_fix_label: String,
    pub blocked_label: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            agent_id: "autopilot".to_string(),
            dry_run: false,
            retry_budget: 3,
            call_timeout: Duration::from_secs(120),
            test_timeout: Duration::from_secs(1800),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            needs_fix_label: "needs-fix".to_string(),
            blocked_label: "blocked".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            ..Default::default()
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Transient failures get the budget's worth of retries on top of the first try.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_budget + 1,
            self.backoff_initial,
            self.backoff_max,
        )
    }
}

/// Collaborators and shared helpers for the lifecycle phases.
pub struct ExecutorContext {
    pub config: ExecutorConfig,
    pub tracker: Arc<dyn TaskTracker>,
    pub code_host: Arc<dyn CodeHost>,
    pub test_runner: Arc<dyn TestRunner>,
    pub generator: Arc<dyn ArtifactGenerator>,
    pub mocks: MockStore,
    pub writeback: WritebackSequencer,
    pub retry: RetryPolicy,
    /// Held by phases that check out branches or run tests in the shared
    /// working tree.
    pub workspace: Arc<Mutex<()>>,
}

impl ExecutorContext {
    pub fn new(
        config: ExecutorConfig,
        tracker: Arc<dyn TaskTracker>,
        code_host: Arc<dyn CodeHost>,
        transitions: TransitionRepository,
    ) -> Self {
        let retry = config.retry_policy();
        let writeback = WritebackSequencer::new(Arc::clone(&tracker), transitions)
            .with_retry(retry.clone())
            .with_call_timeout(config.call_timeout)
            .with_dry_run(config.dry_run);

        Self {
            mocks: MockStore::new(&config.repo_path),
            test_runner: Arc::new(CommandTestRunner::new("cargo test")),
            generator: Arc::new(TemplateGenerator),
            workspace: Arc::new(Mutex::new(())),
            config,
            tracker,
            code_host,
            writeback,
            retry,
        }
    }

    pub fn with_test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = runner;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn ArtifactGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_mocks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mocks = self.mocks.with_mocks_dir(dir);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.writeback = self.writeback.with_event_bus(bus);
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        self.writeback.event_bus()
    }

    /// One collaborator call under the retry policy, each attempt bounded by
    /// the call timeout.
    pub async fn call<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<OrchestratorError>,
    {
        let limit = self.config.call_timeout;
        self.retry
            .run(operation, || with_timeout(operation, limit, op()))
            .await
    }

    pub async fn read_task(&self, task: &Task) -> Result<Task> {
        self.call("tracker.read_task", || self.tracker.read_task(&task.id))
            .await
    }

    /// Write `update` and move the local copy to what the tracker now holds.
    ///
    /// A status change is only written while this run still owns the task.
    /// Entering an in-flight status also stamps this run's claim token.
    pub async fn advance(
        &self,
        task: &mut Task,
        update: TaskUpdate,
        claim_token: &str,
    ) -> Result<PhaseResult> {
        let from = task.status;
        let to = update.status.unwrap_or(from);
        if to != from && !self.config.dry_run {
            let current = self.read_task(task).await?;
            if let Some(reason) = lost_ownership(&current, from, claim_token) {
                warn!(task_id = %task.id, from = %from, to = %to, reason = %reason, "Not advancing, releasing task");
                *task = current;
                return Ok(PhaseResult::Released { reason });
            }
        }
        let update = if to.is_in_flight() && to != from {
            update.replace(TaskField::ClaimToken, claim_token)
        } else {
            update
        };

        let record = self.writeback.commit(task, update).await?;
        self.refresh(task, &record).await?;
        Ok(PhaseResult::Advanced { from, to })
    }

    /// Write fields without a status change, keeping the local copy in step.
    pub async fn write(&self, task: &mut Task, update: TaskUpdate) -> Result<()> {
        let record = self.writeback.commit(task, update).await?;
        self.refresh(task, &record).await
    }

    async fn refresh(&self, task: &mut Task, record: &TransitionRecord) -> Result<()> {
        if self.config.dry_run {
            task.apply(&record.update, Utc::now())?;
        } else {
            *task = self.read_task(task).await?;
        }
        Ok(())
    }

    pub async fn block(&self, task: &mut Task, reason: &str) -> Result<PhaseResult> {
        let record = self
            .writeback
            .block(task, reason, &self.config.blocked_label)
            .await?;
        self.refresh(task, &record).await?;
        Ok(PhaseResult::Blocked {
            reason: reason.to_string(),
        })
    }

    /// Count a failed attempt toward `to`; block once the budget is spent.
    pub async fn fail_attempt(
        &self,
        task: &mut Task,
        to: TaskStatus,
        reason: &str,
    ) -> Result<PhaseResult> {
        self.writeback.record_failure(task, to, reason).await?;
        let failures = self
            .writeback
            .count_failures_in_status(&task.id, task.status, to)
            .await?;

        if failures >= self.config.retry_budget {
            let reason = format!(
                "{} -> {} failed {} times; last failure: {}",
                task.status, to, failures, reason
            );
            return self.block(task, &reason).await;
        }

        debug!(task_id = %task.id, to = %to, failures, budget = self.config.retry_budget, "Attempt deferred");
        Ok(PhaseResult::Deferred {
            status: task.status,
            reason: reason.to_string(),
        })
    }

    pub fn log_guard(&self, task: &Task, guard: &str, outcome: &GuardOutcome) {
        match outcome {
            GuardOutcome::Satisfied => {
                debug!(task_id = %task.id, status = %task.status, guard, "Guard satisfied")
            }
            other => info!(
                task_id = %task.id,
                status = %task.status,
                guard,
                outcome = %other,
                "Guard not satisfied"
            ),
        }
    }
}

fn lost_ownership(current: &Task, expected: TaskStatus, claim_token: &str) -> Option<String> {
    if current.status != expected {
        return Some(format!("task is now {}", current.status));
    }
    if expected.is_in_flight() && current.claim_token.as_deref() != Some(claim_token) {
        return Some("claim taken over by another run".to_string());
    }
    None
}

/// Let fatal errors abort the run; hand everything else to the guard.
pub fn surface_fatal<T>(result: Result<T>) -> Result<Result<T>> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        other => Ok(other),
    }
}

/// A guard that is pending or unavailable defers the task to the next cycle.
pub fn deferred(task: &Task, outcome: &GuardOutcome) -> PhaseResult {
    PhaseResult::Deferred {
        status: task.status,
        reason: outcome.reason().unwrap_or("deferred").to_string(),
    }
}
