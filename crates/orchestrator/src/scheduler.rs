//! Scheduling loop.
//!
//! Each cycle replays uncommitted writebacks, then dispatches:
//! - `Pending` tasks, claimed into `Drafting`;
//! - in-flight tasks this scheduler deferred, resumed under the claim their
//!   last run held;
//! - other in-flight tasks whose last transition is older than the staleness
//!   threshold, re-claimed on their current status;
//! - tasks waiting on CI or a human merge, polled without a claim.
//!
//! Dispatched runs share a semaphore sized to the concurrency limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autopilot_core::{TaskId, TaskStatus};
use chrono::Utc;
use events::Event;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::executor::{Dispatch, PhaseResult, TaskExecutor};
use crate::resources::TaskLeases;

const IN_FLIGHT: [TaskStatus; 4] = [
    TaskStatus::Drafting,
    TaskStatus::Implementing,
    TaskStatus::SelfReview,
    TaskStatus::Testing,
];

const WAITING: [TaskStatus; 2] = [TaskStatus::AwaitingTestStatus, TaskStatus::AwaitingHumanMerge];

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(1800),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub recovered: usize,
    pub dispatched: usize,
    /// Left for a later cycle: no free worker, or already being driven here.
    pub skipped: usize,
    pub advanced: usize,
    pub deferred: usize,
    pub blocked: usize,
    pub released: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TickSummary {
    fn record(&mut self, result: &PhaseResult) {
        match result {
            PhaseResult::Advanced { .. } => self.advanced += 1,
            PhaseResult::Deferred { .. } => self.deferred += 1,
            PhaseResult::Blocked { .. } => self.blocked += 1,
            PhaseResult::Released { .. } => self.released += 1,
            PhaseResult::Completed => self.completed += 1,
        }
    }
}

type RunOutput = (TaskId, String, Result<PhaseResult>);

pub struct Scheduler {
    executor: Arc<TaskExecutor>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
    leases: TaskLeases,
    /// Claim tokens of runs that stopped short while still owning the task.
    resumable: Mutex<HashMap<TaskId, String>>,
}

impl Scheduler {
    pub fn new(executor: Arc<TaskExecutor>, config: SchedulerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            executor,
            config,
            semaphore,
            leases: TaskLeases::new(),
            resumable: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// One full cycle: dispatch, then wait for every dispatched run.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickSummary> {
        let mut join_set = JoinSet::new();
        let mut summary = self.dispatch(&mut join_set, cancel).await?;

        while let Some(joined) = join_set.join_next().await {
            self.settle(joined, &mut summary)?;
        }

        info!(?summary, "Scheduling cycle finished");
        Ok(summary)
    }

    /// Poll on the configured interval until cancelled or a fatal error.
    ///
    /// Runs outlive the cycle that started them; a task still being driven is
    /// skipped by later cycles.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut join_set: JoinSet<RunOutput> = JoinSet::new();
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut summary = TickSummary::default();

        info!(
            concurrency = self.config.concurrency,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Scheduler started"
        );

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, waiting for in-flight phases");
                    break Ok(());
                }
                _ = interval.tick() => {
                    match self.dispatch(&mut join_set, &cancel).await {
                        Ok(dispatched) => debug!(?dispatched, "Cycle dispatched"),
                        Err(e) => break Err(e),
                    }
                }
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    if let Err(e) = self.settle(joined, &mut summary) {
                        break Err(e);
                    }
                }
            }
        };

        if result.is_err() {
            cancel.cancel();
        }
        while let Some(joined) = join_set.join_next().await {
            let _ = self.settle(joined, &mut summary);
        }
        info!(?summary, "Scheduler stopped");
        result
    }

    async fn dispatch(
        &self,
        join_set: &mut JoinSet<RunOutput>,
        cancel: &CancellationToken,
    ) -> Result<TickSummary> {
        let mut summary = TickSummary::default();

        match self.executor.context().writeback.recover(&self.leases).await {
            Ok(recovery) => {
                summary.recovered = recovery.replayed;
                if recovery != Default::default() {
                    info!(?recovery, "Recovered uncommitted writebacks");
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "Recovery failed; retrying next cycle"),
        }

        for dispatch in self.candidates().await? {
            let task_id = dispatch.task_ref().id.clone();
            let Some(lease) = self.leases.try_acquire(&task_id) else {
                debug!(task_id = %task_id, "Task already being driven");
                summary.skipped += 1;
                continue;
            };
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!(task_id = %task_id, "No free worker");
                lease.release();
                summary.skipped += 1;
                continue;
            };

            let executor = Arc::clone(&self.executor);
            let cancel = cancel.child_token();
            let token = match dispatch.claim_token() {
                Some(token) => token.to_string(),
                None => executor.new_claim_token(),
            };
            summary.dispatched += 1;
            join_set.spawn(async move {
                let _permit = permit;
                let result = executor.drive(dispatch, &token, &cancel).await;
                if result.is_ok() {
                    lease.release();
                }
                (task_id, token, result)
            });
        }

        Ok(summary)
    }

    async fn candidates(&self) -> Result<Vec<Dispatch>> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| OrchestratorError::FatalConfig(format!("stale_after: {}", e)))?;
        let mut out = Vec::new();

        for observed in self.list(TaskStatus::Pending).await? {
            out.push(Dispatch::Claim {
                observed,
                to: TaskStatus::Drafting,
            });
        }

        for status in IN_FLIGHT {
            for observed in self.list(status).await? {
                if let Some(claim_token) = self.resumable_token(&observed.id) {
                    debug!(task_id = %observed.id, status = %status, "Resuming deferred task");
                    out.push(Dispatch::Resume {
                        observed,
                        claim_token,
                    });
                } else if now.signed_duration_since(observed.last_transition_at) > stale_after {
                    info!(task_id = %observed.id, status = %status, "Re-claiming stale task");
                    out.push(Dispatch::Claim {
                        observed,
                        to: status,
                    });
                }
            }
        }

        for status in WAITING {
            for observed in self.list(status).await? {
                out.push(Dispatch::Poll { observed });
            }
        }

        Ok(out)
    }

    fn resumable_token(&self, task_id: &TaskId) -> Option<String> {
        self.resumable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
    }

    /// Runs deferred in flight, or cut short by a transient error, still own
    /// their task and resume next cycle; any other outcome gives it up.
    fn remember(&self, task_id: &TaskId, token: String, resume: bool) {
        let mut resumable = self.resumable.lock().unwrap_or_else(|e| e.into_inner());
        if resume {
            resumable.insert(task_id.clone(), token);
        } else {
            resumable.remove(task_id);
        }
    }

    /// A failed listing skips that status for this cycle unless it is fatal.
    async fn list(&self, status: TaskStatus) -> Result<Vec<autopilot_core::TaskRef>> {
        let ctx = self.executor.context();
        match ctx
            .call("tracker.list_tasks", || ctx.tracker.list_tasks(status))
            .await
        {
            Ok(refs) => Ok(refs),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(status = %status, error = %e, "Listing failed");
                Ok(Vec::new())
            }
        }
    }

    fn settle(
        &self,
        joined: std::result::Result<RunOutput, JoinError>,
        summary: &mut TickSummary,
    ) -> Result<()> {
        let (task_id, token, result) = match joined {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Task run panicked or was aborted");
                summary.failed += 1;
                return Ok(());
            }
        };

        let resume = match &result {
            Ok(PhaseResult::Deferred { status, .. }) => status.is_in_flight(),
            Err(e) => e.is_transient(),
            Ok(_) => false,
        };
        self.remember(&task_id, token, resume);

        match result {
            Ok(result) => {
                debug!(task_id = %task_id, ?result, "Task run finished");
                summary.record(&result);
                Ok(())
            }
            Err(OrchestratorError::Cancelled) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(task_id = %task_id, error = %e, "Fatal error, stopping");
                Err(e)
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task run failed; retrying next cycle");
                self.executor.context().event_bus().emit(Event::Error {
                    message: e.to_string(),
                    context: Some(task_id.to_string()),
                });
                summary.failed += 1;
                Ok(())
            }
        }
    }
}
