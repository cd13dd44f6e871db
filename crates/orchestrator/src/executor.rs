use autopilot_core::{Task, TaskRef, TaskStatus};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::guards::{self, GuardOutcome};
use crate::services::executor_context::surface_fatal;
use crate::services::{
    CiPhase, DraftingPhase, ExecutorContext, ImplementationPhase, MergePhase, ReviewPhase,
    TestingPhase,
};
use crate::writeback::claim_update;

pub use crate::services::executor_context::ExecutorConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseResult {
    /// A transition committed; the run continues with the next phase.
    Advanced { from: TaskStatus, to: TaskStatus },
    /// A guard did not pass; the task is picked up again on a later cycle.
    Deferred { status: TaskStatus, reason: String },
    Blocked { reason: String },
    /// The task belongs to another run.
    Released { reason: String },
    Completed,
}

impl PhaseResult {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// Work handed to the executor by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Conditionally claim the task into `to`, then drive it.
    Claim { observed: TaskRef, to: TaskStatus },
    /// Poll a waiting task without claiming it.
    Poll { observed: TaskRef },
    /// Pick a deferred task up again under the claim its last run held.
    Resume {
        observed: TaskRef,
        claim_token: String,
    },
}

impl Dispatch {
    pub fn task_ref(&self) -> &TaskRef {
        match self {
            Self::Claim { observed, .. }
            | Self::Poll { observed }
            | Self::Resume { observed, .. } => observed,
        }
    }

    /// The token a run of this dispatch holds, when it is already known.
    pub fn claim_token(&self) -> Option<&str> {
        match self {
            Self::Resume { claim_token, .. } => Some(claim_token),
            _ => None,
        }
    }
}

pub struct TaskExecutor {
    ctx: ExecutorContext,
}

impl TaskExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.ctx
    }

    pub fn new_claim_token(&self) -> String {
        format!("{}:{}", self.ctx.config.agent_id, Uuid::new_v4())
    }

    /// Claim or poll one dispatched task and drive it as far as it will go.
    pub async fn start(&self, dispatch: Dispatch, cancel: &CancellationToken) -> Result<PhaseResult> {
        let token = match dispatch.claim_token() {
            Some(token) => token.to_string(),
            None => self.new_claim_token(),
        };
        self.drive(dispatch, &token, cancel).await
    }

    /// [`TaskExecutor::start`] under a caller-chosen claim token.
    pub async fn drive(
        &self,
        dispatch: Dispatch,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<PhaseResult> {
        let task = match dispatch {
            Dispatch::Claim { observed, to } => {
                let won = surface_fatal(self.ctx.writeback.claim(&observed, to, token).await)?;
                let outcome = guards::claimed(won.as_ref().map(|w| *w));
                let mut task = match outcome {
                    GuardOutcome::Satisfied => self.load(&observed).await?,
                    other => {
                        info!(task_id = %observed.id, outcome = %other, "Claim not acquired");
                        return Ok(PhaseResult::Released {
                            reason: other.reason().unwrap_or("claim failed").to_string(),
                        });
                    }
                };
                if self.ctx.config.dry_run {
                    task.apply(&claim_update(to, token), Utc::now())?;
                }
                task
            }
            Dispatch::Poll { observed } | Dispatch::Resume { observed, .. } => {
                let task = self.load(&observed).await?;
                if task.status != observed.status {
                    debug!(task_id = %task.id, status = %task.status, "Task moved since listing");
                    return Ok(PhaseResult::Released {
                        reason: format!("task is now {}", task.status),
                    });
                }
                task
            }
        };

        self.run_task(task, token, cancel).await
    }

    async fn load(&self, observed: &TaskRef) -> Result<Task> {
        self.ctx
            .call("tracker.read_task", || self.ctx.tracker.read_task(&observed.id))
            .await
    }

    /// Drive phases until one does not advance. Cancellation is honoured
    /// between phases only.
    pub async fn run_task(
        &self,
        mut task: Task,
        claim_token: &str,
        cancel: &CancellationToken,
    ) -> Result<PhaseResult> {
        info!(task_id = %task.id, status = %task.status, "Driving task");

        loop {
            if cancel.is_cancelled() {
                info!(task_id = %task.id, status = %task.status, "Run cancelled between phases");
                return Err(OrchestratorError::Cancelled);
            }

            if task.status.is_in_flight() && task.claim_token.as_deref() != Some(claim_token) {
                warn!(
                    task_id = %task.id,
                    status = %task.status,
                    "Claim no longer held, releasing task"
                );
                return Ok(PhaseResult::Released {
                    reason: "claim taken over by another run".to_string(),
                });
            }

            let result = self.execute_phase(&mut task, claim_token).await?;
            match result {
                // External signals are polled on the next cycle, not right away.
                PhaseResult::Advanced { from, to } if to.is_waiting() && from != to => {
                    info!(task_id = %task.id, from = %from, to = %to, "Task waiting on external signal");
                    return Ok(result);
                }
                PhaseResult::Advanced { from, to } => {
                    info!(task_id = %task.id, from = %from, to = %to, "Task advanced");
                }
                other => {
                    debug!(task_id = %task.id, status = %task.status, result = ?other, "Run stopped");
                    return Ok(other);
                }
            }
        }
    }

    /// Run the phase for the task's current status once.
    pub async fn execute_phase(&self, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        let ctx = &self.ctx;
        match task.status {
            TaskStatus::Pending => Ok(PhaseResult::Deferred {
                status: TaskStatus::Pending,
                reason: "task has not been claimed".to_string(),
            }),
            TaskStatus::Drafting => DraftingPhase::run(ctx, task, claim_token).await,
            TaskStatus::Implementing => ImplementationPhase::run(ctx, task, claim_token).await,
            TaskStatus::SelfReview => ReviewPhase::run(ctx, task, claim_token).await,
            TaskStatus::Testing => TestingPhase::run(ctx, task, claim_token).await,
            TaskStatus::AwaitingTestStatus => CiPhase::run(ctx, task, claim_token).await,
            TaskStatus::AwaitingHumanMerge => MergePhase::run(ctx, task, claim_token).await,
            TaskStatus::Completed => Ok(PhaseResult::Completed),
            TaskStatus::Blocked => Ok(PhaseResult::Blocked {
                reason: "task is blocked".to_string(),
            }),
        }
    }
}
