//! Writeback sequencing.
//!
//! Every tracker write goes through [`WritebackSequencer::commit`]: a
//! [`TransitionRecord`] is stored first, the update is delivered with retry
//! and a timeout, and only a confirmed write marks the record committed.
//! Records left uncommitted by a crash or cancellation are replayed by
//! [`WritebackSequencer::recover`].

use std::sync::Arc;
use std::time::Duration;

use autopilot_core::{Task, TaskField, TaskId, TaskRef, TaskStatus, TaskUpdate, TransitionRecord};
use db::TransitionRepository;
use events::{Event, EventBus};
use tracing::{debug, info, warn};
use tracker::TaskTracker;

use crate::error::{OrchestratorError, Result};
use crate::resources::TaskLeases;
use crate::retry::{with_timeout, RetryPolicy};
use crate::state_machine::TaskStateMachine;

enum Replay {
    Delivered,
    Superseded(TaskStatus),
}

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub replayed: usize,
    pub superseded: usize,
    pub deferred: usize,
}

#[derive(Clone)]
pub struct WritebackSequencer {
    tracker: Arc<dyn TaskTracker>,
    transitions: TransitionRepository,
    event_bus: EventBus,
    retry: RetryPolicy,
    call_timeout: Duration,
    dry_run: bool,
}

impl WritebackSequencer {
    pub fn new(tracker: Arc<dyn TaskTracker>, transitions: TransitionRepository) -> Self {
        Self {
            tracker,
            transitions,
            event_bus: EventBus::new(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(120),
            dry_run: false,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Suppress tracker writes and claims; records are still kept.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn transitions(&self) -> &TransitionRepository {
        &self.transitions
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Record, deliver and confirm one update for `task`.
    pub async fn commit(&self, task: &Task, update: TaskUpdate) -> Result<TransitionRecord> {
        let from = task.status;
        let to = update.status.unwrap_or(from);
        if to != from {
            TaskStateMachine::validate_transition(&from, &to)?;
        }
        update.validate()?;

        let record = TransitionRecord::begin(task.id.clone(), from, to, update);
        self.transitions.create(&record).await?;
        debug!(task_id = %task.id, record_id = %record.id, from = %from, to = %to, "Transition recorded");

        if self.dry_run {
            info!(
                task_id = %task.id,
                from = %from,
                to = %to,
                fields = record.update.fields.len(),
                "Dry run: skipping tracker write"
            );
        } else if let Err(e) = self.deliver(&record.task_id, &record.update).await {
            if e.is_transient() {
                warn!(task_id = %task.id, record_id = %record.id, error = %e, "Writeback left uncommitted");
            } else {
                self.transitions.mark_failed(record.id, &e.to_string()).await?;
            }
            return Err(e);
        }

        self.transitions.mark_committed(record.id).await?;
        info!(task_id = %task.id, from = %from, to = %to, "Writeback committed");
        self.emit_committed(&record);
        Ok(record)
    }

    /// Move `task` to `Blocked`, labelling it and noting why.
    pub async fn block(&self, task: &Task, reason: &str, label: &str) -> Result<TransitionRecord> {
        let update = TaskUpdate::new()
            .status(TaskStatus::Blocked)
            .label(label)
            .append(TaskField::Notes, "Blocked", reason);
        let record = self.commit(task, update).await?;

        warn!(task_id = %task.id, from = %task.status, reason, "Task blocked");
        self.event_bus.emit(Event::TaskBlocked {
            task_id: task.id.to_string(),
            reason: reason.to_string(),
        });
        Ok(record)
    }

    /// Conditionally claim a task observed in `observed.status`.
    ///
    /// `to` may equal the observed status when re-claiming a stale task.
    pub async fn claim(&self, observed: &TaskRef, to: TaskStatus, token: &str) -> Result<bool> {
        if to != observed.status {
            TaskStateMachine::validate_transition(&observed.status, &to)?;
        }

        if self.dry_run {
            info!(task_id = %observed.id, to = %to, "Dry run: claim assumed");
            return Ok(true);
        }

        let won = with_timeout(
            "tracker.claim",
            self.call_timeout,
            self.tracker.claim(observed, to, token),
        )
        .await?;

        if !won {
            info!(task_id = %observed.id, status = %observed.status, "Claim lost to another run");
            return Ok(false);
        }

        let record = TransitionRecord::begin(
            observed.id.clone(),
            observed.status,
            to,
            claim_update(to, token),
        );
        self.transitions.create(&record).await?;
        self.transitions.mark_committed(record.id).await?;

        info!(task_id = %observed.id, from = %observed.status, to = %to, "Task claimed");
        self.event_bus.emit(Event::TaskClaimed {
            task_id: observed.id.to_string(),
            status: to.to_string(),
        });
        Ok(true)
    }

    /// Log a phase attempt that failed toward `to` without a writeback.
    pub async fn record_failure(&self, task: &Task, to: TaskStatus, reason: &str) -> Result<()> {
        let record = TransitionRecord::failed(task.id.clone(), task.status, to, reason);
        self.transitions.create(&record).await?;
        warn!(task_id = %task.id, from = %task.status, to = %to, reason, "Phase attempt failed");
        Ok(())
    }

    pub async fn count_failures_in_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        to: TaskStatus,
    ) -> Result<u32> {
        Ok(self
            .transitions
            .count_failures_in_status(task_id, status, to)
            .await?)
    }

    pub async fn count_retries(&self, task_id: &TaskId, from: TaskStatus) -> Result<u32> {
        Ok(self.transitions.count_retries(task_id, from).await?)
    }

    /// Replay every uncommitted record whose task has not moved elsewhere since.
    ///
    /// Records of tasks leased in `leases` belong to a live run and are left
    /// alone.
    pub async fn recover(&self, leases: &TaskLeases) -> Result<RecoverySummary> {
        let mut summary = RecoverySummary::default();
        if self.dry_run {
            return Ok(summary);
        }

        for record in self.transitions.find_uncommitted().await? {
            if leases.is_held(&record.task_id) {
                debug!(task_id = %record.task_id, record_id = %record.id, "Record belongs to a live run");
                continue;
            }

            match self.replay(&record).await {
                Ok(Replay::Delivered) => {
                    self.transitions.mark_committed(record.id).await?;
                    info!(
                        task_id = %record.task_id,
                        from = %record.from_status,
                        to = %record.to_status,
                        "Replayed uncommitted transition"
                    );
                    self.emit_committed(&record);
                    summary.replayed += 1;
                }
                Ok(Replay::Superseded(status)) => {
                    info!(
                        task_id = %record.task_id,
                        record_id = %record.id,
                        status = %status,
                        "Uncommitted transition superseded"
                    );
                    self.transitions
                        .mark_failed(record.id, &format!("superseded: task is {}", status))
                        .await?;
                    summary.superseded += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(task_id = %record.task_id, record_id = %record.id, error = %e, "Replay failed");
                    summary.deferred += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Every attempt re-reads the task and writes only while it still sits
    /// on either end of the record.
    async fn replay(&self, record: &TransitionRecord) -> Result<Replay> {
        let id = &record.task_id;
        self.retry
            .run("tracker.replay", || async move {
                let task = with_timeout(
                    "tracker.read_task",
                    self.call_timeout,
                    self.tracker.read_task(id),
                )
                .await?;
                if task.status != record.from_status && task.status != record.to_status {
                    return Ok(Replay::Superseded(task.status));
                }
                with_timeout(
                    "tracker.write_fields",
                    self.call_timeout,
                    self.tracker.write_fields(id, &record.update),
                )
                .await?;
                Ok::<_, OrchestratorError>(Replay::Delivered)
            })
            .await
    }

    async fn deliver(&self, id: &TaskId, update: &TaskUpdate) -> Result<()> {
        self.retry
            .run("tracker.write_fields", || {
                with_timeout(
                    "tracker.write_fields",
                    self.call_timeout,
                    self.tracker.write_fields(id, update),
                )
            })
            .await
    }

    fn emit_committed(&self, record: &TransitionRecord) {
        let task_id = record.task_id.to_string();
        self.event_bus.emit(Event::WritebackCommitted {
            task_id: task_id.clone(),
            record_id: record.id,
        });

        if record.from_status != record.to_status {
            self.event_bus.emit(Event::TaskStatusChanged {
                task_id: task_id.clone(),
                from_status: record.from_status.to_string(),
                to_status: record.to_status.to_string(),
            });
        }
        if record.to_status == TaskStatus::Completed && record.from_status != TaskStatus::Completed
        {
            self.event_bus.emit(Event::TaskCompleted { task_id });
        }
    }
}

/// The fields a successful claim writes.
pub fn claim_update(to: TaskStatus, token: &str) -> TaskUpdate {
    TaskUpdate::new()
        .status(to)
        .replace(TaskField::ClaimToken, token)
}
