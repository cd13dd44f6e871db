use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate};
use tracing::info;

use crate::error::Result;
use crate::executor::PhaseResult;
use crate::guards::{self, GuardOutcome, SPEC_SECTION};
use crate::services::executor_context::{deferred, surface_fatal};
use crate::services::ExecutorContext;

pub struct DraftingPhase;

impl DraftingPhase {
    pub async fn run(ctx: &ExecutorContext, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        info!(task_id = %task.id, title = %task.title, "Drafting spec");

        let spec = ctx.generator.spec(task);
        ctx.write(task, TaskUpdate::new().append(TaskField::Spec, SPEC_SECTION, spec))
            .await?;

        let outcome = if ctx.config.dry_run {
            guards::spec_written(Ok(&*task))
        } else {
            let read_back = surface_fatal(ctx.read_task(task).await)?;
            guards::spec_written(read_back.as_ref())
        };
        ctx.log_guard(task, "spec_written", &outcome);

        match outcome {
            GuardOutcome::Satisfied => {
                ctx.advance(
                    task,
                    TaskUpdate::new().status(TaskStatus::Implementing),
                    claim_token,
                )
                .await
            }
            GuardOutcome::Failed(reason) => {
                ctx.fail_attempt(task, TaskStatus::Implementing, &reason).await
            }
            other => Ok(deferred(task, &other)),
        }
    }
}
