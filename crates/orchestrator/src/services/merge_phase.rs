use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate};
use tracing::info;

use crate::error::Result;
use crate::executor::PhaseResult;
use crate::guards::{self, GuardOutcome};
use crate::services::executor_context::{deferred, surface_fatal};
use crate::services::ExecutorContext;

pub struct MergePhase;

impl MergePhase {
    pub async fn run(ctx: &ExecutorContext, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        let Some(link) = task.latest_pr_url().map(str::to_string) else {
            return ctx.block(task, "no pull request link recorded").await;
        };

        let merged = surface_fatal(
            ctx.call("code_host.is_merged", || ctx.code_host.is_merged(&link))
                .await,
        )?;
        let outcome = guards::merged(merged.as_ref().map(|m| *m));
        ctx.log_guard(task, "merged", &outcome);

        match outcome {
            GuardOutcome::Satisfied => {
                info!(task_id = %task.id, pr = %link, "Pull request merged");
                let doc = ctx.generator.user_doc(task, &link);
                let update = TaskUpdate::new()
                    .status(TaskStatus::Completed)
                    .append(TaskField::UserDoc, "User Doc", doc);
                ctx.advance(task, update, claim_token).await
            }
            other => Ok(deferred(task, &other)),
        }
    }
}
