use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate};
use tracing::{info, warn};

use crate::error::Result;
use crate::executor::PhaseResult;
use crate::guards::{self, GuardOutcome};
use crate::services::executor_context::{deferred, surface_fatal};
use crate::services::ExecutorContext;

pub struct CiPhase;

impl CiPhase {
    pub async fn run(ctx: &ExecutorContext, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        let Some(link) = task.latest_pr_url().map(str::to_string) else {
            return ctx.block(task, "no pull request link recorded").await;
        };

        let status = surface_fatal(
            ctx.call("code_host.read_ci_status", || {
                ctx.code_host.read_ci_status(&link)
            })
            .await,
        )?;
        let outcome = guards::ci_green(status.as_ref().map(|s| *s));
        ctx.log_guard(task, "ci_green", &outcome);

        match outcome {
            GuardOutcome::Satisfied => {
                info!(task_id = %task.id, pr = %link, "CI passed");
                ctx.advance(
                    task,
                    TaskUpdate::new().status(TaskStatus::AwaitingHumanMerge),
                    claim_token,
                )
                .await
            }
            GuardOutcome::Failed(reason) => {
                let retries = ctx
                    .writeback
                    .count_retries(&task.id, TaskStatus::AwaitingTestStatus)
                    .await?;
                if retries >= ctx.config.retry_budget {
                    let reason = format!("CI failed after {} fix attempts: {}", retries, reason);
                    return ctx.block(task, &reason).await;
                }

                let label = ctx.config.needs_fix_label.as_str();
                let labelled = surface_fatal(
                    ctx.call("code_host.add_label", || ctx.code_host.add_label(&link, label))
                        .await,
                )?;
                if let Err(e) = labelled {
                    return Ok(deferred(task, &GuardOutcome::Unavailable(e.to_string())));
                }

                warn!(task_id = %task.id, pr = %link, attempt = retries + 1, "CI failed, returning to implementation");
                let update = TaskUpdate::new()
                    .status(TaskStatus::Implementing)
                    .label(label)
                    .append(
                        TaskField::Notes,
                        format!("CI Failure {}", retries + 1),
                        format!("{}\n{}", reason, link),
                    );
                ctx.advance(task, update, claim_token).await
            }
            other => Ok(deferred(task, &other)),
        }
    }
}
