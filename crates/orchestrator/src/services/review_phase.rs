use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate};
use tracing::{info, warn};

use crate::error::Result;
use crate::executor::PhaseResult;
use crate::files::MockError;
use crate::guards::{self, GuardOutcome};
use crate::review::SelfReview;
use crate::services::executor_context::deferred;
use crate::services::ExecutorContext;

pub struct ReviewPhase;

impl ReviewPhase {
    pub async fn run(ctx: &ExecutorContext, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        let validated = ctx.mocks.validate(&task.id).await;
        if let Err(MockError::Io(e)) = &validated {
            if e.kind() != std::io::ErrorKind::NotFound {
                let outcome = GuardOutcome::Unavailable(e.to_string());
                ctx.log_guard(task, "review_passed", &outcome);
                return Ok(deferred(task, &outcome));
            }
        }

        let report = SelfReview::run(task, validated.as_ref());
        let outcome = guards::review_passed(&report.failures());
        ctx.log_guard(task, "review_passed", &outcome);

        match outcome {
            GuardOutcome::Satisfied => {
                info!(task_id = %task.id, "Self-review passed");
                let update = TaskUpdate::new()
                    .status(TaskStatus::Testing)
                    .append(TaskField::Notes, "Self Review", report.render());
                ctx.advance(task, update, claim_token).await
            }
            GuardOutcome::Failed(reason) => {
                let retries = ctx
                    .writeback
                    .count_retries(&task.id, TaskStatus::SelfReview)
                    .await?;
                if retries >= ctx.config.retry_budget {
                    let reason = format!(
                        "self-review failed after {} retries: {}",
                        retries, reason
                    );
                    return ctx.block(task, &reason).await;
                }

                warn!(task_id = %task.id, attempt = retries + 1, reason = %reason, "Self-review failed, returning to implementation");
                let update = TaskUpdate::new()
                    .status(TaskStatus::Implementing)
                    .append(
                        TaskField::Notes,
                        format!("Self Review Attempt {}", retries + 1),
                        report.render(),
                    );
                ctx.advance(task, update, claim_token).await
            }
            other => Ok(deferred(task, &other)),
        }
    }
}
