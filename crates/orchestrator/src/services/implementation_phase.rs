use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate};
use github::Changeset;
use tracing::info;

use crate::error::Result;
use crate::executor::PhaseResult;
use crate::guards::{self, GuardOutcome};
use crate::services::executor_context::{deferred, surface_fatal};
use crate::services::ExecutorContext;

pub struct ImplementationPhase;

impl ImplementationPhase {
    pub async fn run(ctx: &ExecutorContext, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        let _workspace = ctx.workspace.lock().await;

        let branch = match surface_fatal(
            ctx.call("code_host.create_branch", || ctx.code_host.create_branch(&*task))
                .await,
        )? {
            Ok(branch) => branch,
            Err(e) => {
                return Ok(deferred(task, &GuardOutcome::Unavailable(e.to_string())));
            }
        };
        info!(task_id = %task.id, branch = %branch, "Implementing on branch");

        let generator = ctx.generator.clone();
        let (mock_path, created) = ctx.mocks.ensure(task, |t| generator.mock(t)).await?;
        if created {
            info!(task_id = %task.id, path = ?mock_path, "Generated mock");
        }

        let validated = ctx.mocks.validate(&task.id).await;
        let outcome = guards::mock_valid(task, validated.as_ref());
        ctx.log_guard(task, "mock_valid", &outcome);
        match outcome {
            GuardOutcome::Satisfied => {}
            GuardOutcome::Failed(reason) => {
                return ctx
                    .fail_attempt(task, TaskStatus::SelfReview, &reason)
                    .await;
            }
            other => return Ok(deferred(task, &other)),
        }

        let mock_path = mock_path.to_string_lossy().into_owned();
        let changeset = Changeset::new(format!("Add mock for {}", task.title.trim()))
            .with_path(&mock_path);
        let sha = surface_fatal(
            ctx.call("code_host.commit", || ctx.code_host.commit(&branch, &changeset))
                .await,
        )?;
        let outcome = guards::commit_exists(sha.as_deref());
        ctx.log_guard(task, "commit_exists", &outcome);

        match (outcome, sha) {
            (GuardOutcome::Satisfied, Ok(sha)) => {
                let update = TaskUpdate::new()
                    .status(TaskStatus::SelfReview)
                    .replace(TaskField::Branch, branch)
                    .replace(TaskField::MockPath, mock_path)
                    .replace(TaskField::CommitSha, sha);
                ctx.advance(task, update, claim_token).await
            }
            (GuardOutcome::Failed(reason), _) => {
                ctx.fail_attempt(task, TaskStatus::SelfReview, &reason).await
            }
            (other, _) => Ok(deferred(task, &other)),
        }
    }
}
