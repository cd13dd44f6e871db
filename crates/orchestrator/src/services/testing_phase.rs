use autopilot_core::{Task, TaskField, TaskStatus, TaskUpdate};
use tracing::info;

use crate::error::Result;
use crate::executor::PhaseResult;
use crate::guards::{self, GuardOutcome};
use crate::retry::with_timeout;
use crate::services::executor_context::{deferred, surface_fatal};
use crate::services::ExecutorContext;

pub struct TestingPhase;

impl TestingPhase {
    pub async fn run(ctx: &ExecutorContext, task: &mut Task, claim_token: &str) -> Result<PhaseResult> {
        let _workspace = ctx.workspace.lock().await;

        // Re-checks out the task branch; other tasks may have moved the tree.
        let branch = match surface_fatal(
            ctx.call("code_host.create_branch", || ctx.code_host.create_branch(&*task))
                .await,
        )? {
            Ok(branch) => branch,
            Err(e) => return Ok(deferred(task, &GuardOutcome::Unavailable(e.to_string()))),
        };

        info!(task_id = %task.id, branch = %branch, "Running tests");
        let report = surface_fatal(
            with_timeout(
                "test_runner.run",
                ctx.config.test_timeout,
                ctx.test_runner.run(&ctx.config.repo_path),
            )
            .await,
        )?;
        let outcome = guards::tests_passed(report.as_ref());
        ctx.log_guard(task, "tests_passed", &outcome);

        let report = match (outcome, report) {
            (GuardOutcome::Satisfied, Ok(report)) => report,
            (GuardOutcome::Failed(reason), _) => {
                return ctx
                    .fail_attempt(task, TaskStatus::AwaitingTestStatus, &reason)
                    .await;
            }
            (other, _) => return Ok(deferred(task, &other)),
        };

        let mock_path = task.mock_path.clone().unwrap_or_default();
        let body = ctx.generator.pr_body(task, &mock_path, &report);
        let title = task.title.trim().to_string();
        let opened = surface_fatal(
            ctx.call("code_host.open_pr", || {
                ctx.code_host.open_pr(&branch, &title, &body)
            })
            .await,
        )?;
        let link = match opened {
            Ok(link) => link,
            Err(e) => return Ok(deferred(task, &GuardOutcome::Unavailable(e.to_string()))),
        };

        let found = surface_fatal(
            ctx.call("code_host.find_pr", || ctx.code_host.find_pr(&branch))
                .await,
        )?;
        let outcome = guards::pr_open(found.as_ref().map(|f| f.as_deref()));
        ctx.log_guard(task, "pr_open", &outcome);
        if !outcome.is_satisfied() {
            return Ok(deferred(task, &outcome));
        }

        info!(task_id = %task.id, pr = %link, "Pull request open");
        let update = TaskUpdate::new()
            .status(TaskStatus::AwaitingTestStatus)
            .append(TaskField::PrLink, "PR", &link)
            .append(TaskField::TestReport, "Test Report", report.render());
        ctx.advance(task, update, claim_token).await
    }
}
