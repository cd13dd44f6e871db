mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use autopilot_core::{append_section, Task, TaskStatus, TaskUpdate, TransitionRecord};
use chrono::Utc;
use common::{FakeTestRunner, Harness};
use events::Event;
use orchestrator::{Scheduler, SchedulerConfig};
use tokio_util::sync::CancellationToken;

fn scheduler(h: &Harness, concurrency: usize) -> Scheduler {
    Scheduler::new(
        Arc::clone(&h.executor),
        SchedulerConfig {
            concurrency,
            poll_interval: Duration::from_millis(10),
            stale_after: Duration::from_secs(1800),
        },
    )
}

#[tokio::test]
async fn test_tick_drives_pending_tasks() {
    let h = Harness::new().await;
    h.tracker.insert(Task::new("a-1", "Search", "Find things")).await;
    h.tracker.insert(Task::new("b-2", "Export", "Download a CSV")).await;

    let summary = scheduler(&h, 2).tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.advanced, 2);
    assert_eq!(summary.failed, 0);
    for id in ["a-1", "b-2"] {
        assert_eq!(h.task(id).await.status, TaskStatus::AwaitingTestStatus);
    }
    assert_eq!(h.code_host.pr_count(), 2);
}

#[tokio::test]
async fn test_tick_respects_concurrency_limit() {
    let h = Harness::new().await;
    h.tracker.insert(Task::new("a-1", "Search", "")).await;
    h.tracker.insert(Task::new("b-2", "Export", "")).await;

    let summary = scheduler(&h, 1).tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.skipped, 1);
    let pending = [h.task("a-1").await, h.task("b-2").await]
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .count();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn test_stale_task_is_reclaimed() {
    let h = Harness::new().await;
    let mut stale = Task::new("s-1", "Profile", "Edit the profile")
        .with_status(TaskStatus::Implementing)
        .with_last_transition_at(Utc::now() - chrono::Duration::hours(2));
    stale.claim_token = Some("agent-gone:1".to_string());
    stale.spec = Some(append_section(None, "Spec", "# 功能概述\nEdit the profile"));
    h.tracker.insert(stale).await;

    let mut fresh = Task::new("f-1", "Avatar", "Upload").with_status(TaskStatus::Implementing);
    fresh.claim_token = Some("agent-busy:1".to_string());
    h.tracker.insert(fresh).await;

    let summary = scheduler(&h, 2).tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.dispatched, 1);
    let task = h.task("s-1").await;
    assert_eq!(task.status, TaskStatus::AwaitingTestStatus);
    assert!(task.claim_token.unwrap().starts_with("agent-test:"));

    let untouched = h.task("f-1").await;
    assert_eq!(untouched.status, TaskStatus::Implementing);
    assert_eq!(untouched.claim_token.as_deref(), Some("agent-busy:1"));
}

/// A task left in `Testing` by a run that is gone.
async fn abandoned_in_testing(h: &Harness, id: &str) {
    let mut task = Task::new(id, "Checkout", "Pay for the cart")
        .with_status(TaskStatus::Testing)
        .with_last_transition_at(Utc::now() - chrono::Duration::hours(2));
    task.claim_token = Some("agent-gone:1".to_string());
    h.tracker.insert(task).await;
}

#[tokio::test]
async fn test_reclaimed_failing_task_is_blocked_after_budget() {
    let h = Harness::with_tests(FakeTestRunner::failing()).await;
    abandoned_in_testing(&h, "c-1").await;
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        // A fresh scheduler per cycle knows the task only as stale.
        let scheduler = Scheduler::new(
            Arc::clone(&h.executor),
            SchedulerConfig {
                concurrency: 1,
                poll_interval: Duration::from_millis(10),
                stale_after: Duration::ZERO,
            },
        );
        let summary = scheduler.tick(&cancel).await.unwrap();
        assert_eq!(summary.dispatched, 1);
    }

    let task = h.task("c-1").await;
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(task.labels.contains("blocked"));
    assert!(task.notes.unwrap().contains("failed 3 times"));
    assert_eq!(h.tests.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_deferred_task_is_retried_next_cycle() {
    let h = Harness::with_tests(FakeTestRunner::failing()).await;
    h.tracker.insert(Task::new("a-1", "Search", "Find things")).await;
    let scheduler = Scheduler::new(Arc::clone(&h.executor), SchedulerConfig::default());
    let cancel = CancellationToken::new();

    let first = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(first.deferred, 1);
    assert_eq!(h.task("a-1").await.status, TaskStatus::Testing);

    let second = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(second.dispatched, 1);
    assert_eq!(second.deferred, 1);
    assert_eq!(h.tests.runs.load(Ordering::SeqCst), 2);

    let third = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(third.blocked, 1);
    assert_eq!(h.task("a-1").await.status, TaskStatus::Blocked);
    assert_eq!(h.tests.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_deferred_task_taken_over_is_released() {
    let h = Harness::with_tests(FakeTestRunner::failing()).await;
    h.tracker.insert(Task::new("a-1", "Search", "Find things")).await;
    let scheduler = Scheduler::new(Arc::clone(&h.executor), SchedulerConfig::default());
    let cancel = CancellationToken::new();
    scheduler.tick(&cancel).await.unwrap();

    let mut task = h.task("a-1").await;
    task.claim_token = Some("agent-other:2".to_string());
    h.tracker.insert(task).await;

    let summary = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(summary.released, 1);
    assert_eq!(h.tests.runs.load(Ordering::SeqCst), 1);

    // Given up: the next cycle leaves the task to its owner.
    let summary = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(summary.dispatched, 0);
}

#[tokio::test]
async fn test_tick_replays_abandoned_writeback() {
    let h = Harness::new().await;
    let task = Task::new("r-1", "Profile", "").with_status(TaskStatus::Drafting);
    h.tracker.insert(task.clone()).await;
    let record = TransitionRecord::begin(
        task.id.clone(),
        TaskStatus::Drafting,
        TaskStatus::Implementing,
        TaskUpdate::new().status(TaskStatus::Implementing),
    );
    h.transitions.create(&record).await.unwrap();

    let summary = scheduler(&h, 1).tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.recovered, 1);
    assert_eq!(h.task("r-1").await.status, TaskStatus::Implementing);
    assert!(h.transitions.find_uncommitted().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_waiting_tasks_are_polled_each_tick() {
    let h = Harness::new().await;
    h.tracker.insert(Task::new("a-1", "Search", "")).await;
    let scheduler = scheduler(&h, 2);
    let cancel = CancellationToken::new();

    scheduler.tick(&cancel).await.unwrap();
    let summary = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(summary.deferred, 1);

    h.code_host.set_ci(github::CiState::Success);
    scheduler.tick(&cancel).await.unwrap();
    assert_eq!(h.task("a-1").await.status, TaskStatus::AwaitingHumanMerge);

    h.code_host.merge();
    let summary = scheduler.tick(&cancel).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(h.task("a-1").await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_tick_emits_lifecycle_events() {
    let h = Harness::new().await;
    let mut rx = h.executor.context().event_bus().subscribe();
    h.tracker.insert(Task::new("a-1", "Search", "")).await;

    scheduler(&h, 1).tick(&CancellationToken::new()).await.unwrap();

    let mut claimed = false;
    let mut changes = 0;
    while let Ok(envelope) = rx.try_recv() {
        match envelope.event {
            Event::TaskClaimed { .. } => claimed = true,
            Event::TaskStatusChanged { .. } => changes += 1,
            _ => {}
        }
    }
    assert!(claimed);
    assert_eq!(changes, 4);
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let h = Harness::new().await;
    h.tracker.insert(Task::new("a-1", "Search", "")).await;
    let scheduler = scheduler(&h, 1);
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stopper.cancel();
    });

    tokio::time::timeout(Duration::from_secs(10), scheduler.run(cancel))
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
