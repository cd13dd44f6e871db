#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autopilot_core::{Task, TaskId, TaskStatus, TestReport, TransitionRecord};
use db::TransitionRepository;
use github::{branch_name, Changeset, CiState, CodeHost, GitHubError};
use orchestrator::{ExecutorConfig, ExecutorContext, TaskExecutor, TestRunner};
use tempfile::TempDir;
use tracker::MemoryTracker;

/// In-memory code host that counts every side effect.
pub struct FakeCodeHost {
    pub branches: Mutex<Vec<String>>,
    pub commits: AtomicUsize,
    pub prs: Mutex<HashMap<String, String>>,
    pub pr_opens: AtomicUsize,
    pub labels: Mutex<Vec<(String, String)>>,
    pub ci: Mutex<CiState>,
    pub merged: AtomicBool,
    pub ci_unreachable: AtomicBool,
}

impl Default for FakeCodeHost {
    fn default() -> Self {
        Self {
            branches: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
            prs: Mutex::new(HashMap::new()),
            pr_opens: AtomicUsize::new(0),
            labels: Mutex::new(Vec::new()),
            ci: Mutex::new(CiState::Pending),
            merged: AtomicBool::new(false),
            ci_unreachable: AtomicBool::new(false),
        }
    }
}

impl FakeCodeHost {
    pub fn set_ci(&self, state: CiState) {
        *self.ci.lock().unwrap() = state;
    }

    pub fn merge(&self) {
        self.merged.store(true, Ordering::SeqCst);
    }

    pub fn pr_count(&self) -> usize {
        self.prs.lock().unwrap().len()
    }

    pub fn labels(&self) -> Vec<(String, String)> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn create_branch(&self, task: &Task) -> github::Result<String> {
        let branch = branch_name("feature", task);
        let mut branches = self.branches.lock().unwrap();
        if !branches.contains(&branch) {
            branches.push(branch.clone());
        }
        Ok(branch)
    }

    async fn commit(&self, _branch: &str, changeset: &Changeset) -> github::Result<String> {
        assert!(!changeset.paths.is_empty());
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("sha{}", n))
    }

    async fn open_pr(&self, branch: &str, _title: &str, _body: &str) -> github::Result<String> {
        self.pr_opens.fetch_add(1, Ordering::SeqCst);
        let mut prs = self.prs.lock().unwrap();
        let next = prs.len() + 1;
        Ok(prs
            .entry(branch.to_string())
            .or_insert_with(|| format!("https://github.com/o/r/pull/{}", next))
            .clone())
    }

    async fn find_pr(&self, branch: &str) -> github::Result<Option<String>> {
        Ok(self.prs.lock().unwrap().get(branch).cloned())
    }

    async fn read_ci_status(&self, _pr_link: &str) -> github::Result<CiState> {
        if self.ci_unreachable.load(Ordering::SeqCst) {
            return Err(GitHubError::Network("connection reset".to_string()));
        }
        Ok(*self.ci.lock().unwrap())
    }

    async fn add_label(&self, pr_link: &str, label: &str) -> github::Result<()> {
        self.labels
            .lock()
            .unwrap()
            .push((pr_link.to_string(), label.to_string()));
        Ok(())
    }

    async fn is_merged(&self, _pr_link: &str) -> github::Result<bool> {
        Ok(self.merged.load(Ordering::SeqCst))
    }
}

pub struct FakeTestRunner {
    pub passed: AtomicBool,
    pub runs: AtomicUsize,
}

impl FakeTestRunner {
    pub fn passing() -> Self {
        Self {
            passed: AtomicBool::new(true),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            passed: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TestRunner for FakeTestRunner {
    async fn run(&self, _working_dir: &Path) -> orchestrator::Result<TestReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.passed.load(Ordering::SeqCst) {
            Ok(TestReport::passed("4 passed"))
        } else {
            Ok(TestReport::failed("1 failed", "assertion failed: left == right"))
        }
    }
}

pub struct Harness {
    pub repo: TempDir,
    pub tracker: Arc<MemoryTracker>,
    pub code_host: Arc<FakeCodeHost>,
    pub tests: Arc<FakeTestRunner>,
    pub transitions: TransitionRepository,
    pub executor: Arc<TaskExecutor>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(Arc::new(MemoryTracker::new()), FakeTestRunner::passing(), false).await
    }

    pub async fn with_tests(tests: FakeTestRunner) -> Self {
        Self::build(Arc::new(MemoryTracker::new()), tests, false).await
    }

    pub async fn sharing(tracker: Arc<MemoryTracker>) -> Self {
        Self::build(tracker, FakeTestRunner::passing(), false).await
    }

    pub async fn dry_run() -> Self {
        Self::build(Arc::new(MemoryTracker::new()), FakeTestRunner::passing(), true).await
    }

    async fn build(tracker: Arc<MemoryTracker>, tests: FakeTestRunner, dry_run: bool) -> Self {
        let repo = TempDir::new().unwrap();
        let code_host = Arc::new(FakeCodeHost::default());
        let tests = Arc::new(tests);
        let transitions = TransitionRepository::new(db::create_memory_pool().await.unwrap());

        let config = ExecutorConfig::new(repo.path())
            .with_dry_run(dry_run)
            .with_retry_budget(3)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .with_call_timeout(Duration::from_secs(5))
            .with_agent_id("agent-test");
        let ctx = ExecutorContext::new(
            config,
            tracker.clone(),
            code_host.clone(),
            transitions.clone(),
        )
        .with_test_runner(tests.clone());

        Self {
            repo,
            tracker,
            code_host,
            tests,
            transitions,
            executor: Arc::new(TaskExecutor::new(ctx)),
        }
    }

    pub async fn task(&self, id: &str) -> Task {
        self.tracker.get(&TaskId::new(id)).await.unwrap()
    }

    pub async fn history(&self, id: &str) -> Vec<TransitionRecord> {
        self.transitions.find_by_task(&TaskId::new(id)).await.unwrap()
    }

    /// Committed status changes, in order.
    pub async fn path(&self, id: &str) -> Vec<(TaskStatus, TaskStatus)> {
        self.history(id)
            .await
            .into_iter()
            .filter(|r| r.is_committed() && r.from_status != r.to_status)
            .map(|r| (r.from_status, r.to_status))
            .collect()
    }
}
