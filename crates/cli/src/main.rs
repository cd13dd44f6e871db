mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use autopilot_core::TaskStatus;
use clap::{Parser, Subcommand};
use db::TransitionRepository;
use events::EventBus;
use github::{CodeHost, GitHubClient, GitHubCodeHost};
use orchestrator::{
    CommandTestRunner, DryRunCodeHost, ExecutorContext, OrchestratorError, Scheduler,
    TaskExecutor,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker::{NotionTracker, TaskTracker};
use vcs::GitVcs;

use crate::config::{AutopilotConfig, Credentials, Overrides, AUTOPILOT_DIR, CONFIG_FILE, DB_FILE};

const DEFAULT_FILTER: &str = "autopilot=info,orchestrator=info,tracker=info,github=info,vcs=info,db=info";
const VERBOSE_FILTER: &str =
    "autopilot=debug,orchestrator=debug,tracker=debug,github=debug,vcs=debug,db=debug";

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(about = "Drive tracker tasks from spec to merged pull request", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repository the agent works in.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read from the tracker but write nothing outside the repository.
    #[arg(
        long,
        global = true,
        env = "DRY_RUN",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    dry_run: bool,

    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[arg(long, global = true, env = "BRANCH_PREFIX")]
    branch_prefix: Option<String>,

    #[arg(long, global = true, env = "NOTION_TOKEN", hide_env_values = true)]
    notion_token: Option<String>,

    #[arg(long, global = true, env = "NOTION_DATABASE_ID")]
    notion_database_id: Option<String>,

    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// `owner/repo`
    #[arg(long, global = true, env = "GITHUB_REPO")]
    github_repo: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the transition database.
    Init,
    /// Poll and drive tasks until Ctrl-C.
    Run,
    /// Run a single scheduling cycle.
    Once,
    /// Show tasks per status and unfinished writebacks.
    Status,
    /// Check a mock file against the mock schema.
    ValidateMock { path: PathBuf },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            dry_run: self.dry_run,
            concurrency: self.concurrency,
            branch_prefix: self.branch_prefix.clone(),
            database_id: self.notion_database_id.clone(),
            github_repo: self.github_repo.clone(),
        }
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            notion_token: self.notion_token.clone(),
            github_token: self.github_token.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Absent .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            match e.downcast_ref::<OrchestratorError>() {
                Some(inner) if inner.is_fatal() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let repo_root = cli.repo.clone();
    match &cli.command {
        Commands::Init => init(&repo_root).await.map(|_| ExitCode::SUCCESS),
        Commands::ValidateMock { path } => Ok(validate_mock(path).await),
        Commands::Run | Commands::Once | Commands::Status => {
            let config = AutopilotConfig::load(&repo_root).await?.apply(cli.overrides());
            let credentials = cli.credentials();
            match &cli.command {
                Commands::Run => serve(&repo_root, &config, &credentials).await?,
                Commands::Once => once(&repo_root, &config, &credentials).await?,
                _ => status(&repo_root, &config, &credentials).await?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn init(repo_root: &Path) -> Result<()> {
    let config_path = AutopilotConfig::path(repo_root);
    if config_path.exists() {
        println!("Already initialized at {}", config_path.display());
        return Ok(());
    }

    AutopilotConfig::default().write(repo_root).await?;
    open_transitions(repo_root).await?;

    let mocks_dir = repo_root.join(AutopilotConfig::default().agent.mocks_dir);
    tokio::fs::create_dir_all(&mocks_dir).await?;

    println!("Initialized autopilot in {}", repo_root.display());
    println!();
    println!("Created:");
    println!("  {}/", AUTOPILOT_DIR);
    println!("  ├── {}", CONFIG_FILE);
    println!("  └── {}", DB_FILE);
    println!("  {}/", mocks_dir.display());
    println!();
    println!("Set NOTION_TOKEN, NOTION_DATABASE_ID, GITHUB_TOKEN and GITHUB_REPO, then run 'autopilot run'.");
    Ok(())
}

async fn serve(repo_root: &Path, config: &AutopilotConfig, credentials: &Credentials) -> Result<()> {
    let bus = EventBus::new();
    let executor = build_executor(repo_root, config, credentials, bus.clone()).await?;
    let scheduler = Scheduler::new(executor, config.scheduler_config());
    let logger = spawn_event_logger(&bus);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current phases");
            on_signal.cancel();
        }
    });

    if config.agent.dry_run {
        info!("Dry run: no tracker writes, no pushes, no pull requests");
    }
    let result = scheduler.run(cancel).await;
    drain_events(scheduler, bus, logger).await;
    result.map_err(Into::into)
}

async fn once(repo_root: &Path, config: &AutopilotConfig, credentials: &Credentials) -> Result<()> {
    let bus = EventBus::new();
    let executor = build_executor(repo_root, config, credentials, bus.clone()).await?;
    let scheduler = Scheduler::new(executor, config.scheduler_config());
    let logger = spawn_event_logger(&bus);

    let summary = scheduler.tick(&CancellationToken::new()).await;
    drain_events(scheduler, bus, logger).await;
    let summary = summary?;

    println!(
        "dispatched {} | advanced {} | deferred {} | blocked {} | completed {} | released {} | failed {} | skipped {}",
        summary.dispatched,
        summary.advanced,
        summary.deferred,
        summary.blocked,
        summary.completed,
        summary.released,
        summary.failed,
        summary.skipped,
    );
    Ok(())
}

async fn status(repo_root: &Path, config: &AutopilotConfig, credentials: &Credentials) -> Result<()> {
    let tracker = build_tracker(config, credentials)?;

    println!();
    println!("Tracker: {}", tracker.name());
    println!("Repo:    {}", repo_root.display());
    println!();

    for status in TaskStatus::LIFECYCLE
        .iter()
        .chain(std::iter::once(&TaskStatus::Blocked))
    {
        let tasks = tracker
            .list_tasks(*status)
            .await
            .with_context(|| format!("Failed to list {} tasks", status))?;
        if tasks.is_empty() {
            continue;
        }
        println!("{} ({}):", status, tasks.len());
        for task in &tasks {
            println!("  {}  last transition {}", task.id, task.last_transition_at.to_rfc3339());
        }
    }

    let db_path = AutopilotConfig::db_path(repo_root);
    if !db_path.exists() {
        println!();
        println!("No transition database yet. Run 'autopilot init'.");
        return Ok(());
    }

    let transitions = open_transitions(repo_root).await?;
    let pending = transitions.find_uncommitted().await?;
    println!();
    if pending.is_empty() {
        println!("No unfinished writebacks.");
    } else {
        println!("Unfinished writebacks ({}):", pending.len());
        for record in &pending {
            println!(
                "  {}  {} -> {}  attempted {}",
                record.task_id,
                record.from_status,
                record.to_status,
                record.attempted_at.to_rfc3339()
            );
        }
    }
    Ok(())
}

async fn validate_mock(path: &Path) -> ExitCode {
    match orchestrator::validate_mock(path).await {
        Ok(mock) => {
            println!(
                "{}: valid mock for task {} ({} case(s))",
                path.display(),
                mock.task_id,
                mock.cases.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn build_tracker(config: &AutopilotConfig, credentials: &Credentials) -> Result<Arc<dyn TaskTracker>> {
    let (token, database_id) = config.notion(credentials)?;
    let mut tracker =
        NotionTracker::new(token, database_id).with_schema(config.tracker.properties.clone());
    if let Some(base_url) = &config.tracker.base_url {
        tracker = tracker.with_base_url(base_url.clone());
    }
    Ok(Arc::new(tracker))
}

fn build_code_host(
    repo_root: &Path,
    config: &AutopilotConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn CodeHost>> {
    let agent = &config.agent;
    if agent.dry_run {
        return Ok(Arc::new(DryRunCodeHost::new(agent.branch_prefix.clone())));
    }

    let (token, repo) = config.github(credentials)?;
    let client = GitHubClient::new(&token, repo)
        .map_err(|e| OrchestratorError::FatalConfig(format!("GitHub client: {}", e)))?;
    let vcs = GitVcs::new(repo_root.to_path_buf())
        .with_main_branch(agent.base_branch.clone())
        .with_remote(config.github.remote.clone());

    Ok(Arc::new(
        GitHubCodeHost::new(client, Arc::new(vcs))
            .with_branch_prefix(agent.branch_prefix.clone())
            .with_base_branch(agent.base_branch.clone()),
    ))
}

async fn build_executor(
    repo_root: &Path,
    config: &AutopilotConfig,
    credentials: &Credentials,
    bus: EventBus,
) -> Result<Arc<TaskExecutor>> {
    // Credentials are checked before anything touches a task.
    let tracker = build_tracker(config, credentials)?;
    let code_host = build_code_host(repo_root, config, credentials)?;

    let transitions = if config.agent.dry_run {
        let pool = db::create_memory_pool()
            .await
            .context("Failed to create in-memory transition log")?;
        TransitionRepository::new(pool)
    } else {
        open_transitions(repo_root).await?
    };

    let ctx = ExecutorContext::new(
        config.executor_config(repo_root),
        tracker,
        code_host,
        transitions,
    )
    .with_test_runner(Arc::new(CommandTestRunner::new(config.agent.test_command.clone())))
    .with_mocks_dir(config.agent.mocks_dir.clone())
    .with_event_bus(bus);

    Ok(Arc::new(TaskExecutor::new(ctx)))
}

async fn open_transitions(repo_root: &Path) -> Result<TransitionRepository> {
    let db_path = AutopilotConfig::db_path(repo_root);
    if let Some(dir) = db_path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let database_url = format!("sqlite:{}", db_path.display());
    debug!(database = %db_path.display(), "Opening transition log");
    let pool = db::create_pool(&database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(TransitionRepository::new(pool))
}

fn spawn_event_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => info!(
                    kind = envelope.event.kind(),
                    event = ?envelope.event,
                    "Event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Drop every sender so the logger sees the channel close after the last event.
async fn drain_events(scheduler: Scheduler, bus: EventBus, logger: tokio::task::JoinHandle<()>) {
    drop(scheduler);
    drop(bus);
    let _ = logger.await;
}

fn init_tracing(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}
