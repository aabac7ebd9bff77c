//! swarm-coord
//!
//! Command-line front end over the shared task queue, agent registry and
//! safety log. Every invocation is one short-lived process; concurrent
//! invocations coordinate through the document locks.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::io::BufReader;
use std::process::ExitCode;
use std::time::Duration;
use swarm_coord::cli::agents::AgentsCommand;
use swarm_coord::cli::safety::{SafetyCommand, replay};
use swarm_coord::cli::tasks::TasksCommand;
use swarm_coord::cli::{Cli, Command, FormatArg, ReapArgs};
use swarm_coord::config::{Config, ConfigLoader};
use swarm_coord::error::{CoordError, ErrorReport};
use swarm_coord::format::{
    OutputFormat, format_agents_markdown, format_task_markdown, format_tasks_markdown, to_json,
};
use swarm_coord::logging::{LogTarget, init_logging};
use swarm_coord::reconcile::reap_orphaned_claims;
use swarm_coord::registry::AgentRegistry;
use swarm_coord::safety::{SafetyLog, SafetyMonitor};
use swarm_coord::store::DocumentStore;
use swarm_coord::tasks::TaskStore;
use swarm_coord::types::Task;
use tracing::{debug, error, info, warn};

/// Exit status for a lost race: the caller should pick other work or retry.
const EXIT_LOST_RACE: u8 = 2;

/// Everything a subcommand needs, built once from the merged config.
struct Context {
    config: Config,
    docs: DocumentStore,
    format: OutputFormat,
}

impl Context {
    fn new(config: Config, format: OutputFormat) -> Self {
        let docs = DocumentStore::from_config(&config.store);
        Self {
            config,
            docs,
            format,
        }
    }

    fn tasks(&self) -> TaskStore {
        TaskStore::new(self.docs.clone(), self.config.store.tasks_path())
    }

    fn registry(&self) -> AgentRegistry {
        AgentRegistry::new(self.docs.clone(), self.config.store.registry_path())
    }

    fn safety_log(&self) -> SafetyLog {
        SafetyLog::new(self.docs.clone(), self.config.store.safety_log_path())
            .with_cap(self.config.safety.log_cap)
    }

    /// Print `value` as JSON, or as markdown when a renderer is given.
    fn emit<T: Serialize + ?Sized>(&self, value: &T, markdown: Option<String>) {
        match (self.format, markdown) {
            (OutputFormat::Markdown, Some(md)) => print!("{md}"),
            _ => println!("{}", to_json(value)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&LogTarget::parse(&cli.log), cli.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(e),
    }
}

async fn run(cli: Cli) -> Result<()> {
    // If explicit config path given, set it as env var for ConfigLoader to pick up
    // SAFETY: set once at startup before any other threads touch the environment
    if let Some(config_path) = &cli.config {
        unsafe {
            std::env::set_var("SWARM_CONFIG_PATH", config_path);
        }
    }
    let mut loader = ConfigLoader::load()?;
    if let Some((tier, path)) = loader.source() {
        debug!(?tier, path = %path.display(), "Loaded configuration");
    }

    let config = loader.config_mut();
    if let Some(state_dir) = &cli.state_dir {
        config.store.state_dir = state_dir.clone();
    }

    let format = match cli.format {
        FormatArg::Json => OutputFormat::Json,
        FormatArg::Markdown => OutputFormat::Markdown,
    };
    let ctx = Context::new(loader.into_config(), format);

    match cli.command {
        Command::Tasks(cmd) => run_tasks(&ctx, cmd),
        Command::Agents(cmd) => run_agents(&ctx, cmd),
        Command::Reap(args) => run_reap(&ctx, args).await,
        Command::Safety(cmd) => run_safety(&ctx, cmd),
    }
}

/// Print a structured report for coordination errors and pick the exit code.
fn report_error(err: anyhow::Error) -> ExitCode {
    match err.downcast_ref::<CoordError>() {
        Some(coord) => {
            let report = ErrorReport::from(coord);
            println!("{}", to_json(&report));
            if coord.is_lost_race() {
                info!(code = ?report.code, "{}", report.message);
                ExitCode::from(EXIT_LOST_RACE)
            } else {
                error!(code = ?report.code, "{}", report.message);
                ExitCode::FAILURE
            }
        }
        None => {
            error!(error = %format!("{err:#}"), "Command failed");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_tasks(ctx: &Context, cmd: TasksCommand) -> Result<()> {
    let store = ctx.tasks();
    let markdown = ctx.format == OutputFormat::Markdown;
    let show = |task: Task| ctx.emit(&task, markdown.then(|| format_task_markdown(&task)));

    match cmd {
        TasksCommand::List(args) => {
            let tasks = store.list(&args.to_filter())?;
            ctx.emit(&tasks, markdown.then(|| format_tasks_markdown(&tasks)));
        }
        TasksCommand::Children { id } => {
            let tasks = store.get_subtasks(&id)?;
            ctx.emit(&tasks, markdown.then(|| format_tasks_markdown(&tasks)));
        }
        TasksCommand::Parent { id } => {
            let parent = store.get_parent(&id)?;
            let md = parent.as_ref().map(format_task_markdown);
            ctx.emit(&parent, md.filter(|_| markdown));
        }
        TasksCommand::Check => {
            let problems = store.check()?;
            if !problems.is_empty() {
                return Err(CoordError::BrokenLinks(problems).into());
            }
            ctx.emit(&problems, markdown.then(|| "No link problems.\n".to_string()));
        }
        TasksCommand::Get { id } => show(store.get(&id)?),
        TasksCommand::Add(args) => show(store.add(args.into())?),
        TasksCommand::Claim { id, agent } => show(store.claim(&id, &agent)?),
        TasksCommand::Complete { id } => show(store.complete(&id)?),
        TasksCommand::Release { id } => show(store.release(&id)?),
        TasksCommand::Verify { id } => show(store.verify(&id)?),
        TasksCommand::Block { id, reason } => show(store.block(&id, &reason)?),
        TasksCommand::Subtask {
            id,
            title,
            task_type,
        } => show(store.create_subtask(&id, &title, task_type.as_deref())?),
        TasksCommand::Finish { id, summary } => show(store.complete_subtask(&id, &summary)?),
    }
    Ok(())
}

fn run_agents(ctx: &Context, cmd: AgentsCommand) -> Result<()> {
    let registry = ctx.registry();
    let markdown = ctx.format == OutputFormat::Markdown;

    match cmd {
        AgentsCommand::Register {
            id,
            cli,
            genome,
            pid,
        } => {
            let pid = pid.unwrap_or_else(invoking_pid);
            let record = registry.register(&id, &cli, &genome, pid)?;
            ctx.emit(&record, None);
        }
        AgentsCommand::Deregister { id } => {
            if !registry.deregister(&id)? {
                return Err(CoordError::agent_not_found(id).into());
            }
            ctx.emit(&serde_json::json!({ "agent_id": id, "removed": true }), None);
        }
        AgentsCommand::List { cli } => {
            let query = registry.query(cli.as_deref())?;
            ctx.emit(&query, markdown.then(|| format_agents_markdown(&query)));
        }
        AgentsCommand::Cleanup => {
            let removed = registry.cleanup()?;
            ctx.emit(&serde_json::json!({ "removed": removed }), None);
        }
        AgentsCommand::Capacity { max } => {
            let max_agents = max.unwrap_or(ctx.config.agents.max_agents);
            let free = registry.capacity(max_agents)?;
            ctx.emit(
                &serde_json::json!({ "max_agents": max_agents, "available": free }),
                None,
            );
        }
    }
    Ok(())
}

/// The process that ran this command, which is the agent registering itself.
fn invoking_pid() -> u32 {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id()
    }
    #[cfg(not(unix))]
    {
        std::process::id()
    }
}

async fn run_reap(ctx: &Context, args: ReapArgs) -> Result<()> {
    let tasks = ctx.tasks();
    let registry = ctx.registry();

    if !args.watch {
        let report = reap_orphaned_claims(&tasks, &registry, args.cleanup)?;
        ctx.emit(&report, None);
        return Ok(());
    }

    let interval = Duration::from_secs(args.interval.max(1));
    info!(interval_secs = interval.as_secs(), "Watching for orphaned claims");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping reconciliation");
                break;
            }
            _ = ticker.tick() => {}
        }

        // The document locks block, so each pass runs off the async runtime.
        let (t, r, cleanup) = (tasks.clone(), registry.clone(), args.cleanup);
        match tokio::task::spawn_blocking(move || reap_orphaned_claims(&t, &r, cleanup)).await? {
            Ok(report) => {
                if !report.released.is_empty() || report.removed_agents > 0 {
                    ctx.emit(&report, None);
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Reconciliation pass failed, retrying next tick");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn run_safety(ctx: &Context, cmd: SafetyCommand) -> Result<()> {
    match cmd {
        SafetyCommand::Log { limit, kind } => {
            let events = ctx.safety_log().recent(limit, kind)?;
            ctx.emit(&events, None);
        }
        SafetyCommand::Replay { file, agent } => {
            let reader = std::fs::File::open(&file)
                .map_err(|source| CoordError::Io {
                    path: file.clone(),
                    source,
                })
                .map(BufReader::new)?;
            let mut monitor = SafetyMonitor::new(&agent, &ctx.config.safety, Some(ctx.safety_log()));
            let trips = replay(&mut monitor, reader)?;
            ctx.emit(
                &serde_json::json!({
                    "agent_id": agent,
                    "trips": trips,
                    "mistakes": monitor.mistakes.get_status(),
                }),
                None,
            );
        }
    }
    Ok(())
}
