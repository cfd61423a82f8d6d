mod config;
mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use nanoclaw_dispatch::Dispatcher;
use nanoclaw_gateway::ApprovalGateway;
use nanoclaw_observability::{
    init_logging, logs_dir_under, secret_fingerprint, ProcessKind,
};
use nanoclaw_planner::{HttpPlanner, MemorySource, NoopMemory, NotesDirMemory};
use nanoclaw_registry::Database;
use nanoclaw_router::{spawn_loops, RouterConfig, RouterContext};
use nanoclaw_runner::RunnerState;
use nanoclaw_store::{GroupRegistry, ProposalStore, RouterState, SessionStore};

use config::EngineConfig;
use transport::BotBridgeTransport;

#[derive(Parser, Debug)]
#[command(name = "nanoclaw-engine")]
#[command(about = "Chat-driven operations orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the action runner HTTP service.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
    /// Run the agent loops: message ingestion, IPC watcher and scheduler.
    Agent,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    match cli.command {
        Command::Serve { hostname, port } => {
            let _log_guard =
                init_logging(ProcessKind::Runner, &logs_dir_under(&config.data_dir), 14)?;
            log_startup_config(&config);

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let db = Database::open(&config.data_dir.join("nanoclaw.sqlite3")).await?;
            let state = RunnerState::new(config.runner.clone(), db.runs(), None)?;
            nanoclaw_runner::serve(addr, state).await
        }
        Command::Agent => {
            let _log_guard =
                init_logging(ProcessKind::Agent, &logs_dir_under(&config.data_dir), 14)?;
            log_startup_config(&config);

            let ctx = build_agent_context(&config).await?;
            let mut loops = spawn_loops(ctx, RouterConfig::default());
            info!("agent loops started; ctrl-c to stop");
            let _ = tokio::signal::ctrl_c().await;
            loops.abort_all();
            Ok(())
        }
    }
}

/// Startup summary. Secrets appear only as fingerprints.
fn log_startup_config(config: &EngineConfig) {
    info!(
        assistant = %config.assistant_name,
        data_dir = %config.data_dir.display(),
        timezone = %config.timezone,
        webhook_url = %config.dispatcher.runner_url,
        webhook_secret = %secret_fingerprint(&config.dispatcher.secret),
        runner_secret = %secret_fingerprint(&config.runner.runner_secret),
        media_token = %secret_fingerprint(&config.runner.media.bearer_token),
        "configuration loaded"
    );
}

async fn build_agent_context(config: &EngineConfig) -> anyhow::Result<Arc<RouterContext>> {
    let data_dir = &config.data_dir;
    tokio::fs::create_dir_all(data_dir).await?;

    let planner_config = config
        .planner
        .clone()
        .context("NANOCLAW_PLANNER_BASE_URL is required in agent mode")?;

    let db = Database::open(&data_dir.join("nanoclaw.sqlite3")).await?;
    let groups = Arc::new(GroupRegistry::load(data_dir).await?);
    let proposals = Arc::new(ProposalStore::load(data_dir).await?);
    let planner = Arc::new(HttpPlanner::new(planner_config)?);
    let transport = Arc::new(BotBridgeTransport::new(config.bot_egress_url.clone())?);
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone())?);
    let memory: Arc<dyn MemorySource> = match &config.notes_dir {
        Some(notes_dir) => Arc::new(NotesDirMemory::new(notes_dir.clone())),
        None => Arc::new(NoopMemory),
    };

    let gateway = Arc::new(ApprovalGateway::new(
        proposals.clone(),
        dispatcher,
        planner.clone(),
        transport.clone(),
    ));

    Ok(Arc::new(RouterContext {
        groups,
        state: Arc::new(RouterState::load(data_dir).await?),
        sessions: Arc::new(SessionStore::load(data_dir).await?),
        proposals,
        messages: Arc::new(db.messages()),
        tasks: db.tasks(),
        planner,
        memory,
        gateway,
        transport,
        assistant_name: config.assistant_name.clone(),
        data_dir: data_dir.clone(),
        timezone: config.timezone,
    }))
}
