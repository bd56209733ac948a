//! drover
//!
//! Supervises coding-agent CLIs: spawns them, captures their transcripts and
//! tracks each agent's lifecycle in a local `SQLite` database.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use drover_supervisor::agent_cmd::{self, AgentAction, WorkerLaunch};
use drover_supervisor::lifecycle::{Supervisor, SupervisorOptions};
use drover_supervisor::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(version, about = "drover - coding agent supervisor")]
struct Args {
    /// Database file path
    #[arg(long, global = true, env = "DROVER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Directory for launch-error files
    #[arg(long, global = true, env = "DROVER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Namespace for agent names (e.g. a project and branch)
    #[arg(long, global = true, default_value = "default", env = "DROVER_SCOPE")]
    scope: String,

    /// Project directory whose `.drover/settings.json` is applied
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, global = true, env = "DROVER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "DROVER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: AgentAction,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = match &args.project_dir {
        Some(dir) => Some(dir.clone()),
        None => std::env::current_dir().ok(),
    };
    let mut config = drover_core::config::load_config(project_dir.as_deref())?;
    if let Some(path) = &args.db_path {
        config.supervisor.database_path = Some(path.clone());
    }
    if let Some(dir) = &args.state_dir {
        config.supervisor.state_dir = Some(dir.clone());
    }
    if let Some(level) = &args.log_level {
        config.supervisor.log_level.clone_from(level);
    }

    let log_filter = format!("drover_supervisor={}", config.supervisor.log_level);
    drover_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        scope = %args.scope,
        "Starting drover"
    );

    let db_path = match config.supervisor.database_path.clone() {
        Some(path) => path,
        None => drover_core::config::database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?,
    };
    let db = Database::open(&db_path).await?;

    let mut options = SupervisorOptions::from_config(&config);
    if matches!(args.command, AgentAction::Worker { .. }) {
        options.mux = options.mux.with_echo(false);
    }

    let worker = WorkerLaunch {
        program: std::env::current_exe()?,
        global_args: vec![
            "--db-path".to_string(),
            db_path.display().to_string(),
            "--state-dir".to_string(),
            options.state_dir.display().to_string(),
            "--log-level".to_string(),
            config.supervisor.log_level.clone(),
        ],
    };
    let sweep_interval = Duration::from_secs(config.supervisor.sweep_interval_secs.max(1));

    let supervisor = Supervisor::new(db, options);
    agent_cmd::run(&supervisor, &args.scope, &worker, sweep_interval, args.command).await
}
