//! # RenoTimeline Scheduler
//!
//! Workflow automation for renovation projects: due-date reminders,
//! scheduled workflows, and overdue alerts.
//!
//! Usage:
//!   renotimeline serve                  # Start the HTTP gateway
//!   renotimeline scan                   # Run one scan tick and exit
//!   renotimeline executions --limit 50  # Print the recent audit log

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use reno_core::RenoConfig;
use reno_scheduler::{SchedulerDb, TriggerScanner};

#[derive(Parser)]
#[command(
    name = "renotimeline",
    version,
    about = "🏗️ RenoTimeline — workflow scheduler"
)]
struct Cli {
    /// Path to config file (default ~/.renotimeline/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a single scan tick and exit
    Scan,
    /// Print recent workflow executions
    Executions {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "renotimeline=debug,reno_scheduler=debug,reno_gateway=debug,tower_http=debug"
    } else {
        "renotimeline=info,reno_scheduler=info,reno_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => RenoConfig::load_from(path)?,
        None => RenoConfig::load()?,
    };
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            reno_gateway::start(config).await
        }
        Command::Scan => {
            let db = SchedulerDb::open(&config.database.path)?;
            let report = TriggerScanner::new(&db, &config.scheduler).run()?;
            println!("{}", report.summary());
            Ok(())
        }
        Command::Executions { limit } => {
            let db = SchedulerDb::open(&config.database.path)?;
            for exec in db.recent_executions(limit)? {
                println!(
                    "{}  {:<8}  wf={}  actions={}  {}",
                    exec.executed_at.format("%Y-%m-%d %H:%M:%S"),
                    exec.status.as_str(),
                    exec.workflow_id,
                    serde_json::to_string(&exec.executed_actions)?,
                    exec.error.unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}
