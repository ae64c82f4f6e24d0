use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use db::{CheckpointStore, SqliteCheckpointStore};
use fleet_core::{Checkpoint, SessionEnd, StepStatus};
use orchestrator::OrchestratorConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const DEFAULT_DB_URL: &str = "sqlite:taskfleet.db";

#[derive(Parser)]
#[command(name = "taskfleet")]
#[command(about = "Inspect orchestrator configuration and session checkpoints", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Orchestrator configuration files
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Persisted session checkpoints
    Checkpoint {
        #[arg(long, global = true, default_value = DEFAULT_DB_URL)]
        db: String,

        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Parse and validate a configuration file, then print the effective values
    Check { file: PathBuf },
    /// Print the default configuration
    Default,
}

#[derive(Subcommand)]
enum CheckpointCommand {
    List,
    Show {
        session_id: Uuid,

        #[arg(long)]
        json: bool,
    },
    Delete { session_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommand::Check { file } => check_config(&file).await,
            ConfigCommand::Default => print_config(&OrchestratorConfig::default()),
        },
        Commands::Checkpoint { db, command } => {
            let store = SqliteCheckpointStore::connect(&db)
                .await
                .with_context(|| format!("Failed to open checkpoint database {db}"))?;
            match command {
                CheckpointCommand::List => list_checkpoints(&store).await,
                CheckpointCommand::Show { session_id, json } => {
                    show_checkpoint(&store, session_id, json).await
                }
                CheckpointCommand::Delete { session_id } => {
                    delete_checkpoint(&store, session_id).await
                }
            }
        }
    }
}

async fn check_config(path: &Path) -> Result<()> {
    let config = OrchestratorConfig::load(path)
        .await
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    tracing::info!(path = %path.display(), "Configuration is valid");

    println!("{} is valid", path.display());
    println!();
    print_config(&config)
}

fn print_config(config: &OrchestratorConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

async fn list_checkpoints(store: &SqliteCheckpointStore) -> Result<()> {
    let checkpoints = store.list().await.context("Failed to list checkpoints")?;

    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }

    println!("Checkpoints ({}):", checkpoints.len());
    for summary in &checkpoints {
        println!(
            "  {}  round {:>4}  saved {}",
            summary.session_id,
            summary.round_index,
            summary.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn show_checkpoint(store: &SqliteCheckpointStore, session_id: Uuid, json: bool) -> Result<()> {
    let Some(checkpoint) = store
        .load(session_id)
        .await
        .with_context(|| format!("Failed to load checkpoint for {session_id}"))?
    else {
        bail!("No checkpoint for session {session_id}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    print_checkpoint(&checkpoint);
    Ok(())
}

fn print_checkpoint(checkpoint: &Checkpoint) {
    let ledger = &checkpoint.ledger;

    println!();
    println!("Session: {}", checkpoint.session_id);
    println!("Goal:    {}", ledger.task().goal);
    println!(
        "Round:   {} (stalled {}, replanned {})",
        checkpoint.round_index,
        ledger.stall_count(),
        ledger.replan_count()
    );
    println!("Saved:   {}", checkpoint.saved_at.to_rfc3339());
    match &checkpoint.end {
        Some(SessionEnd::Completed) => println!("Ended:   completed"),
        Some(SessionEnd::Failed { reason }) => println!("Ended:   failed ({reason})"),
        None => {}
    }
    println!();

    println!("Plan ({} steps):", ledger.plan().len());
    for (index, step) in ledger.plan().iter().enumerate() {
        let icon = match step.status {
            StepStatus::Pending => "○",
            StepStatus::InProgress => "◐",
            StepStatus::Succeeded => "●",
            StepStatus::Failed => "✗",
            StepStatus::Rejected => "⊘",
        };
        println!(
            "  {icon} {index}. [{}] {} ({})",
            step.capability,
            step.description,
            step.status.as_str()
        );
    }
    println!();

    println!("Facts ({}):", ledger.facts().len());
    for fact in ledger.facts() {
        println!("  r{} {:<9} {}", fact.round, fact.kind.as_str(), fact.text);
    }

    if !checkpoint.history.is_empty() {
        println!();
        println!("History:");
        for entry in &checkpoint.history {
            println!("  r{} {}", entry.round, entry.summary);
        }
    }
    println!();
}

async fn delete_checkpoint(store: &SqliteCheckpointStore, session_id: Uuid) -> Result<()> {
    if store
        .delete(session_id)
        .await
        .with_context(|| format!("Failed to delete checkpoint for {session_id}"))?
    {
        println!("Deleted checkpoint for {session_id}");
    } else {
        println!("No checkpoint for {session_id}");
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskfleet=warn,orchestrator=warn,db=warn".into()),
        )
        .init();
}
