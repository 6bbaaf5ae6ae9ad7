//! ap - inspect and manage agentplane state
//!
//! CLI entry point. Commands work directly on the persisted snapshot.

use std::fs;
use std::str::FromStr;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use tracing::{debug, info};

use agentplane::cli::{Cli, Command, StateCommand, get_log_path};
use agentplane::config::Config;
use agentplane::domain::{AgentState, AgentStatus, StateUpdate};
use agentplane::state::StateQuery;
use statestore::{FileStateStore, Snapshot, StateStore};

type AgentFileStore = FileStateStore<AgentState, StateUpdate>;
type AgentSnapshot = Snapshot<AgentState, StateUpdate>;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so nothing here can log
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Read the log level before the full config so loading can be logged
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(storage_dir = %config.state.storage_dir.display(), "agentplane loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::State { command } => match command {
            StateCommand::List { status } => cmd_state_list(&config, status.as_deref()).await,
            StateCommand::Show { id } => cmd_state_show(&config, &id).await,
            StateCommand::History { id, limit } => cmd_state_history(&config, &id, limit).await,
            StateCommand::Clear => cmd_state_clear(&config).await,
        },
        Command::Config => cmd_config(&config),
    }
}

/// Read the snapshot for inspection; nothing on disk is created or rewritten
async fn read_snapshot(config: &Config) -> Result<AgentSnapshot> {
    debug!(storage_dir = %config.state.storage_dir.display(), "read_snapshot: called");
    AgentFileStore::new(&config.state.storage_dir, config.state.store_options())
        .read_snapshot()
        .await
        .context(format!("Failed to read state snapshot in {}", config.state.storage_dir.display()))
}

/// Open the snapshot store read-write, without autosave
async fn open_store(config: &Config) -> Result<AgentFileStore> {
    debug!(storage_dir = %config.state.storage_dir.display(), "open_store: called");
    let store = AgentFileStore::new(&config.state.storage_dir, config.state.store_options().without_autosave());
    store
        .initialize()
        .await
        .context(format!("Failed to open state store in {}", config.state.storage_dir.display()))?;
    Ok(store)
}

fn colored_status(status: AgentStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        AgentStatus::Idle | AgentStatus::Ready => label.green(),
        AgentStatus::Working | AgentStatus::Busy => label.cyan(),
        AgentStatus::Error => label.red(),
        AgentStatus::Shutdown => label.dimmed(),
        AgentStatus::Initializing => label.yellow(),
    }
}

async fn cmd_state_list(config: &Config, status: Option<&str>) -> Result<()> {
    debug!(?status, "cmd_state_list: called");
    let mut query = StateQuery::new();
    if let Some(s) = status {
        query = query.status(AgentStatus::from_str(s).map_err(|e| eyre::eyre!(e))?);
    }

    let snapshot = read_snapshot(config).await?;
    let matching: Vec<&AgentState> = snapshot.states.values().filter(|s| query.matches(s)).collect();
    if matching.is_empty() {
        println!("No agent states in {}", config.state.storage_dir.display());
        return Ok(());
    }

    for state in matching {
        let current = state
            .current_task
            .as_ref()
            .map(|t| format!(" task={}", t.id))
            .unwrap_or_default();
        println!(
            "{} {} {}{} {}",
            state.id.bold(),
            state.agent_type.to_string().yellow(),
            colored_status(state.status),
            current,
            state.last_update.to_rfc3339().dimmed()
        );
        if let Some(error) = &state.last_error {
            println!("  {} {}", "last error:".red(), error);
        }
    }
    Ok(())
}

async fn cmd_state_show(config: &Config, id: &str) -> Result<()> {
    debug!(%id, "cmd_state_show: called");
    let snapshot = read_snapshot(config).await?;
    match snapshot.states.get(id) {
        Some(state) => {
            println!("{}", serde_json::to_string_pretty(state)?);
            Ok(())
        }
        None => bail!("No state recorded for agent '{}'", id),
    }
}

async fn cmd_state_history(config: &Config, id: &str, limit: Option<usize>) -> Result<()> {
    debug!(%id, ?limit, "cmd_state_history: called");
    let history = read_snapshot(config).await?.history_for(id, limit);

    if history.is_empty() {
        println!("No history for agent '{}'", id);
        return Ok(());
    }
    for update in history {
        let status = update
            .state
            .status
            .map(|s| colored_status(s).to_string())
            .unwrap_or_else(|| "-".dimmed().to_string());
        println!(
            "{} {} {}",
            update.timestamp.to_rfc3339().dimmed(),
            status,
            serde_json::to_string(&update.state)?
        );
    }
    Ok(())
}

async fn cmd_state_clear(config: &Config) -> Result<()> {
    debug!("cmd_state_clear: called");
    let store = open_store(config).await?;
    let count = store.get_all_states().await?.len();
    store.clear().await?;
    store.shutdown().await?;
    println!("{} Cleared {} agent states", "✓".green(), count);
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(&config.redacted()).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
