//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// agentplane - control plane for capability-routed agents
#[derive(Parser)]
#[command(
    name = "ap",
    about = "Inspect and manage agentplane state",
    version,
    after_help = "Logs are written to: ~/.local/share/agentplane/logs/agentplane.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect or clear persisted agent state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Print the effective configuration as YAML, API keys redacted
    Config,
}

/// State subcommands
#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// List persisted agent states
    List {
        /// Only show agents with this status (e.g. IDLE, WORKING)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Print one agent's state as JSON
    Show {
        /// Agent id
        id: String,
    },

    /// Print an agent's history, newest first
    History {
        /// Agent id
        id: String,

        /// Maximum number of entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Delete every state and history entry
    Clear,
}

/// Path of the log file written by `ap`
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentplane")
        .join("logs")
        .join("agentplane.log");
    debug!(?path, "get_log_path: returning path");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_state_list() {
        let cli = Cli::parse_from(["ap", "-l", "debug", "state", "list", "--status", "idle"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::State {
                command: StateCommand::List { status },
            } => assert_eq!(status.as_deref(), Some("idle")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_history_with_global_config() {
        let cli = Cli::parse_from(["ap", "state", "history", "dev-1", "-n", "5", "-c", "x.yml"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.yml")));
        match cli.command {
            Command::State {
                command: StateCommand::History { id, limit },
            } => {
                assert_eq!(id, "dev-1");
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_log_path_file_name() {
        assert!(get_log_path().ends_with("agentplane/logs/agentplane.log"));
    }
}
