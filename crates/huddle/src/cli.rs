//! Command-line surface: argument parsing and the output-format switch.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use huddle_core::{AgentStatus, SessionStatus};

/// Multi-agent session coordination from the command line.
#[derive(Debug, Parser)]
#[command(name = "huddle", version, about)]
pub struct Cli {
    /// Database file to operate on (overrides HUDDLE_DB and the config file)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Machine-readable JSON
    Json,
}

impl OutputFormat {
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show a session snapshot: agents, locks, recent history
    Status {
        /// Session identifier
        session: String,
    },
    /// List session ids, newest first
    List {
        /// Only show sessions with this status
        #[arg(long)]
        status: Option<SessionStatus>,
    },
    /// Add an agent to a session
    Join {
        session: String,
        /// Agent name, unique within the session
        agent: String,
        /// Role the agent plays ("planner", "builder", ...)
        #[arg(long)]
        role: String,
    },
    /// Remove an agent, releasing every lock it holds
    Leave {
        session: String,
        agent: String,
    },
    /// Claim an exclusive lock on a resource
    Lock {
        session: String,
        /// Resource identifier (filename, task id, ...)
        resource: String,
        /// Agent claiming the lock
        #[arg(long)]
        agent: String,
        /// Resource classification
        #[arg(long = "type", value_name = "TYPE", default_value = "file")]
        resource_type: String,
    },
    /// Release a locked resource
    Unlock {
        session: String,
        resource: String,
    },
    /// Update an agent's status and current task
    Task {
        session: String,
        agent: String,
        /// New status (active, idle, waiting, done)
        #[arg(long)]
        status: AgentStatus,
        /// Free-text task description
        #[arg(long)]
        task: Option<String>,
    },
    /// Hand the turn to the agent assigned to a role
    Notify {
        session: String,
        role: String,
    },
    /// Mark a session completed, releasing all locks
    Done {
        session: String,
    },
    /// Show the session audit trail, newest first
    History {
        session: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}
