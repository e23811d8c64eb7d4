//! Command handlers: one function per subcommand, each mapping to one
//! coordinator or store call and formatting the outcome.
//!
//! Expected boolean-false outcomes (duplicate agent, contended lock, unknown
//! role) are reported on stdout and exit 0; only storage failures error.

use std::path::Path;

use anyhow::Result;
use huddle_core::{
    list_sessions, AgentStatus, HistoryEntry, SessionCoordinator, SessionSnapshot, SessionStatus,
    SessionStore,
};
use serde::Serialize;

use crate::cli::OutputFormat;

/// Outcome of a state-changing command.
#[derive(Debug, Serialize)]
struct ActionOutput<'a> {
    success: bool,
    session_id: &'a str,
    action: &'a str,
    message: String,
}

impl ActionOutput<'_> {
    fn emit(&self, format: OutputFormat) -> Result<()> {
        if format.is_json() {
            println!("{}", serde_json::to_string_pretty(self)?);
        } else {
            println!("{}", self.message);
        }
        Ok(())
    }
}

/// Session listing output.
#[derive(Debug, Serialize)]
struct ListOutput {
    sessions: Vec<String>,
}

async fn attach(db: &Path, session_id: &str) -> Result<SessionCoordinator> {
    let store = SessionStore::create_or_open(db).await?;
    Ok(SessionCoordinator::attach(store, session_id).await?)
}

/// Show a session snapshot.
pub async fn status(db: &Path, session_id: &str, format: OutputFormat) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let snapshot = coordinator.get_status().await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        render_status(&snapshot);
    }
    Ok(())
}

fn render_status(snapshot: &SessionSnapshot) {
    let session = &snapshot.session;
    println!("{}", "=".repeat(70));
    println!("Session: {}", session.session_id);
    println!("{}", "=".repeat(70));
    println!("Status:  {}", session.status);
    println!("Created: {}", session.created_at.to_rfc3339());
    println!("Updated: {}", session.updated_at.to_rfc3339());

    println!("\nAgents ({}):", snapshot.agents.len());
    for agent in &snapshot.agents {
        let task = agent.current_task.as_deref().unwrap_or("-");
        println!(
            "  - {:<12} | role: {:<12} | status: {:<8} | task: {task}",
            agent.agent_name, agent.role, agent.status
        );
    }

    println!("\nLocks ({}):", snapshot.locks.len());
    for lock in &snapshot.locks {
        println!(
            "  - {:<20} | locked by: {:<12} | type: {}",
            lock.resource_id, lock.locked_by, lock.resource_type
        );
    }

    println!("\nRecent history:");
    for entry in &snapshot.recent_history {
        println!(
            "  [{}] {:<12} | {:<18} | {}",
            entry.timestamp.to_rfc3339(),
            entry.agent_name,
            entry.action,
            entry.details
        );
    }
    println!("{}", "=".repeat(70));
}

/// List session ids, newest first.
pub async fn list(
    db: &Path,
    status_filter: Option<SessionStatus>,
    format: OutputFormat,
) -> Result<()> {
    let sessions = list_sessions(db, status_filter).await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&ListOutput { sessions })?);
    } else if sessions.is_empty() {
        println!("No sessions found.");
    } else {
        for session_id in sessions {
            println!("{session_id}");
        }
    }
    Ok(())
}

/// Add an agent to a session.
pub async fn join(
    db: &Path,
    session_id: &str,
    agent: &str,
    role: &str,
    format: OutputFormat,
) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let added = coordinator.add_agent(agent, role).await?;
    let message = if added {
        format!("{agent} joined {session_id} as {role}")
    } else {
        format!("{agent} is already in {session_id} (or the session is closed)")
    };
    ActionOutput {
        success: added,
        session_id,
        action: "join",
        message,
    }
    .emit(format)
}

/// Remove an agent from a session.
pub async fn leave(db: &Path, session_id: &str, agent: &str, format: OutputFormat) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let removed = coordinator.remove_agent(agent).await?;
    let message = if removed {
        format!("{agent} left {session_id}; held locks released")
    } else {
        format!("{agent} is not in {session_id}")
    };
    ActionOutput {
        success: removed,
        session_id,
        action: "leave",
        message,
    }
    .emit(format)
}

/// Claim an exclusive resource lock.
pub async fn lock(
    db: &Path,
    session_id: &str,
    resource: &str,
    agent: &str,
    resource_type: &str,
    format: OutputFormat,
) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let locked = coordinator
        .lock_resource(resource, agent, Some(resource_type))
        .await?;
    let message = if locked {
        format!("{resource} locked by {agent}")
    } else {
        format!("{resource} is already locked")
    };
    ActionOutput {
        success: locked,
        session_id,
        action: "lock",
        message,
    }
    .emit(format)
}

/// Release a resource lock.
pub async fn unlock(
    db: &Path,
    session_id: &str,
    resource: &str,
    format: OutputFormat,
) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let unlocked = coordinator.unlock_resource(resource).await?;
    let message = if unlocked {
        format!("{resource} unlocked")
    } else {
        format!("{resource} was not locked")
    };
    ActionOutput {
        success: unlocked,
        session_id,
        action: "unlock",
        message,
    }
    .emit(format)
}

/// Update an agent's status and task.
pub async fn task(
    db: &Path,
    session_id: &str,
    agent: &str,
    status: AgentStatus,
    task: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let updated = coordinator.update_agent_status(agent, status, task).await?;
    let message = if updated {
        format!("{agent} is now {status}")
    } else {
        format!("{agent} is not in {session_id}")
    };
    ActionOutput {
        success: updated,
        session_id,
        action: "task",
        message,
    }
    .emit(format)
}

/// Hand the turn to the agent assigned to a role.
pub async fn notify(db: &Path, session_id: &str, role: &str, format: OutputFormat) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let notified = coordinator.notify_next_role(role).await?;
    let message = if notified {
        format!("turn handed to the {role} agent")
    } else {
        format!("no agent holds role {role}")
    };
    ActionOutput {
        success: notified,
        session_id,
        action: "notify",
        message,
    }
    .emit(format)
}

/// Mark a session completed.
pub async fn done(db: &Path, session_id: &str, format: OutputFormat) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let completed = coordinator.complete_session().await?;
    ActionOutput {
        success: completed,
        session_id,
        action: "done",
        message: format!("{session_id} completed; all locks released"),
    }
    .emit(format)
}

/// Show the session audit trail.
pub async fn history(db: &Path, session_id: &str, limit: u32, format: OutputFormat) -> Result<()> {
    let coordinator = attach(db, session_id).await?;
    let entries = coordinator.get_history(Some(limit)).await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No history for {session_id}.");
    } else {
        for entry in &entries {
            render_history_line(entry);
        }
    }
    Ok(())
}

fn render_history_line(entry: &HistoryEntry) {
    println!(
        "[{}] {:<12} | {:<18} | {}",
        entry.timestamp.to_rfc3339(),
        entry.agent_name,
        entry.action,
        entry.details
    );
}
