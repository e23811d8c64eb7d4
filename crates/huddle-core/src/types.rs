//! Entity types shared across the coordination core.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Actor name recorded for history entries the system writes on its own
/// behalf (session lifecycle, role notifications).
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Session lifecycle state.
///
/// `Completed` and `Cancelled` are terminal: agent and lock mutations are
/// rejected once a session reaches either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is active and accepting work
    #[default]
    Active,
    /// Session is temporarily paused
    Paused,
    /// Session work is finished
    Completed,
    /// Session was abandoned
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(Error::Parse(format!("Invalid session status: {s}"))),
        }
    }
}

/// Agent work state within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is actively working
    Active,
    /// Agent has joined but has no current work
    #[default]
    Idle,
    /// Agent is blocked on another agent
    Waiting,
    /// Agent has finished its part
    Done,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Waiting => write!(f, "waiting"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "waiting" => Ok(Self::Waiting),
            "done" => Ok(Self::Done),
            _ => Err(Error::Parse(format!("Invalid agent status: {s}"))),
        }
    }
}

/// A coordination session: the scope all other entities live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Caller-chosen session identifier
    pub session_id: String,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// When the session row was first created
    pub created_at: DateTime<Utc>,
    /// Last lifecycle change
    pub updated_at: DateTime<Utc>,
    /// Opaque shared context blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Opaque metadata blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// An agent registered in a session. Unique per (session, name); roles are
/// free-form and may be shared by multiple agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent name, unique within the session
    pub agent_name: String,
    /// Free-form role label ("planner", "builder", ...)
    pub role: String,
    /// Current work state
    pub status: AgentStatus,
    /// When the agent joined
    pub joined_at: DateTime<Utc>,
    /// What the agent is working on, if anything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

/// An exclusive claim on a named resource. Unique per (session, resource).
///
/// `locked_by` is advisory attribution: it is recorded verbatim and not
/// validated against registered agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Resource identifier, unique within the session
    pub resource_id: String,
    /// Who claimed the lock
    pub locked_by: String,
    /// When the lock was taken
    pub locked_at: DateTime<Utc>,
    /// Caller-supplied classification ("file", "api", ...)
    pub resource_type: String,
}

/// One append-only audit record of a session action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the action happened
    pub timestamp: DateTime<Utc>,
    /// Acting agent, or [`SYSTEM_ACTOR`]
    pub agent_name: String,
    /// Machine-readable action name
    pub action: String,
    /// Human-readable detail line
    pub details: String,
}

/// Point-in-time view of a session: the session row, its agents, its locks,
/// and the five most recent history entries.
///
/// Assembled from separate reads; each piece is internally consistent but
/// the set may span a concurrent mutation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// The session row
    pub session: Session,
    /// All registered agents, in join order
    pub agents: Vec<Agent>,
    /// All held locks, in acquisition order
    pub locks: Vec<ResourceLock>,
    /// Most recent history, newest first
    pub recent_history: Vec<HistoryEntry>,
}
