//! `SQLite`-backed state store for session coordination.
//!
//! The store is the only component with persistence access. Every
//! check-and-write pair (duplicate agent, duplicate lock, terminal-session
//! guard) executes as a single guarded statement or one transaction, so two
//! concurrent callers can never both observe success for the same claim.
//! `UNIQUE` constraints on `(session_id, agent_name)` and
//! `(session_id, resource_id)` back the boolean contract: a constraint
//! violation maps to `Ok(false)`, never to an error.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;

use crate::{
    types::{Agent, AgentStatus, HistoryEntry, ResourceLock, Session, SessionStatus, SYSTEM_ACTOR},
    Error, Result,
};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Database schema as SQL string - executed once on open.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY CHECK(version = 1)
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL CHECK(status IN ('active', 'paused', 'completed', 'cancelled')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    context TEXT,
    metadata TEXT
);

CREATE TABLE IF NOT EXISTS session_agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    role TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('active', 'idle', 'waiting', 'done')),
    joined_at TEXT NOT NULL,
    current_task TEXT,
    UNIQUE(session_id, agent_name)
);

CREATE TABLE IF NOT EXISTS resource_locks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    locked_by TEXT NOT NULL,
    locked_at TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    UNIQUE(session_id, resource_id)
);

CREATE TABLE IF NOT EXISTS session_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_agents_session ON session_agents(session_id);
CREATE INDEX IF NOT EXISTS idx_locks_session ON resource_locks(session_id);
CREATE INDEX IF NOT EXISTS idx_history_session ON session_history(session_id);
";

/// Sessions in these states reject agent and lock mutations.
const TERMINAL_GUARD: &str = "NOT IN ('completed', 'cancelled')";

/// Store for sessions, agents, locks, and history, backed by `SQLite` with
/// connection pooling.
#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open an existing store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the database file does not exist, or
    /// [`Error::Database`] if it cannot be opened or has a mismatched schema.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(path, false).await
    }

    /// Create the store (and parent directories) if absent, then open it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the parent directory cannot be created, or
    /// [`Error::Database`] on open/schema failures.
    pub async fn create_or_open(path: &Path) -> Result<Self> {
        Self::open_internal(path, true).await
    }

    /// Open an ephemeral in-memory store.
    ///
    /// The pool is pinned to a single connection so every caller sees the
    /// same database. Intended for tests and throwaway sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the connection cannot be established.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Database(format!("Failed to open in-memory database: {e}")))?;

        init_schema(&pool).await?;
        check_schema_version(&pool).await?;
        Ok(Self { pool })
    }

    async fn open_internal(path: &Path, allow_create: bool) -> Result<Self> {
        if allow_create {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::Io(format!("Failed to create parent directory: {e}"))
                    })?;
                }
            }
        } else if !path.exists() {
            return Err(Error::NotFound(format!(
                "Database file does not exist: {}",
                path.display()
            )));
        }

        let path_str = path.to_str().ok_or_else(|| {
            Error::Database("Database path contains invalid UTF-8".to_string())
        })?;

        let mode = if allow_create { "rwc" } else { "rw" };
        let db_url = if path.is_absolute() {
            format!("sqlite:///{path_str}?mode={mode}")
        } else {
            format!("sqlite:{path_str}?mode={mode}")
        };

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {e}")))?;

        init_schema(&pool).await?;
        check_schema_version(&pool).await?;
        Ok(Self { pool })
    }

    /// Atomically insert the session row if absent, then return it.
    ///
    /// Idempotent: repeated calls never duplicate the row, reset its status,
    /// or change `created_at`. A `session_created` history entry is written
    /// only when the row was actually inserted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn create_or_load_session(&self, session_id: &str) -> Result<Session> {
        let now_str = Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {e}")))?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO sessions (session_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(session_id)
        .bind(SessionStatus::Active.to_string())
        .bind(&now_str)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to create session: {e}")))?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query(
                "INSERT INTO session_history (session_id, timestamp, agent_name, action, details)
                 VALUES (?1, ?2, ?3, 'session_created', 'Session initialized')",
            )
            .bind(session_id)
            .bind(&now_str)
            .bind(SYSTEM_ACTOR)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to log session creation: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit session creation: {e}")))?;

        if inserted {
            debug!(session_id, "session created");
        }

        self.get_session(session_id).await?.ok_or_else(|| {
            Error::Database(format!("Session '{session_id}' vanished after creation"))
        })
    }

    /// Fetch the session row, if present.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure, `Error::Parse` if a
    /// stored field cannot be decoded.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row: Option<(String, String, String, String, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT session_id, status, created_at, updated_at, context, metadata
                 FROM sessions WHERE session_id = ?1",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to query session: {e}")))?;

        row.map(parse_session_row).transpose()
    }

    /// Append one history entry. Never fails except on storage I/O error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn append_history(
        &self,
        session_id: &str,
        agent_name: &str,
        action: &str,
        details: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_history (session_id, timestamp, agent_name, action, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(session_id)
        .bind(Utc::now().to_rfc3339())
        .bind(agent_name)
        .bind(action)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to append history: {e}")))?;

        Ok(())
    }

    /// Insert an agent with status Idle, joined now.
    ///
    /// Returns `Ok(false)` without writing anything when the name is already
    /// taken in this session or the session is terminal. The duplicate check
    /// rides on the `UNIQUE(session_id, agent_name)` constraint, so two
    /// concurrent inserts of the same name cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn insert_agent(&self, session_id: &str, agent_name: &str, role: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO session_agents (session_id, agent_name, role, status, joined_at)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE EXISTS (
                 SELECT 1 FROM sessions WHERE session_id = ?1 AND status {TERMINAL_GUARD}
             )"
        ))
        .bind(session_id)
        .bind(agent_name)
        .bind(role)
        .bind(AgentStatus::Idle.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(e) if is_unique_violation(&e) => {
                debug!(session_id, agent_name, "duplicate agent insert rejected");
                Ok(false)
            }
            Err(e) => Err(Error::Database(format!("Failed to insert agent: {e}"))),
        }
    }

    /// Remove an agent and every lock it holds, in one transaction.
    ///
    /// Returns `Ok(false)` when the agent does not exist or the session is
    /// terminal; no locks are touched in that case.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn delete_agent(&self, session_id: &str, agent_name: &str) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {e}")))?;

        let removed = sqlx::query(&format!(
            "DELETE FROM session_agents
             WHERE session_id = ?1 AND agent_name = ?2
               AND EXISTS (
                   SELECT 1 FROM sessions WHERE session_id = ?1 AND status {TERMINAL_GUARD}
               )"
        ))
        .bind(session_id)
        .bind(agent_name)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to delete agent: {e}")))?
        .rows_affected()
            > 0;

        if removed {
            sqlx::query("DELETE FROM resource_locks WHERE session_id = ?1 AND locked_by = ?2")
                .bind(session_id)
                .bind(agent_name)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Database(format!("Failed to release agent locks: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit agent removal: {e}")))?;

        Ok(removed)
    }

    /// Set an agent's status and current task.
    ///
    /// Returns `Ok(false)` when no matching agent exists or the session is
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn update_agent_status(
        &self,
        session_id: &str,
        agent_name: &str,
        status: AgentStatus,
        current_task: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE session_agents SET status = ?3, current_task = ?4
             WHERE session_id = ?1 AND agent_name = ?2
               AND EXISTS (
                   SELECT 1 FROM sessions WHERE session_id = ?1 AND status {TERMINAL_GUARD}
               )"
        ))
        .bind(session_id)
        .bind(agent_name)
        .bind(status.to_string())
        .bind(current_task)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update agent status: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// List all agents in the session, in join order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure, `Error::Parse` on
    /// undecodable rows.
    pub async fn list_agents(&self, session_id: &str) -> Result<Vec<Agent>> {
        let rows: Vec<(String, String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT agent_name, role, status, joined_at, current_task
             FROM session_agents WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list agents: {e}")))?;

        rows.into_iter().map(parse_agent_row).collect()
    }

    /// Find the earliest-joined agent holding `role`.
    ///
    /// Roles are not unique; ties go to the first match in join order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure, `Error::Parse` on
    /// undecodable rows.
    pub async fn find_agent_by_role(&self, session_id: &str, role: &str) -> Result<Option<Agent>> {
        let row: Option<(String, String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT agent_name, role, status, joined_at, current_task
             FROM session_agents WHERE session_id = ?1 AND role = ?2
             ORDER BY id ASC LIMIT 1",
        )
        .bind(session_id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to query agent by role: {e}")))?;

        row.map(parse_agent_row).transpose()
    }

    /// Insert an exclusive lock on `resource_id`.
    ///
    /// Returns `Ok(false)` when the resource is already locked or the
    /// session is terminal. The `UNIQUE(session_id, resource_id)` constraint
    /// makes this the system's mutual-exclusion point: of any number of
    /// concurrent claims on one resource, at most one insert lands.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn insert_lock(
        &self,
        session_id: &str,
        resource_id: &str,
        locked_by: &str,
        resource_type: &str,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO resource_locks (session_id, resource_id, locked_by, locked_at, resource_type)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE EXISTS (
                 SELECT 1 FROM sessions WHERE session_id = ?1 AND status {TERMINAL_GUARD}
             )"
        ))
        .bind(session_id)
        .bind(resource_id)
        .bind(locked_by)
        .bind(Utc::now().to_rfc3339())
        .bind(resource_type)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                let acquired = done.rows_affected() > 0;
                if acquired {
                    debug!(session_id, resource_id, locked_by, "lock acquired");
                }
                Ok(acquired)
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(session_id, resource_id, locked_by, "lock contended");
                Ok(false)
            }
            Err(e) => Err(Error::Database(format!("Failed to insert lock: {e}"))),
        }
    }

    /// Remove the lock on `resource_id`, returning the former holder for
    /// history attribution. Returns `Ok(None)` when no lock existed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn delete_lock(&self, session_id: &str, resource_id: &str) -> Result<Option<String>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {e}")))?;

        let holder: Option<(String,)> = sqlx::query_as(
            "SELECT locked_by FROM resource_locks WHERE session_id = ?1 AND resource_id = ?2",
        )
        .bind(session_id)
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to query lock holder: {e}")))?;

        let Some((locked_by,)) = holder else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM resource_locks WHERE session_id = ?1 AND resource_id = ?2")
            .bind(session_id)
            .bind(resource_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete lock: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit lock removal: {e}")))?;

        debug!(session_id, resource_id, locked_by, "lock released");
        Ok(Some(locked_by))
    }

    /// List all locks in the session, in acquisition order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure, `Error::Parse` on
    /// undecodable rows.
    pub async fn list_locks(&self, session_id: &str) -> Result<Vec<ResourceLock>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT resource_id, locked_by, locked_at, resource_type
             FROM resource_locks WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list locks: {e}")))?;

        rows.into_iter().map(parse_lock_row).collect()
    }

    /// Check whether `resource_id` is currently locked.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn is_locked(&self, session_id: &str, resource_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM resource_locks WHERE session_id = ?1 AND resource_id = ?2",
        )
        .bind(session_id)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to query lock: {e}")))?;

        Ok(row.is_some())
    }

    /// Fetch up to `limit` history entries, newest first.
    ///
    /// Ordered by timestamp with insertion order as the tie-break, so
    /// same-instant entries keep their arrival order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure, `Error::Parse` on
    /// undecodable rows.
    pub async fn list_history(&self, session_id: &str, limit: u32) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT timestamp, agent_name, action, details
             FROM session_history WHERE session_id = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list history: {e}")))?;

        rows.into_iter().map(parse_history_row).collect()
    }

    /// Mark the session Completed: status + `updated_at`, all locks deleted,
    /// every agent set to Done, in one transaction. Readers never observe a
    /// partially applied completion.
    ///
    /// Safe to repeat; a second call re-stamps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn complete_session(&self, session_id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query("UPDATE sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1")
            .bind(session_id)
            .bind(SessionStatus::Completed.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to complete session: {e}")))?;

        sqlx::query("DELETE FROM resource_locks WHERE session_id = ?1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to release session locks: {e}")))?;

        sqlx::query("UPDATE session_agents SET status = ?2 WHERE session_id = ?1")
            .bind(session_id)
            .bind(AgentStatus::Done.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to finish agents: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit completion: {e}")))?;

        debug!(session_id, "session completed");
        Ok(())
    }
}

/// List all session ids across the store, newest-created first, optionally
/// filtered by status.
///
/// Returns an empty list when the database file does not exist yet; a
/// listing must not fail just because nothing was ever created.
///
/// # Errors
///
/// Returns `Error::Database` if an existing database cannot be read.
pub async fn list_sessions(
    path: &Path,
    status_filter: Option<SessionStatus>,
) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let store = SessionStore::open(path).await?;

    let rows: Vec<(String,)> = match status_filter {
        Some(status) => {
            sqlx::query_as(
                "SELECT session_id FROM sessions WHERE status = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )
            .bind(status.to_string())
            .fetch_all(store.pool())
            .await
        }
        None => {
            sqlx::query_as("SELECT session_id FROM sessions ORDER BY created_at DESC, rowid DESC")
                .fetch_all(store.pool())
                .await
        }
    }
    .map_err(|e| Error::Database(format!("Failed to list sessions: {e}")))?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// === PURE FUNCTIONS ===

/// SQLx surfaces constraint violations as database errors; the boolean
/// contract wants them as a plain "no".
fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.to_string().to_lowercase().contains("unique")
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("Invalid timestamp '{raw}': {e}")))
}

fn parse_json_blob(raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| Error::Parse(format!("Invalid JSON blob: {e}")))
    })
    .transpose()
}

fn parse_session_row(
    row: (String, String, String, String, Option<String>, Option<String>),
) -> Result<Session> {
    let (session_id, status, created_at, updated_at, context, metadata) = row;
    Ok(Session {
        session_id,
        status: status.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        context: parse_json_blob(context)?,
        metadata: parse_json_blob(metadata)?,
    })
}

fn parse_agent_row(row: (String, String, String, String, Option<String>)) -> Result<Agent> {
    let (agent_name, role, status, joined_at, current_task) = row;
    Ok(Agent {
        agent_name,
        role,
        status: status.parse()?,
        joined_at: parse_timestamp(&joined_at)?,
        current_task,
    })
}

fn parse_lock_row(row: (String, String, String, String)) -> Result<ResourceLock> {
    let (resource_id, locked_by, locked_at, resource_type) = row;
    Ok(ResourceLock {
        resource_id,
        locked_by,
        locked_at: parse_timestamp(&locked_at)?,
        resource_type,
    })
}

fn parse_history_row(row: (String, String, String, String)) -> Result<HistoryEntry> {
    let (timestamp, agent_name, action, details) = row;
    Ok(HistoryEntry {
        timestamp: parse_timestamp(&timestamp)?,
        agent_name,
        action,
        details,
    })
}

// === IMPERATIVE SHELL ===

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to initialize schema: {e}")))?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?1)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to set schema version: {e}")))?;

    Ok(())
}

async fn check_schema_version(pool: &SqlitePool) -> Result<()> {
    let version: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version")
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read schema version: {e}")))?;

    match version {
        Some((v,)) if v == CURRENT_SCHEMA_VERSION => Ok(()),
        Some((v,)) => Err(Error::Database(format!(
            "Schema version mismatch: database has version {v}, expected {CURRENT_SCHEMA_VERSION}"
        ))),
        None => Err(Error::Database(
            "Schema version not found in database; the file may be corrupted".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "build-feature-x";

    async fn setup() -> Result<SessionStore> {
        let store = SessionStore::open_in_memory().await?;
        store.create_or_load_session(SESSION).await?;
        Ok(store)
    }

    #[tokio::test]
    async fn create_or_load_is_idempotent() -> Result<()> {
        let store = SessionStore::open_in_memory().await?;

        let first = store.create_or_load_session(SESSION).await?;
        let second = store.create_or_load_session(SESSION).await?;

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.status, SessionStatus::Active);

        let history = store.list_history(SESSION, 50).await?;
        let created: Vec<_> = history
            .iter()
            .filter(|e| e.action == "session_created")
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].agent_name, SYSTEM_ACTOR);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_agent_insert_is_rejected() -> Result<()> {
        let store = setup().await?;

        assert!(store.insert_agent(SESSION, "FORGE", "planner").await?);
        assert!(!store.insert_agent(SESSION, "FORGE", "builder").await?);

        let agents = store.list_agents(SESSION).await?;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].role, "planner");
        assert_eq!(agents[0].status, AgentStatus::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn same_agent_name_is_free_in_another_session() -> Result<()> {
        let store = setup().await?;
        store.create_or_load_session("other").await?;

        assert!(store.insert_agent(SESSION, "FORGE", "planner").await?);
        assert!(store.insert_agent("other", "FORGE", "planner").await?);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_lock_insert_is_rejected() -> Result<()> {
        let store = setup().await?;

        assert!(store.insert_lock(SESSION, "spec.md", "FORGE", "file").await?);
        assert!(!store.insert_lock(SESSION, "spec.md", "BOLT", "file").await?);

        let locks = store.list_locks(SESSION).await?;
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].locked_by, "FORGE");
        Ok(())
    }

    #[tokio::test]
    async fn delete_agent_releases_only_its_locks() -> Result<()> {
        let store = setup().await?;
        store.insert_agent(SESSION, "FORGE", "planner").await?;
        store.insert_agent(SESSION, "BOLT", "builder").await?;
        store.insert_lock(SESSION, "a", "FORGE", "file").await?;
        store.insert_lock(SESSION, "b", "FORGE", "file").await?;
        store.insert_lock(SESSION, "c", "BOLT", "file").await?;

        assert!(store.delete_agent(SESSION, "FORGE").await?);

        let locks = store.list_locks(SESSION).await?;
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].resource_id, "c");

        let agents = store.list_agents(SESSION).await?;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_name, "BOLT");
        Ok(())
    }

    #[tokio::test]
    async fn delete_missing_agent_reports_false() -> Result<()> {
        let store = setup().await?;
        assert!(!store.delete_agent(SESSION, "GHOST").await?);
        Ok(())
    }

    #[tokio::test]
    async fn delete_lock_returns_former_holder() -> Result<()> {
        let store = setup().await?;
        store.insert_lock(SESSION, "spec.md", "FORGE", "file").await?;

        assert_eq!(
            store.delete_lock(SESSION, "spec.md").await?.as_deref(),
            Some("FORGE")
        );
        assert_eq!(store.delete_lock(SESSION, "spec.md").await?, None);
        assert!(!store.is_locked(SESSION, "spec.md").await?);
        Ok(())
    }

    #[tokio::test]
    async fn update_missing_agent_reports_false() -> Result<()> {
        let store = setup().await?;
        let updated = store
            .update_agent_status(SESSION, "GHOST", AgentStatus::Active, None)
            .await?;
        assert!(!updated);
        Ok(())
    }

    #[tokio::test]
    async fn update_agent_status_stores_task() -> Result<()> {
        let store = setup().await?;
        store.insert_agent(SESSION, "FORGE", "planner").await?;

        let updated = store
            .update_agent_status(SESSION, "FORGE", AgentStatus::Waiting, Some("review"))
            .await?;
        assert!(updated);

        let agents = store.list_agents(SESSION).await?;
        assert_eq!(agents[0].status, AgentStatus::Waiting);
        assert_eq!(agents[0].current_task.as_deref(), Some("review"));
        Ok(())
    }

    #[tokio::test]
    async fn complete_session_clears_locks_and_finishes_agents() -> Result<()> {
        let store = setup().await?;
        store.insert_agent(SESSION, "FORGE", "planner").await?;
        store.insert_agent(SESSION, "BOLT", "builder").await?;
        store.insert_lock(SESSION, "spec.md", "FORGE", "file").await?;

        store.complete_session(SESSION).await?;

        let session = store
            .get_session(SESSION)
            .await?
            .ok_or_else(|| Error::NotFound("session".into()))?;
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(store.list_locks(SESSION).await?.is_empty());
        assert!(store
            .list_agents(SESSION)
            .await?
            .iter()
            .all(|a| a.status == AgentStatus::Done));
        Ok(())
    }

    #[tokio::test]
    async fn complete_empty_session_is_fine() -> Result<()> {
        let store = setup().await?;
        store.complete_session(SESSION).await?;

        let session = store
            .get_session(SESSION)
            .await?
            .ok_or_else(|| Error::NotFound("session".into()))?;
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(store.list_locks(SESSION).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn complete_session_is_repeatable() -> Result<()> {
        let store = setup().await?;
        store.complete_session(SESSION).await?;
        store.complete_session(SESSION).await?;

        let session = store
            .get_session(SESSION)
            .await?
            .ok_or_else(|| Error::NotFound("session".into()))?;
        assert_eq!(session.status, SessionStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn terminal_session_rejects_mutations() -> Result<()> {
        let store = setup().await?;
        store.insert_agent(SESSION, "FORGE", "planner").await?;
        store.complete_session(SESSION).await?;

        assert!(!store.insert_agent(SESSION, "BOLT", "builder").await?);
        assert!(!store.insert_lock(SESSION, "spec.md", "FORGE", "file").await?);
        assert!(
            !store
                .update_agent_status(SESSION, "FORGE", AgentStatus::Active, None)
                .await?
        );
        assert!(!store.delete_agent(SESSION, "FORGE").await?);
        Ok(())
    }

    #[tokio::test]
    async fn history_is_returned_newest_first() -> Result<()> {
        let store = setup().await?;
        store.append_history(SESSION, "FORGE", "first", "").await?;
        store.append_history(SESSION, "FORGE", "second", "").await?;
        store.append_history(SESSION, "FORGE", "third", "").await?;

        let history = store.list_history(SESSION, 2).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "third");
        assert_eq!(history[1].action, "second");
        Ok(())
    }

    #[tokio::test]
    async fn find_agent_by_role_returns_first_join() -> Result<()> {
        let store = setup().await?;
        store.insert_agent(SESSION, "FORGE", "builder").await?;
        store.insert_agent(SESSION, "BOLT", "builder").await?;

        let agent = store
            .find_agent_by_role(SESSION, "builder")
            .await?
            .ok_or_else(|| Error::NotFound("agent".into()))?;
        assert_eq!(agent.agent_name, "FORGE");

        assert!(store.find_agent_by_role(SESSION, "tester").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_sessions_without_database_is_empty() -> Result<()> {
        let dir = tempfile::TempDir::new().map_err(|e| Error::Io(e.to_string()))?;
        let missing = dir.path().join("never-created.db");

        let sessions = list_sessions(&missing, None).await?;
        assert!(sessions.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn list_sessions_filters_by_status() -> Result<()> {
        let dir = tempfile::TempDir::new().map_err(|e| Error::Io(e.to_string()))?;
        let path = dir.path().join("huddle.db");

        let store = SessionStore::create_or_open(&path).await?;
        store.create_or_load_session("alpha").await?;
        store.create_or_load_session("beta").await?;
        store.complete_session("alpha").await?;

        let all = list_sessions(&path, None).await?;
        assert_eq!(all.len(), 2);

        let completed = list_sessions(&path, Some(SessionStatus::Completed)).await?;
        assert_eq!(completed, vec!["alpha".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn open_missing_database_fails() {
        let result = SessionStore::open(Path::new("/nonexistent/huddle.db")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
