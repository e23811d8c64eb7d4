//! Agent-facing coordination API over the state store.
//!
//! Every mutating method maps to one atomic store operation and appends
//! exactly one history entry on success; failed preconditions (`Ok(false)`)
//! leave the history untouched. The notifier is injected at construction and
//! its failures are logged and discarded, never surfaced.

use std::sync::Arc;

use tracing::warn;

use crate::{
    notify::{NoopNotifier, Notifier, NotifyPriority},
    store::SessionStore,
    types::{Agent, AgentStatus, HistoryEntry, ResourceLock, SessionSnapshot, SYSTEM_ACTOR},
    Error, Result,
};

/// Default number of history entries returned by [`SessionCoordinator::get_history`].
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// How many history entries a status snapshot fetches, and how many of those
/// it keeps.
const SNAPSHOT_HISTORY_FETCH: u32 = 10;
const SNAPSHOT_HISTORY_KEEP: usize = 5;

/// Coordinates agents collaborating in one session.
#[derive(Clone)]
pub struct SessionCoordinator {
    store: SessionStore,
    session_id: String,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Attach to a session, creating it if absent, with no notification
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the session row cannot be created or
    /// loaded.
    pub async fn attach(store: SessionStore, session_id: &str) -> Result<Self> {
        Self::attach_with_notifier(store, session_id, Arc::new(NoopNotifier)).await
    }

    /// Attach to a session with an explicit notification channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the session row cannot be created or
    /// loaded.
    pub async fn attach_with_notifier(
        store: SessionStore,
        session_id: &str,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        store.create_or_load_session(session_id).await?;
        Ok(Self {
            store,
            session_id: session_id.to_string(),
            notifier,
        })
    }

    /// The session this coordinator operates on.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register an agent under `role`, starting Idle.
    ///
    /// Returns `Ok(false)` when the name is already taken or the session is
    /// terminal; nothing is logged in that case.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn add_agent(&self, agent_name: &str, role: &str) -> Result<bool> {
        let added = self
            .store
            .insert_agent(&self.session_id, agent_name, role)
            .await?;
        if added {
            self.store
                .append_history(&self.session_id, agent_name, "agent_joined", &format!("Role: {role}"))
                .await?;
        }
        Ok(added)
    }

    /// Remove an agent and release every lock it holds.
    ///
    /// Returns `Ok(false)` when no such agent exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn remove_agent(&self, agent_name: &str) -> Result<bool> {
        let removed = self.store.delete_agent(&self.session_id, agent_name).await?;
        if removed {
            self.store
                .append_history(
                    &self.session_id,
                    agent_name,
                    "agent_left",
                    "Removed from session",
                )
                .await?;
        }
        Ok(removed)
    }

    /// Claim an exclusive lock on `resource_id` for `agent_name`.
    ///
    /// Non-blocking: returns `Ok(false)` immediately when the resource is
    /// already locked. `resource_type` defaults to `"file"`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn lock_resource(
        &self,
        resource_id: &str,
        agent_name: &str,
        resource_type: Option<&str>,
    ) -> Result<bool> {
        let resource_type = resource_type.unwrap_or("file");
        let locked = self
            .store
            .insert_lock(&self.session_id, resource_id, agent_name, resource_type)
            .await?;
        if locked {
            self.store
                .append_history(
                    &self.session_id,
                    agent_name,
                    "resource_locked",
                    &format!("Resource: {resource_id} ({resource_type})"),
                )
                .await?;
        }
        Ok(locked)
    }

    /// Release the lock on `resource_id`.
    ///
    /// The history entry is attributed to the agent that held the lock, not
    /// the caller. Returns `Ok(false)` when no lock existed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn unlock_resource(&self, resource_id: &str) -> Result<bool> {
        match self.store.delete_lock(&self.session_id, resource_id).await? {
            Some(former_holder) => {
                self.store
                    .append_history(
                        &self.session_id,
                        &former_holder,
                        "resource_unlocked",
                        &format!("Resource: {resource_id}"),
                    )
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Check whether `resource_id` is currently locked.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn is_locked(&self, resource_id: &str) -> Result<bool> {
        self.store.is_locked(&self.session_id, resource_id).await
    }

    /// Set an agent's status and current task.
    ///
    /// Returns `Ok(false)` when no such agent exists or the session is
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn update_agent_status(
        &self,
        agent_name: &str,
        status: AgentStatus,
        current_task: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .store
            .update_agent_status(&self.session_id, agent_name, status, current_task)
            .await?;
        if updated {
            let task = current_task.unwrap_or("none");
            self.store
                .append_history(
                    &self.session_id,
                    agent_name,
                    "status_updated",
                    &format!("Status: {status}, Task: {task}"),
                )
                .await?;
        }
        Ok(updated)
    }

    /// Find the agent assigned to `role`.
    ///
    /// Roles are not unique; the earliest-joined match wins.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn get_agent_by_role(&self, role: &str) -> Result<Option<Agent>> {
        self.store.find_agent_by_role(&self.session_id, role).await
    }

    /// Hand the turn to the agent assigned to `role`.
    ///
    /// Sets that agent Active with a synthesized task, dispatches a
    /// best-effort notification, and logs `role_notified` as SYSTEM. Returns
    /// `Ok(false)` with zero side effects when no agent holds the role (or
    /// the session is terminal). Returns `Ok(true)` whether or not the
    /// notification was delivered.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure. Notifier failures are
    /// logged and discarded.
    pub async fn notify_next_role(&self, role: &str) -> Result<bool> {
        let Some(agent) = self.store.find_agent_by_role(&self.session_id, role).await? else {
            return Ok(false);
        };

        let task = format!("Ready to work on {role} tasks");
        let activated = self
            .store
            .update_agent_status(
                &self.session_id,
                &agent.agent_name,
                AgentStatus::Active,
                Some(&task),
            )
            .await?;
        if !activated {
            return Ok(false);
        }

        let subject = format!("Your turn - {}", self.session_id);
        let body = format!(
            "Session: {}\nRole: {role}\nStatus: active - ready to start work\n\nCheck the session status for details.",
            self.session_id
        );
        if let Err(e) = self
            .notifier
            .notify(&agent.agent_name, &subject, &body, NotifyPriority::Normal)
            .await
        {
            warn!(
                session_id = %self.session_id,
                agent = %agent.agent_name,
                error = %e,
                "notification dispatch failed; continuing"
            );
        }

        self.store
            .append_history(
                &self.session_id,
                SYSTEM_ACTOR,
                "role_notified",
                &format!("Notified {} ({role})", agent.agent_name),
            )
            .await?;
        Ok(true)
    }

    /// Mark the session Completed, releasing all locks and finishing all
    /// agents.
    ///
    /// Idempotent: repeating the call re-stamps `updated_at` and logs
    /// another `session_completed` entry. Always returns `Ok(true)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn complete_session(&self) -> Result<bool> {
        self.store.complete_session(&self.session_id).await?;
        self.store
            .append_history(
                &self.session_id,
                SYSTEM_ACTOR,
                "session_completed",
                "Session marked as complete",
            )
            .await?;
        Ok(true)
    }

    /// Aggregate the session row, agents, locks, and the most recent history
    /// into one view.
    ///
    /// The four reads are not atomic as a set; a snapshot raced with a
    /// concurrent mutation may mix state from adjacent instants. Each
    /// individual read is still consistent.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the session row has vanished,
    /// `Error::Database` on storage failure.
    pub async fn get_status(&self) -> Result<SessionSnapshot> {
        let session = self
            .store
            .get_session(&self.session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session '{}' not found", self.session_id)))?;
        let agents = self.store.list_agents(&self.session_id).await?;
        let locks = self.store.list_locks(&self.session_id).await?;
        let mut recent_history = self
            .store
            .list_history(&self.session_id, SNAPSHOT_HISTORY_FETCH)
            .await?;
        recent_history.truncate(SNAPSHOT_HISTORY_KEEP);

        Ok(SessionSnapshot {
            session,
            agents,
            locks,
            recent_history,
        })
    }

    /// Fetch up to `limit` history entries, newest first. `None` means the
    /// default of 50.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn get_history(&self, limit: Option<u32>) -> Result<Vec<HistoryEntry>> {
        self.store
            .list_history(&self.session_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// List all agents in join order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn agents(&self) -> Result<Vec<Agent>> {
        self.store.list_agents(&self.session_id).await
    }

    /// List all held locks in acquisition order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` on storage failure.
    pub async fn locks(&self) -> Result<Vec<ResourceLock>> {
        self.store.list_locks(&self.session_id).await
    }
}
