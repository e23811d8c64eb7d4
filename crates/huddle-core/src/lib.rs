//! Session coordination core for multi-agent collaboration.
//!
//! Tracks who participates in a shared session, which resources are
//! exclusively held, and an append-only audit trail of every state change.
//! The [`SessionStore`] owns persistence; the [`SessionCoordinator`] is the
//! agent-facing API on top of it; the [`Notifier`] seam carries best-effort
//! turn handoffs.
//!
//! Locks are exclusive, whole-resource, and non-blocking: a contended
//! [`SessionCoordinator::lock_resource`] returns `false` immediately. There
//! is no queueing, no deadlock detection, and no multi-writer replication.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod coordinator;
pub mod error;
pub mod notify;
pub mod store;
pub mod types;

pub use coordinator::SessionCoordinator;
pub use error::{Error, Result};
pub use notify::{NoopNotifier, Notifier, NotifyPriority};
pub use store::{list_sessions, SessionStore};
pub use types::{
    Agent, AgentStatus, HistoryEntry, ResourceLock, Session, SessionSnapshot, SessionStatus,
    SYSTEM_ACTOR,
};
