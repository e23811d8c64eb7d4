// Integration tests have relaxed clippy settings.
// Production code (src/) must use strict zero-unwrap/panic patterns.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]
//! End-to-end coordination scenarios and concurrency races.
//!
//! Uses file-backed databases (tempfile) so that lock and agent races run
//! through real cross-connection `SQLite` transactions, not a single pooled
//! connection.

use std::path::PathBuf;

use huddle_core::{
    list_sessions, AgentStatus, Error, Result, SessionCoordinator, SessionStatus, SessionStore,
};
use tempfile::TempDir;

async fn file_backed_store() -> Result<(SessionStore, TempDir, PathBuf)> {
    let dir = TempDir::new().map_err(|e| Error::Io(e.to_string()))?;
    let path = dir.path().join("huddle.db");
    let store = SessionStore::create_or_open(&path).await?;
    Ok((store, dir, path))
}

// ========================================================================
// Mutual exclusion under real concurrency
// ========================================================================

#[tokio::test]
async fn racing_lock_claims_grant_exactly_one() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "race-locks").await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .lock_resource("spec.md", &format!("agent-{i}"), None)
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        let acquired = handle.await.expect("task panicked")?;
        if acquired {
            granted += 1;
        }
    }

    assert_eq!(granted, 1, "exactly one racer may win the lock");
    let locks = coordinator.locks().await?;
    assert_eq!(locks.len(), 1);
    Ok(())
}

#[tokio::test]
async fn racing_agent_adds_register_exactly_one() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "race-agents").await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(
            async move { coordinator.add_agent("FORGE", "planner").await },
        ));
    }

    let mut added = 0;
    for handle in handles {
        if handle.await.expect("task panicked")? {
            added += 1;
        }
    }

    assert_eq!(added, 1);
    let agents = coordinator.agents().await?;
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].role, "planner");

    // Exactly one agent_joined entry made it into the audit trail.
    let joined = coordinator
        .get_history(None)
        .await?
        .into_iter()
        .filter(|e| e.action == "agent_joined")
        .count();
    assert_eq!(joined, 1);
    Ok(())
}

#[tokio::test]
async fn racing_session_creation_keeps_one_row() -> Result<()> {
    let (store, _dir, path) = file_backed_store().await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.create_or_load_session("race-create").await
        }));
    }

    let mut created_ats = Vec::new();
    for handle in handles {
        created_ats.push(handle.await.expect("task panicked")?.created_at);
    }
    assert!(created_ats.windows(2).all(|w| w[0] == w[1]));

    let sessions = list_sessions(&path, None).await?;
    assert_eq!(sessions, vec!["race-create".to_string()]);
    Ok(())
}

// ========================================================================
// Spec scenarios
// ========================================================================

// Scenario A: lock handoff between two agents.
#[tokio::test]
async fn scenario_a_lock_handoff() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "scenario-a").await?;

    assert!(coordinator.add_agent("FORGE", "planner").await?);
    assert!(coordinator.add_agent("BOLT", "builder").await?);

    assert!(coordinator.lock_resource("spec.md", "FORGE", None).await?);
    assert!(!coordinator.lock_resource("spec.md", "BOLT", None).await?);
    assert!(coordinator.is_locked("spec.md").await?);

    assert!(coordinator.unlock_resource("spec.md").await?);
    assert!(coordinator.lock_resource("spec.md", "BOLT", None).await?);

    let locks = coordinator.locks().await?;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].locked_by, "BOLT");
    Ok(())
}

// Scenario B: removing an agent releases everything it held.
#[tokio::test]
async fn scenario_b_removal_cascades_locks() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "scenario-b").await?;

    coordinator.add_agent("FORGE", "planner").await?;
    coordinator.lock_resource("a", "FORGE", None).await?;
    coordinator.lock_resource("b", "FORGE", None).await?;

    assert!(coordinator.remove_agent("FORGE").await?);

    assert!(coordinator.locks().await?.is_empty());
    assert!(coordinator
        .agents()
        .await?
        .iter()
        .all(|a| a.agent_name != "FORGE"));
    Ok(())
}

// Scenario C: notifying an unassigned role changes nothing at all.
#[tokio::test]
async fn scenario_c_notify_unassigned_role_is_inert() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "scenario-c").await?;
    coordinator.add_agent("FORGE", "planner").await?;

    let history_before = coordinator.get_history(None).await?.len();
    let agents_before = coordinator.agents().await?;

    assert!(!coordinator.notify_next_role("builder").await?);

    assert_eq!(coordinator.get_history(None).await?.len(), history_before);
    assert_eq!(coordinator.agents().await?, agents_before);
    Ok(())
}

// Scenario D: full lifecycle through roles to completion.
#[tokio::test]
async fn scenario_d_full_lifecycle() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "scenario-d").await?;

    for (name, role) in [("FORGE", "planner"), ("BOLT", "builder"), ("PROBE", "tester")] {
        assert!(coordinator.add_agent(name, role).await?);
    }

    for (name, role) in [("FORGE", "planner"), ("BOLT", "builder"), ("PROBE", "tester")] {
        assert!(coordinator.notify_next_role(role).await?);
        assert!(coordinator.lock_resource("workspace", name, None).await?);
        assert!(coordinator.unlock_resource("workspace").await?);
    }

    assert!(coordinator.complete_session().await?);

    let snapshot = coordinator.get_status().await?;
    assert_eq!(snapshot.session.status, SessionStatus::Completed);
    assert!(snapshot.locks.is_empty());
    assert_eq!(snapshot.agents.len(), 3);
    assert!(snapshot
        .agents
        .iter()
        .all(|a| a.status == AgentStatus::Done));

    let history = coordinator.get_history(Some(100)).await?;
    assert!(history.len() >= 10, "got {} entries", history.len());
    Ok(())
}

// ========================================================================
// Snapshot semantics around completion
// ========================================================================

// Completion flips locks and agents inside one store transaction, so even a
// snapshot racing it never sees locks cleared while an agent is still
// mid-flight. The four snapshot reads themselves are not atomic as a set.
#[tokio::test]
async fn snapshot_raced_with_completion_stays_transaction_consistent() -> Result<()> {
    let (store, _dir, _path) = file_backed_store().await?;
    let coordinator = SessionCoordinator::attach(store, "race-complete").await?;
    coordinator.add_agent("FORGE", "planner").await?;
    coordinator.add_agent("BOLT", "builder").await?;
    coordinator.lock_resource("spec.md", "FORGE", None).await?;

    let completer = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.complete_session().await })
    };
    let snapshot = coordinator.get_status().await?;
    completer.await.expect("task panicked")?;

    // Either view is valid; a half-applied completion is not.
    match snapshot.session.status {
        SessionStatus::Completed => {
            assert!(snapshot.locks.is_empty());
        }
        SessionStatus::Active => {}
        other => panic!("unexpected status {other}"),
    }

    let settled = coordinator.get_status().await?;
    assert_eq!(settled.session.status, SessionStatus::Completed);
    assert!(settled.locks.is_empty());
    assert!(settled
        .agents
        .iter()
        .all(|a| a.status == AgentStatus::Done));
    Ok(())
}

// ========================================================================
// Cross-process style reopen
// ========================================================================

#[tokio::test]
async fn state_survives_reopening_the_store() -> Result<()> {
    let (store, _dir, path) = file_backed_store().await?;
    {
        let coordinator = SessionCoordinator::attach(store, "durable").await?;
        coordinator.add_agent("FORGE", "planner").await?;
        coordinator.lock_resource("spec.md", "FORGE", None).await?;
    }

    let reopened = SessionStore::open(&path).await?;
    let coordinator = SessionCoordinator::attach(reopened, "durable").await?;

    let snapshot = coordinator.get_status().await?;
    assert_eq!(snapshot.agents.len(), 1);
    assert_eq!(snapshot.locks.len(), 1);

    // Re-attaching never logs a second session_created.
    let created = coordinator
        .get_history(None)
        .await?
        .into_iter()
        .filter(|e| e.action == "session_created")
        .count();
    assert_eq!(created, 1);
    Ok(())
}

#[tokio::test]
async fn list_sessions_orders_newest_first() -> Result<()> {
    let (store, _dir, path) = file_backed_store().await?;
    store.create_or_load_session("first").await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.create_or_load_session("second").await?;

    let sessions = list_sessions(&path, None).await?;
    assert_eq!(sessions, vec!["second".to_string(), "first".to_string()]);

    let active = list_sessions(&path, Some(SessionStatus::Active)).await?;
    assert_eq!(active.len(), 2);
    Ok(())
}
