// incident-store/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Integration Tests
// Description: Validate SQLite incident store behavior across restarts.
// Purpose: Ensure durable persistence and integrity checks survive reopening
//          the database file, not just a single in-process handle.
// Dependencies: incident-store, incident-core, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the `SQLite`-backed incident store, exercised
//! through its public interfaces rather than internal helpers.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test assertions read known-good values"
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use incident_core::AuditStore;
use incident_core::IssueId;
use incident_core::IssueState;
use incident_core::IssueStatus;
use incident_core::IssueStore;
use incident_store::SqliteIncidentStore;
use incident_store::SqliteStoreConfig;
use incident_store::SqliteStoreMode;
use incident_store::SqliteSyncMode;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn config_for(path: &std::path::Path) -> SqliteStoreConfig {
    SqliteStoreConfig {
        path: path.to_path_buf(),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn issue_state_survives_a_reopened_connection() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");

    let first_handle = SqliteIncidentStore::new(config_for(&path)).expect("store init");
    let mut issue = IssueState::new(IssueId::new("issue-1"));
    issue.status = IssueStatus::PatternDetected;
    first_handle.save(&issue).unwrap();
    drop(first_handle);

    let second_handle = SqliteIncidentStore::new(config_for(&path)).expect("store reopen");
    let loaded = second_handle.load(&issue.issue_id).unwrap().expect("issue present");
    assert_eq!(loaded, issue);
}

#[test]
fn rejects_a_store_path_that_is_a_directory() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("as-a-directory");
    std::fs::create_dir(&path).unwrap();
    let result = SqliteIncidentStore::new(config_for(&path));
    assert!(result.is_err());
}

#[test]
fn reopening_an_empty_database_initializes_a_fresh_schema() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.sqlite");
    let store = SqliteIncidentStore::new(config_for(&path)).expect("store init");
    assert!(store.list_open().unwrap().is_empty());
    let reopened = SqliteIncidentStore::new(config_for(&path)).expect("store reopen");
    assert!(reopened.list_open().unwrap().is_empty());
}

#[test]
fn audit_chain_is_empty_for_an_issue_with_no_entries() {
    let temp = TempDir::new().unwrap();
    let store = SqliteIncidentStore::new(config_for(&temp.path().join("store.sqlite")))
        .expect("store init");
    let chain = store.load_chain(&IssueId::new("issue-never-seen")).unwrap();
    assert!(chain.is_empty());
}
