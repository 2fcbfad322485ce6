// incident-store/src/lib.rs
// ============================================================================
// Module: SQLite Incident Store
// Description: Durable IssueStore, AuditStore, ConfigStore, and PatternCache
//              backends using SQLite WAL.
// Purpose: Provide production-grade persistence for the incident pipeline.
// Dependencies: incident-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides `SQLite`-backed implementations of
//! `incident_core::{IssueStore, AuditStore, ConfigStore, PatternCache}`. Every
//! write is canonical-JSON hashed before it touches disk and every read
//! re-verifies that hash, so storage corruption fails closed instead of
//! silently returning a tampered value.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_ENTRY_BYTES;
pub use store::SqliteIncidentStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
