// incident-store/src/store.rs
// ============================================================================
// Module: SQLite Incident Store
// Description: Durable IssueStore, AuditStore, ConfigStore, and PatternCache
//              backed by SQLite WAL.
// Purpose: Persist issue aggregates, audit chains, config changes, and the
//          pattern cache with deterministic, hash-verified serialization.
// Dependencies: incident-core, rusqlite, serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! This module implements durable [`IssueStore`], [`AuditStore`],
//! [`ConfigStore`], and [`PatternCache`] backends using `SQLite`. Every
//! record is written as RFC 8785 canonical JSON alongside a stored hash;
//! loads recompute the hash and fail closed (`Corrupt`) on mismatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use incident_core::AuditEntry;
use incident_core::AuditStore;
use incident_core::ChangeId;
use incident_core::ConfigChange;
use incident_core::ConfigSnapshot;
use incident_core::ConfigStore;
use incident_core::IssueId;
use incident_core::IssueState;
use incident_core::IssueStatus;
use incident_core::Pattern;
use incident_core::PatternCache;
use incident_core::PatternId;
use incident_core::StoreError;
use incident_core::Timestamp;
use incident_core::hashing::DEFAULT_HASH_ALGORITHM;
use incident_core::hashing::HashAlgorithm;
use incident_core::hashing::canonical_json_bytes;
use incident_core::hashing::hash_bytes;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum size, in bytes, accepted for a single stored record.
pub const MAX_ENTRY_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` incident store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store payload exceeded configured size limits.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Io(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) | SqliteStoreError::Invalid(message) => {
                Self::Invalid(message)
            }
            SqliteStoreError::TooLarge { max_bytes, actual_bytes } => Self::Invalid(format!(
                "payload exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed incident store with WAL support.
///
/// Implements [`IssueStore`], [`AuditStore`], [`ConfigStore`], and
/// [`PatternCache`] against the same connection, so a single handle can back
/// every persistence seam the orchestrator needs.
#[derive(Clone)]
pub struct SqliteIncidentStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteIncidentStore {
    /// Opens a `SQLite`-backed incident store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Locks the shared connection, mapping poison errors to [`StoreError`].
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Io("store mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: IssueStore
// ============================================================================

impl IssueStore for SqliteIncidentStore {
    fn load(&self, issue_id: &IssueId) -> Result<Option<IssueState>, StoreError> {
        let guard = self.lock()?;
        let row: Option<(Vec<u8>, String, String)> = guard
            .query_row(
                "SELECT state_json, state_hash, hash_algorithm FROM issues WHERE issue_id = ?1",
                params![issue_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(guard);
        let Some((state_json, state_hash, hash_algorithm)) = row else {
            return Ok(None);
        };
        let algorithm = parse_hash_algorithm(&hash_algorithm)?;
        let expected = hash_bytes(algorithm, &state_json);
        if expected.value != state_hash {
            return Err(StoreError::Corrupt(format!(
                "issue state hash mismatch for {}",
                issue_id.as_str()
            )));
        }
        let state: IssueState =
            serde_json::from_slice(&state_json).map_err(|err| StoreError::Invalid(err.to_string()))?;
        Ok(Some(state))
    }

    fn save(&self, state: &IssueState) -> Result<(), StoreError> {
        let canonical_json =
            canonical_json_bytes(state).map_err(|err| StoreError::Invalid(err.to_string()))?;
        check_entry_size(&canonical_json)?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &canonical_json);
        let updated_at = Timestamp::now().to_rfc3339().map_err(|err| StoreError::Io(err.to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO issues (issue_id, status, state_json, state_hash, hash_algorithm, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(issue_id) DO UPDATE SET \
                 status = excluded.status, state_json = excluded.state_json, state_hash = \
                 excluded.state_hash, hash_algorithm = excluded.hash_algorithm, updated_at = \
                 excluded.updated_at",
                params![
                    state.issue_id.as_str(),
                    issue_status_label(state.status),
                    canonical_json,
                    digest.value,
                    hash_algorithm_label(digest.algorithm),
                    updated_at
                ],
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    fn list_open(&self) -> Result<Vec<IssueId>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT issue_id FROM issues WHERE status NOT IN (?1, ?2) ORDER BY updated_at ASC",
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let ids = statement
            .query_map(
                params![
                    issue_status_label(IssueStatus::ActionExecuted),
                    issue_status_label(IssueStatus::ActionFailed)
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(|err| StoreError::Io(err.to_string()))?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(statement);
        drop(guard);
        Ok(ids.into_iter().map(IssueId::new).collect())
    }
}

// ============================================================================
// SECTION: AuditStore
// ============================================================================

impl AuditStore for SqliteIncidentStore {
    fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let canonical_json =
            canonical_json_bytes(entry).map_err(|err| StoreError::Invalid(err.to_string()))?;
        check_entry_size(&canonical_json)?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &canonical_json);
        let timestamp =
            entry.timestamp.to_rfc3339().map_err(|err| StoreError::Io(err.to_string()))?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Io(err.to_string()))?;
        let last_hash: Option<String> = tx
            .query_row(
                "SELECT entry_json FROM audit_entries WHERE issue_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![entry.issue_id.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|err| StoreError::Io(err.to_string()))?
            .map(|bytes| {
                serde_json::from_slice::<AuditEntry>(&bytes)
                    .map(|last| last.hash)
                    .map_err(|err| StoreError::Invalid(err.to_string()))
            })
            .transpose()?;
        let expected_previous = last_hash.unwrap_or_default();
        if entry.previous_hash != expected_previous {
            return Err(StoreError::Invalid(format!(
                "audit chain link mismatch for issue {}",
                entry.issue_id.as_str()
            )));
        }
        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM audit_entries WHERE issue_id = ?1",
                params![entry.issue_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        tx.execute(
            "INSERT INTO audit_entries (issue_id, seq, audit_id, timestamp, entry_json, \
             entry_hash, hash_algorithm) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.issue_id.as_str(),
                next_seq,
                entry.audit_id.as_str(),
                timestamp,
                canonical_json,
                digest.value,
                hash_algorithm_label(digest.algorithm)
            ],
        )
        .map_err(|err| StoreError::Io(err.to_string()))?;
        tx.commit().map_err(|err| StoreError::Io(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    fn load_chain(&self, issue_id: &IssueId) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT entry_json, entry_hash, hash_algorithm FROM audit_entries WHERE issue_id \
                 = ?1 ORDER BY seq ASC",
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let rows = statement
            .query_map(params![issue_id.as_str()], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(|err| StoreError::Io(err.to_string()))?
            .collect::<Result<Vec<_>, rusqlite::Error>>()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(statement);
        drop(guard);
        rows.into_iter()
            .map(|(entry_json, entry_hash, hash_algorithm)| {
                let algorithm = parse_hash_algorithm(&hash_algorithm)?;
                let expected = hash_bytes(algorithm, &entry_json);
                if expected.value != entry_hash {
                    return Err(StoreError::Corrupt(format!(
                        "audit entry hash mismatch for issue {}",
                        issue_id.as_str()
                    )));
                }
                serde_json::from_slice(&entry_json).map_err(|err| StoreError::Invalid(err.to_string()))
            })
            .collect()
    }
}

// ============================================================================
// SECTION: ConfigStore
// ============================================================================

impl ConfigStore for SqliteIncidentStore {
    fn record_change(&self, change: &ConfigChange) -> Result<(), StoreError> {
        let canonical_json =
            canonical_json_bytes(change).map_err(|err| StoreError::Invalid(err.to_string()))?;
        check_entry_size(&canonical_json)?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &canonical_json);
        let timestamp =
            change.timestamp.to_rfc3339().map_err(|err| StoreError::Io(err.to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO config_changes (resource_type, resource_id, change_id, timestamp, \
                 change_json, change_hash, hash_algorithm) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(resource_type, resource_id, change_id) DO UPDATE SET timestamp = \
                 excluded.timestamp, change_json = excluded.change_json, change_hash = \
                 excluded.change_hash, hash_algorithm = excluded.hash_algorithm",
                params![
                    change.resource_type,
                    change.resource_id,
                    change.change_id.as_str(),
                    timestamp,
                    canonical_json,
                    digest.value,
                    hash_algorithm_label(digest.algorithm)
                ],
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    fn latest_change(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ConfigChange>, StoreError> {
        let guard = self.lock()?;
        let row: Option<(Vec<u8>, String, String)> = guard
            .query_row(
                "SELECT change_json, change_hash, hash_algorithm FROM config_changes WHERE \
                 resource_type = ?1 AND resource_id = ?2 ORDER BY timestamp DESC, rowid DESC \
                 LIMIT 1",
                params![resource_type, resource_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(guard);
        let Some((change_json, change_hash, hash_algorithm)) = row else {
            return Ok(None);
        };
        let algorithm = parse_hash_algorithm(&hash_algorithm)?;
        let expected = hash_bytes(algorithm, &change_json);
        if expected.value != change_hash {
            return Err(StoreError::Corrupt(format!(
                "config change hash mismatch for {resource_type}/{resource_id}"
            )));
        }
        let change: ConfigChange =
            serde_json::from_slice(&change_json).map_err(|err| StoreError::Invalid(err.to_string()))?;
        Ok(Some(change))
    }

    fn get_change(&self, change_id: &ChangeId) -> Result<Option<ConfigChange>, StoreError> {
        let guard = self.lock()?;
        let row: Option<(Vec<u8>, String, String)> = guard
            .query_row(
                "SELECT change_json, change_hash, hash_algorithm FROM config_changes WHERE \
                 change_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                params![change_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        drop(guard);
        let Some((change_json, change_hash, hash_algorithm)) = row else {
            return Ok(None);
        };
        let algorithm = parse_hash_algorithm(&hash_algorithm)?;
        let expected = hash_bytes(algorithm, &change_json);
        if expected.value != change_hash {
            return Err(StoreError::Corrupt(format!(
                "config change hash mismatch for change {}",
                change_id.as_str()
            )));
        }
        let change: ConfigChange =
            serde_json::from_slice(&change_json).map_err(|err| StoreError::Invalid(err.to_string()))?;
        Ok(Some(change))
    }

    fn current_snapshot(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ConfigSnapshot>, StoreError> {
        Ok(self.latest_change(resource_type, resource_id)?.map(|change| change.after_snapshot))
    }
}

// ============================================================================
// SECTION: PatternCache
// ============================================================================

impl PatternCache for SqliteIncidentStore {
    fn get(&self, pattern_id: &PatternId) -> Option<Pattern> {
        let guard = self.connection.lock().ok()?;
        let row: Option<Vec<u8>> = guard
            .query_row(
                "SELECT pattern_json FROM pattern_cache WHERE pattern_id = ?1",
                params![pattern_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        drop(guard);
        row.and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    fn put(&self, pattern: Pattern) {
        let Ok(canonical_json) = canonical_json_bytes(&pattern) else {
            return;
        };
        let Ok(last_seen) = pattern.last_seen.to_rfc3339() else {
            return;
        };
        let Ok(guard) = self.connection.lock() else {
            return;
        };
        let _ignored = guard.execute(
            "INSERT INTO pattern_cache (pattern_id, pattern_json, last_seen) VALUES (?1, ?2, ?3) \
             ON CONFLICT(pattern_id) DO UPDATE SET pattern_json = excluded.pattern_json, \
             last_seen = excluded.last_seen",
            params![pattern.pattern_id.as_str(), canonical_json, last_seen],
        );
        drop(guard);
    }

    fn all(&self) -> Vec<Pattern> {
        let Ok(guard) = self.connection.lock() else {
            return Vec::new();
        };
        let Ok(mut statement) = guard.prepare("SELECT pattern_json FROM pattern_cache") else {
            return Vec::new();
        };
        let patterns = statement
            .query_map(params![], |row| row.get::<_, Vec<u8>>(0))
            .map(|rows| {
                rows.filter_map(Result::ok)
                    .filter_map(|bytes| serde_json::from_slice(&bytes).ok())
                    .collect()
            })
            .unwrap_or_default();
        drop(statement);
        drop(guard);
        patterns
    }

    fn evict_expired(&self, now: Timestamp, window_seconds: i64) {
        let Ok(guard) = self.connection.lock() else {
            return;
        };
        let Ok(mut statement) = guard.prepare("SELECT pattern_id, last_seen FROM pattern_cache")
        else {
            return;
        };
        let Ok(rows) = statement
            .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map(|rows| rows.filter_map(Result::ok).collect::<Vec<_>>())
        else {
            return;
        };
        drop(statement);
        let window = time::Duration::seconds(window_seconds.max(0));
        for (pattern_id, last_seen) in rows {
            let Ok(last_seen) = Timestamp::parse(&last_seen) else {
                continue;
            };
            if now.saturating_duration_since(last_seen) > window {
                let _ignored = guard
                    .execute("DELETE FROM pattern_cache WHERE pattern_id = ?1", params![pattern_id]);
            }
        }
        drop(guard);
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS issues (
                    issue_id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    state_json BLOB NOT NULL,
                    state_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_issues_status ON issues (status);
                CREATE TABLE IF NOT EXISTS audit_entries (
                    issue_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    audit_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    entry_json BLOB NOT NULL,
                    entry_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    PRIMARY KEY (issue_id, seq)
                );
                CREATE INDEX IF NOT EXISTS idx_audit_entries_issue ON audit_entries (issue_id);
                CREATE TABLE IF NOT EXISTS config_changes (
                    resource_type TEXT NOT NULL,
                    resource_id TEXT NOT NULL,
                    change_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    change_json BLOB NOT NULL,
                    change_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    PRIMARY KEY (resource_type, resource_id, change_id)
                );
                CREATE INDEX IF NOT EXISTS idx_config_changes_resource
                    ON config_changes (resource_type, resource_id, timestamp);
                CREATE INDEX IF NOT EXISTS idx_config_changes_change_id
                    ON config_changes (change_id);
                CREATE TABLE IF NOT EXISTS pattern_cache (
                    pattern_id TEXT PRIMARY KEY,
                    pattern_json BLOB NOT NULL,
                    last_seen TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_pattern_cache_last_seen
                    ON pattern_cache (last_seen);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Returns the stable wire label for an [`IssueStatus`].
const fn issue_status_label(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::New => "new",
        IssueStatus::Observing => "observing",
        IssueStatus::PatternDetected => "pattern_detected",
        IssueStatus::Analyzed => "analyzed",
        IssueStatus::Decided => "decided",
        IssueStatus::ActionExecuted => "action_executed",
        IssueStatus::ActionFailed => "action_failed",
        IssueStatus::PendingApproval => "pending_approval",
    }
}

/// Returns the stable wire label for a [`HashAlgorithm`].
const fn hash_algorithm_label(algorithm: HashAlgorithm) -> &'static str {
    match algorithm {
        HashAlgorithm::Sha256 => "sha256",
    }
}

/// Parses a stored hash algorithm label.
fn parse_hash_algorithm(label: &str) -> Result<HashAlgorithm, StoreError> {
    match label {
        "sha256" => Ok(HashAlgorithm::Sha256),
        other => Err(StoreError::Invalid(format!("unknown hash algorithm: {other}"))),
    }
}

/// Rejects canonical JSON payloads larger than [`MAX_ENTRY_BYTES`].
fn check_entry_size(bytes: &[u8]) -> Result<(), StoreError> {
    if bytes.len() > MAX_ENTRY_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_ENTRY_BYTES,
            actual_bytes: bytes.len(),
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions read known-good values")]

    use std::collections::BTreeMap;

    use incident_core::Action;
    use incident_core::ActionId;
    use incident_core::ActionResult;
    use incident_core::ActionType;
    use incident_core::AuditId;
    use incident_core::ChangeId;
    use incident_core::MerchantId;
    use incident_core::PatternType;
    use incident_core::RiskLevel;
    use incident_core::SnapshotId;
    use incident_core::compute_entry_hash;
    use tempfile::TempDir;

    use super::*;

    fn store_for(path: &Path) -> SqliteIncidentStore {
        let config = SqliteStoreConfig {
            path: path.to_path_buf(),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Full,
        };
        SqliteIncidentStore::new(config).expect("store init")
    }

    fn sample_issue(issue_id: &str) -> IssueState {
        IssueState::new(IssueId::new(issue_id))
    }

    #[test]
    fn issue_round_trips_through_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let mut issue = sample_issue("issue-1");
        issue.status = IssueStatus::Observing;
        store.save(&issue).unwrap();
        let loaded = store.load(&issue.issue_id).unwrap().expect("issue present");
        assert_eq!(loaded, issue);
    }

    #[test]
    fn list_open_excludes_terminal_statuses() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let mut open = sample_issue("issue-open");
        open.status = IssueStatus::Observing;
        let mut closed = sample_issue("issue-closed");
        closed.status = IssueStatus::ActionExecuted;
        store.save(&open).unwrap();
        store.save(&closed).unwrap();
        let ids = store.list_open().unwrap();
        assert_eq!(ids, vec![open.issue_id]);
    }

    fn build_entry(issue_id: &IssueId, audit_id: &str, previous_hash: &str) -> AuditEntry {
        let timestamp = Timestamp::now();
        let timestamp_text = timestamp.to_rfc3339().unwrap();
        let inputs = BTreeMap::new();
        let outputs = BTreeMap::new();
        let reasoning = BTreeMap::new();
        let hash = compute_entry_hash(
            &timestamp_text,
            issue_id.as_str(),
            "stage_completed",
            "orchestrator",
            &inputs,
            &outputs,
            &reasoning,
            previous_hash,
        )
        .unwrap();
        AuditEntry {
            audit_id: AuditId::new(audit_id),
            timestamp,
            issue_id: issue_id.clone(),
            event_type: "stage_completed".to_string(),
            actor: "orchestrator".to_string(),
            inputs,
            outputs,
            reasoning,
            hash,
            previous_hash: previous_hash.to_string(),
        }
    }

    #[test]
    fn audit_chain_rejects_broken_link() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let issue_id = IssueId::new("issue-1");
        let first = build_entry(&issue_id, "audit-1", "");
        store.append(&first).unwrap();

        let broken = build_entry(&issue_id, "audit-2", "not-the-real-hash");
        let err = store.append(&broken).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn audit_chain_loads_in_append_order() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let issue_id = IssueId::new("issue-1");
        let mut previous_hash = String::new();
        for index in 0..3 {
            let entry = build_entry(&issue_id, &format!("audit-{index}"), &previous_hash);
            previous_hash = entry.hash.clone();
            store.append(&entry).unwrap();
        }
        let chain = store.load_chain(&issue_id).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].audit_id.as_str(), "audit-0");
        assert_eq!(chain[2].audit_id.as_str(), "audit-2");
    }

    fn sample_snapshot(resource_type: &str, resource_id: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            snapshot_id: SnapshotId::new("snap-1"),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            config_data: serde_json::json!({"a": 1}),
            timestamp: Timestamp::now(),
            checksum: "checksum".to_string(),
        }
    }

    #[test]
    fn config_store_returns_most_recent_change_by_timestamp() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let before = sample_snapshot("webhook", "stripe");
        let after = sample_snapshot("webhook", "stripe");
        let change = ConfigChange {
            change_id: ChangeId::new("change-1"),
            resource_type: "webhook".to_string(),
            resource_id: "stripe".to_string(),
            changes: BTreeMap::new(),
            applied_by: "operator".to_string(),
            reason: "rollout".to_string(),
            before_snapshot: before,
            after_snapshot: after.clone(),
            timestamp: Timestamp::now(),
            rolled_back: false,
        };
        store.record_change(&change).unwrap();
        let latest = store.latest_change("webhook", "stripe").unwrap().expect("change present");
        assert_eq!(latest.change_id, change.change_id);
        let snapshot = store.current_snapshot("webhook", "stripe").unwrap().expect("snapshot present");
        assert_eq!(snapshot.config_data, after.config_data);
    }

    #[test]
    fn config_store_upserts_by_change_id() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let change = ConfigChange {
            change_id: ChangeId::new("change-1"),
            resource_type: "webhook".to_string(),
            resource_id: "stripe".to_string(),
            changes: BTreeMap::new(),
            applied_by: "operator".to_string(),
            reason: "rollout".to_string(),
            before_snapshot: sample_snapshot("webhook", "stripe"),
            after_snapshot: sample_snapshot("webhook", "stripe"),
            timestamp: Timestamp::now(),
            rolled_back: false,
        };
        store.record_change(&change).unwrap();
        let rolled_back = ConfigChange { rolled_back: true, ..change.clone() };
        store.record_change(&rolled_back).unwrap();
        let latest = store.latest_change("webhook", "stripe").unwrap().expect("change present");
        assert!(latest.rolled_back);
        assert_eq!(latest.change_id, change.change_id);
    }

    #[test]
    fn config_store_loads_a_change_directly_by_change_id() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let change = ConfigChange {
            change_id: ChangeId::new("change-1"),
            resource_type: "webhook".to_string(),
            resource_id: "stripe".to_string(),
            changes: BTreeMap::new(),
            applied_by: "operator".to_string(),
            reason: "rollout".to_string(),
            before_snapshot: sample_snapshot("webhook", "stripe"),
            after_snapshot: sample_snapshot("webhook", "stripe"),
            timestamp: Timestamp::now(),
            rolled_back: false,
        };
        store.record_change(&change).unwrap();
        let loaded = store.get_change(&change.change_id).unwrap().expect("change present");
        assert_eq!(loaded.change_id, change.change_id);
        assert!(store.get_change(&ChangeId::new("missing")).unwrap().is_none());
    }

    fn sample_pattern(pattern_id: &str, last_seen: Timestamp) -> Pattern {
        Pattern {
            pattern_id: PatternId::new(pattern_id),
            pattern_type: PatternType::ApiFailure,
            signal_ids: Vec::new(),
            merchant_ids: vec![MerchantId::new("m1")],
            first_seen: last_seen,
            last_seen,
            confidence: 0.8,
            characteristics: BTreeMap::new(),
        }
    }

    #[test]
    fn pattern_cache_round_trips_and_evicts() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let now = Timestamp::now();
        let fresh = sample_pattern("pattern-fresh", now);
        let stale = sample_pattern(
            "pattern-stale",
            Timestamp::from_offset(now.as_offset() - time::Duration::seconds(120)),
        );
        store.put(fresh.clone());
        store.put(stale);
        assert_eq!(store.get(&fresh.pattern_id), Some(fresh.clone()));
        assert_eq!(store.all().len(), 2);
        store.evict_expired(now, 60);
        assert_eq!(store.all(), vec![fresh]);
    }

    #[test]
    fn issue_load_detects_tampering() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.sqlite");
        let store = store_for(&path);
        let issue = sample_issue("issue-1");
        store.save(&issue).unwrap();
        {
            let guard = store.connection.lock().unwrap();
            guard
                .execute(
                    "UPDATE issues SET state_hash = 'deadbeef' WHERE issue_id = ?1",
                    params![issue.issue_id.as_str()],
                )
                .unwrap();
            drop(guard);
        }
        let err = store.load(&issue.issue_id).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn action_result_with_rollback_data_round_trips_via_issue_state() {
        let temp = TempDir::new().unwrap();
        let store = store_for(&temp.path().join("store.sqlite"));
        let mut issue = sample_issue("issue-1");
        let action = Action {
            action_id: ActionId::new("action-1"),
            issue_id: issue.issue_id.clone(),
            action_type: ActionType::TemporaryMitigation,
            risk_level: RiskLevel::Medium,
            merchant_id: MerchantId::new("m1"),
            parameters: BTreeMap::new(),
        };
        let result = ActionResult {
            success: true,
            result: BTreeMap::new(),
            error_message: None,
            executed_at: Timestamp::now(),
            rollback_data: Some(BTreeMap::new()),
        };
        issue.actions.push((action, result));
        store.save(&issue).unwrap();
        let loaded = store.load(&issue.issue_id).unwrap().expect("issue present");
        assert_eq!(loaded.actions.len(), 1);
    }
}
