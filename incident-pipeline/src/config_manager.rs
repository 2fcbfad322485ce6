// incident-pipeline/src/config_manager.rs
// ============================================================================
// Module: Config Manager
// Description: Reversible, snapshot-backed application of configuration
//              changes, keyed by dotted-path nested keys.
// Purpose: Give the `temporary_mitigation` action type a safe, auditable way
//          to edit merchant or platform configuration and roll it back.
// Dependencies: incident-core
// ============================================================================

//! ## Overview
//! Every applied change is bracketed by a before and after [`ConfigSnapshot`],
//! both checksummed with the same canonical-JSON hash used for audit
//! entries. [`ConfigManager::rollback_change`] looks a change up by its
//! `change_id`, replays its before snapshot in place, and marks that exact
//! [`ConfigChange`] `rolled_back` without recording a new one, so a second
//! rollback of the same `change_id` always fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use incident_core::Action;
use incident_core::ActionHandler;
use incident_core::ActionHandlerError;
use incident_core::ActionResult;
use incident_core::ChangeId;
use incident_core::ConfigChange;
use incident_core::ConfigSnapshot;
use incident_core::ConfigStore;
use incident_core::DEFAULT_HASH_ALGORITHM;
use incident_core::MerchantId;
use incident_core::SnapshotId;
use incident_core::StoreError;
use incident_core::Timestamp;
use incident_core::hash_canonical_json;

/// Allowed `log_level` values for the `log_level` resource type.
const ALLOWED_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];
/// Upper bound accepted for `api_timeout`/`retry_count` integer values.
const MAX_POSITIVE_INTEGER_SETTING: i64 = 3600;

/// Errors raised while applying or rolling back a configuration change.
#[derive(Debug, Error)]
pub enum ConfigManagerError {
    /// The underlying store failed.
    #[error("config store error: {0}")]
    Store(#[from] StoreError),
    /// Canonicalization of a config snapshot failed.
    #[error("failed to checksum config snapshot: {0}")]
    Checksum(String),
    /// The proposed changes failed resource-type-specific validation.
    #[error("invalid config change: {0}")]
    Validation(String),
    /// There is no recorded change for this resource to roll back.
    #[error("no change recorded for this resource")]
    NoChangeToRollBack,
    /// The most recent change for this resource was already rolled back.
    #[error("most recent change was already rolled back")]
    AlreadyRolledBack,
}

/// Applies and rolls back reversible configuration changes, snapshotting
/// before and after state on every write.
pub struct ConfigManager {
    store: Arc<dyn ConfigStore + Send + Sync>,
}

impl ConfigManager {
    /// Builds a config manager persisting through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore + Send + Sync>) -> Self {
        Self { store }
    }

    /// Validates `changes` against `resource_type`'s rules, applies them to
    /// `current_config` via dotted-path keys, snapshots before and after,
    /// and records the resulting [`ConfigChange`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigManagerError::Validation`] when a proposed value
    /// fails its resource type's rules, or [`ConfigManagerError::Store`]
    /// when persistence fails.
    pub fn apply(
        &self,
        resource_type: &str,
        resource_id: &str,
        current_config: Value,
        changes: &BTreeMap<String, Value>,
        applied_by: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<ConfigChange, ConfigManagerError> {
        validate_changes(resource_type, changes)?;

        let before_snapshot = snapshot(resource_type, resource_id, current_config.clone(), now)?;

        let mut after_data = current_config;
        for (path, value) in changes {
            apply_dotted_path(&mut after_data, path, value.clone());
        }
        let after_snapshot = snapshot(resource_type, resource_id, after_data, now)?;

        let change = ConfigChange {
            change_id: ChangeId::new(format!("chg_{resource_type}_{resource_id}_{}", now.as_offset().unix_timestamp())),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            changes: changes.clone(),
            applied_by: applied_by.to_string(),
            reason: reason.to_string(),
            before_snapshot,
            after_snapshot,
            timestamp: now,
            rolled_back: false,
        };
        self.store.record_change(&change)?;
        Ok(change)
    }

    /// Rolls back the most recent change recorded for `(resource_type,
    /// resource_id)` by resolving it to a `change_id` and delegating to
    /// [`ConfigManager::rollback_change`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigManagerError::NoChangeToRollBack`] when no change is
    /// recorded, or [`ConfigManagerError::AlreadyRolledBack`] when the most
    /// recent change was already reversed.
    pub fn rollback(&self, resource_type: &str, resource_id: &str, operator_id: &str, now: Timestamp) -> Result<ConfigChange, ConfigManagerError> {
        let Some(latest) = self.store.latest_change(resource_type, resource_id)? else {
            return Err(ConfigManagerError::NoChangeToRollBack);
        };
        self.rollback_change(&latest.change_id, operator_id, now)
    }

    /// Rolls back the exact change recorded under `change_id`: loads it,
    /// rejects if it was already rolled back, replays its before snapshot as
    /// the new current state, and marks it `rolled_back` in place. No new
    /// [`ConfigChange`] record is created, so a second rollback of the same
    /// `change_id` always fails.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigManagerError::NoChangeToRollBack`] when `change_id` is
    /// unknown, or [`ConfigManagerError::AlreadyRolledBack`] when it was
    /// already reversed.
    pub fn rollback_change(&self, change_id: &ChangeId, operator_id: &str, now: Timestamp) -> Result<ConfigChange, ConfigManagerError> {
        let Some(mut change) = self.store.get_change(change_id)? else {
            return Err(ConfigManagerError::NoChangeToRollBack);
        };
        if change.rolled_back {
            return Err(ConfigManagerError::AlreadyRolledBack);
        }

        let restored_snapshot = snapshot(&change.resource_type, &change.resource_id, change.before_snapshot.config_data.clone(), now)?;
        change.rolled_back = true;
        change.after_snapshot = restored_snapshot;
        change.reason = format!("{} (rolled back by {operator_id})", change.reason);
        self.store.record_change(&change)?;
        Ok(change)
    }
}

fn snapshot(resource_type: &str, resource_id: &str, config_data: Value, now: Timestamp) -> Result<ConfigSnapshot, ConfigManagerError> {
    let checksum = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &config_data).map_err(|error| ConfigManagerError::Checksum(error.to_string()))?;
    Ok(ConfigSnapshot {
        snapshot_id: SnapshotId::new(format!("snap_{resource_type}_{resource_id}_{}", now.as_offset().unix_timestamp())),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        config_data,
        timestamp: now,
        checksum: checksum.value,
    })
}

/// Sets `value` at `path` inside `target`, creating intermediate objects for
/// dotted-path segments (`api.timeout` → `{"api": {"timeout": value}}`).
/// A non-object value encountered along the path is replaced with an
/// object so the write can proceed.
fn apply_dotted_path(target: &mut Value, path: &str, value: Value) {
    let mut segments = path.splitn(2, '.');
    let Some(head) = segments.next() else {
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Some(map) = target.as_object_mut() else {
        return;
    };
    match segments.next() {
        Some(rest) => {
            let child = map.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new()));
            apply_dotted_path(child, rest, value);
        }
        None => {
            map.insert(head.to_string(), value);
        }
    }
}

/// Required-field, URL-scheme, and positive-integer-bound checks per known
/// safe resource type. Unrecognized resource types only reject an empty
/// change set.
fn validate_changes(resource_type: &str, changes: &BTreeMap<String, Value>) -> Result<(), ConfigManagerError> {
    if changes.is_empty() {
        return Err(ConfigManagerError::Validation("at least one change is required".to_string()));
    }
    match resource_type {
        "webhook_url" => validate_webhook_url(changes),
        "api_timeout" | "retry_count" => validate_positive_integer(resource_type, changes),
        "log_level" => validate_log_level(changes),
        _ => Ok(()),
    }
}

fn validate_webhook_url(changes: &BTreeMap<String, Value>) -> Result<(), ConfigManagerError> {
    for (path, value) in changes {
        if !path.to_lowercase().contains("url") {
            continue;
        }
        let Some(url) = value.as_str() else {
            return Err(ConfigManagerError::Validation(format!("{path} must be a string URL")));
        };
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigManagerError::Validation(format!("{path} must use an http or https scheme")));
        }
    }
    Ok(())
}

fn validate_positive_integer(resource_type: &str, changes: &BTreeMap<String, Value>) -> Result<(), ConfigManagerError> {
    for (path, value) in changes {
        let Some(number) = value.as_i64() else {
            return Err(ConfigManagerError::Validation(format!("{resource_type} change {path} must be an integer")));
        };
        if !(1..=MAX_POSITIVE_INTEGER_SETTING).contains(&number) {
            return Err(ConfigManagerError::Validation(format!(
                "{resource_type} change {path} must be in [1, {MAX_POSITIVE_INTEGER_SETTING}]"
            )));
        }
    }
    Ok(())
}

fn validate_log_level(changes: &BTreeMap<String, Value>) -> Result<(), ConfigManagerError> {
    for (path, value) in changes {
        let Some(level) = value.as_str() else {
            return Err(ConfigManagerError::Validation(format!("{path} must be a string log level")));
        };
        if !ALLOWED_LOG_LEVELS.contains(&level) {
            return Err(ConfigManagerError::Validation(format!("{path} must be one of {ALLOWED_LOG_LEVELS:?}")));
        }
    }
    Ok(())
}

/// Parameter keys the `temporary_mitigation` action carries, mirroring the
/// decision engine's rendered `config_change` parameters.
mod params {
    pub const RESOURCE_TYPE: &str = "resource_type";
    pub const RESOURCE_ID: &str = "resource_id";
    pub const CURRENT_CONFIG: &str = "current_config";
    pub const CONFIG_CHANGES: &str = "config_changes";
    pub const REASON: &str = "reason";
}

/// [`ActionHandler`] for `temporary_mitigation`: applies a config change
/// through [`ConfigManager`] and embeds rollback data in the result.
pub struct TemporaryMitigationHandler {
    config_manager: ConfigManager,
}

impl TemporaryMitigationHandler {
    /// Builds a handler applying changes through `config_manager`.
    #[must_use]
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }
}

impl ActionHandler for TemporaryMitigationHandler {
    fn execute(&self, action: &Action, _merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
        let resource_type = action
            .parameters
            .get(params::RESOURCE_TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| ActionHandlerError::Rejected("missing resource_type parameter".to_string()))?;
        let resource_id = action
            .parameters
            .get(params::RESOURCE_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| ActionHandlerError::Rejected("missing resource_id parameter".to_string()))?;
        let current_config = action.parameters.get(params::CURRENT_CONFIG).cloned().unwrap_or_else(|| Value::Object(Map::new()));
        let config_changes: BTreeMap<String, Value> = action
            .parameters
            .get(params::CONFIG_CHANGES)
            .and_then(Value::as_object)
            .map(|map| map.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
            .unwrap_or_default();
        let reason = action.parameters.get(params::REASON).and_then(Value::as_str).unwrap_or("automatic mitigation");

        let change = self
            .config_manager
            .apply(resource_type, resource_id, current_config, &config_changes, "system", reason, Timestamp::now())
            .map_err(|error| match error {
                ConfigManagerError::Validation(message) => ActionHandlerError::Rejected(message),
                other => ActionHandlerError::Transport(other.to_string()),
            })?;

        let mut result = BTreeMap::new();
        result.insert("change_id".to_string(), Value::from(change.change_id.as_str()));
        result.insert("resource_type".to_string(), Value::from(change.resource_type.clone()));
        result.insert("resource_id".to_string(), Value::from(change.resource_id.clone()));

        let mut rollback_data = BTreeMap::new();
        rollback_data.insert("change_id".to_string(), Value::from(change.change_id.as_str()));
        rollback_data.insert("before_snapshot".to_string(), serde_json::to_value(&change.before_snapshot).unwrap_or(Value::Null));

        Ok(ActionResult {
            success: true,
            result,
            error_message: None,
            executed_at: change.timestamp,
            rollback_data: Some(rollback_data),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]
    #![allow(clippy::unwrap_used, reason = "mutex is never poisoned in these tests")]

    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::json;

    use incident_core::ChangeId;
    use incident_core::ConfigChange;
    use incident_core::ConfigSnapshot;
    use incident_core::ConfigStore;
    use incident_core::StoreError;
    use incident_core::Timestamp;

    use super::ConfigManager;
    use super::ConfigManagerError;

    #[derive(Default)]
    struct MemoryConfigStore {
        changes: Mutex<Vec<ConfigChange>>,
    }

    impl ConfigStore for MemoryConfigStore {
        fn record_change(&self, change: &ConfigChange) -> Result<(), StoreError> {
            let mut changes = self.changes.lock().unwrap();
            if let Some(existing) = changes.iter_mut().find(|existing| existing.change_id == change.change_id) {
                *existing = change.clone();
            } else {
                changes.push(change.clone());
            }
            Ok(())
        }

        fn latest_change(&self, resource_type: &str, resource_id: &str) -> Result<Option<ConfigChange>, StoreError> {
            Ok(self
                .changes
                .lock()
                .unwrap()
                .iter()
                .filter(|change| change.resource_type == resource_type && change.resource_id == resource_id)
                .max_by_key(|change| change.timestamp)
                .cloned())
        }

        fn get_change(&self, change_id: &ChangeId) -> Result<Option<ConfigChange>, StoreError> {
            Ok(self.changes.lock().unwrap().iter().find(|change| &change.change_id == change_id).cloned())
        }

        fn current_snapshot(&self, resource_type: &str, resource_id: &str) -> Result<Option<ConfigSnapshot>, StoreError> {
            Ok(self.latest_change(resource_type, resource_id)?.map(|change| change.after_snapshot))
        }
    }

    #[test]
    fn apply_creates_intermediate_maps_for_dotted_paths() {
        let store = Arc::new(MemoryConfigStore::default());
        let manager = ConfigManager::new(store);
        let mut changes = BTreeMap::new();
        changes.insert("api.timeout".to_string(), json!(30));
        let change = manager.apply("api_timeout", "merchant-1", json!({}), &changes, "system", "test", Timestamp::now()).expect("applies");
        assert_eq!(change.after_snapshot.config_data, json!({"api": {"timeout": 30}}));
        assert_ne!(change.before_snapshot.checksum, change.after_snapshot.checksum);
    }

    #[test]
    fn webhook_url_rejects_non_http_scheme() {
        let store = Arc::new(MemoryConfigStore::default());
        let manager = ConfigManager::new(store);
        let mut changes = BTreeMap::new();
        changes.insert("webhook_url".to_string(), json!("ftp://example.com"));
        let error = manager.apply("webhook_url", "merchant-1", json!({}), &changes, "system", "test", Timestamp::now()).expect_err("rejects");
        assert!(matches!(error, ConfigManagerError::Validation(_)));
    }

    #[test]
    fn rollback_restores_before_snapshot_and_marks_original_rolled_back() {
        let store = Arc::new(MemoryConfigStore::default());
        let manager = ConfigManager::new(Arc::clone(&store) as Arc<dyn ConfigStore + Send + Sync>);
        let mut changes = BTreeMap::new();
        changes.insert("retry_count".to_string(), json!(5));
        let applied = manager.apply("retry_count", "merchant-1", json!({"retry_count": 3}), &changes, "system", "test", Timestamp::now()).expect("applies");

        let rollback = manager.rollback("retry_count", "merchant-1", "operator-1", Timestamp::now()).expect("rolls back");
        assert_eq!(rollback.after_snapshot.config_data, json!({"retry_count": 3}));
        assert_eq!(rollback.change_id, applied.change_id);

        let original = store.latest_change("retry_count", "merchant-1").expect("load").expect("present");
        assert_eq!(original.change_id, applied.change_id);
        assert!(original.rolled_back);

        let rollback_again = manager.rollback("retry_count", "merchant-1", "operator-1", Timestamp::now());
        assert!(matches!(rollback_again, Err(ConfigManagerError::AlreadyRolledBack)));
    }

    #[test]
    fn rollback_change_rejects_a_second_rollback_of_the_same_change_id() {
        let store = Arc::new(MemoryConfigStore::default());
        let manager = ConfigManager::new(Arc::clone(&store) as Arc<dyn ConfigStore + Send + Sync>);
        let mut changes = BTreeMap::new();
        changes.insert("retry_count".to_string(), json!(5));
        let applied = manager.apply("retry_count", "merchant-1", json!({"retry_count": 3}), &changes, "system", "test", Timestamp::now()).expect("applies");

        manager.rollback_change(&applied.change_id, "operator-1", Timestamp::now()).expect("rolls back");
        let error = manager.rollback_change(&applied.change_id, "operator-1", Timestamp::now()).expect_err("fails");
        assert!(matches!(error, ConfigManagerError::AlreadyRolledBack));
    }

    #[test]
    fn rolling_back_an_already_rolled_back_change_fails() {
        let store = Arc::new(MemoryConfigStore::default());
        let manager = ConfigManager::new(Arc::clone(&store) as Arc<dyn ConfigStore + Send + Sync>);
        let mut changes = BTreeMap::new();
        changes.insert("retry_count".to_string(), json!(5));
        manager.apply("retry_count", "merchant-1", json!({"retry_count": 3}), &changes, "system", "test", Timestamp::now()).expect("applies");

        // Manually mark the stored change as already rolled back to exercise the guard.
        {
            let mut stored = store.changes.lock().unwrap();
            for change in stored.iter_mut() {
                change.rolled_back = true;
            }
        }
        let error = manager.rollback("retry_count", "merchant-1", "operator-1", Timestamp::now()).expect_err("fails");
        assert!(matches!(error, ConfigManagerError::AlreadyRolledBack));
    }
}
