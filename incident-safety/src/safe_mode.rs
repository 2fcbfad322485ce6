// incident-safety/src/safe_mode.rs
// ============================================================================
// Module: Safe Mode Manager + Detector
// Description: Process-wide interlock that forces approval and blocks action
//              execution, plus the trigger checks that activate it.
// Purpose: Give the decision engine and action executor one shared,
//          consistent view of whether the system is in safe mode.
// Dependencies: incident-core, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! Safe Mode is a single process-wide `{inactive, active}` state with a
//! reason tag. Activation is idempotent — a second activation while active
//! is a no-op and the first reason is retained. Deactivation requires an
//! operator identifier and records how long safe mode was active. The
//! detector functions here are pure triggers: the subsystem that observes a
//! condition (the analyzer, the executor, the infra health check) calls one
//! of these to decide whether to activate, then calls
//! [`SafeModeManager::activate`] itself.

use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

use incident_core::Timestamp;

/// Why safe mode was activated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SafeModeReason {
    /// The durable state/database backing the pipeline is unreachable.
    DatabaseConnectionLoss,
    /// The event bus broker is unreachable.
    KafkaBrokerUnavailable,
    /// The LLM provider reported a quota/billing exhaustion error.
    ClaudeApiQuotaExceeded,
    /// More than one critical service failed within a short window.
    MultipleServiceFailures,
    /// Expected vs. actual analysis confidence diverged beyond threshold.
    ConfidenceDrift,
    /// An action type exceeded its per-merchant execution threshold.
    ExcessiveActions,
    /// An operator- or detector-reported anomaly not covered above.
    AnomalousBehavior,
    /// An operator activated safe mode manually, with a free-form reason.
    Manual(String),
}

impl SafeModeReason {
    /// Maps a critical-error-type string (as reported by the infra health
    /// checks) to its safe-mode reason, or `None` if it is not a recognized
    /// critical-error type.
    #[must_use]
    pub fn from_critical_error_type(error_type: &str) -> Option<Self> {
        match error_type {
            "database_connection_loss" => Some(Self::DatabaseConnectionLoss),
            "kafka_broker_unavailable" => Some(Self::KafkaBrokerUnavailable),
            "claude_api_quota_exceeded" => Some(Self::ClaudeApiQuotaExceeded),
            "multiple_service_failures" => Some(Self::MultipleServiceFailures),
            _ => None,
        }
    }
}

/// Returns [`SafeModeReason::ConfidenceDrift`] when the absolute gap between
/// expected and actual confidence exceeds `threshold`.
#[must_use]
pub fn confidence_drift_trigger(expected: f64, actual: f64, threshold: f64) -> Option<SafeModeReason> {
    if (expected - actual).abs() > threshold {
        Some(SafeModeReason::ConfidenceDrift)
    } else {
        None
    }
}

/// Returns [`SafeModeReason::ExcessiveActions`] when `count` exceeds
/// `threshold` for one `(action_type, merchant)` pair within its window.
#[must_use]
pub const fn excessive_actions_trigger(count: u32, threshold: u32) -> Option<SafeModeReason> {
    if count > threshold { Some(SafeModeReason::ExcessiveActions) } else { None }
}

/// A point-in-time view of safe mode's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeModeSnapshot {
    /// Whether safe mode is currently active.
    pub active: bool,
    /// The reason it was activated, if active (or most recently active).
    pub reason: Option<SafeModeReason>,
    /// When it was activated, if active (or most recently active).
    pub activated_at: Option<Timestamp>,
}

/// Errors raised by [`SafeModeManager::deactivate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafeModeError {
    /// Deactivation was requested with an empty operator id.
    #[error("operator id is required to deactivate safe mode")]
    MissingOperatorId,
    /// Deactivation was requested while safe mode was already inactive.
    #[error("safe mode is not active")]
    NotActive,
}

#[derive(Debug)]
struct Inner {
    active: bool,
    reason: Option<SafeModeReason>,
    activated_at: Option<Timestamp>,
}

/// Process-wide safe-mode interlock. All reads take a brief lock (cheap,
/// non-suspending); activate/deactivate are the only writers.
#[derive(Debug, Default)]
pub struct SafeModeManager {
    inner: Mutex<Inner>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            active: false,
            reason: None,
            activated_at: None,
        }
    }
}

impl SafeModeManager {
    /// Creates a manager starting in the inactive state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates safe mode for `reason` at `now`. Idempotent: if already
    /// active, this is a no-op and the original reason is retained.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn activate(&self, reason: SafeModeReason, now: Timestamp) {
        let mut inner = self.inner.lock().unwrap();
        if inner.active {
            tracing::debug!(
                existing_reason = ?inner.reason,
                attempted_reason = ?reason,
                "safe mode already active, ignoring activation"
            );
            return;
        }
        tracing::warn!(reason = ?reason, "safe mode activated");
        inner.active = true;
        inner.reason = Some(reason);
        inner.activated_at = Some(now);
    }

    /// Deactivates safe mode, recording the operator and duration active.
    ///
    /// # Errors
    ///
    /// Returns [`SafeModeError::MissingOperatorId`] when `operator_id` is
    /// empty, or [`SafeModeError::NotActive`] when safe mode is already
    /// inactive.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn deactivate(&self, operator_id: &str, now: Timestamp) -> Result<time::Duration, SafeModeError> {
        if operator_id.trim().is_empty() {
            return Err(SafeModeError::MissingOperatorId);
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.active {
            return Err(SafeModeError::NotActive);
        }
        let duration = inner
            .activated_at
            .map(|activated_at| now.saturating_duration_since(activated_at))
            .unwrap_or(time::Duration::ZERO);
        tracing::warn!(operator_id, duration = ?duration, "safe mode deactivated");
        inner.active = false;
        Ok(duration)
    }

    /// Returns whether safe mode is currently active.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().active
    }

    /// Returns a consistent snapshot of safe mode's current state.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn snapshot(&self) -> SafeModeSnapshot {
        let inner = self.inner.lock().unwrap();
        SafeModeSnapshot {
            active: inner.active,
            reason: inner.reason.clone(),
            activated_at: inner.activated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use super::SafeModeManager;
    use super::SafeModeReason;
    use super::confidence_drift_trigger;
    use super::excessive_actions_trigger;
    use incident_core::Timestamp;

    #[test]
    fn activation_is_idempotent_and_retains_first_reason() {
        let manager = SafeModeManager::new();
        let now = Timestamp::now();
        manager.activate(SafeModeReason::ConfidenceDrift, now);
        manager.activate(SafeModeReason::ExcessiveActions, now);
        assert_eq!(manager.snapshot().reason, Some(SafeModeReason::ConfidenceDrift));
    }

    #[test]
    fn deactivate_requires_operator_id() {
        let manager = SafeModeManager::new();
        let now = Timestamp::now();
        manager.activate(SafeModeReason::AnomalousBehavior, now);
        assert_eq!(manager.deactivate("", now), Err(super::SafeModeError::MissingOperatorId));
        assert!(manager.is_active());
    }

    #[test]
    fn deactivate_when_inactive_fails() {
        let manager = SafeModeManager::new();
        assert_eq!(
            manager.deactivate("operator-1", Timestamp::now()),
            Err(super::SafeModeError::NotActive)
        );
    }

    #[test]
    fn deactivate_records_duration_and_clears_active() {
        let manager = SafeModeManager::new();
        let now = Timestamp::now();
        manager.activate(SafeModeReason::ConfidenceDrift, now);
        let later = Timestamp::from_offset(now.as_offset() + time::Duration::seconds(90));
        let duration = manager.deactivate("operator-1", later).expect("deactivates");
        assert_eq!(duration, time::Duration::seconds(90));
        assert!(!manager.is_active());
    }

    #[test]
    fn confidence_drift_trigger_fires_above_threshold() {
        assert_eq!(confidence_drift_trigger(0.90, 0.75, 0.05), Some(SafeModeReason::ConfidenceDrift));
        assert_eq!(confidence_drift_trigger(0.90, 0.87, 0.05), None);
    }

    #[test]
    fn excessive_actions_trigger_fires_above_threshold() {
        assert_eq!(excessive_actions_trigger(21, 20), Some(SafeModeReason::ExcessiveActions));
        assert_eq!(excessive_actions_trigger(20, 20), None);
    }

    #[test]
    fn critical_error_type_maps_to_reason() {
        assert_eq!(
            SafeModeReason::from_critical_error_type("kafka_broker_unavailable"),
            Some(SafeModeReason::KafkaBrokerUnavailable)
        );
        assert_eq!(SafeModeReason::from_critical_error_type("unknown"), None);
    }
}
