// incident-pipeline/src/executor.rs
// ============================================================================
// Module: Action Executor
// Description: Interlock-gated dispatch of a Decision's Action to its
//              handler, with retry, synthetic escalation, and audit
//              recording.
// Purpose: Make sure no action ever runs outside Safe Mode's and the rate
//          limiter's view, and that every attempt — success or failure — is
//          durably recorded.
// Dependencies: incident-core, incident-safety, incident-config
// ============================================================================

//! ## Overview
//! [`ActionExecutor::execute`] runs three pre-execution checks in order —
//! Safe Mode, per-merchant rate limit, excessive-action flag — each of which
//! can short-circuit to a failed [`ActionResult`] without touching a
//! handler. A permitted action dispatches to its registered
//! [`ActionHandler`] wrapped in retry (exponential backoff, transport errors
//! only); once retries are exhausted a synthetic `engineering_escalation`
//! action surfaces the failure without itself being retried or escalated
//! again. Every attempt is recorded in the audit trail.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value;
use serde_json::json;

use incident_config::RateLimitConfig;
use incident_config::RetryConfig;
use incident_core::Action;
use incident_core::ActionHandler;
use incident_core::ActionHandlerError;
use incident_core::ActionId;
use incident_core::ActionResult;
use incident_core::ActionType;
use incident_core::AuditEntry;
use incident_core::AuditId;
use incident_core::AuditStore;
use incident_core::IssueId;
use incident_core::MerchantId;
use incident_core::RiskLevel;
use incident_core::Timestamp;
use incident_core::compute_entry_hash;
use incident_safety::RateLimiter;
use incident_safety::SafeModeManager;

/// Wire form of an [`ActionType`], used both for audit `event_type` and for
/// logging; kept local since [`ActionType`] only exposes `serde` naming.
const fn action_type_str(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::SupportGuidance => "support_guidance",
        ActionType::ProactiveCommunication => "proactive_communication",
        ActionType::EngineeringEscalation => "engineering_escalation",
        ActionType::TemporaryMitigation => "temporary_mitigation",
        ActionType::DocumentationUpdate => "documentation_update",
    }
}

/// Executes actions subject to Safe Mode, rate limiting, retry, and audit
/// recording.
pub struct ActionExecutor {
    safe_mode: Arc<SafeModeManager>,
    rate_limiter: RateLimiter,
    rate_limit: RateLimitConfig,
    retry: RetryConfig,
    handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>>,
    audit_store: Arc<dyn AuditStore + Send + Sync>,
}

impl ActionExecutor {
    /// Builds an executor with one handler registered per [`ActionType`] it
    /// should dispatch to. An action type with no registered handler fails
    /// immediately with a permanent error.
    #[must_use]
    pub fn new(
        safe_mode: Arc<SafeModeManager>,
        rate_limit: RateLimitConfig,
        retry: RetryConfig,
        handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>>,
        audit_store: Arc<dyn AuditStore + Send + Sync>,
    ) -> Self {
        Self {
            safe_mode,
            rate_limiter: RateLimiter::new(),
            rate_limit,
            retry,
            handlers,
            audit_store,
        }
    }

    /// Executes `action` at `now`, recording every attempt in the audit
    /// trail for `action.issue_id`.
    pub fn execute(&self, action: &Action, now: Timestamp) -> ActionResult {
        if self.safe_mode.is_active() {
            let result = rejected_result("Safe mode active", now);
            self.record(action, &result, now, "safe mode is active");
            return result;
        }

        let decision = self.rate_limiter.check_and_increment(
            &action.merchant_id,
            action.action_type,
            now,
            self.rate_limit.window_seconds,
            self.rate_limit.max_actions,
            self.rate_limit.excessive_threshold,
        );
        if !decision.allowed {
            let result = rejected_result("Rate limit exceeded for this merchant and action type", now);
            self.record(action, &result, now, "per-merchant rate limit exceeded");
            return result;
        }
        if decision.excessive {
            tracing::warn!(
                merchant_id = %action.merchant_id,
                action_type = action_type_str(action.action_type),
                count = decision.count,
                "excessive action rate for merchant"
            );
        }

        let result = self.dispatch_with_retry(action, now);
        self.record(action, &result, now, "dispatched to action handler");

        if !result.success && action.action_type != ActionType::EngineeringEscalation {
            self.escalate(action, &result, now);
        }

        result
    }

    fn dispatch_with_retry(&self, action: &Action, now: Timestamp) -> ActionResult {
        let Some(handler) = self.handlers.get(&action.action_type) else {
            return rejected_result(format!("no handler registered for {}", action_type_str(action.action_type)), now);
        };

        let mut attempt: u32 = 1;
        loop {
            match handler.execute(action, &action.merchant_id) {
                Ok(result) => return result,
                Err(ActionHandlerError::Rejected(message)) => return rejected_result(message, now),
                Err(ActionHandlerError::Transport(message)) => {
                    if attempt >= self.retry.max_attempts {
                        return rejected_result(message, now);
                    }
                    let backoff = backoff_for_attempt(self.retry.base_seconds, self.retry.cap_seconds, attempt);
                    tracing::warn!(
                        action_id = %action.action_id,
                        attempt,
                        error = %message,
                        backoff_seconds = backoff.as_secs(),
                        "retrying action after transport error"
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }

    /// Constructs and executes a synthetic `engineering_escalation` action
    /// surfacing `original`'s failure, without retry and without itself
    /// escalating.
    fn escalate(&self, original: &Action, failure: &ActionResult, now: Timestamp) {
        let Some(handler) = self.handlers.get(&ActionType::EngineeringEscalation) else {
            tracing::error!(action_id = %original.action_id, "no engineering_escalation handler registered, cannot surface failure");
            return;
        };

        let mut parameters = BTreeMap::new();
        parameters.insert("title".to_string(), Value::from(format!("Action execution failed: {}", action_type_str(original.action_type))));
        parameters.insert(
            "description".to_string(),
            Value::from(format!(
                "Action {} of type {} for issue {} failed after exhausting retries: {}",
                original.action_id,
                action_type_str(original.action_type),
                original.issue_id,
                failure.error_message.clone().unwrap_or_default()
            )),
        );
        parameters.insert("priority".to_string(), Value::from("high"));
        parameters.insert("original_action_id".to_string(), Value::from(original.action_id.as_str()));
        parameters.insert("original_action_type".to_string(), Value::from(action_type_str(original.action_type)));

        let escalation = Action {
            action_id: ActionId::new(format!("esc_{}", original.action_id)),
            issue_id: original.issue_id.clone(),
            action_type: ActionType::EngineeringEscalation,
            risk_level: RiskLevel::High,
            merchant_id: original.merchant_id.clone(),
            parameters,
        };

        let result = match handler.execute(&escalation, &escalation.merchant_id) {
            Ok(result) => result,
            Err(ActionHandlerError::Transport(message) | ActionHandlerError::Rejected(message)) => rejected_result(message, now),
        };
        self.record(&escalation, &result, now, "synthetic escalation after retry exhaustion");
    }

    fn record(&self, action: &Action, result: &ActionResult, now: Timestamp, reasoning_summary: &str) {
        let issue_id = action.issue_id.clone();
        let previous_hash = self
            .audit_store
            .load_chain(&issue_id)
            .ok()
            .and_then(|entries| entries.last().map(|entry| entry.hash.clone()))
            .unwrap_or_default();

        let mut inputs = BTreeMap::new();
        inputs.insert("action_id".to_string(), Value::from(action.action_id.as_str()));
        inputs.insert("action_type".to_string(), Value::from(action_type_str(action.action_type)));
        inputs.insert("merchant_id".to_string(), Value::from(action.merchant_id.as_str()));
        inputs.insert("parameters".to_string(), json!(action.parameters));

        let mut outputs = BTreeMap::new();
        outputs.insert("success".to_string(), Value::from(result.success));
        outputs.insert("result".to_string(), json!(result.result));
        if let Some(error_message) = &result.error_message {
            outputs.insert("error_message".to_string(), Value::from(error_message.as_str()));
        }

        let mut reasoning = BTreeMap::new();
        reasoning.insert("summary".to_string(), Value::from(reasoning_summary));

        let Ok(timestamp_text) = now.to_rfc3339() else {
            tracing::error!(issue_id = %issue_id, "failed to format timestamp for audit entry, skipping record");
            return;
        };
        let event_type = format!("action_{}", action_type_str(action.action_type));
        let Ok(hash) = compute_entry_hash(&timestamp_text, issue_id.as_str(), &event_type, "system", &inputs, &outputs, &reasoning, &previous_hash) else {
            tracing::error!(issue_id = %issue_id, "failed to compute audit entry hash, skipping record");
            return;
        };

        let entry = AuditEntry {
            audit_id: AuditId::new(format!("audit_{}_{}", issue_id, action.action_id)),
            timestamp: now,
            issue_id,
            event_type,
            actor: "system".to_string(),
            inputs,
            outputs,
            reasoning,
            hash,
            previous_hash,
        };
        if let Err(error) = self.audit_store.append(&entry) {
            tracing::error!(error = %error, action_id = %action.action_id, "failed to append audit entry for executed action");
        }
    }
}

fn rejected_result(message: impl Into<String>, now: Timestamp) -> ActionResult {
    ActionResult {
        success: false,
        result: BTreeMap::new(),
        error_message: Some(message.into()),
        executed_at: now,
        rollback_data: None,
    }
}

fn backoff_for_attempt(base_seconds: u64, cap_seconds: u64, attempt: u32) -> StdDuration {
    let exponent = attempt.saturating_sub(1);
    let scaled = base_seconds.saturating_mul(1u64 << exponent.min(16));
    StdDuration::from_secs(scaled.min(cap_seconds))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]
    #![allow(clippy::unwrap_used, reason = "mutex is never poisoned in these tests")]

    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use incident_config::RateLimitConfig;
    use incident_config::RetryConfig;
    use incident_core::Action;
    use incident_core::ActionHandler;
    use incident_core::ActionHandlerError;
    use incident_core::ActionId;
    use incident_core::ActionResult;
    use incident_core::ActionType;
    use incident_core::AuditEntry;
    use incident_core::AuditStore;
    use incident_core::IssueId;
    use incident_core::RiskLevel;
    use incident_core::StoreError;
    use incident_core::Timestamp;
    use incident_safety::SafeModeManager;
    use incident_safety::SafeModeReason;

    use super::ActionExecutor;

    #[derive(Default)]
    struct MemoryAuditStore {
        entries: Mutex<Vec<AuditEntry>>,
    }

    impl AuditStore for MemoryAuditStore {
        fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        fn load_chain(&self, issue_id: &IssueId) -> Result<Vec<AuditEntry>, StoreError> {
            Ok(self.entries.lock().unwrap().iter().filter(|entry| &entry.issue_id == issue_id).cloned().collect())
        }
    }

    struct AlwaysOkHandler;

    impl ActionHandler for AlwaysOkHandler {
        fn execute(&self, _action: &Action, _merchant_id: &incident_core::MerchantId) -> Result<ActionResult, ActionHandlerError> {
            Ok(ActionResult {
                success: true,
                result: BTreeMap::new(),
                error_message: None,
                executed_at: Timestamp::now(),
                rollback_data: None,
            })
        }
    }

    struct AlwaysTransportErrorHandler {
        calls: Mutex<u32>,
    }

    impl ActionHandler for AlwaysTransportErrorHandler {
        fn execute(&self, _action: &Action, _merchant_id: &incident_core::MerchantId) -> Result<ActionResult, ActionHandlerError> {
            *self.calls.lock().unwrap() += 1;
            Err(ActionHandlerError::Transport("connection refused".to_string()))
        }
    }

    fn action(action_type: ActionType) -> Action {
        Action {
            action_id: ActionId::new("act-1"),
            issue_id: IssueId::new("issue-1"),
            action_type,
            risk_level: RiskLevel::Low,
            merchant_id: "merchant-1".into(),
            parameters: BTreeMap::new(),
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_seconds: 0,
            cap_seconds: 0,
        }
    }

    #[test]
    fn safe_mode_rejects_without_dispatching() {
        let safe_mode = Arc::new(SafeModeManager::new());
        safe_mode.activate(SafeModeReason::Manual("test".to_string()), Timestamp::now());
        let audit = Arc::new(MemoryAuditStore::default());
        let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
        handlers.insert(ActionType::SupportGuidance, Arc::new(AlwaysOkHandler));
        let executor = ActionExecutor::new(safe_mode, RateLimitConfig::default(), fast_retry(), handlers, audit.clone());

        let result = executor.execute(&action(ActionType::SupportGuidance), Timestamp::now());
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Safe mode active"));
        assert_eq!(audit.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn rate_limit_rejects_after_the_configured_maximum() {
        let safe_mode = Arc::new(SafeModeManager::new());
        let audit = Arc::new(MemoryAuditStore::default());
        let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
        handlers.insert(ActionType::SupportGuidance, Arc::new(AlwaysOkHandler));
        let rate_limit = RateLimitConfig {
            window_seconds: 60,
            max_actions: 1,
            excessive_threshold: 10,
        };
        let executor = ActionExecutor::new(safe_mode, rate_limit, fast_retry(), handlers, audit);
        let now = Timestamp::now();

        let first = executor.execute(&action(ActionType::SupportGuidance), now);
        assert!(first.success);
        let second = executor.execute(&action(ActionType::SupportGuidance), now);
        assert!(!second.success);
        assert_eq!(second.error_message.as_deref(), Some("Rate limit exceeded for this merchant and action type"));
    }

    #[test]
    fn transport_failure_retries_then_escalates_on_exhaustion() {
        let safe_mode = Arc::new(SafeModeManager::new());
        let audit = Arc::new(MemoryAuditStore::default());
        let failing = Arc::new(AlwaysTransportErrorHandler { calls: Mutex::new(0) });
        let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
        handlers.insert(ActionType::SupportGuidance, failing.clone());
        handlers.insert(ActionType::EngineeringEscalation, Arc::new(AlwaysOkHandler));
        let executor = ActionExecutor::new(safe_mode, RateLimitConfig::default(), fast_retry(), handlers, audit.clone());

        let result = executor.execute(&action(ActionType::SupportGuidance), Timestamp::now());
        assert!(!result.success);
        assert_eq!(*failing.calls.lock().unwrap(), 2, "retried up to max_attempts");

        let entries = audit.entries.lock().unwrap();
        assert!(entries.iter().any(|entry| entry.event_type == "action_engineering_escalation"), "escalation was recorded");
    }

    #[test]
    fn escalation_failure_does_not_itself_re_escalate() {
        let safe_mode = Arc::new(SafeModeManager::new());
        let audit = Arc::new(MemoryAuditStore::default());
        let failing = Arc::new(AlwaysTransportErrorHandler { calls: Mutex::new(0) });
        let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
        handlers.insert(ActionType::EngineeringEscalation, failing);
        let executor = ActionExecutor::new(safe_mode, RateLimitConfig::default(), fast_retry(), handlers, audit.clone());

        let result = executor.execute(&action(ActionType::EngineeringEscalation), Timestamp::now());
        assert!(!result.success);
        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1, "no synthetic escalation was produced for a failed escalation itself");
    }

    #[test]
    fn successful_dispatch_is_recorded_with_success_output() {
        let safe_mode = Arc::new(SafeModeManager::new());
        let audit = Arc::new(MemoryAuditStore::default());
        let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
        handlers.insert(ActionType::DocumentationUpdate, Arc::new(AlwaysOkHandler));
        let executor = ActionExecutor::new(safe_mode, RateLimitConfig::default(), fast_retry(), handlers, audit.clone());

        let result = executor.execute(&action(ActionType::DocumentationUpdate), Timestamp::now());
        assert!(result.success);
        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].previous_hash, "");
    }
}
