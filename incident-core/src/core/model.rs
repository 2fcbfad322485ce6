// incident-core/src/core/model.rs
// ============================================================================
// Module: Incident Core Data Model
// Description: Canonical types for signals, patterns, analyses, decisions,
//              actions, audit entries, issue state, and config snapshots.
// Purpose: Single source of truth for the schema shared across every crate.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! These types mirror the data model of the incident-response core: a
//! canonical Signal, Patterns correlated over signals, a RootCauseAnalysis,
//! a routed Decision, an executed Action/ActionResult, an AuditEntry, the
//! per-issue IssueState aggregate, and ConfigSnapshot/ConfigChange for
//! reversible configuration edits.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::identifiers::ActionId;
use super::identifiers::AuditId;
use super::identifiers::ChangeId;
use super::identifiers::DecisionId;
use super::identifiers::IssueId;
use super::identifiers::MerchantId;
use super::identifiers::PatternId;
use super::identifiers::SignalId;
use super::identifiers::SnapshotId;
use super::time::Timestamp;

/// Upper bound on `error_message` length after truncation (spec: 500 chars).
pub const ERROR_MESSAGE_MAX_LEN: usize = 500;

/// Hard ceiling on pattern confidence; only more evidence can raise it, and
/// it never reaches certainty.
pub const PATTERN_CONFIDENCE_CEILING: f64 = 0.95;

// ============================================================================
// SECTION: Signal
// ============================================================================

/// Provenance of a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// A support-desk ticket or conversation (Zendesk, Freshdesk, Intercom).
    SupportTicket,
    /// A failed API call.
    ApiFailure,
    /// A failed checkout attempt.
    CheckoutError,
    /// A webhook delivery failure.
    WebhookFailure,
}

impl SignalSource {
    /// Returns the wire/string form used in logs, topics, and pattern seeds.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SupportTicket => "support_ticket",
            Self::ApiFailure => "api_failure",
            Self::CheckoutError => "checkout_error",
            Self::WebhookFailure => "webhook_failure",
        }
    }
}

/// Closed severity scale shared by signals and decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Lowest severity.
    Low,
    /// Moderate severity.
    Medium,
    /// Elevated severity.
    High,
    /// Highest severity.
    Critical,
}

/// A bounded map of scalar context values attached to a signal.
pub type ContextMap = BTreeMap<String, Value>;

/// The canonical atomic observation ingested from any external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// System-assigned unique identifier.
    pub signal_id: SignalId,
    /// UTC ingestion timestamp.
    pub timestamp: Timestamp,
    /// Provenance of the signal.
    pub source: SignalSource,
    /// Opaque original payload, retained verbatim for audit.
    pub raw_data: Value,
    /// Merchant the signal concerns; `"unknown"` when unresolvable.
    pub merchant_id: MerchantId,
    /// Free-form migration-stage label, if known.
    pub migration_stage: Option<String>,
    /// Endpoint, URL, cart id, or webhook URL the signal concerns.
    pub affected_resource: Option<String>,
    /// Closed severity classification.
    pub severity: Severity,
    /// Source-specific error code, if any.
    pub error_code: Option<String>,
    /// Human-readable error text, truncated to [`ERROR_MESSAGE_MAX_LEN`].
    pub error_message: Option<String>,
    /// Bounded, source-specific context map.
    pub context: ContextMap,
}

impl Signal {
    /// Truncates `message` to [`ERROR_MESSAGE_MAX_LEN`] bytes at a char
    /// boundary, matching the source's 500-character truncation.
    #[must_use]
    pub fn truncate_error_message(message: &str) -> String {
        if message.len() <= ERROR_MESSAGE_MAX_LEN {
            return message.to_string();
        }
        let mut end = ERROR_MESSAGE_MAX_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_string()
    }
}

// ============================================================================
// SECTION: Pattern
// ============================================================================

/// Closed pattern type, derived from the source of its constituent signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Correlates `api_failure` signals.
    ApiFailure,
    /// Correlates `checkout_error` signals.
    CheckoutIssue,
    /// Correlates `webhook_failure` signals.
    WebhookProblem,
    /// Correlates signals carrying a migration-stage label.
    MigrationStageIssue,
    /// Correlates signals indicating misconfiguration.
    ConfigError,
}

impl PatternType {
    /// Maps a [`SignalSource`] to its pattern type, per the fixed table in
    /// the pattern detector design.
    #[must_use]
    pub const fn from_signal_source(source: SignalSource) -> Self {
        match source {
            SignalSource::ApiFailure => Self::ApiFailure,
            SignalSource::CheckoutError => Self::CheckoutIssue,
            SignalSource::WebhookFailure => Self::WebhookProblem,
            SignalSource::SupportTicket => Self::MigrationStageIssue,
        }
    }
}

/// A correlation over `>= min_pattern_frequency` signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Content-derived identifier; identical discriminators yield the same id.
    pub pattern_id: PatternId,
    /// Closed pattern type.
    pub pattern_type: PatternType,
    /// Deduplicated member signal ids.
    pub signal_ids: Vec<SignalId>,
    /// Deduplicated merchant ids spanned by the pattern's signals.
    pub merchant_ids: Vec<MerchantId>,
    /// Timestamp of the first contributing signal.
    pub first_seen: Timestamp,
    /// Timestamp of the most recently appended signal.
    pub last_seen: Timestamp,
    /// Confidence in `[0, 0.95]`; monotonically non-decreasing across updates.
    pub confidence: f64,
    /// Free-form characteristics (discriminator, `cross_merchant`, cluster label, time span).
    pub characteristics: BTreeMap<String, Value>,
}

impl Pattern {
    /// Number of contributing signals; must always equal `signal_ids.len()`.
    #[must_use]
    pub fn frequency(&self) -> usize {
        self.signal_ids.len()
    }

    /// Whether `characteristics` marks this pattern as cross-merchant.
    #[must_use]
    pub fn is_cross_merchant(&self) -> bool {
        self.characteristics
            .get("cross_merchant")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// SECTION: RootCauseAnalysis
// ============================================================================

/// Closed root-cause category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    /// The merchant misconfigured or mis-sequenced a migration step.
    MigrationMisstep,
    /// A regression in the platform itself.
    PlatformRegression,
    /// Documentation is missing, unclear, or out of date.
    DocumentationGap,
    /// A configuration value is wrong.
    ConfigError,
}

/// A hypothesis considered and rejected during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeConsidered {
    /// The rejected hypothesis.
    pub hypothesis: String,
    /// Why it was rejected.
    pub reason_rejected: String,
}

/// The reasoning output of the root-cause analyzer (LLM or rule-based fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    /// Closed category.
    pub category: RootCauseCategory,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Non-empty prose explanation.
    pub reasoning: String,
    /// Non-empty supporting evidence strings.
    pub evidence: Vec<String>,
    /// Non-empty recommended remediation steps.
    pub recommended_actions: Vec<String>,
    /// Zero or more alternatives considered and rejected.
    pub alternatives_considered: Vec<AlternativeConsidered>,
}

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Closed action-type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Guide the merchant through a self-service fix.
    SupportGuidance,
    /// Proactively notify affected merchants.
    ProactiveCommunication,
    /// Escalate to engineering.
    EngineeringEscalation,
    /// Apply a reversible configuration change.
    TemporaryMitigation,
    /// File a documentation update.
    DocumentationUpdate,
}

/// Closed risk-level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Low risk.
    Low,
    /// Medium risk.
    Medium,
    /// High risk.
    High,
    /// Critical risk.
    Critical,
}

/// Routing output of the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Unique identifier.
    pub decision_id: DecisionId,
    /// Issue this decision belongs to.
    pub issue_id: IssueId,
    /// Closed action type.
    pub action_type: ActionType,
    /// Closed risk level.
    pub risk_level: RiskLevel,
    /// Whether human approval is required before execution.
    pub requires_approval: bool,
    /// Confidence carried over from (or derived from) the analysis.
    pub confidence: f64,
    /// Human-readable rationale.
    pub reasoning: String,
    /// Non-empty description of the expected result.
    pub estimated_outcome: String,
    /// Action-specific parameters.
    pub parameters: BTreeMap<String, Value>,
    /// Alternatives considered during routing.
    pub alternatives_considered: Vec<AlternativeConsidered>,
}

// ============================================================================
// SECTION: Action + ActionResult
// ============================================================================

/// An action queued for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier.
    pub action_id: ActionId,
    /// Owning issue.
    pub issue_id: IssueId,
    /// Closed action type.
    pub action_type: ActionType,
    /// Risk level carried over from the decision.
    pub risk_level: RiskLevel,
    /// Merchant the action is scoped to.
    pub merchant_id: MerchantId,
    /// Action-specific parameters.
    pub parameters: BTreeMap<String, Value>,
}

/// Final outcome of executing an [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether execution succeeded.
    pub success: bool,
    /// Handler-specific result payload.
    pub result: BTreeMap<String, Value>,
    /// Human-readable error, if `success` is false.
    pub error_message: Option<String>,
    /// When execution completed.
    pub executed_at: Timestamp,
    /// Data required to reverse the action, if reversible.
    pub rollback_data: Option<BTreeMap<String, Value>>,
}

// ============================================================================
// SECTION: AuditEntry
// ============================================================================

/// An immutable, hash-chained audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier.
    pub audit_id: AuditId,
    /// When the entry was recorded.
    pub timestamp: Timestamp,
    /// Issue the entry concerns.
    pub issue_id: IssueId,
    /// Event type, e.g. `"action_support_guidance"`.
    pub event_type: String,
    /// Who performed the action (`"system"` or an operator id).
    pub actor: String,
    /// Inputs recorded for this event.
    pub inputs: BTreeMap<String, Value>,
    /// Outputs recorded for this event.
    pub outputs: BTreeMap<String, Value>,
    /// Reasoning/explanation recorded for this event.
    pub reasoning: BTreeMap<String, Value>,
    /// `SHA-256(canonical_json({..fields.., previous_hash}))`.
    pub hash: String,
    /// Hash of the chronologically prior entry for this `issue_id`, or empty.
    pub previous_hash: String,
}

// ============================================================================
// SECTION: IssueState
// ============================================================================

/// Closed status enumeration for an issue's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Just created; no signals observed yet.
    New,
    /// Accumulating signals.
    Observing,
    /// At least one pattern has been detected.
    PatternDetected,
    /// Root-cause analysis complete.
    Analyzed,
    /// A decision has been routed.
    Decided,
    /// The decided action executed successfully.
    ActionExecuted,
    /// The decided action failed after retries.
    ActionFailed,
    /// The decision requires operator approval before execution.
    PendingApproval,
}

impl IssueStatus {
    /// Returns whether `next` is a legal transition from `self`, per the
    /// canonical sequence `new -> observing -> pattern_detected -> analyzed
    /// -> decided -> {action_executed | action_failed | pending_approval}`,
    /// plus the operator resolution of a pending approval into the same two
    /// terminal action states.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Observing)
                | (Self::Observing, Self::PatternDetected)
                | (Self::Observing, Self::Analyzed)
                | (Self::PatternDetected, Self::Analyzed)
                | (Self::Analyzed, Self::Decided)
                | (Self::Decided, Self::ActionExecuted)
                | (Self::Decided, Self::ActionFailed)
                | (Self::Decided, Self::PendingApproval)
                | (Self::PendingApproval, Self::ActionExecuted)
                | (Self::PendingApproval, Self::ActionFailed)
        )
    }
}

/// Per-issue aggregate, owned exclusively by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueState {
    /// Unique identifier.
    pub issue_id: IssueId,
    /// Current lifecycle status.
    pub status: IssueStatus,
    /// Contributing signal ids.
    pub signal_ids: Vec<SignalId>,
    /// Associated pattern ids.
    pub pattern_ids: Vec<PatternId>,
    /// Root-cause analysis, once produced.
    pub analysis: Option<RootCauseAnalysis>,
    /// Routed decision, once produced.
    pub decision: Option<Decision>,
    /// Executed actions and their outcomes, in execution order.
    pub actions: Vec<(Action, ActionResult)>,
}

impl IssueState {
    /// Creates a fresh issue state in [`IssueStatus::New`].
    #[must_use]
    pub fn new(issue_id: IssueId) -> Self {
        Self {
            issue_id,
            status: IssueStatus::New,
            signal_ids: Vec::new(),
            pattern_ids: Vec::new(),
            analysis: None,
            decision: None,
            actions: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: ConfigSnapshot + ConfigChange
// ============================================================================

/// A point-in-time capture of a resource's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Unique identifier.
    pub snapshot_id: SnapshotId,
    /// Kind of resource, e.g. `"merchant_config"`, `"api_settings"`.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Captured configuration data.
    pub config_data: Value,
    /// When the snapshot was taken.
    pub timestamp: Timestamp,
    /// `SHA-256(canonical_json(config_data))`.
    pub checksum: String,
}

/// A recorded, reversible configuration change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    /// Unique identifier.
    pub change_id: ChangeId,
    /// Kind of resource changed.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Dotted-path key -> new value map, as requested.
    pub changes: BTreeMap<String, Value>,
    /// Who applied the change (`"system"` or an operator id).
    pub applied_by: String,
    /// Why the change was made.
    pub reason: String,
    /// Snapshot captured before the change.
    pub before_snapshot: ConfigSnapshot,
    /// Snapshot captured after the change.
    pub after_snapshot: ConfigSnapshot,
    /// When the change was applied.
    pub timestamp: Timestamp,
    /// Whether this change has already been rolled back.
    pub rolled_back: bool,
}

#[cfg(test)]
mod tests {
    use super::Signal;

    #[test]
    fn truncate_error_message_is_noop_under_limit() {
        let message = "short error";
        assert_eq!(Signal::truncate_error_message(message), message);
    }

    #[test]
    fn truncate_error_message_caps_at_500_chars() {
        let message = "x".repeat(600);
        let truncated = Signal::truncate_error_message(&message);
        assert_eq!(truncated.len(), 500);
    }

    #[test]
    fn truncate_error_message_respects_char_boundaries() {
        let message = "é".repeat(260); // 520 bytes, 2 bytes per char
        let truncated = Signal::truncate_error_message(&message);
        assert!(truncated.len() <= 500);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
