// incident-core/src/core/mod.rs
// ============================================================================
// Module: Incident Core Types
// Description: Canonical incident-response schema: signals, patterns,
//              analyses, decisions, actions, audit entries, issue state, and
//              config snapshots.
// Purpose: Provide stable, serializable types that every other crate in the
//          workspace builds on.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Incident core types are the canonical source of truth for the data that
//! flows between the signal broker, the pipeline, the safety subsystems, and
//! the store. These types carry no I/O and no async; they are pure data plus
//! the small set of pure functions (redaction, hashing, id derivation) that
//! operate on them.

pub mod audit;
pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod redaction;
pub mod time;

pub use audit::AuditChainError;
pub use audit::compute_entry_hash;
pub use audit::verify_chain;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use identifiers::ActionId;
pub use identifiers::AuditId;
pub use identifiers::ChangeId;
pub use identifiers::CorrelationId;
pub use identifiers::DecisionId;
pub use identifiers::IssueId;
pub use identifiers::MerchantId;
pub use identifiers::PatternId;
pub use identifiers::SignalId;
pub use identifiers::SnapshotId;
pub use model::Action;
pub use model::ActionResult;
pub use model::ActionType;
pub use model::AlternativeConsidered;
pub use model::AuditEntry;
pub use model::ConfigChange;
pub use model::ConfigSnapshot;
pub use model::ContextMap;
pub use model::Decision;
pub use model::ERROR_MESSAGE_MAX_LEN;
pub use model::IssueState;
pub use model::IssueStatus;
pub use model::PATTERN_CONFIDENCE_CEILING;
pub use model::Pattern;
pub use model::PatternType;
pub use model::RiskLevel;
pub use model::RootCauseAnalysis;
pub use model::RootCauseCategory;
pub use model::Severity;
pub use model::Signal;
pub use model::SignalSource;
pub use redaction::DEFAULT_SENSITIVE_FIELDS;
pub use redaction::REDACTED_PLACEHOLDER;
pub use redaction::RedactionPolicy;
pub use redaction::redact_value;
pub use time::Timestamp;
