// incident-core/src/interfaces/mod.rs
// ============================================================================
// Module: Incident Core Interfaces
// Description: Backend-agnostic interfaces for event publication, search, and
//              persistence.
// Purpose: Define the contract surfaces the pipeline, broker, and store
//          crates implement, without embedding backend-specific details.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the incident pipeline integrates with external
//! systems (an event bus, a search index, durable storage) without the core
//! crate depending on any concrete backend. Implementations must fail closed
//! on missing or invalid data and must never silently drop a write.

use thiserror::Error;

use crate::core::Action;
use crate::core::ActionResult;
use crate::core::AuditEntry;
use crate::core::ChangeId;
use crate::core::ConfigChange;
use crate::core::ConfigSnapshot;
use crate::core::IssueId;
use crate::core::IssueState;
use crate::core::MerchantId;
use crate::core::Pattern;
use crate::core::PatternId;
use crate::core::Signal;

// ============================================================================
// SECTION: Event Bus
// ============================================================================

/// A topic a [`EventBus`] publishes to or consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Normalized signals, ready for pattern detection.
    SignalsNormalized,
    /// Patterns detected by the pattern detector.
    PatternsDetected,
    /// Decisions routed by the decision engine.
    DecisionsRouted,
    /// Actions executed by the action executor.
    ActionsExecuted,
}

impl Topic {
    /// Returns the wire topic name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignalsNormalized => "signals.normalized",
            Self::PatternsDetected => "patterns.detected",
            Self::DecisionsRouted => "decisions.routed",
            Self::ActionsExecuted => "actions.executed",
        }
    }
}

/// Event bus errors.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus could not be reached or rejected the publish.
    #[error("event bus publish failed: {0}")]
    PublishFailed(String),
}

/// A message published on the event bus, keyed for partitioning.
#[derive(Debug, Clone)]
pub struct EventMessage {
    /// Partition key, typically a merchant id.
    pub key: String,
    /// Canonical-JSON-serialized payload.
    pub payload: serde_json::Value,
}

/// Backend-agnostic event bus publisher.
///
/// Mirrors the broker's dispatch contract: callers hand over an already-built
/// message and topic; the implementation owns delivery, retries, and
/// connection health.
pub trait EventBus {
    /// Publishes a message to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] when the publish fails.
    fn publish(&self, topic: Topic, message: &EventMessage) -> Result<(), EventBusError>;
}

// ============================================================================
// SECTION: Search Index
// ============================================================================

/// Search index errors.
#[derive(Debug, Error)]
pub enum SearchIndexError {
    /// The index could not be reached or returned an invalid response.
    #[error("search index query failed: {0}")]
    QueryFailed(String),
}

/// A similarity match returned by a [`SearchIndex`] query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    /// The matched pattern.
    pub pattern: Pattern,
    /// Similarity score in `[0, 1]`.
    pub score: f64,
}

/// Backend-agnostic similarity search over known patterns.
///
/// Mirrors the evidence provider contract: the pattern detector queries
/// without knowing whether the backend is an embedded index or a remote
/// search cluster.
pub trait SearchIndex {
    /// Finds patterns similar to `signal`, scored at or above `min_score`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchIndexError`] when the query cannot be answered.
    fn find_similar(
        &self,
        signal: &Signal,
        min_score: f64,
    ) -> Result<Vec<SimilarityMatch>, SearchIndexError>;

    /// Indexes or re-indexes a pattern for future similarity queries.
    ///
    /// # Errors
    ///
    /// Returns [`SearchIndexError`] when indexing fails.
    fn index(&self, pattern: &Pattern) -> Result<(), SearchIndexError>;
}

// ============================================================================
// SECTION: Issue Store
// ============================================================================

/// Issue store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
}

/// Durable persistence for per-issue state.
pub trait IssueStore {
    /// Loads issue state by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, issue_id: &IssueId) -> Result<Option<IssueState>, StoreError>;

    /// Saves issue state, overwriting any prior state for the same id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save(&self, state: &IssueState) -> Result<(), StoreError>;

    /// Lists issue ids currently open (not `action_executed`/`action_failed`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the listing cannot be produced.
    fn list_open(&self) -> Result<Vec<IssueId>, StoreError>;
}

// ============================================================================
// SECTION: Audit Store
// ============================================================================

/// Durable, append-only persistence for audit entries.
pub trait AuditStore {
    /// Appends an entry. Implementations must reject an entry whose
    /// `previous_hash` does not match the last entry recorded for the same
    /// `issue_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the append fails or the chain link is
    /// invalid.
    fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Loads all entries for `issue_id`, ordered by timestamp ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_chain(&self, issue_id: &IssueId) -> Result<Vec<AuditEntry>, StoreError>;
}

// ============================================================================
// SECTION: Config Store
// ============================================================================

/// Durable persistence for configuration snapshots and changes.
pub trait ConfigStore {
    /// Persists a configuration change record (which embeds its before/after
    /// snapshots).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn record_change(&self, change: &ConfigChange) -> Result<(), StoreError>;

    /// Loads the most recent change for a resource, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn latest_change(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ConfigChange>, StoreError>;

    /// Loads the change recorded under `change_id`, regardless of resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn get_change(&self, change_id: &ChangeId) -> Result<Option<ConfigChange>, StoreError>;

    /// Loads a resource's current configuration snapshot, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn current_snapshot(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ConfigSnapshot>, StoreError>;
}

// ============================================================================
// SECTION: Action Handler
// ============================================================================

/// Action handler errors, distinguishing retryable transport failures from
/// permanent rejections.
#[derive(Debug, Error)]
pub enum ActionHandlerError {
    /// A connection or timeout failure; the caller may retry.
    #[error("action handler transport error: {0}")]
    Transport(String),
    /// The action was rejected and retrying would not help.
    #[error("action handler rejected the action: {0}")]
    Rejected(String),
}

/// Executes one [`crate::core::ActionType`]'s side effect.
pub trait ActionHandler {
    /// Executes `action` for `merchant_id`, returning its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ActionHandlerError`]; [`ActionHandlerError::Transport`]
    /// variants are eligible for the executor's retry policy.
    fn execute(&self, action: &Action, merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError>;
}

// ============================================================================
// SECTION: LLM Client
// ============================================================================

/// LLM client errors, distinguishing the cases the root-cause analyzer's
/// fallback logic must branch on from generic transport failures.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// The request timed out waiting for a response.
    #[error("llm request timed out")]
    Timeout,
    /// The account or API key has exhausted its quota.
    #[error("llm quota exceeded")]
    QuotaExceeded,
    /// The response could not be parsed as the expected JSON shape.
    #[error("llm response parse error: {0}")]
    ParseError(String),
    /// Any other transport or provider-side failure.
    #[error("llm request failed: {0}")]
    Transport(String),
}

/// Backend-agnostic chat-completion client for the root-cause analyzer's
/// primary (LLM) path.
///
/// Mirrors the search index contract: callers hand over an already-built
/// system and user prompt; the implementation owns the provider, model
/// selection, and request/response plumbing.
pub trait LlmClient {
    /// Sends `system_prompt` and `user_prompt` to the model at a
    /// deterministic (low) temperature and returns the raw text response.
    ///
    /// # Errors
    ///
    /// Returns [`LlmClientError`] when the call cannot be completed or the
    /// response cannot be read as text.
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmClientError>;
}

// ============================================================================
// SECTION: Pattern Cache
// ============================================================================

/// In-memory or durable cache of recently active patterns, scoped to the
/// detector's sliding window.
pub trait PatternCache {
    /// Returns the pattern with the given id, if still within the window.
    fn get(&self, pattern_id: &PatternId) -> Option<Pattern>;

    /// Inserts or updates a pattern in the cache.
    fn put(&self, pattern: Pattern);

    /// Returns all patterns currently held.
    fn all(&self) -> Vec<Pattern>;

    /// Evicts patterns whose `last_seen` falls outside `window_seconds` of
    /// `now`.
    fn evict_expired(&self, now: crate::core::Timestamp, window_seconds: i64);
}
