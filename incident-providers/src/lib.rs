// incident-providers/src/lib.rs
// ============================================================================
// Module: Incident Providers Library
// Description: External-service clients for the incident pipeline.
// Purpose: Wire the root-cause analyzer, pattern detector, and action
//          executor to real LLM, search-index, and ticketing backends.
// Dependencies: incident-core, reqwest
// ============================================================================

//! ## Overview
//! `incident-providers` supplies the concrete, HTTP-backed implementations
//! of `incident_core`'s backend-agnostic interfaces: a Claude-style chat
//! completion client for [`incident_core::LlmClient`], a similarity-search
//! HTTP client for [`incident_core::SearchIndex`], and ticketing/
//! notification action handlers for [`incident_core::ActionHandler`]. Every
//! provider fails closed: transport and parse errors are distinguished so
//! callers (circuit breakers, the action executor's retry policy) can react
//! correctly.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod llm;
pub mod notification;
pub mod search;
pub mod ticketing;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use llm::ClaudeLlmClient;
pub use llm::ClaudeLlmConfig;
pub use notification::NotificationActionHandler;
pub use notification::NotificationConfig;
pub use search::HttpSearchIndex;
pub use search::HttpSearchIndexConfig;
pub use ticketing::TicketingActionHandler;
pub use ticketing::TicketingConfig;
