// incident-pipeline/src/analyzer/mod.rs
// ============================================================================
// Module: Root-Cause Analyzer
// Description: LLM-backed root-cause analysis with a deterministic
//              rule-based fallback.
// Purpose: Classify an issue's signals and patterns into one of four closed
//          categories, with a bounded confidence and actionable remediation.
// Dependencies: incident-core, incident-safety
// ============================================================================

//! ## Overview
//! [`llm::RootCauseAnalyzer`] is the public entry point: it prefers calling
//! an LLM behind a circuit breaker, and falls back to [`rule::apply_rules`]
//! whenever the breaker is open, the call times out, the response fails to
//! parse, or the provider reports quota exhaustion.

pub mod llm;
pub mod rule;

pub use llm::AnalyzeError;
pub use llm::RootCauseAnalyzer;
