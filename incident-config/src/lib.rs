// incident-config/src/lib.rs
// ============================================================================
// Module: Incident Config Library
// Description: Canonical config model and validation for the incident
//              response pipeline.
// Purpose: Single source of truth for incident.toml semantics.
// Dependencies: incident-core, serde, toml
// ============================================================================

//! ## Overview
//! `incident-config` defines the canonical configuration model for the
//! incident response pipeline: pattern-detector tuning, rate limiting,
//! retry policy, per-dependency circuit breakers, safe-mode thresholds,
//! webhook secrets, and redaction overrides. Validation is strict and
//! fail-closed: an out-of-range value is a startup error.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
