// incident-safety/src/lib.rs
// ============================================================================
// Module: Incident Safety Library
// Description: Process-wide interlocks and failure isolation primitives.
// Purpose: House the circuit breaker, safe-mode manager, graceful
//          degradation manager, and per-merchant rate limiter that every
//          other crate in the workspace depends on for fail-closed behavior.
// Dependencies: incident-core, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! `incident-safety` holds the interlocks that keep the incident pipeline
//! from making things worse when something downstream is failing: a
//! [`circuit_breaker::CircuitBreaker`] per external dependency, a single
//! process-wide [`safe_mode::SafeModeManager`], a
//! [`degradation::DegradationManager`] that tracks per-service fallback
//! routing and buffers signals while the event bus is down, and a
//! [`rate_limiter::RateLimiter`] that caps per-merchant action throughput.
//! Every type here is a plain, lock-guarded value meant to be constructed
//! once at startup and shared by reference — no global state.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod circuit_breaker;
pub mod degradation;
pub mod rate_limiter;
pub mod safe_mode;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use circuit_breaker::BreakerState;
pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitBreakerError;
pub use degradation::DegradationManager;
pub use degradation::DegradationSnapshot;
pub use degradation::Service;
pub use degradation::SignalBuffer;
pub use rate_limiter::RateLimitDecision;
pub use rate_limiter::RateLimiter;
pub use safe_mode::SafeModeError;
pub use safe_mode::SafeModeManager;
pub use safe_mode::SafeModeReason;
pub use safe_mode::SafeModeSnapshot;
