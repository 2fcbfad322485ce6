// incident-safety/src/circuit_breaker.rs
// ============================================================================
// Module: Circuit Breaker
// Description: Standard three-state circuit breaker guarding calls to a
//              single external dependency.
// Purpose: Stop hammering a failing dependency and give it time to recover,
//          without the caller having to track state itself.
// Dependencies: incident-core, thiserror
// ============================================================================

//! ## Overview
//! A [`CircuitBreaker`] tracks consecutive failures for one external
//! dependency. It starts `closed` (calls allowed); after
//! `failure_threshold` consecutive failures it trips `open` (calls
//! rejected without invoking the wrapped function); once `recovery_timeout`
//! has elapsed since the last failure, the next admitted call probes in
//! `half_open`; a probe success resets to `closed`, a probe failure reopens.

use std::sync::Mutex;

use thiserror::Error;
use time::Duration;

use incident_core::Timestamp;

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls are admitted; failures are counted.
    Closed,
    /// Calls are rejected outright.
    Open,
    /// One probe call is admitted to test recovery.
    HalfOpen,
}

/// Errors raised by [`CircuitBreaker::try_acquire`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// The breaker is open; the call was rejected without being attempted.
    #[error("circuit breaker '{0}' is open")]
    Open(String),
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Timestamp>,
    /// Set while a half-open probe is in flight, so concurrent callers don't
    /// all get admitted as probes at once.
    probe_in_flight: bool,
}

/// Guards calls to one external dependency (spec preconfigured instances:
/// LLM 5/60s, support systems 3/30s, search index 5/45s, event bus 5/30s).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a breaker named `name` with the given failure threshold and
    /// open-state recovery timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout_seconds: u64) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout: Duration::seconds(i64::try_from(recovery_timeout_seconds).unwrap_or(i64::MAX)),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The breaker's name, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state, applying the open-to-half-open transition
    /// if the recovery timeout has elapsed.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn state(&self, now: Timestamp) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_recover(&mut inner, now);
        inner.state
    }

    fn maybe_recover(&self, inner: &mut Inner, now: Timestamp) {
        if inner.state == BreakerState::Open
            && let Some(last_failure) = inner.last_failure
            && now.saturating_duration_since(last_failure) >= self.recovery_timeout
        {
            inner.state = BreakerState::HalfOpen;
            inner.probe_in_flight = false;
        }
    }

    /// Attempts to reserve a call slot. Returns `Ok(())` when the caller
    /// should proceed; the caller must then report the outcome via
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] when the breaker is open and no
    /// probe is currently admissible.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn try_acquire(&self, now: Timestamp) -> Result<(), CircuitBreakerError> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_recover(&mut inner, now);
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(CircuitBreakerError::Open(self.name.clone())),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitBreakerError::Open(self.name.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call: closes the breaker and resets the
    /// failure count.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        tracing::debug!(breaker = self.name.as_str(), "circuit breaker closed");
    }

    /// Records a failed call: trips the breaker open once the threshold is
    /// reached, or reopens immediately from half-open.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn record_failure(&self, now: Timestamp) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(now);
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                tracing::warn!(breaker = self.name.as_str(), "circuit breaker reopened after failed probe");
            }
            BreakerState::Closed | BreakerState::Open => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        breaker = self.name.as_str(),
                        failure_count = inner.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
        }
    }
}
