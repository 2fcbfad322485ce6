// incident-safety/src/degradation.rs
// ============================================================================
// Module: Graceful Degradation Manager
// Description: Per-service degraded-bit tracking plus the durable signal
//              buffer used while the event bus is unavailable.
// Purpose: Coordinate fallback routing (rule-based analysis, cache-only
//          pattern matching, buffered publish) without the caller having to
//          track which services are currently degraded.
// Dependencies: incident-core, tracing
// ============================================================================

//! ## Overview
//! [`DegradationManager`] tracks one degraded bit per [`Service`] (`llm`,
//! `search_index`, `event_bus`) and logs every edge transition. It does not
//! itself decide *when* to degrade — the LLM analyzer, pattern detector, and
//! event-bus publisher each call [`DegradationManager::mark_degraded`] when
//! their own health check (or circuit breaker) says so — but it gives every
//! caller a single, consistent view of current degradation state.
//!
//! [`SignalBuffer`] is the fallback publish path when the event bus is
//! degraded: an append-only, FIFO, TTL-bounded buffer mirroring a
//! `lpush`/`rpop` list in a cache store. Draining is at-most-one via an
//! in-process lease flag; a durable deployment backs the same discipline
//! with a lease row in the cache store (see [`incident_store`]).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use incident_core::Signal;
use incident_core::Timestamp;

/// Default retention for buffered signals while the event bus is degraded.
pub const BUFFER_TTL_DAYS: i64 = 7;

/// A service whose degraded state the pipeline tracks and falls back for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// The root-cause LLM provider.
    Llm,
    /// The pattern-matching search index.
    SearchIndex,
    /// The durable event bus.
    EventBus,
}

impl Service {
    /// Wire name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::SearchIndex => "search_index",
            Self::EventBus => "event_bus",
        }
    }
}

/// A consistent snapshot of which services are currently degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradationSnapshot {
    /// Whether the LLM analyzer is degraded (routing to rule-based fallback).
    pub llm: bool,
    /// Whether the search index is degraded (routing to cache-only matching).
    pub search_index: bool,
    /// Whether the event bus is degraded (routing to the signal buffer).
    pub event_bus: bool,
}

#[derive(Debug, Default)]
struct Bits {
    llm: bool,
    search_index: bool,
    event_bus: bool,
}

/// Tracks per-service degradation state across the pipeline.
#[derive(Debug, Default)]
pub struct DegradationManager {
    bits: Mutex<Bits>,
}

impl DegradationManager {
    /// Creates a manager with every service healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `service` degraded, logging the transition if it was previously
    /// healthy.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn mark_degraded(&self, service: Service) {
        let mut bits = self.bits.lock().unwrap();
        let was_healthy = !bits.get(service);
        bits.set(service, true);
        if was_healthy {
            tracing::warn!(service = service.as_str(), "service marked degraded");
        }
    }

    /// Marks `service` healthy, logging the transition if it was previously
    /// degraded.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn mark_healthy(&self, service: Service) {
        let mut bits = self.bits.lock().unwrap();
        let was_degraded = bits.get(service);
        bits.set(service, false);
        if was_degraded {
            tracing::info!(service = service.as_str(), "service recovered");
        }
    }

    /// Returns whether `service` is currently degraded.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn is_degraded(&self, service: Service) -> bool {
        self.bits.lock().unwrap().get(service)
    }

    /// Returns a consistent snapshot of all tracked services.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn snapshot(&self) -> DegradationSnapshot {
        let bits = self.bits.lock().unwrap();
        DegradationSnapshot {
            llm: bits.llm,
            search_index: bits.search_index,
            event_bus: bits.event_bus,
        }
    }
}

impl Bits {
    const fn get(&self, service: Service) -> bool {
        match service {
            Service::Llm => self.llm,
            Service::SearchIndex => self.search_index,
            Service::EventBus => self.event_bus,
        }
    }

    const fn set(&mut self, service: Service, value: bool) {
        match service {
            Service::Llm => self.llm = value,
            Service::SearchIndex => self.search_index = value,
            Service::EventBus => self.event_bus = value,
        }
    }
}

/// In-memory, FIFO, TTL-bounded buffer of signals awaiting event-bus
/// publish. Mirrors a `lpush`-on-append, `rpop`-on-drain cache-store list.
#[derive(Debug, Default)]
pub struct SignalBuffer {
    entries: Mutex<VecDeque<(Timestamp, Signal)>>,
    draining: AtomicBool,
}

impl SignalBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `signal`, stamped with `now` for TTL eviction.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn push(&self, signal: Signal, now: Timestamp) {
        self.entries.lock().unwrap().push_back((now, signal));
    }

    /// Evicts entries older than [`BUFFER_TTL_DAYS`] relative to `now`.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn evict_expired(&self, now: Timestamp) {
        let ttl = time::Duration::days(BUFFER_TTL_DAYS);
        self.entries
            .lock()
            .unwrap()
            .retain(|(stamped_at, _)| now.saturating_duration_since(*stamped_at) < ttl);
    }

    /// Number of signals currently buffered.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the buffer currently holds no signals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to acquire the at-most-one drain lease. Returns `true` when
    /// acquired; the caller must call [`release_drain_lease`](Self::release_drain_lease)
    /// when done, whether or not the drain succeeded.
    pub fn try_acquire_drain_lease(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the drain lease.
    pub fn release_drain_lease(&self) {
        self.draining.store(false, Ordering::Release);
    }

    /// Drains every currently buffered signal in FIFO (insertion) order,
    /// clearing the buffer. Callers must hold the drain lease.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn drain_in_order(&self) -> Vec<Signal> {
        self.entries.lock().unwrap().drain(..).map(|(_, signal)| signal).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use std::collections::BTreeMap;

    use serde_json::json;

    use super::DegradationManager;
    use super::Service;
    use super::SignalBuffer;
    use incident_core::Severity;
    use incident_core::Signal;
    use incident_core::SignalSource;
    use incident_core::Timestamp;

    fn sample_signal(id: &str) -> Signal {
        Signal {
            signal_id: id.into(),
            timestamp: Timestamp::now(),
            source: SignalSource::ApiFailure,
            raw_data: json!({}),
            merchant_id: "m1".into(),
            migration_stage: None,
            affected_resource: None,
            severity: Severity::High,
            error_code: Some("500".to_string()),
            error_message: None,
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn transitions_log_only_on_edge() {
        let manager = DegradationManager::new();
        assert!(!manager.is_degraded(Service::Llm));
        manager.mark_degraded(Service::Llm);
        assert!(manager.is_degraded(Service::Llm));
        manager.mark_degraded(Service::Llm);
        assert!(manager.is_degraded(Service::Llm));
        manager.mark_healthy(Service::Llm);
        assert!(!manager.is_degraded(Service::Llm));
    }

    #[test]
    fn snapshot_reflects_independent_services() {
        let manager = DegradationManager::new();
        manager.mark_degraded(Service::SearchIndex);
        let snapshot = manager.snapshot();
        assert!(!snapshot.llm);
        assert!(snapshot.search_index);
        assert!(!snapshot.event_bus);
    }

    #[test]
    fn buffer_drains_in_fifo_order() {
        let buffer = SignalBuffer::new();
        let now = Timestamp::now();
        buffer.push(sample_signal("sig-1"), now);
        buffer.push(sample_signal("sig-2"), now);
        buffer.push(sample_signal("sig-3"), now);
        let drained = buffer.drain_in_order();
        let ids: Vec<_> = drained.iter().map(|s| s.signal_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["sig-1", "sig-2", "sig-3"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_evicts_expired_entries() {
        let buffer = SignalBuffer::new();
        let now = Timestamp::now();
        buffer.push(sample_signal("sig-1"), now);
        let much_later = Timestamp::from_offset(now.as_offset() + time::Duration::days(8));
        buffer.evict_expired(much_later);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_lease_is_exclusive() {
        let buffer = SignalBuffer::new();
        assert!(buffer.try_acquire_drain_lease());
        assert!(!buffer.try_acquire_drain_lease());
        buffer.release_drain_lease();
        assert!(buffer.try_acquire_drain_lease());
    }
}
