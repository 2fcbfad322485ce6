// incident-safety/src/rate_limiter.rs
// ============================================================================
// Module: Per-Merchant Rate Limiter
// Description: Sliding-window action-rate limiting keyed by
//              (merchant, action_type).
// Purpose: Cap how many actions of one type the executor may run for one
//          merchant within a rolling window, atomically.
// Dependencies: incident-core
// ============================================================================

//! ## Overview
//! The rate limiter mirrors a cache-backed token counter keyed
//! `rate:{merchant}:{action_type}:{window_start}`: the first request in a
//! window sets its expiry, and the increment-and-check is atomic under a
//! single lock, matching the compare-and-set semantics described for the
//! cache-store backend. An in-process `Mutex<HashMap>` gives the same
//! atomicity without requiring a live cache service for local runs and
//! tests; [`incident_store`] supplies a durable, cache-backed equivalent for
//! production deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use incident_core::ActionType;
use incident_core::MerchantId;
use incident_core::Timestamp;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the action is permitted to proceed.
    pub allowed: bool,
    /// The count of actions in the current window, including this one if
    /// `allowed`.
    pub count: u32,
    /// Whether `count` has reached or exceeded the excessive-action flag
    /// threshold (spec default: 10). Set only when `allowed`.
    pub excessive: bool,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: Timestamp,
}

/// Per-merchant, per-action-type sliding-window rate limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(MerchantId, ActionType), Window>>,
}

impl RateLimiter {
    /// Creates an empty rate limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and, if permitted, atomically increments the action count for
    /// `(merchant_id, action_type)` at `now`. A window lasts
    /// `window_seconds` from the first action recorded in it. Rejected
    /// attempts do not increment the counter. `excessive_threshold` flags
    /// (but never rejects) counts at or above it.
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    pub fn check_and_increment(
        &self,
        merchant_id: &MerchantId,
        action_type: ActionType,
        now: Timestamp,
        window_seconds: u64,
        max_actions: u32,
        excessive_threshold: u32,
    ) -> RateLimitDecision {
        let mut windows = self.windows.unwrap_lock();
        let key = (merchant_id.clone(), action_type);
        let window_span = time::Duration::seconds(i64::try_from(window_seconds).unwrap_or(i64::MAX));
        let entry = windows.get(&key).copied();
        let active = entry.filter(|window| now.saturating_duration_since(window.window_start) < window_span);

        let current_count = active.map_or(0, |window| window.count);
        if current_count >= max_actions {
            return RateLimitDecision {
                allowed: false,
                count: current_count,
                excessive: false,
            };
        }

        let next_count = current_count + 1;
        let window_start = active.map_or(now, |window| window.window_start);
        windows.insert(
            key,
            Window {
                count: next_count,
                window_start,
            },
        );
        RateLimitDecision {
            allowed: true,
            count: next_count,
            excessive: next_count >= excessive_threshold,
        }
    }
}

/// Tiny extension trait so `check_and_increment` can read through a
/// poisoned-mutex-free lock without repeating the `.lock().unwrap()` idiom
/// at every call site.
trait UnwrapLock<T> {
    fn unwrap_lock(&self) -> std::sync::MutexGuard<'_, T>;
}

impl<T> UnwrapLock<T> for Mutex<T> {
    #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
    fn unwrap_lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;
    use incident_core::ActionType;
    use incident_core::MerchantId;
    use incident_core::Timestamp;

    #[test]
    fn permits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let merchant = MerchantId::new("m1");
        let now = Timestamp::now();
        for expected_count in 1..=3 {
            let decision = limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 3, 10);
            assert!(decision.allowed);
            assert_eq!(decision.count, expected_count);
        }
        let fourth = limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 3, 10);
        assert!(!fourth.allowed);
    }

    #[test]
    fn rejection_does_not_increment_counter() {
        let limiter = RateLimiter::new();
        let merchant = MerchantId::new("m1");
        let now = Timestamp::now();
        limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 1, 10);
        let rejected = limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 1, 10);
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 1);
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new();
        let merchant = MerchantId::new("m1");
        let now = Timestamp::now();
        limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 1, 10);
        let later = Timestamp::from_offset(now.as_offset() + time::Duration::seconds(61));
        let decision = limiter.check_and_increment(&merchant, ActionType::SupportGuidance, later, 60, 1, 10);
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
    }

    #[test]
    fn different_merchants_are_independent() {
        let limiter = RateLimiter::new();
        let now = Timestamp::now();
        limiter.check_and_increment(&MerchantId::new("m1"), ActionType::SupportGuidance, now, 60, 1, 10);
        let decision = limiter.check_and_increment(&MerchantId::new("m2"), ActionType::SupportGuidance, now, 60, 1, 10);
        assert!(decision.allowed);
    }

    #[test]
    fn excessive_flag_set_without_rejecting() {
        let limiter = RateLimiter::new();
        let merchant = MerchantId::new("m1");
        let now = Timestamp::now();
        let mut last = limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 20, 3);
        for _ in 0..4 {
            last = limiter.check_and_increment(&merchant, ActionType::SupportGuidance, now, 60, 20, 3);
        }
        assert!(last.allowed);
        assert!(last.excessive);
    }
}
