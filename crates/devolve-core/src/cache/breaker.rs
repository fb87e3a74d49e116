// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circuit breaker guarding cache calls.
//!
//! Counts outcomes over a rolling interval. When at least
//! [`MIN_SAMPLES`] calls were observed and the failure ratio reaches
//! [`FAILURE_RATIO`], the circuit opens and calls fail fast. After the
//! cool-off the circuit half-opens: one trial call is let through, and
//! its outcome closes or re-opens the circuit.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Minimum observed calls before the ratio is meaningful.
const MIN_SAMPLES: u32 = 3;
/// Failure ratio at which the circuit opens.
const FAILURE_RATIO: f64 = 0.6;
/// Rolling counting window.
const INTERVAL: Duration = Duration::from_secs(60);
/// How long an open circuit stays open before half-opening.
const COOL_OFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    successes: u32,
    failures: u32,
    window_start: Instant,
    opened_at: Instant,
}

/// Failure-ratio circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    interval: Duration,
    cool_off: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(INTERVAL, COOL_OFF)
    }
}

impl CircuitBreaker {
    /// Breaker with custom window and cool-off (tests shrink these).
    pub fn new(interval: Duration, cool_off: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                successes: 0,
                failures: 0,
                window_start: now,
                opened_at: now,
            }),
            interval,
            cool_off,
        }
    }

    /// Whether a call may proceed. An open circuit transitions to
    /// half-open once the cool-off elapsed, admitting one trial call.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            State::Closed => {
                if inner.window_start.elapsed() >= self.interval {
                    inner.successes = 0;
                    inner.failures = 0;
                    inner.window_start = Instant::now();
                }
                true
            }
            State::Open => {
                if inner.opened_at.elapsed() >= self.cool_off {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // Exactly one trial call is in flight; hold others back.
            State::HalfOpen => false,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Closed;
                inner.successes = 0;
                inner.failures = 0;
                inner.window_start = Instant::now();
            }
            _ => inner.successes += 1,
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Instant::now();
                warn!("cache circuit re-opened after failed trial call");
            }
            State::Closed => {
                inner.failures += 1;
                let total = inner.successes + inner.failures;
                let ratio = inner.failures as f64 / total as f64;
                if total >= MIN_SAMPLES && ratio >= FAILURE_RATIO {
                    inner.state = State::Open;
                    inner.opened_at = Instant::now();
                    warn!(
                        failures = inner.failures,
                        total, "cache circuit opened"
                    );
                }
            }
            State::Open => {}
        }
    }

    /// Whether the circuit is currently open (calls fail fast).
    pub fn is_open(&self) -> bool {
        self.lock().state == State::Open
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_secs(60), Duration::from_millis(20))
    }

    #[test]
    fn test_closed_allows_calls() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.allow());
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_opens_at_failure_ratio() {
        let breaker = fast_breaker();
        // 1 success + 2 failures = ratio 0.667 over 3 samples
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn test_needs_min_samples() {
        let breaker = fast_breaker();
        // 2 failures alone are below the sample floor
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_trial_closes_on_success() {
        let breaker = fast_breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow(), "cool-off elapsed, trial admitted");
        assert!(!breaker.allow(), "only one trial at a time");

        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.allow());
    }

    #[test]
    fn test_half_open_trial_reopens_on_failure() {
        let breaker = fast_breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow());

        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn test_window_reset_clears_counts() {
        let breaker = CircuitBreaker::new(Duration::from_millis(10), Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        // allow() rolls the window, old failures no longer count
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
