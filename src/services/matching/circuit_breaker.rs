//! Circuit breaker guarding a matching worker: trips open after repeated
//! failures, half-opens after a cooldown to probe recovery, and closes once
//! enough probes succeed.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_probes: u32,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    opened_at_millis: AtomicU64,
    start: Instant,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_probes: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_probes,
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn state(&self) -> CircuitState {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.failure_threshold {
            return CircuitState::Closed;
        }
        let opened_at = self.opened_at_millis.load(Ordering::Relaxed);
        let elapsed = Duration::from_millis(self.now_millis().saturating_sub(opened_at));
        if elapsed >= self.reset_timeout {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Whether a caller may attempt the protected operation right now.
    pub fn allow_request(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.half_open_probes {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.half_open_successes.store(0, Ordering::Relaxed);
                }
            }
            _ => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn record_failure(&self) {
        let was_half_open = self.state() == CircuitState::HalfOpen;
        if was_half_open {
            // A single failed probe reopens the breaker and restarts the clock.
            self.half_open_successes.store(0, Ordering::Relaxed);
            self.opened_at_millis.store(self.now_millis(), Ordering::Relaxed);
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.failure_threshold {
            self.opened_at_millis.store(self.now_millis(), Ordering::Relaxed);
        }
    }
}
