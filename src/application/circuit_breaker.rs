//! Circuit breaker guarding one class of unreliable operations.
//!
//! After a run of consecutive transient failures the breaker opens and callers
//! fail fast without touching the operation. Once the break duration has
//! elapsed a single trial call is let through; its outcome closes or reopens
//! the circuit.

use crate::application::ports::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Operating normally
    Closed = 0,
    /// Failing fast until the break duration elapses
    Open = 1,
    /// Waiting on a single trial call
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial is allowed
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Outcome of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call normally
    Allowed,
    /// This caller owns the half-open trial
    Trial,
    /// Fail fast
    Rejected { retry_after: Duration },
}

/// Circuit breaker for one operation name.
///
/// State transitions are lock-free. The transition into `Open` is a
/// compare-and-swap, so concurrent failures open the circuit exactly once.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_nanos: AtomicU64,
    trial_in_flight: AtomicBool,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    /// Reference point for the stored failure timestamp
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_nanos: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            config,
            clock,
            epoch,
        }
    }

    /// Operation name this breaker protects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get the number of consecutive transient failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Ask whether a call may proceed.
    pub fn allow_request(&self) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let remaining = self.remaining_break();
                if !remaining.is_zero() {
                    return Admission::Rejected {
                        retry_after: remaining,
                    };
                }
                self.claim_trial(CircuitState::Open)
            }
            CircuitState::HalfOpen => self.claim_trial(CircuitState::HalfOpen),
        }
    }

    /// Record a successful call admitted as `admission`.
    ///
    /// Only the trial's outcome leaves `HalfOpen`. A call admitted while the
    /// circuit was closed that finishes after it opened changes nothing.
    pub fn record_success(&self, admission: Admission) {
        match admission {
            Admission::Trial => {
                self.consecutive_failures.store(0, Ordering::Release);
                let _ = self.state.compare_exchange(
                    CircuitState::HalfOpen as u8,
                    CircuitState::Closed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.trial_in_flight.store(false, Ordering::Release);
            }
            Admission::Allowed if self.state() == CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Record a transient failure of a call admitted as `admission`.
    ///
    /// Returns `true` if this call opened the circuit.
    pub fn record_failure(&self, admission: Admission) -> bool {
        match admission {
            Admission::Trial => {
                self.mark_failure();
                let reopened = self.open_from(CircuitState::HalfOpen);
                self.trial_in_flight.store(false, Ordering::Release);
                reopened
            }
            Admission::Allowed if self.state() == CircuitState::Closed => {
                let failures = self.mark_failure();
                failures >= u64::from(self.config.failure_threshold)
                    && self.open_from(CircuitState::Closed)
            }
            _ => false,
        }
    }

    /// Give up a half-open trial without deciding the circuit.
    ///
    /// Used when the trial ended in a failure that says nothing about the
    /// health of the dependency.
    pub fn release_trial(&self) {
        self.trial_in_flight.store(false, Ordering::Release);
    }

    /// Time left before the circuit will allow a trial.
    pub fn retry_after(&self) -> Duration {
        match self.state() {
            CircuitState::Open => self.remaining_break(),
            _ => Duration::ZERO,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
    }

    // Written before any transition so a reader that observes `Open` also
    // observes the failure time.
    fn mark_failure(&self) -> u64 {
        self.last_failure_nanos
            .store(self.elapsed_nanos(), Ordering::Release);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn open_from(&self, from: CircuitState) -> bool {
        self.state
            .compare_exchange(
                from as u8,
                CircuitState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // The trial flag is the single arbiter: whoever sets it owns the trial.
    fn claim_trial(&self, from: CircuitState) -> Admission {
        let claimed = self
            .trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            return Admission::Rejected {
                retry_after: self.retry_after(),
            };
        }
        let entered = self
            .state
            .compare_exchange(
                from as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if entered {
            Admission::Trial
        } else {
            self.trial_in_flight.store(false, Ordering::Release);
            Admission::Rejected {
                retry_after: self.retry_after(),
            }
        }
    }

    fn remaining_break(&self) -> Duration {
        let last_failure = Duration::from_nanos(self.last_failure_nanos.load(Ordering::Acquire));
        let since_failure = Duration::from_nanos(self.elapsed_nanos()).saturating_sub(last_failure);
        self.config.break_duration.saturating_sub(since_failure)
    }

    fn elapsed_nanos(&self) -> u64 {
        self.clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn breaker(threshold: u32, break_secs: u64) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new(Instant::now());
        let cb = CircuitBreaker::new(
            "transcribe",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                break_duration: Duration::from_secs(break_secs),
            },
            Arc::new(clock.clone()),
        );
        (cb, clock)
    }

    #[test]
    fn test_initial_state() {
        let (cb, _clock) = breaker(5, 30);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.allow_request(), Admission::Allowed);
        assert_eq!(cb.name(), "transcribe");
    }

    #[test]
    fn test_failure_threshold() {
        let (cb, _clock) = breaker(3, 30);

        assert!(!cb.record_failure(Admission::Allowed));
        assert!(!cb.record_failure(Admission::Allowed));
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.record_failure(Admission::Allowed));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 3);
    }

    #[test]
    fn test_open_rejects_with_retry_after() {
        let (cb, clock) = breaker(2, 30);
        cb.record_failure(Admission::Allowed);
        cb.record_failure(Admission::Allowed);

        clock.advance(Duration::from_secs(10));
        assert_eq!(
            cb.allow_request(),
            Admission::Rejected {
                retry_after: Duration::from_secs(20)
            }
        );
    }

    #[test]
    fn test_single_trial_after_break() {
        let (cb, clock) = breaker(2, 30);
        cb.record_failure(Admission::Allowed);
        cb.record_failure(Admission::Allowed);

        clock.advance(Duration::from_secs(30));
        assert_eq!(cb.allow_request(), Admission::Trial);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(matches!(cb.allow_request(), Admission::Rejected { .. }));
    }

    #[test]
    fn test_half_open_success_closes_circuit() {
        let (cb, clock) = breaker(2, 30);
        cb.record_failure(Admission::Allowed);
        cb.record_failure(Admission::Allowed);
        clock.advance(Duration::from_secs(31));
        assert_eq!(cb.allow_request(), Admission::Trial);

        cb.record_success(Admission::Trial);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.allow_request(), Admission::Allowed);
    }

    #[test]
    fn test_half_open_failure_reopens_circuit() {
        let (cb, clock) = breaker(2, 30);
        cb.record_failure(Admission::Allowed);
        cb.record_failure(Admission::Allowed);
        clock.advance(Duration::from_secs(30));
        assert_eq!(cb.allow_request(), Admission::Trial);

        assert!(cb.record_failure(Admission::Trial));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.retry_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_released_trial_can_be_reclaimed() {
        let (cb, clock) = breaker(1, 5);
        cb.record_failure(Admission::Allowed);
        clock.advance(Duration::from_secs(5));
        assert_eq!(cb.allow_request(), Admission::Trial);

        cb.release_trial();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.allow_request(), Admission::Trial);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _clock) = breaker(5, 30);
        cb.record_failure(Admission::Allowed);
        cb.record_failure(Admission::Allowed);
        cb.record_success(Admission::Allowed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let (cb, _clock) = breaker(2, 30);
        cb.record_failure(Admission::Allowed);
        cb.record_failure(Admission::Allowed);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.allow_request(), Admission::Allowed);
    }

    #[test]
    fn test_concurrent_failures_open_exactly_once() {
        let (cb, _clock) = breaker(5, 30);
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.record_failure(Admission::Allowed))
            })
            .collect();

        let opened = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|opened| *opened)
            .count();

        assert_eq!(opened, 1);
        assert!(cb.consecutive_failures() >= 5);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_late_outcomes_do_not_decide_half_open() {
        let (cb, clock) = breaker(1, 30);
        cb.record_failure(Admission::Allowed);
        clock.advance(Duration::from_secs(31));
        assert_eq!(cb.allow_request(), Admission::Trial);

        // A call admitted before the circuit opened finishes during the trial.
        cb.record_success(Admission::Allowed);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.record_failure(Admission::Allowed));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(matches!(cb.allow_request(), Admission::Rejected { .. }));

        cb.record_success(Admission::Trial);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_late_failure_while_open_keeps_break_window() {
        let (cb, clock) = breaker(1, 30);
        cb.record_failure(Admission::Allowed);
        clock.advance(Duration::from_secs(20));

        assert!(!cb.record_failure(Admission::Allowed));
        assert_eq!(cb.retry_after(), Duration::from_secs(10));
    }

    #[test]
    fn test_concurrent_trial_claim() {
        let (cb, clock) = breaker(1, 1);
        cb.record_failure(Admission::Allowed);
        clock.advance(Duration::from_secs(2));
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.allow_request())
            })
            .collect();

        let trials = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a == Admission::Trial)
            .count();
        assert_eq!(trials, 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(CircuitState::from(9), CircuitState::Closed);
    }
}
