//! Retry and circuit-breaking around unreliable operations.
//!
//! The circuit breaker is the outer layer and the retry policy the inner one:
//! one call through the engine is at most `max_retries + 1` attempts, and it
//! counts as a single success or failure for the breaker. An open breaker
//! stops even the first attempt.

use crate::application::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
use crate::application::metrics::KernelMetrics;
use crate::application::ports::Clock;
use crate::application::retry::{Backoff, ClassifyFailure, FailureKind, RetryPolicy};
use crate::infrastructure::storage::ShardedStorage;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failure returned by the recovery engine.
#[derive(Debug)]
pub enum RecoveryError<E> {
    /// The breaker for this operation is open; the operation was not called.
    CircuitOpen {
        operation: String,
        retry_after: Duration,
    },
    /// The operation's own error: terminal, or the last transient one.
    Operation(E),
}

impl<E> RecoveryError<E> {
    /// The operation's error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RecoveryError::Operation(e) => Some(e),
            RecoveryError::CircuitOpen { .. } => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RecoveryError::CircuitOpen { .. })
    }
}

impl<E: Display> Display for RecoveryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryError::CircuitOpen {
                operation,
                retry_after,
            } => write!(
                f,
                "circuit for '{}' is open, retry after {}ms",
                operation,
                retry_after.as_millis()
            ),
            RecoveryError::Operation(e) => Display::fmt(e, f),
        }
    }
}

impl<E> Error for RecoveryError<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RecoveryError::Operation(e) => Some(e),
            RecoveryError::CircuitOpen { .. } => None,
        }
    }
}

/// Recovery engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base of the exponential schedule for general operations
    pub base_delay: Duration,
    /// Step of the linear schedule for I/O operations
    pub io_delay_step: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            io_delay_step: Duration::from_millis(100),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Health view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u64,
}

/// Executes fallible operations under retry and per-operation circuit breakers.
///
/// I/O operations use their own breaker namespace: the breaker for
/// `execute_io("save", ..)` is registered as `io:save`.
#[derive(Debug)]
pub struct RecoveryEngine {
    breakers: ShardedStorage<String, Arc<CircuitBreaker>>,
    retry: RetryPolicy,
    io_retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: KernelMetrics,
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig, clock: Arc<dyn Clock>, metrics: KernelMetrics) -> Self {
        let retry = RetryPolicy::new(
            config.max_retries,
            Backoff::Exponential {
                base: config.base_delay,
            },
        )
        .with_metrics(metrics.clone());
        let io_retry = RetryPolicy::new(
            config.max_retries,
            Backoff::Linear {
                step: config.io_delay_step,
            },
        )
        .with_metrics(metrics.clone());

        Self {
            breakers: ShardedStorage::new(),
            retry,
            io_retry,
            breaker_config: config.breaker,
            clock,
            metrics,
        }
    }

    /// Run `op` on the calling thread.
    pub fn execute_blocking<T, E, F>(&self, operation: &str, op: F) -> Result<T, RecoveryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: ClassifyFailure + Display,
    {
        let permit = self.admit(operation)?;
        let result = self.retry.run_blocking(operation, op);
        self.settle(permit, result)
    }

    /// Run a file or device operation on the calling thread.
    pub fn execute_io_blocking<T, F>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<T, RecoveryError<io::Error>>
    where
        F: FnMut() -> io::Result<T>,
    {
        let key = io_key(operation);
        let permit = self.admit(&key)?;
        let result = self.io_retry.run_blocking(&key, op);
        self.settle(permit, result)
    }

    /// Run `op`, suspending between retries.
    #[cfg(feature = "async")]
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<T, RecoveryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: ClassifyFailure + Display,
    {
        let permit = self.admit(operation)?;
        let result = self.retry.run(operation, op).await;
        self.settle(permit, result)
    }

    /// Run a file or device operation, suspending between retries.
    #[cfg(feature = "async")]
    pub async fn execute_io<T, F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<T, RecoveryError<io::Error>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = io::Result<T>>,
    {
        let key = io_key(operation);
        let permit = self.admit(&key)?;
        let result = self.io_retry.run(&key, op).await;
        self.settle(permit, result)
    }

    /// State of the breaker registered under `name`.
    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.breakers.with_existing(name, |b| b.state())
    }

    /// Force a breaker closed. Returns `false` if no breaker has that name.
    pub fn reset_circuit(&self, name: &str) -> bool {
        let found = self.breakers.with_existing(name, |b| b.reset()).is_some();
        if found {
            info!(operation = name, "circuit reset");
        }
        found
    }

    /// Every breaker created so far, sorted by name.
    pub fn circuits(&self) -> Vec<CircuitSnapshot> {
        let mut circuits = self.breakers.collect(|name, breaker| CircuitSnapshot {
            name: name.clone(),
            state: breaker.state(),
            consecutive_failures: breaker.consecutive_failures(),
        });
        circuits.sort_by(|a, b| a.name.cmp(&b.name));
        circuits
    }

    fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.with_entry_mut(
            name.to_string(),
            || {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.breaker_config.clone(),
                    Arc::clone(&self.clock),
                ))
            },
            |breaker| Arc::clone(breaker),
        )
    }

    fn admit<E>(&self, name: &str) -> Result<Permit, RecoveryError<E>> {
        let breaker = self.breaker(name);
        match breaker.allow_request() {
            Admission::Rejected { retry_after } => {
                self.metrics.record_circuit_rejection();
                debug!(
                    operation = name,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "circuit open, failing fast"
                );
                Err(RecoveryError::CircuitOpen {
                    operation: name.to_string(),
                    retry_after,
                })
            }
            admission => Ok(Permit {
                breaker,
                admission,
                settled: false,
            }),
        }
    }

    fn settle<T, E>(&self, mut permit: Permit, result: Result<T, E>) -> Result<T, RecoveryError<E>>
    where
        E: ClassifyFailure + Display,
    {
        permit.settled = true;
        let (breaker, admission) = (&permit.breaker, permit.admission);
        match result {
            Ok(value) => {
                if admission == Admission::Trial {
                    info!(operation = breaker.name(), "trial call succeeded, circuit closed");
                }
                breaker.record_success(admission);
                Ok(value)
            }
            Err(e) => {
                match e.classify() {
                    FailureKind::Transient => {
                        if breaker.record_failure(admission) {
                            self.metrics.record_circuit_opened();
                            warn!(
                                operation = breaker.name(),
                                failures = breaker.consecutive_failures(),
                                error = %e,
                                "circuit opened"
                            );
                        }
                    }
                    FailureKind::Terminal => {
                        if admission == Admission::Trial {
                            breaker.release_trial();
                        }
                    }
                }
                Err(RecoveryError::Operation(e))
            }
        }
    }
}

/// One admitted call, held from admission until its outcome is recorded.
///
/// A trial permit dropped without an outcome (the caller's future was
/// cancelled or the operation panicked) hands the trial back, so the next
/// caller can claim it.
struct Permit {
    breaker: Arc<CircuitBreaker>,
    admission: Admission,
    settled: bool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            warn!(operation = self.breaker.name(), "trial call abandoned");
            self.breaker.release_trial();
        }
    }
}

fn io_key(operation: &str) -> String {
    format!("io:{operation}")
}
