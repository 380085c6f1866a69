//! Retry with backoff for transient failures.

use crate::application::metrics::KernelMetrics;
use std::fmt::Display;
use std::io;
use std::time::Duration;
use tracing::warn;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The same call may succeed later
    Transient,
    /// Retrying cannot help
    Terminal,
}

/// Classifies an error for the retry and circuit-breaker layers.
///
/// # Examples
///
/// ```
/// use dictation_guard::application::retry::{ClassifyFailure, FailureKind};
///
/// #[derive(Debug)]
/// enum ApiError {
///     Timeout,
///     BadRequest,
/// }
///
/// impl ClassifyFailure for ApiError {
///     fn classify(&self) -> FailureKind {
///         match self {
///             ApiError::Timeout => FailureKind::Transient,
///             ApiError::BadRequest => FailureKind::Terminal,
///         }
///     }
/// }
///
/// assert_eq!(ApiError::Timeout.classify(), FailureKind::Transient);
/// ```
pub trait ClassifyFailure {
    fn classify(&self) -> FailureKind;
}

impl ClassifyFailure for io::Error {
    fn classify(&self) -> FailureKind {
        use io::ErrorKind::*;
        match self.kind() {
            TimedOut | Interrupted | WouldBlock | ConnectionReset | ConnectionAborted
            | ConnectionRefused | NotConnected | BrokenPipe | UnexpectedEof => {
                FailureKind::Transient
            }
            _ => FailureKind::Terminal,
        }
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^attempt`
    Exponential { base: Duration },
    /// `step * attempt`
    Linear { step: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Exponential { base } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
            Backoff::Linear { step } => step.saturating_mul(attempt),
        }
    }
}

/// Retries transient failures up to a fixed number of times.
///
/// `max_retries = 3` means at most four calls in total. Terminal failures
/// and the failure of the last attempt are returned unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    metrics: Option<KernelMetrics>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            metrics: None,
        }
    }

    /// Count every retry in `metrics`.
    pub fn with_metrics(mut self, metrics: KernelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `op` on the current thread, sleeping between attempts.
    pub fn run_blocking<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: ClassifyFailure + Display,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => match self.next_delay(operation, &mut attempt, &e) {
                    Some(delay) => std::thread::sleep(delay),
                    None => return Err(e),
                },
            }
        }
    }

    /// Run `op`, suspending the task between attempts.
    #[cfg(feature = "async")]
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: ClassifyFailure + Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match self.next_delay(operation, &mut attempt, &e) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e),
                },
            }
        }
    }

    fn next_delay<E>(&self, operation: &str, attempt: &mut u32, error: &E) -> Option<Duration>
    where
        E: ClassifyFailure + Display,
    {
        if error.classify() == FailureKind::Terminal || *attempt >= self.max_retries {
            return None;
        }
        *attempt += 1;
        let delay = self.backoff.delay(*attempt);
        warn!(
            operation,
            attempt = *attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "transient failure, retrying"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_retry();
        }
        Some(delay)
    }
}
