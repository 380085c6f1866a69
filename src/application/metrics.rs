//! Observability counters for the kernel.
//!
//! Every component records what it decided into a shared `KernelMetrics`
//! handle so the host can surface it in a health report.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters tracking kernel decisions.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Cloning is cheap and clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct KernelMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    consumes_allowed: AtomicU64,
    consumes_denied: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    circuits_opened: AtomicU64,
    anomalies_detected: AtomicU64,
    alerts_fired: AtomicU64,
    errors_reported: AtomicU64,
    internal_failures: AtomicU64,
}

impl KernelMetrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_consume(&self, allowed: bool) {
        let counter = if allowed {
            &self.inner.consumes_allowed
        } else {
            &self.inner.consumes_denied
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_rejection(&self) {
        self.inner.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_opened(&self) {
        self.inner.circuits_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.inner.anomalies_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert(&self) {
        self.inner.alerts_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error_report(&self) {
        self.inner.errors_reported.fetch_add(1, Ordering::Relaxed);
    }

    /// A failure inside the kernel itself that was absorbed.
    pub(crate) fn record_internal_failure(&self) {
        self.inner.internal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            consumes_allowed: load(&self.inner.consumes_allowed),
            consumes_denied: load(&self.inner.consumes_denied),
            retries: load(&self.inner.retries),
            circuit_rejections: load(&self.inner.circuit_rejections),
            circuits_opened: load(&self.inner.circuits_opened),
            anomalies_detected: load(&self.inner.anomalies_detected),
            alerts_fired: load(&self.inner.alerts_fired),
            errors_reported: load(&self.inner.errors_reported),
            internal_failures: load(&self.inner.internal_failures),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        for counter in [
            &self.inner.consumes_allowed,
            &self.inner.consumes_denied,
            &self.inner.retries,
            &self.inner.circuit_rejections,
            &self.inner.circuits_opened,
            &self.inner.anomalies_detected,
            &self.inner.alerts_fired,
            &self.inner.errors_reported,
            &self.inner.internal_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub consumes_allowed: u64,
    pub consumes_denied: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub circuits_opened: u64,
    pub anomalies_detected: u64,
    pub alerts_fired: u64,
    pub errors_reported: u64,
    pub internal_failures: u64,
}

impl MetricsSnapshot {
    /// Share of consume attempts that were denied, in `[0, 1]`.
    pub fn denial_rate(&self) -> f64 {
        let total = self.consumes_allowed + self.consumes_denied;
        if total == 0 {
            0.0
        } else {
            self.consumes_denied as f64 / total as f64
        }
    }
}
