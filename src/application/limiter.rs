//! Per-resource token-bucket rate limiting.
//!
//! The limiter decides whether a caller may use a named resource right now.
//! Each resource has a baseline (capacity and refill period) loaded at
//! startup; the live bucket is always derived from that baseline and a global
//! scaling factor, and is replaced rather than mutated when either changes.

use crate::application::dispatch::emit_detached;
use crate::application::metrics::KernelMetrics;
use crate::application::ports::{Clock, EventSink};
use crate::domain::bucket::{LimiterBaseline, TokenBucket};
use crate::domain::event::{EventType, NewEvent, Sensitivity};
use crate::infrastructure::storage::ShardedStorage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error returned for an invalid limiter adjustment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    /// Scaling factor must be finite and greater than zero
    #[error("scaling factor must be finite and greater than 0, got {0}")]
    InvalidScalingFactor(f64),
    /// Capacity must be at least one token
    #[error("limiter '{0}' must have a capacity of at least 1")]
    ZeroCapacity(String),
}

/// Point-in-time view of one limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSnapshot {
    pub resource: String,
    pub capacity: u32,
    pub available_tokens: f64,
    pub period_ms: u64,
}

/// Token-bucket rate limiter keyed by resource name.
///
/// Unknown resources are always allowed: a missing limiter must never turn
/// into a denial of service against the caller.
#[derive(Debug)]
pub struct RateLimiter {
    baselines: ShardedStorage<String, LimiterBaseline>,
    buckets: ShardedStorage<String, TokenBucket>,
    scaling_factor: Mutex<f64>,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn EventSink>>,
    metrics: KernelMetrics,
}

impl RateLimiter {
    /// Create a limiter with the given baselines at scaling factor 1.0.
    ///
    /// # Errors
    /// Returns `LimiterError::ZeroCapacity` if any baseline has no capacity.
    pub fn new(
        baselines: impl IntoIterator<Item = LimiterBaseline>,
        clock: Arc<dyn Clock>,
        metrics: KernelMetrics,
    ) -> Result<Self, LimiterError> {
        let limiter = Self {
            baselines: ShardedStorage::new(),
            buckets: ShardedStorage::new(),
            scaling_factor: Mutex::new(1.0),
            clock,
            sink: None,
            metrics,
        };
        for baseline in baselines {
            limiter.register(baseline)?;
        }
        Ok(limiter)
    }

    /// Report denied consumes to an event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Add or replace a resource baseline.
    ///
    /// The new bucket starts full at the baseline capacity scaled by the
    /// current factor.
    pub fn register(&self, baseline: LimiterBaseline) -> Result<(), LimiterError> {
        if baseline.capacity == 0 {
            return Err(LimiterError::ZeroCapacity(baseline.resource));
        }
        // Held across both inserts; rebuilds take the same lock.
        let factor = self.factor_guard();
        let bucket = baseline.build_bucket(*factor, self.clock.now());
        self.buckets.insert(baseline.resource.clone(), bucket);
        self.baselines.insert(baseline.resource.clone(), baseline);
        Ok(())
    }

    /// Try to take one token for `resource`.
    ///
    /// Returns `true` if the caller may proceed. A denial is reported to the
    /// event sink, but a failing sink never changes the decision.
    pub fn try_consume(&self, resource: &str) -> bool {
        let now = self.clock.now();
        let decision = self
            .buckets
            .with_existing_mut(resource, |bucket| bucket.try_consume(now));

        let allowed = match decision {
            Some(allowed) => allowed,
            None => {
                debug!(resource, "no limiter registered, allowing");
                true
            }
        };

        self.metrics.record_consume(allowed);
        if !allowed {
            self.report_denial(resource);
        }
        allowed
    }

    /// Time until `resource` has a token available.
    ///
    /// Zero when a token is available now or the resource is unknown.
    pub fn time_until_next_token(&self, resource: &str) -> Duration {
        let now = self.clock.now();
        self.buckets
            .with_existing_mut(resource, |bucket| bucket.time_until_next_token(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Rebuild every bucket from its baseline scaled by `factor`.
    ///
    /// # Errors
    /// Returns `LimiterError::InvalidScalingFactor` for zero, negative or
    /// non-finite factors; the limiter is left unchanged.
    pub fn adjust_capacity(&self, factor: f64) -> Result<(), LimiterError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(LimiterError::InvalidScalingFactor(factor));
        }
        let mut current = self.factor_guard();
        *current = factor;
        self.rebuild(factor);
        info!(factor, resources = self.baselines.len(), "rate limits rescaled");
        Ok(())
    }

    /// Refill every bucket to its scaled capacity.
    pub fn reset_all(&self) {
        let current = self.factor_guard();
        self.rebuild(*current);
        debug!(factor = *current, "rate limits reset");
    }

    /// Current scaling factor.
    pub fn scaling_factor(&self) -> f64 {
        *self.factor_guard()
    }

    /// Snapshot of every registered limiter, sorted by resource name.
    pub fn snapshot(&self) -> Vec<LimiterSnapshot> {
        let now = self.clock.now();
        let names = self.buckets.collect(|name, _| name.clone());
        let mut snapshots: Vec<LimiterSnapshot> = names
            .into_iter()
            .filter_map(|name| {
                self.buckets.with_existing_mut(name.as_str(), |bucket| LimiterSnapshot {
                    resource: name.clone(),
                    capacity: bucket.capacity(),
                    available_tokens: bucket.available(now),
                    period_ms: u64::try_from(bucket.period().as_millis()).unwrap_or(u64::MAX),
                })
            })
            .collect();
        snapshots.sort_by(|a, b| a.resource.cmp(&b.resource));
        snapshots
    }

    // Callers hold the factor lock, which serializes concurrent rebuilds.
    fn rebuild(&self, factor: f64) {
        let now = self.clock.now();
        let fresh = self
            .baselines
            .collect(|name, baseline| (name.clone(), baseline.build_bucket(factor, now)));
        for (name, bucket) in fresh {
            self.buckets.insert(name, bucket);
        }
    }

    fn factor_guard(&self) -> std::sync::MutexGuard<'_, f64> {
        self.scaling_factor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn report_denial(&self, resource: &str) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let event = NewEvent::new(
            EventType::RATE_LIMIT_EXCEEDED,
            format!("Rate limit exceeded for {resource}"),
        )
        .with_sensitivity(Sensitivity::Low)
        .with_detail("resource", resource);
        let resource = resource.to_string();

        emit_detached("rate-limit-denial", move || {
            if let Err(e) = sink.log_event(event) {
                warn!(%resource, error = %e, "failed to record rate limit denial");
            }
        });
    }
}
