//! Learned performance baselines and anomaly flagging.
//!
//! Every timed operation updates a per-name baseline in constant memory. A
//! sample is anomalous when it is more than `sigma` deviations above the
//! average, but only once the baseline has seen enough samples to be trusted.
//! Raw metric samples are kept separately in bounded ring buffers.

use crate::application::dispatch::emit_detached;
use crate::application::metrics::KernelMetrics;
use crate::application::ports::{Clock, EventSink};
use crate::domain::baseline::{MetricSample, MetricSeries, MetricSummary, PerformanceBaseline};
use crate::domain::event::{EventType, NewEvent, Sensitivity};
use crate::infrastructure::storage::ShardedStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tuning for anomaly detection.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineConfig {
    /// Samples a baseline needs beyond this count before it can flag anomalies
    pub min_samples: u64,
    /// Standard deviations above the average that count as anomalous
    pub sigma: f64,
    /// Ring buffer size per metric name
    pub max_samples_per_metric: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            sigma: 3.0,
            max_samples_per_metric: 1000,
        }
    }
}

/// Read-only view of one operation's baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub operation: String,
    pub sample_count: u64,
    pub average_ms: f64,
    pub std_dev_ms: f64,
    pub last_updated: DateTime<Utc>,
}

/// Tracks per-operation baselines and raw metric samples.
#[derive(Debug)]
pub struct BaselineTracker {
    baselines: ShardedStorage<String, PerformanceBaseline>,
    series: ShardedStorage<String, MetricSeries>,
    config: BaselineConfig,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn EventSink>>,
    metrics: KernelMetrics,
}

impl BaselineTracker {
    pub fn new(config: BaselineConfig, clock: Arc<dyn Clock>, metrics: KernelMetrics) -> Self {
        Self {
            baselines: ShardedStorage::new(),
            series: ShardedStorage::new(),
            config,
            clock,
            sink: None,
            metrics,
        }
    }

    /// Report anomalies to an event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append a raw sample to the metric's ring buffer.
    pub fn record_metric(
        &self,
        name: &str,
        value: f64,
        unit: &str,
        tags: BTreeMap<String, String>,
    ) {
        let sample = MetricSample {
            value,
            unit: unit.to_string(),
            tags,
            timestamp: self.clock.utc_now(),
        };
        let capacity = self.config.max_samples_per_metric;
        self.series.with_entry_mut(
            name.to_string(),
            || MetricSeries::new(capacity),
            |series| series.push(sample),
        );
    }

    /// Fold a completed operation into its baseline.
    ///
    /// The sample is judged against the baseline as it was before this
    /// sample. Returns `true` if it was anomalous.
    pub fn record_operation(&self, name: &str, duration: Duration) -> bool {
        let value_ms = duration_ms(duration);
        let now = self.clock.utc_now();
        let (min_samples, sigma) = (self.config.min_samples, self.config.sigma);

        let (anomalous, average_ms) = self.baselines.with_entry_mut(
            name.to_string(),
            || PerformanceBaseline::new(now),
            |baseline| {
                let anomalous = baseline.is_anomalous(value_ms, min_samples, sigma);
                let average_ms = baseline.average_ms;
                baseline.observe(value_ms, now);
                (anomalous, average_ms)
            },
        );

        if anomalous {
            self.metrics.record_anomaly();
            warn!(
                operation = name,
                duration_ms = value_ms,
                baseline_ms = average_ms,
                "performance anomaly"
            );
            self.report_anomaly(name, value_ms, average_ms);
        }
        anomalous
    }

    /// Whether `duration` would be anomalous for `name` right now.
    ///
    /// Operations with no baseline are never anomalous.
    pub fn is_anomaly(&self, name: &str, duration: Duration) -> bool {
        let value_ms = duration_ms(duration);
        self.baselines
            .with_existing(name, |b| {
                b.is_anomalous(value_ms, self.config.min_samples, self.config.sigma)
            })
            .unwrap_or(false)
    }

    /// Start timing `name`; the duration is recorded when the timer drops.
    pub fn start_timer(&self, name: impl Into<String>) -> OperationTimer<'_> {
        OperationTimer {
            tracker: self,
            name: name.into(),
            start: self.clock.now(),
            finished: false,
        }
    }

    /// Every baseline, sorted by operation name.
    pub fn baselines(&self) -> Vec<BaselineSnapshot> {
        let mut snapshots = self.baselines.collect(|name, b| BaselineSnapshot {
            operation: name.clone(),
            sample_count: b.sample_count,
            average_ms: b.average_ms,
            std_dev_ms: b.std_dev_ms,
            last_updated: b.last_updated,
        });
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }

    /// Forget what was learned about `name`.
    pub fn reset_baseline(&self, name: &str) -> bool {
        let removed = self.baselines.remove(name).is_some();
        if removed {
            debug!(operation = name, "baseline reset");
        }
        removed
    }

    /// Retained samples for a metric, oldest first.
    pub fn metric_samples(&self, name: &str) -> Vec<MetricSample> {
        self.series
            .with_existing(name, |s| s.samples().cloned().collect())
            .unwrap_or_default()
    }

    pub fn metric_summary(&self, name: &str) -> Option<MetricSummary> {
        self.series.with_existing(name, |s| s.summary()).flatten()
    }

    fn report_anomaly(&self, name: &str, value_ms: f64, average_ms: f64) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let event = NewEvent::new(
            EventType::PERFORMANCE_ANOMALY,
            format!("Operation {name} took {value_ms:.1}ms, baseline {average_ms:.1}ms"),
        )
        .with_sensitivity(Sensitivity::Low)
        .with_detail("operation", name)
        .with_detail("duration_ms", format!("{value_ms:.3}"))
        .with_detail("baseline_ms", format!("{average_ms:.3}"));

        emit_detached("performance-anomaly", move || {
            if let Err(e) = sink.log_event(event) {
                warn!(error = %e, "failed to record performance anomaly");
            }
        });
    }
}

/// Records an operation's duration when dropped.
///
/// Call [`finish`](Self::finish) to learn whether the run was anomalous.
#[derive(Debug)]
#[must_use = "the timer records when dropped; binding it to `_` drops it immediately"]
pub struct OperationTimer<'a> {
    tracker: &'a BaselineTracker,
    name: String,
    start: Instant,
    finished: bool,
}

impl OperationTimer<'_> {
    pub fn elapsed(&self) -> Duration {
        self.tracker.clock.now().saturating_duration_since(self.start)
    }

    /// Stop the timer and record the duration now.
    pub fn finish(mut self) -> bool {
        self.finished = true;
        self.tracker.record_operation(&self.name, self.elapsed())
    }
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.record_operation(&self.name, self.elapsed());
        }
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
