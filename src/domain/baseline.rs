//! Performance baselines and raw metric series.
//!
//! A baseline keeps an incremental mean and an exponentially weighted
//! deviation estimate, so updates are O(1) in time and memory no matter how
//! many samples have been seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Weight given to the newest deviation in the stddev blend.
const DEVIATION_WEIGHT: f64 = 0.1;

/// Learned "normal" duration for one operation, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub sample_count: u64,
    pub average_ms: f64,
    pub std_dev_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceBaseline {
    /// Empty baseline; the first observation becomes the average.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            sample_count: 0,
            average_ms: 0.0,
            std_dev_ms: 0.0,
            last_updated: now,
        }
    }

    /// Fold one sample into the baseline.
    pub fn observe(&mut self, value_ms: f64, now: DateTime<Utc>) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        self.average_ms += (value_ms - self.average_ms) / n;
        self.std_dev_ms = DEVIATION_WEIGHT * (value_ms - self.average_ms).abs()
            + (1.0 - DEVIATION_WEIGHT) * self.std_dev_ms;
        self.last_updated = now;
    }

    /// Whether `value_ms` lies more than `sigma` deviations above the average.
    ///
    /// Always `false` until more than `min_samples` observations exist.
    pub fn is_anomalous(&self, value_ms: f64, min_samples: u64, sigma: f64) -> bool {
        if self.sample_count <= min_samples {
            return false;
        }
        value_ms > self.average_ms + sigma * self.std_dev_ms
    }
}

/// One raw metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub unit: String,
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate over the retained samples of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Bounded ring buffer of raw samples for one metric name.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    samples: VecDeque<MetricSample>,
    max_samples: usize,
}

impl MetricSeries {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.min(64)),
            max_samples,
        }
    }

    /// Append a sample, dropping the oldest when full.
    pub fn push(&mut self, sample: MetricSample) {
        if self.max_samples == 0 {
            return;
        }
        while self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn summary(&self) -> Option<MetricSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in &self.samples {
            min = min.min(sample.value);
            max = max.max(sample.value);
            sum += sample.value;
        }
        Some(MetricSummary {
            count: self.samples.len(),
            min,
            max,
            mean: sum / self.samples.len() as f64,
        })
    }
}
