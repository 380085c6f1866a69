//! Composition root.
//!
//! [`Kernel`] owns one instance of every component, wired to a shared event
//! sink, clock and metrics. Hosts build it once at startup and pass references
//! (or the whole `Arc<Kernel>`) to the subsystems that need it.
//!
//! ```
//! use dictation_guard::{Kernel, KernelConfig};
//!
//! let kernel = Kernel::builder()
//!     .with_config(KernelConfig::default())
//!     .build()
//!     .unwrap();
//!
//! assert!(kernel.rate_limiter().try_consume("transcription"));
//! ```

use crate::application::alert_engine::AlertEngine;
use crate::application::baseline_tracker::BaselineTracker;
use crate::application::circuit_breaker::CircuitState;
use crate::application::error_reporter::ErrorReporter;
use crate::application::limiter::{LimiterError, LimiterSnapshot, RateLimiter};
use crate::application::metrics::{KernelMetrics, MetricsSnapshot};
use crate::application::ports::{Clock, EventSink, SettingsProvider};
use crate::application::recovery::{CircuitSnapshot, RecoveryEngine};
use crate::domain::rule::RuleError;
use crate::domain::severity::Severity;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::{ConfigError, KernelConfig};
use crate::infrastructure::event_sink::InMemoryEventSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[cfg(feature = "async")]
use crate::application::cleanup::{CleanupHandle, ShutdownError};
#[cfg(feature = "async")]
use std::sync::{Mutex, PoisonError};

/// Error returned when a kernel cannot be built.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("rate limiter: {0}")]
    Limiter(#[from] LimiterError),
    #[error("alert rule: {0}")]
    Rule(#[from] RuleError),
}

/// Builder for [`Kernel`].
#[must_use]
pub struct KernelBuilder {
    config: KernelConfig,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn EventSink>>,
    settings: Option<Arc<dyn SettingsProvider>>,
}

impl KernelBuilder {
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom clock. Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use the host's audit log instead of a private in-memory sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Take limiter baselines from the host's settings rather than
    /// `KernelConfig::rate_limits`.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Validate the configuration and wire every component.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration, a limiter baseline or an
    /// alert rule is invalid.
    pub fn build(self) -> Result<Kernel, BuildError> {
        let config = self.config;
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let sink = self.sink.unwrap_or_else(|| {
            Arc::new(InMemoryEventSink::new(clock.clone(), config.sink.max_events))
                as Arc<dyn EventSink>
        });
        let metrics = KernelMetrics::new();

        let baselines = match &self.settings {
            Some(settings) => settings.limiter_baselines(),
            None => config.rate_limits.clone(),
        };
        let rate_limiter = RateLimiter::new(baselines, clock.clone(), metrics.clone())?
            .with_sink(sink.clone());

        let recovery = RecoveryEngine::new(config.recovery_config(), clock.clone(), metrics.clone());

        let baselines = BaselineTracker::new(config.baseline_config(), clock.clone(), metrics.clone())
            .with_sink(sink.clone());

        let alert_config = config.alert_engine_config().ok_or_else(|| ConfigError::Invalid {
            field: "alerts.utc_offset_minutes".to_string(),
            reason: "must be within +/- 24 hours".to_string(),
        })?;
        let alerts = Arc::new(AlertEngine::new(
            alert_config,
            sink.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        for rule in config.alert_rules() {
            alerts.configure_rule(rule)?;
        }
        alerts.subscribe_to_sink();

        let errors = ErrorReporter::new(clock.clone(), metrics.clone()).with_sink(sink.clone());

        info!(
            limiters = rate_limiter.snapshot().len(),
            rules = alerts.rules().len(),
            "dictation guard kernel ready"
        );

        Ok(Kernel {
            config,
            clock,
            sink,
            metrics,
            rate_limiter,
            recovery,
            baselines,
            alerts,
            errors,
            #[cfg(feature = "async")]
            cleanup: Mutex::new(None),
        })
    }
}

/// Owner of every resilience and monitoring component.
pub struct Kernel {
    config: KernelConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    metrics: KernelMetrics,
    rate_limiter: RateLimiter,
    recovery: RecoveryEngine,
    baselines: BaselineTracker,
    alerts: Arc<AlertEngine>,
    errors: ErrorReporter,
    #[cfg(feature = "async")]
    cleanup: Mutex<Option<CleanupHandle>>,
}

impl Kernel {
    /// Defaults: built-in rate limits and alert rules, system clock, and a
    /// private in-memory sink.
    pub fn builder() -> KernelBuilder {
        KernelBuilder {
            config: KernelConfig::default(),
            clock: None,
            sink: None,
            settings: None,
        }
    }

    /// Build a kernel from configuration alone.
    pub fn new(config: KernelConfig) -> Result<Self, BuildError> {
        Self::builder().with_config(config).build()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn baselines(&self) -> &BaselineTracker {
        &self.baselines
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn errors(&self) -> &ErrorReporter {
        &self.errors
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn metrics(&self) -> &KernelMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Summarise the state of every component.
    pub fn health_report(&self) -> HealthReport {
        let metrics = self.metrics.snapshot();
        let degraded_circuits: Vec<CircuitSnapshot> = self
            .recovery
            .circuits()
            .into_iter()
            .filter(|c| c.state != CircuitState::Closed)
            .collect();
        let pending: Vec<Severity> = self
            .alerts
            .alerts()
            .into_iter()
            .filter(|a| !a.acknowledged)
            .map(|a| a.severity)
            .collect();

        let status = if degraded_circuits
            .iter()
            .any(|c| c.state == CircuitState::Open)
            || pending.contains(&Severity::Critical)
        {
            HealthStatus::Critical
        } else if !degraded_circuits.is_empty() || !pending.is_empty() || metrics.internal_failures > 0
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            generated_at: self.clock.utc_now(),
            status,
            metrics,
            degraded_circuits,
            limiters: self.rate_limiter.snapshot(),
            unacknowledged_alerts: pending.len(),
            error_groups: self.errors.group_count(),
            baselines_tracked: self.baselines.baselines().len(),
        }
    }

    /// Start periodic alert pruning on the current tokio runtime.
    ///
    /// Does nothing if cleanup is already running.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[cfg(feature = "async")]
    pub fn start_cleanup(&self) {
        let mut cleanup = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if cleanup.is_none() {
            *cleanup = Some(self.alerts.start_cleanup(self.config.cleanup_interval()));
        }
    }

    /// Stop all background work and wait for it to finish.
    ///
    /// # Errors
    /// Returns `ShutdownError` if a background task panicked.
    #[cfg(feature = "async")]
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        // Release the lock before awaiting.
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.shutdown().await?;
        }
        info!("dictation guard kernel stopped");
        Ok(())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("rate_limiter", &self.rate_limiter)
            .field("recovery", &self.recovery)
            .field("alerts", &self.alerts)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// A circuit is probing, alerts are waiting, or internal failures occurred
    Degraded,
    /// A circuit is open or a critical alert is unacknowledged
    Critical,
}

/// Snapshot returned by [`Kernel::health_report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub status: HealthStatus,
    pub metrics: MetricsSnapshot,
    /// Circuits that are not closed
    pub degraded_circuits: Vec<CircuitSnapshot>,
    pub limiters: Vec<LimiterSnapshot>,
    pub unacknowledged_alerts: usize,
    pub error_groups: usize,
    pub baselines_tracked: usize,
}
