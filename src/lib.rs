//! # dictation-guard
//!
//! Resilience and monitoring kernel for a desktop dictation app.
//!
//! Every subsystem of the app (hotkeys, audio capture, transcription, text
//! injection, settings) calls through this kernel to:
//! - **throttle** expensive actions with per-resource token buckets
//! - **recover** from transient failures with retry and circuit breakers
//! - **watch** operation timings and flag statistical anomalies
//! - **alert** on suspicious audit events using declarative rules
//! - **group** repeated errors so a failure loop produces a handful of reports
//!
//! ## Quick Start
//!
//! ```rust
//! use dictation_guard::{ErrorReport, Kernel, KernelConfig, RecoveryError};
//! use std::io;
//! use std::time::Duration;
//!
//! let kernel = Kernel::new(KernelConfig::default()).unwrap();
//!
//! // Admission control
//! if kernel.rate_limiter().try_consume("transcription") {
//!     // run the transcription
//! }
//!
//! // Retry and circuit breaking around file I/O
//! let saved: Result<(), RecoveryError<io::Error>> =
//!     kernel.recovery().execute_io_blocking("settings_save", || Ok(()));
//! assert!(saved.is_ok());
//!
//! // Timing baselines
//! let anomalous = kernel
//!     .baselines()
//!     .record_operation("transcription", Duration::from_millis(180));
//! assert!(!anomalous);
//!
//! // Error grouping
//! kernel
//!     .errors()
//!     .report(ErrorReport::new("EngineError", "model failed to load"), Some("engine"), None);
//!
//! println!("{:?}", kernel.health_report().status);
//! ```
//!
//! ## Configuration
//!
//! [`KernelConfig`] is a serde schema parsed from TOML text the host reads
//! from its own settings location. Every section is optional:
//!
//! ```rust
//! use dictation_guard::KernelConfig;
//!
//! let config = KernelConfig::from_toml_str(r#"
//!     [recovery]
//!     max_retries = 2
//!     failure_threshold = 3
//!
//!     [alerts]
//!     utc_offset_minutes = 120
//! "#).unwrap();
//! assert_eq!(config.recovery.max_retries, 2);
//! ```
//!
//! ## Event Sink
//!
//! Rate-limit denials, performance anomalies, escalated errors and security
//! alerts are written to an [`EventSink`]. By default the kernel keeps a
//! bounded [`InMemoryEventSink`]; hosts with their own audit log implement
//! the trait and pass it to [`KernelBuilder::with_sink`].
//!
//! The alert engine subscribes to the sink. Alerts it raises are logged back
//! into the same sink under a [`CallContext`] that marks them as alert
//! emission, so they are never evaluated again.
//!
//! ## Failure Model
//!
//! The kernel never becomes the reason a caller fails:
//! - unknown resources are admitted (fail open)
//! - unknown operations have an empty baseline and are never anomalous
//! - sink failures are logged and otherwise ignored
//! - a panic while fingerprinting an error files it under
//!   [`Fingerprint::UNKNOWN`]
//!
//! ## Background Work
//!
//! With the default `async` feature, [`Kernel::start_cleanup`] prunes expired
//! alerts on the tokio runtime and `Kernel::shutdown().await` stops it. The
//! recovery engine's async `execute` variants sleep on tokio timers between
//! retries; the `*_blocking` variants sleep the calling thread.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    alert::SecurityAlert,
    baseline::{MetricSample, MetricSummary, PerformanceBaseline},
    bucket::{LimiterBaseline, TokenBucket},
    error_group::{ErrorGroup, ErrorReport},
    event::{AuditEvent, EventId, EventType, NewEvent, Sensitivity},
    fingerprint::Fingerprint,
    rule::{default_rules, AlertCondition, AlertRule, RuleError},
    severity::{ErrorCategory, Severity},
};

pub use application::{
    alert_engine::{AlertEngine, AlertEngineConfig},
    baseline_tracker::{BaselineConfig, BaselineSnapshot, BaselineTracker, OperationTimer},
    circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState},
    error_reporter::ErrorReporter,
    limiter::{LimiterError, LimiterSnapshot, RateLimiter},
    metrics::{KernelMetrics, MetricsSnapshot},
    ports::{CallContext, Clock, EventSink, EventSubscriber, SettingsProvider, SinkError},
    recovery::{CircuitSnapshot, RecoveryConfig, RecoveryEngine, RecoveryError},
    retry::{Backoff, ClassifyFailure, FailureKind, RetryPolicy},
};

#[cfg(feature = "async")]
pub use application::cleanup::{CleanupHandle, ShutdownError};

pub use infrastructure::{
    clock::SystemClock,
    config::{ConfigError, KernelConfig, TelemetryConfig},
    event_sink::InMemoryEventSink,
    kernel::{BuildError, HealthReport, HealthStatus, Kernel, KernelBuilder},
    storage::ShardedStorage,
    telemetry::TelemetryError,
};
