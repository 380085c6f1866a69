//! Kernel configuration.
//!
//! The host owns the settings file; the kernel only parses TOML text handed to
//! it. Every section is optional and falls back to the defaults below.
//!
//! ```toml
//! [[rate_limits]]
//! resource = "transcription"
//! capacity = 10
//! period_ms = 60000
//!
//! [recovery]
//! max_retries = 3
//! base_delay_ms = 1000
//!
//! [alerts]
//! utc_offset_minutes = 60
//!
//! [[alerts.rules]]
//! id = "burst"
//! name = "Burst of permission failures"
//! event_type = "permission_denied"
//! severity = "high"
//! cooldown_minutes = 10
//! condition = { kind = "count_in_window", count = 3, window_minutes = 1 }
//! ```

use crate::application::alert_engine::AlertEngineConfig;
use crate::application::baseline_tracker::BaselineConfig;
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::ports::SettingsProvider;
use crate::application::recovery::RecoveryConfig;
use crate::domain::bucket::LimiterBaseline;
use crate::domain::rule::{default_rules, AlertRule};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Error returned when configuration cannot be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Complete kernel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub rate_limits: Vec<LimiterBaseline>,
    pub recovery: RecoverySection,
    pub baseline: BaselineSection,
    pub alerts: AlertsSection,
    pub sink: SinkSection,
    pub telemetry: TelemetryConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            rate_limits: default_rate_limits(),
            recovery: RecoverySection::default(),
            baseline: BaselineSection::default(),
            alerts: AlertsSection::default(),
            sink: SinkSection::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Limits for the dictation app's own resources.
pub fn default_rate_limits() -> Vec<LimiterBaseline> {
    vec![
        LimiterBaseline::new("transcription", 10, Duration::from_secs(60)),
        LimiterBaseline::new("text_injection", 60, Duration::from_secs(60)),
        LimiterBaseline::new("settings_save", 5, Duration::from_secs(60)),
        LimiterBaseline::new("model_download", 2, Duration::from_secs(3600)),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub io_delay_step_ms: u64,
    pub failure_threshold: u32,
    pub break_duration_secs: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            io_delay_step_ms: 100,
            failure_threshold: 5,
            break_duration_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineSection {
    pub min_samples: u64,
    pub sigma: f64,
    pub max_samples_per_metric: usize,
}

impl Default for BaselineSection {
    fn default() -> Self {
        Self {
            min_samples: 10,
            sigma: 3.0,
            max_samples_per_metric: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    pub retention_days: u32,
    pub cleanup_interval_secs: u64,
    pub max_alerts: usize,
    /// Offset of local time from UTC, used by out-of-hours rules
    pub utc_offset_minutes: i32,
    /// Replaces the built-in rules when non-empty
    pub rules: Vec<AlertRule>,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            retention_days: 7,
            cleanup_interval_secs: 3600,
            max_alerts: 10_000,
            utc_offset_minutes: 0,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    pub max_events: usize,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            max_events: crate::infrastructure::event_sink::DEFAULT_MAX_EVENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl KernelConfig {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to write a default settings file.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (i, limit) in self.rate_limits.iter().enumerate() {
            let field = format!("rate_limits[{i}]");
            if limit.resource.trim().is_empty() {
                return Err(ConfigError::invalid(field, "resource name must not be empty"));
            }
            if limit.capacity == 0 {
                return Err(ConfigError::invalid(field, "capacity must be at least 1"));
            }
            if !seen.insert(limit.resource.as_str()) {
                return Err(ConfigError::invalid(
                    field,
                    format!("duplicate resource '{}'", limit.resource),
                ));
            }
        }

        if self.recovery.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "recovery.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.recovery.break_duration_secs == 0 {
            return Err(ConfigError::invalid(
                "recovery.break_duration_secs",
                "must be at least 1",
            ));
        }

        if !self.baseline.sigma.is_finite() || self.baseline.sigma <= 0.0 {
            return Err(ConfigError::invalid(
                "baseline.sigma",
                "must be a positive number",
            ));
        }
        if self.baseline.max_samples_per_metric == 0 {
            return Err(ConfigError::invalid(
                "baseline.max_samples_per_metric",
                "must be at least 1",
            ));
        }

        if self.alerts.retention_days == 0 {
            return Err(ConfigError::invalid("alerts.retention_days", "must be at least 1"));
        }
        if self.alerts.cleanup_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "alerts.cleanup_interval_secs",
                "must be at least 1",
            ));
        }
        if self.alerts.max_alerts == 0 {
            return Err(ConfigError::invalid("alerts.max_alerts", "must be at least 1"));
        }
        if self.utc_offset().is_none() {
            return Err(ConfigError::invalid(
                "alerts.utc_offset_minutes",
                "must be within +/- 24 hours",
            ));
        }
        let mut rule_ids = HashSet::new();
        for rule in &self.alerts.rules {
            rule.validate()
                .map_err(|e| ConfigError::invalid("alerts.rules", e.to_string()))?;
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigError::invalid(
                    "alerts.rules",
                    format!("duplicate rule id '{}'", rule.id),
                ));
            }
        }

        if self.sink.max_events == 0 {
            return Err(ConfigError::invalid("sink.max_events", "must be at least 1"));
        }
        if self.telemetry.level.trim().is_empty() {
            return Err(ConfigError::invalid("telemetry.level", "must not be empty"));
        }
        Ok(())
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            max_retries: self.recovery.max_retries,
            base_delay: Duration::from_millis(self.recovery.base_delay_ms),
            io_delay_step: Duration::from_millis(self.recovery.io_delay_step_ms),
            breaker: CircuitBreakerConfig {
                failure_threshold: self.recovery.failure_threshold,
                break_duration: Duration::from_secs(self.recovery.break_duration_secs),
            },
        }
    }

    pub fn baseline_config(&self) -> BaselineConfig {
        BaselineConfig {
            min_samples: self.baseline.min_samples,
            sigma: self.baseline.sigma,
            max_samples_per_metric: self.baseline.max_samples_per_metric,
        }
    }

    /// Alert engine settings; `None` if the UTC offset is out of range.
    pub fn alert_engine_config(&self) -> Option<AlertEngineConfig> {
        Some(AlertEngineConfig {
            max_alerts: self.alerts.max_alerts,
            retention: chrono::Duration::days(i64::from(self.alerts.retention_days)),
            utc_offset: self.utc_offset()?,
        })
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.alerts.cleanup_interval_secs)
    }

    /// Configured rules, or the built-in set when none are configured.
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        if self.alerts.rules.is_empty() {
            default_rules()
        } else {
            self.alerts.rules.clone()
        }
    }

    fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.alerts.utc_offset_minutes.checked_mul(60)?)
    }
}

impl SettingsProvider for KernelConfig {
    fn limiter_baselines(&self) -> Vec<LimiterBaseline> {
        self.rate_limits.clone()
    }
}
