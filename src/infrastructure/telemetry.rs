//! Logging setup for hosts that do not install their own subscriber.

use crate::infrastructure::config::TelemetryConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Build the filter: `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Install a global fmt subscriber.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing::debug!(level = %config.level, "telemetry initialized");
    Ok(())
}
