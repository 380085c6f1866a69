//! Application layer - orchestration of domain logic.
//!
//! Each component here owns its runtime state and coordinates the domain
//! types:
//! - Rate limiter (per-resource token buckets)
//! - Recovery engine (retry and circuit breakers)
//! - Baseline tracker (operation timings and anomalies)
//! - Alert engine (rule evaluation over the event stream)
//! - Error reporter (grouping and escalation)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod alert_engine;
pub mod baseline_tracker;
pub mod circuit_breaker;
#[cfg(feature = "async")]
pub mod cleanup;
pub(crate) mod dispatch;
pub mod error_reporter;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod recovery;
pub mod retry;
