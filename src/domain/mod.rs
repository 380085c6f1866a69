//! Domain layer - pure business logic with no external dependencies.
//!
//! This layer contains the core concepts and invariants of the kernel:
//! - Token buckets and limiter baselines
//! - Performance baselines and metric series
//! - Audit events, alert rules and alerts
//! - Error fingerprints, reports and groups
//!
//! All types in this layer are pure and take time as an argument, so they are
//! easily testable.

pub mod alert;
pub mod baseline;
pub mod bucket;
pub mod error_group;
pub mod event;
pub mod fingerprint;
pub mod rule;
pub mod severity;
