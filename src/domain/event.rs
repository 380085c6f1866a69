//! Audit events flowing through the shared event sink.
//!
//! Every component that reports something noteworthy (a denied rate-limit
//! check, a performance anomaly, a recurring error, a fired alert) does so by
//! logging an event. The alert engine observes the same stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier assigned to an event by the sink that stored it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt-{}", self.0)
    }
}

/// Category of an audit event.
///
/// Event types are open-ended strings so hosts can add their own, but the
/// kernel itself only emits the constants defined here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// A caller was denied by the rate limiter.
    pub const RATE_LIMIT_EXCEEDED: EventType = EventType(Cow::Borrowed("rate_limit_exceeded"));
    /// An operation took far longer than its learned baseline.
    pub const PERFORMANCE_ANOMALY: EventType = EventType(Cow::Borrowed("performance_anomaly"));
    /// An error group crossed an escalation threshold.
    pub const ERROR_REPORTED: EventType = EventType(Cow::Borrowed("error_reported"));
    /// An alert rule fired.
    pub const SECURITY_ALERT: EventType = EventType(Cow::Borrowed("security_alert"));
    /// Access to a protected resource was refused.
    pub const PERMISSION_DENIED: EventType = EventType(Cow::Borrowed("permission_denied"));
    /// A stored credential (API key, token) was read.
    pub const CREDENTIAL_ACCESS: EventType = EventType(Cow::Borrowed("credential_access"));
    /// Generic security-relevant violation.
    pub const SECURITY_VIOLATION: EventType = EventType(Cow::Borrowed("security_violation"));
    /// Settings were changed by the user.
    pub const SETTINGS_CHANGED: EventType = EventType(Cow::Borrowed("settings_changed"));

    /// Create a custom event type.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        EventType(name.into())
    }

    /// The event type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How sensitive the information touched by an event is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Routine operational noise
    #[default]
    Low,
    /// Worth keeping an eye on
    Medium,
    /// Touches user data or credentials
    High,
    /// Must always be surfaced
    Critical,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
            Sensitivity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// An event as submitted to a sink, before it has an id or timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub description: String,
    pub details: BTreeMap<String, String>,
    pub sensitivity: Sensitivity,
}

impl NewEvent {
    pub fn new(event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            description: description.into(),
            details: BTreeMap::new(),
            sensitivity: Sensitivity::Low,
        }
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// An event stored by a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub description: String,
    pub details: BTreeMap<String, String>,
    pub sensitivity: Sensitivity,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Materialize a submitted event.
    pub fn from_new(id: EventId, event: NewEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type: event.event_type,
            description: event.description,
            details: event.details,
            sensitivity: event.sensitivity,
            timestamp,
        }
    }
}
