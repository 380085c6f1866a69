//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports, and the host
//! application plugs its own audit log and settings store in through them.

use crate::domain::bucket::LimiterBaseline;
use crate::domain::event::{AuditEvent, EventId, EventType, NewEvent};
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Weak;
use std::time::Instant;
use thiserror::Error;

/// Port for obtaining current time.
///
/// Components use the monotonic instant for intervals (token refill, circuit
/// break duration) and the wall clock for anything a human reads or that is
/// compared against stored timestamps (alert cooldowns, retention).
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current monotonic instant.
    fn now(&self) -> Instant;

    /// Get the current wall-clock time.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Error reported by an event sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink refused the event
    #[error("event rejected: {0}")]
    Rejected(String),
    /// The backing store is not reachable
    #[error("event sink unavailable: {0}")]
    Unavailable(String),
}

/// Token carried through one logical call chain of event emission.
///
/// The alert engine both listens to the sink and writes its own alert events
/// into it. Those writes carry a context marked as alert emission, and the
/// engine ignores events delivered under such a context. The flag travels
/// with the call, so concurrent, unrelated emissions on other threads are
/// evaluated normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallContext {
    alert_emission: bool,
}

impl CallContext {
    /// Context for an event logged by ordinary application code.
    pub const fn root() -> Self {
        Self {
            alert_emission: false,
        }
    }

    /// Derived context for events emitted while handling an alert.
    pub const fn for_alert_emission(self) -> Self {
        Self {
            alert_emission: true,
        }
    }

    /// Whether this call chain originates from alert emission.
    pub const fn is_alert_emission(&self) -> bool {
        self.alert_emission
    }
}

/// Observer notified of every event stored by a sink.
pub trait EventSubscriber: Send + Sync {
    /// Called after `event` has been stored.
    ///
    /// Implementations must not panic and should return quickly; they run on
    /// the thread that logged the event.
    fn on_event(&self, event: &AuditEvent, ctx: &CallContext);
}

/// Port for the external audit/event log.
pub trait EventSink: Send + Sync + Debug {
    /// Store an event within the given call context and notify subscribers.
    fn log_event_with(&self, ctx: CallContext, event: NewEvent) -> Result<EventId, SinkError>;

    /// Store an event from a root call context.
    fn log_event(&self, event: NewEvent) -> Result<EventId, SinkError> {
        self.log_event_with(CallContext::root(), event)
    }

    /// Events logged at or after `since`, optionally restricted to one type,
    /// oldest first.
    fn query_events(&self, since: DateTime<Utc>, event_type: Option<&EventType>)
        -> Vec<AuditEvent>;

    /// Register an observer. Dropped observers are pruned automatically.
    fn subscribe(&self, subscriber: Weak<dyn EventSubscriber>);
}

/// Port for the host's settings store.
pub trait SettingsProvider: Send + Sync {
    /// Named limiter capacities and periods to install at startup.
    fn limiter_baselines(&self) -> Vec<LimiterBaseline>;
}

impl SettingsProvider for Vec<LimiterBaseline> {
    fn limiter_baselines(&self) -> Vec<LimiterBaseline> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_call_context_derivation() {
        let root = CallContext::root();
        assert!(!root.is_alert_emission());
        assert_eq!(root, CallContext::default());

        let nested = root.for_alert_emission();
        assert!(nested.is_alert_emission());
        // Deriving again stays in alert emission
        assert!(nested.for_alert_emission().is_alert_emission());
    }

    #[test]
    fn test_vec_settings_provider() {
        let settings = vec![LimiterBaseline::new("api", 5, Duration::from_secs(1))];
        assert_eq!(settings.limiter_baselines().len(), 1);
    }
}
