//! Event sinks that misbehave: one refuses every write, one is slow.

use crate::application::ports::{CallContext, EventSink, EventSubscriber, SinkError};
use crate::domain::event::{AuditEvent, EventId, EventType, NewEvent};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::thread;
use std::time::Duration;

/// Sink whose writes always fail.
///
/// Used to prove that components keep working when the audit log is down.
#[derive(Debug, Default)]
pub struct FailingEventSink {
    attempts: AtomicU64,
}

impl FailingEventSink {
    /// Create a new failing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that were attempted.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl EventSink for FailingEventSink {
    fn log_event_with(&self, _ctx: CallContext, _event: NewEvent) -> Result<EventId, SinkError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(SinkError::Unavailable("audit log offline".to_string()))
    }

    fn query_events(
        &self,
        _since: DateTime<Utc>,
        _event_type: Option<&EventType>,
    ) -> Vec<AuditEvent> {
        Vec::new()
    }

    fn subscribe(&self, _subscriber: Weak<dyn EventSubscriber>) {}
}

/// Sink that blocks the writing thread for a fixed delay, then accepts.
#[derive(Debug)]
pub struct SlowEventSink {
    delay: Duration,
    written: AtomicU64,
}

impl SlowEventSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            written: AtomicU64::new(0),
        }
    }

    /// Number of writes that completed.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

impl EventSink for SlowEventSink {
    fn log_event_with(&self, _ctx: CallContext, _event: NewEvent) -> Result<EventId, SinkError> {
        thread::sleep(self.delay);
        let id = self.written.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EventId(id))
    }

    fn query_events(
        &self,
        _since: DateTime<Utc>,
        _event_type: Option<&EventType>,
    ) -> Vec<AuditEvent> {
        Vec::new()
    }

    fn subscribe(&self, _subscriber: Weak<dyn EventSubscriber>) {}
}
