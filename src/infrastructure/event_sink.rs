//! Bounded in-memory audit log.
//!
//! Default `EventSink` used when the host does not plug in its own audit log.
//! Keeps the most recent `max_events` events and notifies subscribers after
//! each write.

use crate::application::ports::{CallContext, Clock, EventSink, EventSubscriber, SinkError};
use crate::domain::event::{AuditEvent, EventId, EventType, NewEvent};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::error;

/// Default number of events retained.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Thread-safe ring buffer of audit events.
pub struct InMemoryEventSink {
    events: RwLock<VecDeque<AuditEvent>>,
    subscribers: Mutex<Vec<Weak<dyn EventSubscriber>>>,
    next_id: AtomicU64,
    max_events: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventSink {
    /// Create a sink retaining at most `max_events` events.
    pub fn new(clock: Arc<dyn Clock>, max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_events: max_events.max(1),
            clock,
        }
    }

    /// Number of events currently retained.
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All retained events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn live_subscribers(&self) -> Vec<Arc<dyn EventSubscriber>> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| s.strong_count() > 0);
        subscribers.iter().filter_map(Weak::upgrade).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn log_event_with(&self, ctx: CallContext, event: NewEvent) -> Result<EventId, SinkError> {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let stored = AuditEvent::from_new(id, event, self.clock.utc_now());

        {
            let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
            while events.len() >= self.max_events {
                events.pop_front();
            }
            events.push_back(stored.clone());
        }

        // Subscribers run without any sink lock held, so they may query or
        // log back into the sink.
        for subscriber in self.live_subscribers() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                subscriber.on_event(&stored, &ctx);
            }));
            if delivered.is_err() {
                error!(event_id = %id, event_type = %stored.event_type, "event subscriber panicked");
            }
        }

        Ok(id)
    }

    fn query_events(
        &self,
        since: DateTime<Utc>,
        event_type: Option<&EventType>,
    ) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.timestamp >= since)
            .filter(|e| event_type.map_or(true, |t| &e.event_type == t))
            .cloned()
            .collect()
    }

    fn subscribe(&self, subscriber: Weak<dyn EventSubscriber>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }
}

impl fmt::Debug for InMemoryEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEventSink")
            .field("len", &self.len())
            .field("max_events", &self.max_events)
            .finish()
    }
}
