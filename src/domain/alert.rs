//! Security alerts produced by fired rules.

use crate::domain::event::{AuditEvent, EventId, EventType};
use crate::domain::rule::AlertRule;
use crate::domain::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An alert raised when a rule fires on an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub rule_id: String,
    pub rule_name: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// The event that made the rule fire
    pub triggering_event: EventId,
    pub metadata: BTreeMap<String, String>,
    pub acknowledged: bool,
}

impl SecurityAlert {
    /// Build the alert for `rule` firing on `event`.
    pub fn fire(rule: &AlertRule, event: &AuditEvent, now: DateTime<Utc>) -> Self {
        let description = if rule.description.is_empty() {
            format!("{}: {}", rule.name, event.description)
        } else {
            format!("{} ({})", rule.description, event.description)
        };

        let mut metadata = event.details.clone();
        metadata.insert("sensitivity".to_string(), event.sensitivity.to_string());

        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            event_type: event.event_type.clone(),
            severity: rule.severity,
            timestamp: now,
            description,
            triggering_event: event.id,
            metadata,
            acknowledged: false,
        }
    }
}
