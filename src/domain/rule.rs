//! Declarative alert rules.
//!
//! Rules are plain data: a filter on event type, one condition drawn from a
//! small closed set, a severity and a cooldown. They can be loaded from
//! configuration and replaced at runtime without code changes.

use crate::domain::event::{EventType, Sensitivity};
use crate::domain::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a rule definition is not usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule id must not be empty")]
    EmptyId,
    #[error("rule '{rule}': {reason}")]
    InvalidCondition { rule: String, reason: &'static str },
}

/// Condition evaluated when a matching event arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    /// At least `count` events of the rule's type within the last `window_minutes`.
    CountInWindow {
        count: u32,
        window_minutes: u64,
        /// Only count events whose description contains this text (case-insensitive)
        #[serde(default)]
        text_filter: Option<String>,
    },
    /// The event happened outside `[start_hour, end_hour]` local time.
    OutOfHours { start_hour: u32, end_hour: u32 },
    /// The event carries exactly this sensitivity.
    SensitivityEquals { level: Sensitivity },
}

impl AlertCondition {
    fn validate(&self, rule: &str) -> Result<(), RuleError> {
        let invalid = |reason| {
            Err(RuleError::InvalidCondition {
                rule: rule.to_string(),
                reason,
            })
        };
        match self {
            AlertCondition::CountInWindow {
                count,
                window_minutes,
                ..
            } => {
                if *count == 0 {
                    return invalid("count must be at least 1");
                }
                if *window_minutes == 0 {
                    return invalid("window must be at least one minute");
                }
            }
            AlertCondition::OutOfHours {
                start_hour,
                end_hour,
            } => {
                if *start_hour > 23 || *end_hour > 23 {
                    return invalid("hours must be within 0..=23");
                }
            }
            AlertCondition::SensitivityEquals { .. } => {}
        }
        Ok(())
    }
}

/// Whether `hour` falls outside the inclusive `[start, end]` window.
///
/// A window with `start > end` wraps midnight (e.g. 22..=6).
pub fn is_outside_hours(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour < start || hour > end
    } else {
        hour > end && hour < start
    }
}

/// Case-insensitive substring match; an absent filter matches everything.
pub fn matches_text(description: &str, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) if f.is_empty() => true,
        Some(f) => description.to_lowercase().contains(&f.to_lowercase()),
    }
}

fn enabled_by_default() -> bool {
    true
}

/// An alert rule and its firing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Only events of this type are evaluated; `None` matches every event
    #[serde(default)]
    pub event_type: Option<EventType>,
    pub severity: Severity,
    pub condition: AlertCondition,
    #[serde(default)]
    pub cooldown_minutes: u64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(skip)]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        condition: AlertCondition,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            event_type: None,
            severity,
            condition,
            cooldown_minutes: 0,
            enabled: true,
            last_triggered: None,
        }
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_cooldown_minutes(mut self, minutes: u64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Check the definition is usable.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.id.trim().is_empty() {
            return Err(RuleError::EmptyId);
        }
        self.condition.validate(&self.id)
    }

    /// Whether an event of `event_type` is subject to this rule.
    pub fn applies_to(&self, event_type: &EventType) -> bool {
        self.enabled
            && self
                .event_type
                .as_ref()
                .map_or(true, |filter| filter == event_type)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        let minutes = i64::try_from(self.cooldown_minutes).unwrap_or(i64::MAX / 60_000);
        chrono::Duration::try_minutes(minutes).unwrap_or(chrono::Duration::MAX)
    }

    /// Whether the rule fired recently enough to still be suppressed.
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered {
            Some(last) => last
                .checked_add_signed(self.cooldown())
                .map_or(true, |until| now < until),
            None => false,
        }
    }
}

/// The built-in rule set installed when configuration provides none.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "repeated-permission-failures",
            "Repeated permission failures",
            Severity::High,
            AlertCondition::CountInWindow {
                count: 5,
                window_minutes: 5,
                text_filter: None,
            },
        )
        .with_event_type(EventType::PERMISSION_DENIED)
        .with_description("Five or more permission failures within five minutes")
        .with_cooldown_minutes(15),
        AlertRule::new(
            "after-hours-credential-access",
            "Credential access outside business hours",
            Severity::Medium,
            AlertCondition::OutOfHours {
                start_hour: 6,
                end_hour: 22,
            },
        )
        .with_event_type(EventType::CREDENTIAL_ACCESS)
        .with_description("A stored credential was read between 23:00 and 05:59")
        .with_cooldown_minutes(60),
        AlertRule::new(
            "security-event-burst",
            "Burst of security violations",
            Severity::High,
            AlertCondition::CountInWindow {
                count: 10,
                window_minutes: 1,
                text_filter: None,
            },
        )
        .with_event_type(EventType::SECURITY_VIOLATION)
        .with_description("Ten or more security violations within one minute")
        .with_cooldown_minutes(5),
        AlertRule::new(
            "critical-sensitivity-event",
            "Critical-sensitivity event",
            Severity::Critical,
            AlertCondition::SensitivityEquals {
                level: Sensitivity::Critical,
            },
        )
        .with_description("Any event tagged with critical sensitivity")
        .with_cooldown_minutes(1),
    ]
}
