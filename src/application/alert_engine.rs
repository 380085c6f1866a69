//! Rule-based security alerting over the audit event stream.
//!
//! The engine subscribes to the event sink and evaluates every stored event
//! against the enabled rules. A rule that fires is put into cooldown, an alert
//! is retained in a bounded buffer, and a `SECURITY_ALERT` event is written
//! back into the sink under an alert-emission call context so the engine does
//! not evaluate its own output.

use crate::application::metrics::KernelMetrics;
use crate::application::ports::{CallContext, Clock, EventSink, EventSubscriber};
use crate::domain::alert::SecurityAlert;
use crate::domain::event::{AuditEvent, EventType, NewEvent, Sensitivity};
use crate::domain::rule::{is_outside_hours, matches_text, AlertCondition, AlertRule, RuleError};
use crate::infrastructure::storage::ShardedStorage;
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[cfg(feature = "async")]
use crate::application::cleanup::CleanupHandle;

/// Alert engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEngineConfig {
    /// Alerts retained before the oldest is dropped
    pub max_alerts: usize,
    /// Age after which `prune_expired` drops an alert
    pub retention: chrono::Duration,
    /// Offset used to compute the local hour for out-of-hours rules
    pub utc_offset: FixedOffset,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            max_alerts: 10_000,
            retention: chrono::Duration::days(7),
            utc_offset: Utc.fix(),
        }
    }
}

/// Evaluates alert rules against audit events.
pub struct AlertEngine {
    rules: ShardedStorage<String, AlertRule>,
    alerts: Mutex<VecDeque<SecurityAlert>>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: AlertEngineConfig,
    metrics: KernelMetrics,
}

impl AlertEngine {
    /// Create an engine with no rules installed.
    pub fn new(
        config: AlertEngineConfig,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        metrics: KernelMetrics,
    ) -> Self {
        Self {
            rules: ShardedStorage::new(),
            alerts: Mutex::new(VecDeque::new()),
            sink,
            clock,
            config,
            metrics,
        }
    }

    /// Start receiving every event stored in the engine's sink.
    pub fn subscribe_to_sink(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.sink.subscribe(weak);
    }

    /// Install or replace a rule by id.
    ///
    /// A replaced rule starts armed: its cooldown is not carried over.
    pub fn configure_rule(&self, rule: AlertRule) -> Result<(), RuleError> {
        rule.validate()?;
        let id = rule.id.clone();
        let replaced = self.rules.insert(id.clone(), rule).is_some();
        info!(rule = %id, replaced, "alert rule configured");
        Ok(())
    }

    /// Remove a rule. Returns `false` if no rule had that id.
    pub fn remove_rule(&self, id: &str) -> bool {
        let removed = self.rules.remove(id).is_some();
        if removed {
            info!(rule = id, "alert rule removed");
        }
        removed
    }

    /// Installed rules, sorted by id.
    pub fn rules(&self) -> Vec<AlertRule> {
        let mut rules = self.rules.collect(|_, rule| rule.clone());
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Evaluate `event` against every applicable rule.
    ///
    /// Returns the alerts raised. Events delivered under an alert-emission
    /// context are ignored. Count-based rules count what the sink holds, so
    /// an event delivered through the sink subscription counts itself.
    pub fn process_event(&self, event: &AuditEvent, ctx: &CallContext) -> Vec<SecurityAlert> {
        if ctx.is_alert_emission() {
            trace!(event_id = %event.id, "skipping event emitted by alerting");
            return Vec::new();
        }

        let now = self.clock.utc_now();
        let candidates = self.rules.collect(|_, rule| {
            (rule.applies_to(&event.event_type) && !rule.is_cooling_down(now)).then(|| rule.clone())
        });

        let mut raised = Vec::new();
        for rule in candidates.into_iter().flatten() {
            if !self.condition_met(&rule, event, now) {
                continue;
            }
            if !self.claim_cooldown(&rule.id, now) {
                debug!(rule = %rule.id, "rule already fired concurrently");
                continue;
            }
            let alert = SecurityAlert::fire(&rule, event, now);
            self.raise(&alert, ctx);
            raised.push(alert);
        }
        raised
    }

    /// Every retained alert, oldest first.
    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.lock_alerts().iter().cloned().collect()
    }

    /// Alerts raised at or after `since`, oldest first.
    pub fn alerts_since(&self, since: DateTime<Utc>) -> Vec<SecurityAlert> {
        self.lock_alerts()
            .iter()
            .filter(|a| a.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Mark an alert as handled. Returns `false` if it is not retained.
    pub fn acknowledge(&self, alert_id: Uuid) -> bool {
        let mut alerts = self.lock_alerts();
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.lock_alerts().iter().filter(|a| !a.acknowledged).count()
    }

    /// Drop alerts older than the retention period. Returns how many were dropped.
    pub fn prune_expired(&self) -> usize {
        let Some(cutoff) = self.clock.utc_now().checked_sub_signed(self.config.retention) else {
            return 0;
        };
        let mut alerts = self.lock_alerts();
        let before = alerts.len();
        alerts.retain(|a| a.timestamp >= cutoff);
        let pruned = before - alerts.len();
        if pruned > 0 {
            debug!(pruned, remaining = alerts.len(), "expired alerts pruned");
        }
        pruned
    }

    /// Prune expired alerts every `period` until the handle is shut down or
    /// the engine is dropped.
    #[cfg(feature = "async")]
    pub fn start_cleanup(self: &Arc<Self>, period: std::time::Duration) -> CleanupHandle {
        let weak = Arc::downgrade(self);
        CleanupHandle::spawn("alert-cleanup", period, move || match weak.upgrade() {
            Some(engine) => {
                engine.prune_expired();
                true
            }
            None => false,
        })
    }

    fn condition_met(&self, rule: &AlertRule, event: &AuditEvent, now: DateTime<Utc>) -> bool {
        match &rule.condition {
            AlertCondition::CountInWindow {
                count,
                window_minutes,
                text_filter,
            } => {
                let window = i64::try_from(*window_minutes)
                    .ok()
                    .and_then(chrono::Duration::try_minutes)
                    .unwrap_or(chrono::Duration::MAX);
                let since = now
                    .checked_sub_signed(window)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let seen = self
                    .sink
                    .query_events(since, rule.event_type.as_ref())
                    .iter()
                    .filter(|e| matches_text(&e.description, text_filter.as_deref()))
                    .count();
                seen >= *count as usize
            }
            AlertCondition::OutOfHours {
                start_hour,
                end_hour,
            } => {
                let local_hour = event.timestamp.with_timezone(&self.config.utc_offset).hour();
                is_outside_hours(local_hour, *start_hour, *end_hour)
            }
            AlertCondition::SensitivityEquals { level } => event.sensitivity == *level,
        }
    }

    // Re-checks under the rule's entry lock so only one caller wins.
    fn claim_cooldown(&self, rule_id: &str, now: DateTime<Utc>) -> bool {
        self.rules
            .with_existing_mut(rule_id, |rule| {
                if rule.is_cooling_down(now) {
                    false
                } else {
                    rule.last_triggered = Some(now);
                    true
                }
            })
            .unwrap_or(false)
    }

    fn raise(&self, alert: &SecurityAlert, ctx: &CallContext) {
        {
            let mut alerts = self.lock_alerts();
            while alerts.len() >= self.config.max_alerts.max(1) {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
        }
        self.metrics.record_alert();
        warn!(
            alert_id = %alert.id,
            rule = %alert.rule_id,
            severity = %alert.severity,
            event_id = %alert.triggering_event,
            "security alert raised"
        );

        let event = NewEvent::new(EventType::SECURITY_ALERT, alert.description.clone())
            .with_sensitivity(Sensitivity::from(alert.severity))
            .with_detail("alert_id", alert.id)
            .with_detail("rule_id", &alert.rule_id)
            .with_detail("triggering_event", alert.triggering_event);
        if let Err(e) = self.sink.log_event_with(ctx.for_alert_emission(), event) {
            warn!(alert_id = %alert.id, error = %e, "failed to record security alert");
        }
    }

    fn lock_alerts(&self) -> MutexGuard<'_, VecDeque<SecurityAlert>> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSubscriber for AlertEngine {
    fn on_event(&self, event: &AuditEvent, ctx: &CallContext) {
        self.process_event(event, ctx);
    }
}

impl fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEngine")
            .field("rules", &self.rules.len())
            .field("alerts", &self.lock_alerts().len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::default_rules;
    use crate::domain::severity::Severity;
    use crate::infrastructure::event_sink::InMemoryEventSink;
    use crate::infrastructure::mocks::MockClock;
    use chrono::TimeZone;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Fixture {
        engine: Arc<AlertEngine>,
        sink: Arc<InMemoryEventSink>,
        clock: MockClock,
    }

    fn fixture_with(config: AlertEngineConfig) -> Fixture {
        let noon = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let clock = MockClock::with_wall_clock(Instant::now(), noon);
        let sink = Arc::new(InMemoryEventSink::new(Arc::new(clock.clone()), 1000));
        let engine = Arc::new(AlertEngine::new(
            config,
            sink.clone(),
            Arc::new(clock.clone()),
            KernelMetrics::new(),
        ));
        engine.subscribe_to_sink();
        Fixture {
            engine,
            sink,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(AlertEngineConfig::default())
    }

    fn denied() -> NewEvent {
        NewEvent::new(EventType::PERMISSION_DENIED, "Microphone access denied")
    }

    fn count_rule(count: u32, window_minutes: u64) -> AlertRule {
        AlertRule::new(
            "denials",
            "Permission denials",
            Severity::High,
            AlertCondition::CountInWindow {
                count,
                window_minutes,
                text_filter: None,
            },
        )
        .with_event_type(EventType::PERMISSION_DENIED)
        .with_cooldown_minutes(10)
    }

    #[test]
    fn test_count_in_window_fires_once_during_cooldown() {
        let f = fixture();
        f.engine.configure_rule(count_rule(3, 5)).unwrap();

        f.sink.log_event(denied()).unwrap();
        f.sink.log_event(denied()).unwrap();
        assert!(f.engine.alerts().is_empty());

        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts().len(), 1);

        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts().len(), 1);

        let alert = &f.engine.alerts()[0];
        assert_eq!(alert.rule_id, "denials");
        assert_eq!(alert.severity, Severity::High);
        assert!(!alert.acknowledged);
    }

    #[test]
    fn test_count_window_slides() {
        let f = fixture();
        f.engine.configure_rule(count_rule(3, 5)).unwrap();

        f.sink.log_event(denied()).unwrap();
        f.sink.log_event(denied()).unwrap();
        f.clock.advance(Duration::from_secs(6 * 60));
        f.sink.log_event(denied()).unwrap();
        assert!(f.engine.alerts().is_empty());
    }

    #[test]
    fn test_fires_again_after_cooldown() {
        let f = fixture();
        f.engine.configure_rule(count_rule(1, 5)).unwrap();

        f.sink.log_event(denied()).unwrap();
        f.clock.advance(Duration::from_secs(9 * 60));
        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts().len(), 1);

        f.clock.advance(Duration::from_secs(60));
        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts().len(), 2);
    }

    #[test]
    fn test_text_filter_is_case_insensitive() {
        let f = fixture();
        let rule = AlertRule::new(
            "mic-denials",
            "Microphone denials",
            Severity::Medium,
            AlertCondition::CountInWindow {
                count: 2,
                window_minutes: 5,
                text_filter: Some("MICROPHONE".to_string()),
            },
        )
        .with_event_type(EventType::PERMISSION_DENIED);
        f.engine.configure_rule(rule).unwrap();

        f.sink
            .log_event(NewEvent::new(EventType::PERMISSION_DENIED, "Clipboard denied"))
            .unwrap();
        f.sink.log_event(denied()).unwrap();
        assert!(f.engine.alerts().is_empty());

        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts().len(), 1);
    }

    #[test]
    fn test_out_of_hours_uses_configured_offset() {
        let f = fixture_with(AlertEngineConfig {
            utc_offset: FixedOffset::east_opt(3 * 3600).unwrap(),
            ..AlertEngineConfig::default()
        });
        let rule = AlertRule::new(
            "after-hours",
            "After hours",
            Severity::Medium,
            AlertCondition::OutOfHours {
                start_hour: 6,
                end_hour: 22,
            },
        )
        .with_event_type(EventType::CREDENTIAL_ACCESS);
        f.engine.configure_rule(rule).unwrap();

        // 12:00 UTC is 15:00 local
        f.sink
            .log_event(NewEvent::new(EventType::CREDENTIAL_ACCESS, "api key read"))
            .unwrap();
        assert!(f.engine.alerts().is_empty());

        // 20:00 UTC is 23:00 local
        f.clock
            .set_wall_clock(Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap());
        f.sink
            .log_event(NewEvent::new(EventType::CREDENTIAL_ACCESS, "api key read"))
            .unwrap();
        assert_eq!(f.engine.alerts().len(), 1);
    }

    #[test]
    fn test_sensitivity_rule_and_reentrancy_guard() {
        let f = fixture();
        let rule = AlertRule::new(
            "high",
            "High sensitivity",
            Severity::High,
            AlertCondition::SensitivityEquals {
                level: Sensitivity::High,
            },
        );
        f.engine.configure_rule(rule).unwrap();

        f.sink
            .log_event(
                NewEvent::new(EventType::SETTINGS_CHANGED, "hotkey changed")
                    .with_sensitivity(Sensitivity::High),
            )
            .unwrap();

        // The alert event is High as well, but it is not evaluated again.
        assert_eq!(f.engine.alerts().len(), 1);
        let events = f.sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::SECURITY_ALERT);
        assert_eq!(events[1].sensitivity, Sensitivity::High);
        assert_eq!(
            events[1].details.get("rule_id").map(String::as_str),
            Some("high")
        );
    }

    #[test]
    fn test_alert_context_events_are_ignored() {
        let f = fixture();
        f.engine.configure_rule(count_rule(1, 5)).unwrap();
        let event = AuditEvent::from_new(
            crate::domain::event::EventId(99),
            denied(),
            f.clock.utc_now(),
        );
        let raised = f
            .engine
            .process_event(&event, &CallContext::root().for_alert_emission());
        assert!(raised.is_empty());
    }

    #[test]
    fn test_concurrent_events_claim_cooldown_once() {
        let f = fixture();
        let rule = AlertRule::new(
            "critical",
            "Critical",
            Severity::Critical,
            AlertCondition::SensitivityEquals {
                level: Sensitivity::Critical,
            },
        )
        .with_cooldown_minutes(60);
        f.engine.configure_rule(rule).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&f.sink);
                thread::spawn(move || {
                    sink.log_event(
                        NewEvent::new(EventType::SECURITY_VIOLATION, format!("violation {i}"))
                            .with_sensitivity(Sensitivity::Critical),
                    )
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(f.engine.alerts().len(), 1);
    }

    #[test]
    fn test_disabled_rule_never_fires() {
        let f = fixture();
        let mut rule = count_rule(1, 5);
        rule.enabled = false;
        f.engine.configure_rule(rule).unwrap();

        f.sink.log_event(denied()).unwrap();
        assert!(f.engine.alerts().is_empty());
    }

    #[test]
    fn test_replacing_rule_resets_cooldown() {
        let f = fixture();
        f.engine.configure_rule(count_rule(1, 5)).unwrap();
        f.sink.log_event(denied()).unwrap();
        assert!(f.engine.rules()[0].last_triggered.is_some());

        f.engine.configure_rule(count_rule(1, 5)).unwrap();
        assert!(f.engine.rules()[0].last_triggered.is_none());

        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts().len(), 2);
    }

    #[test]
    fn test_rule_management() {
        let f = fixture();
        for rule in default_rules() {
            f.engine.configure_rule(rule).unwrap();
        }
        assert_eq!(f.engine.rules().len(), 4);

        assert!(f.engine.remove_rule("security-event-burst"));
        assert!(!f.engine.remove_rule("security-event-burst"));
        assert_eq!(f.engine.rules().len(), 3);

        let invalid = AlertRule::new(
            "",
            "No id",
            Severity::Low,
            AlertCondition::SensitivityEquals {
                level: Sensitivity::Low,
            },
        );
        assert_eq!(f.engine.configure_rule(invalid), Err(RuleError::EmptyId));
    }

    #[test]
    fn test_acknowledge_and_prune() {
        let f = fixture();
        f.engine.configure_rule(count_rule(1, 5)).unwrap();
        f.sink.log_event(denied()).unwrap();
        let first = f.engine.alerts()[0].id;
        assert_eq!(f.engine.unacknowledged_count(), 1);

        assert!(f.engine.acknowledge(first));
        assert!(!f.engine.acknowledge(Uuid::new_v4()));
        assert_eq!(f.engine.unacknowledged_count(), 0);

        f.clock.advance(Duration::from_secs(3 * 24 * 3600));
        let checkpoint = f.clock.utc_now();
        f.sink.log_event(denied()).unwrap();
        assert_eq!(f.engine.alerts_since(checkpoint).len(), 1);

        f.clock.advance(Duration::from_secs(5 * 24 * 3600));
        assert_eq!(f.engine.prune_expired(), 1);
        let remaining = f.engine.alerts();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, first);
    }

    #[test]
    fn test_alert_buffer_is_bounded() {
        let f = fixture_with(AlertEngineConfig {
            max_alerts: 2,
            ..AlertEngineConfig::default()
        });
        f.engine
            .configure_rule(count_rule(1, 5).with_cooldown_minutes(0))
            .unwrap();
        for _ in 0..5 {
            f.sink.log_event(denied()).unwrap();
        }
        assert_eq!(f.engine.alerts().len(), 2);
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_prunes_and_stops() {
        let f = fixture();
        f.engine.configure_rule(count_rule(1, 5)).unwrap();
        f.sink.log_event(denied()).unwrap();
        f.clock.advance(Duration::from_secs(8 * 24 * 3600));

        let handle = f.engine.start_cleanup(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(f.engine.alerts().is_empty());

        handle.shutdown().await.unwrap();
    }
}
