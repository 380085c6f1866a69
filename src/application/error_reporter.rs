//! Error grouping and escalation.
//!
//! Reports are fingerprinted and counted per group. Only some occurrences are
//! escalated (first, 10th, 100th, every 1000th, and anything critical), so a
//! tight error loop produces a handful of log lines rather than thousands.

use crate::application::dispatch::emit_detached;
use crate::application::metrics::KernelMetrics;
use crate::application::ports::{Clock, EventSink};
use crate::domain::error_group::{is_alert_worthy, ErrorGroup, ErrorReport};
use crate::domain::event::{EventType, NewEvent, Sensitivity};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::severity::Severity;
use crate::infrastructure::storage::ShardedStorage;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Deduplicating error reporter.
#[derive(Debug)]
pub struct ErrorReporter {
    groups: ShardedStorage<Fingerprint, ErrorGroup>,
    sink: Option<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
    metrics: KernelMetrics,
}

impl ErrorReporter {
    pub fn new(clock: Arc<dyn Clock>, metrics: KernelMetrics) -> Self {
        Self {
            groups: ShardedStorage::new(),
            sink: None,
            clock,
            metrics,
        }
    }

    /// Record escalated reports in an event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record one occurrence and return its group's fingerprint.
    ///
    /// `severity` overrides the default derived from the report's category.
    /// Never fails: if fingerprinting itself breaks, the occurrence is filed
    /// under [`Fingerprint::UNKNOWN`].
    pub fn report(
        &self,
        report: ErrorReport,
        source: Option<&str>,
        severity: Option<Severity>,
    ) -> Fingerprint {
        let fingerprint = match panic::catch_unwind(AssertUnwindSafe(|| report.fingerprint())) {
            Ok(fp) => fp,
            Err(_) => {
                self.metrics.record_internal_failure();
                error!(error_type = %report.type_name, "error fingerprinting panicked");
                Fingerprint::UNKNOWN
            }
        };
        let severity = severity.unwrap_or_else(|| report.category.severity());
        let now = self.clock.utc_now();

        let count = self.groups.with_entry_mut(
            fingerprint,
            || ErrorGroup::new(fingerprint, &report, source, now),
            |group| group.record(severity, now),
        );
        self.metrics.record_error_report();

        if is_alert_worthy(count, severity) {
            self.escalate(fingerprint, &report, source, severity, count);
        } else {
            debug!(%fingerprint, count, "error occurrence recorded");
        }
        fingerprint
    }

    /// Capture and record any error value.
    pub fn report_error<E>(&self, error: &E, source: Option<&str>) -> Fingerprint
    where
        E: Error + 'static,
    {
        self.report(ErrorReport::capture(error), source, None)
    }

    /// All groups, most recently seen first.
    pub fn groups(&self) -> Vec<ErrorGroup> {
        let mut groups = self.groups.collect(|_, group| group.clone());
        groups.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        groups
    }

    pub fn group(&self, fingerprint: Fingerprint) -> Option<ErrorGroup> {
        self.groups.with_existing(&fingerprint, ErrorGroup::clone)
    }

    /// Forget a group. The next occurrence starts a fresh one.
    pub fn resolve(&self, fingerprint: Fingerprint) -> bool {
        let resolved = self.groups.remove(&fingerprint).is_some();
        if resolved {
            debug!(%fingerprint, "error group resolved");
        }
        resolved
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn escalate(
        &self,
        fingerprint: Fingerprint,
        report: &ErrorReport,
        source: Option<&str>,
        severity: Severity,
        count: u64,
    ) {
        error!(
            %fingerprint,
            count,
            %severity,
            error_type = %report.type_name,
            source = source.unwrap_or("unknown"),
            "{}",
            report.message
        );

        let Some(sink) = self.sink.clone() else {
            return;
        };
        let mut event = NewEvent::new(
            EventType::ERROR_REPORTED,
            format!("{} (x{count})", report.message),
        )
        .with_sensitivity(Sensitivity::from(severity))
        .with_detail("fingerprint", fingerprint)
        .with_detail("count", count)
        .with_detail("error_type", &report.type_name)
        .with_detail("category", report.category);
        if let Some(source) = source {
            event = event.with_detail("source", source);
        }
        emit_detached("error-report", move || {
            if let Err(e) = sink.log_event(event) {
                warn!(%fingerprint, error = %e, "failed to record error report");
            }
        });
    }
}
