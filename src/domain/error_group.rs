//! Error reports and their deduplicated groups.

use crate::domain::fingerprint::Fingerprint;
use crate::domain::severity::{ErrorCategory, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// A single error occurrence, as handed to the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub type_name: String,
    pub message: String,
    pub backtrace: Option<String>,
    pub inner_type: Option<String>,
    pub category: ErrorCategory,
}

impl ErrorReport {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            backtrace: None,
            inner_type: None,
            category: ErrorCategory::Other,
        }
    }

    /// Capture a report from any error value.
    ///
    /// The type name comes from the static type `E`; the inner type is the
    /// leading identifier of the cause's `Debug` output (usually the variant
    /// or struct name). The category is inferred from the source chain.
    pub fn capture<E>(error: &E) -> Self
    where
        E: Error + 'static,
    {
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            backtrace: None,
            inner_type: error.source().map(debug_head),
            category: ErrorCategory::infer(error),
        }
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    pub fn with_inner_type(mut self, inner_type: impl Into<String>) -> Self {
        self.inner_type = Some(inner_type.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(
            &self.type_name,
            self.backtrace.as_deref(),
            &self.message,
            self.inner_type.as_deref(),
        )
    }
}

fn debug_head(error: &(dyn Error + 'static)) -> String {
    let debug = format!("{error:?}");
    let head: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if head.is_empty() {
        "unknown".to_string()
    } else {
        head
    }
}

/// Whether the `count`-th occurrence of an error deserves an alert.
///
/// Fires on the first occurrence, on every critical report, at 10 and 100,
/// and then at every multiple of 1000.
pub fn is_alert_worthy(count: u64, severity: Severity) -> bool {
    if severity == Severity::Critical {
        return true;
    }
    match count {
        1 | 10 | 100 => true,
        n if n >= 1000 => n % 1000 == 0,
        _ => false,
    }
}

/// Deduplicated occurrences of one error class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub fingerprint: Fingerprint,
    /// Message of the first occurrence
    pub message: String,
    pub type_name: String,
    pub source: Option<String>,
    pub category: ErrorCategory,
    /// Highest severity reported so far
    pub severity: Severity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u64,
}

impl ErrorGroup {
    /// New group with no occurrences recorded yet.
    pub fn new(
        fingerprint: Fingerprint,
        report: &ErrorReport,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            message: report.message.clone(),
            type_name: report.type_name.clone(),
            source: source.map(str::to_string),
            category: report.category,
            severity: Severity::Low,
            first_seen: now,
            last_seen: now,
            occurrences: 0,
        }
    }

    /// Record one occurrence and return the new count.
    pub fn record(&mut self, severity: Severity, now: DateTime<Utc>) -> u64 {
        self.occurrences = self.occurrences.saturating_add(1);
        self.last_seen = now;
        self.severity = self.severity.max(severity);
        self.occurrences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::io;

    #[derive(Debug)]
    enum TranscribeError {
        Upstream(io::Error),
    }

    impl fmt::Display for TranscribeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TranscribeError::Upstream(e) => write!(f, "upstream failed: {e}"),
            }
        }
    }

    impl Error for TranscribeError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            match self {
                TranscribeError::Upstream(e) => Some(e),
            }
        }
    }

    #[test]
    fn test_alert_worthiness_schedule() {
        let worthy: Vec<u64> = (1..=5000)
            .filter(|&n| is_alert_worthy(n, Severity::Medium))
            .collect();
        assert_eq!(worthy, vec![1, 10, 100, 1000, 2000, 3000, 4000, 5000]);
    }

    #[test]
    fn test_critical_always_alert_worthy() {
        assert!(is_alert_worthy(2, Severity::Critical));
        assert!(is_alert_worthy(57, Severity::Critical));
    }

    #[test]
    fn test_capture_from_error() {
        let err = TranscribeError::Upstream(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let report = ErrorReport::capture(&err);

        assert!(report.type_name.ends_with("TranscribeError"));
        assert_eq!(report.message, "upstream failed: slow");
        assert_eq!(report.category, ErrorCategory::Network);
        assert!(report.inner_type.is_some());
    }

    #[test]
    fn test_group_record() {
        let now = Utc::now();
        let report = ErrorReport::new("ApiError", "boom");
        let mut group = ErrorGroup::new(report.fingerprint(), &report, Some("api"), now);
        assert_eq!(group.occurrences, 0);

        let later = now + chrono::Duration::seconds(5);
        assert_eq!(group.record(Severity::Low, now), 1);
        assert_eq!(group.record(Severity::High, later), 2);
        assert_eq!(group.record(Severity::Medium, later), 3);

        assert_eq!(group.severity, Severity::High);
        assert_eq!(group.first_seen, now);
        assert_eq!(group.last_seen, later);
        assert_eq!(group.source.as_deref(), Some("api"));
    }
}
