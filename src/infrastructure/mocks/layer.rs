//! Tracing layer that records diagnostics emitted by the kernel.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Layer that keeps every log record so tests can assert on diagnostics.
///
/// # Examples
///
/// ```
/// use dictation_guard::infrastructure::mocks::MockCaptureLayer;
/// use tracing::Level;
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let capture = MockCaptureLayer::new();
/// let subscriber = tracing_subscriber::registry().with(capture.clone());
///
/// tracing::subscriber::with_default(subscriber, || {
///     tracing::error!(fingerprint = "00ff", "error group hit threshold");
/// });
///
/// let records = capture.at_level(Level::ERROR);
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].field("fingerprint"), Some("00ff"));
/// ```
#[derive(Clone, Default)]
pub struct MockCaptureLayer {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
}

/// One captured log record.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CapturedRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl CapturedRecord {
    /// Value of a structured field, rendered with its `Display` or `Debug` form.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl MockCaptureLayer {
    /// Create an empty capture layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records captured so far.
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.lock().clone()
    }

    /// Records at exactly `level`.
    pub fn at_level(&self, level: Level) -> Vec<CapturedRecord> {
        self.lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    /// Whether any record's message contains `needle`.
    pub fn contains_message(&self, needle: &str) -> bool {
        self.lock().iter().any(|r| r.message.contains(needle))
    }

    /// Number of captured records.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CapturedRecord>> {
        self.records
            .lock()
            .expect("MockCaptureLayer mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl fmt::Debug for MockCaptureLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCaptureLayer")
            .field("count", &self.count())
            .finish()
    }
}

impl<S> Layer<S> for MockCaptureLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.lock().push(CapturedRecord {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}
