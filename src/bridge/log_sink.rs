//! Log Sink - captures the diagnostic output of exactly one invocation
//!
//! Procedures write entries through `&LogSink`. Entries are only retained
//! while a capture window is open; outside a window they go to `tracing`
//! and nowhere else.
//!
//! ```text
//!   capture() ──► clear + attach ──► procedure logs ──► finish() ──► Vec<LogEntry>
//!                                                         │
//!                                     (dropped early) ────┴──► detach
//! ```
//!
//! Procedures that log through `tracing` instead are captured too, provided
//! [`CaptureLayer`] is installed in the subscriber and the event is emitted on
//! the thread running the procedure.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Severity of a captured entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Log,
    Warning,
    Error,
    Assert,
    Exception,
}

impl Severity {
    /// Entries at these severities turn an invocation into a failure
    pub fn is_failure(self) -> bool {
        matches!(self, Severity::Error | Severity::Assert | Severity::Exception)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Log => "Log",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Assert => "Assert",
            Severity::Exception => "Exception",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured diagnostic line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Rendered as `"<severity>: <message>"`, the wire format of a result body
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

#[derive(Debug, Default)]
struct SinkState {
    attached: bool,
    entries: Vec<LogEntry>,
}

type SharedState = Arc<Mutex<SinkState>>;

fn lock(state: &Mutex<SinkState>) -> MutexGuard<'_, SinkState> {
    // Entries are plain data; a panic mid-push leaves nothing half-written
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

thread_local! {
    /// Sink whose capture window is open on this thread
    static ACTIVE: RefCell<Option<SharedState>> = const { RefCell::new(None) };
}

/// Buffer the host's procedures log into
#[derive(Debug, Default)]
pub struct LogSink {
    state: SharedState,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        lock(&self.state)
    }

    /// Record an entry. Retained only while a capture window is open.
    pub fn record(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Log => tracing::info!(target: "tickbridge::procedure", "{message}"),
            Severity::Warning => tracing::warn!(target: "tickbridge::procedure", "{message}"),
            Severity::Error | Severity::Assert | Severity::Exception => {
                tracing::error!(target: "tickbridge::procedure", severity = %severity, "{message}")
            }
        }

        let mut state = self.state();
        if state.attached {
            state.entries.push(LogEntry { severity, message });
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.record(Severity::Log, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Severity::Error, message);
    }

    pub fn assert(&self, message: impl Into<String>) {
        self.record(Severity::Assert, message);
    }

    pub fn exception(&self, message: impl Into<String>) {
        self.record(Severity::Exception, message);
    }

    /// Whether a capture window is currently open
    pub fn is_attached(&self) -> bool {
        self.state().attached
    }

    /// Open a capture window: clears anything left over and starts retaining.
    ///
    /// The returned guard closes the window when finished or dropped.
    pub(crate) fn capture(&self) -> Capture<'_> {
        {
            let mut state = self.state();
            state.entries.clear();
            state.attached = true;
        }
        ACTIVE.with(|active| *active.borrow_mut() = Some(Arc::clone(&self.state)));
        Capture { sink: self }
    }
}

/// An open capture window on a [`LogSink`]
pub(crate) struct Capture<'a> {
    sink: &'a LogSink,
}

impl Capture<'_> {
    /// Close the window and take every entry recorded inside it
    pub(crate) fn finish(self) -> Vec<LogEntry> {
        self.detach();
        std::mem::take(&mut self.sink.state().entries)
    }

    fn detach(&self) {
        ACTIVE.with(|active| active.borrow_mut().take());
        self.sink.state().attached = false;
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Forwards `tracing` events into the capture window open on the current
/// thread.
///
/// ERROR, WARN and INFO map to `Error`, `Warning` and `Log`; finer levels and
/// events from this crate are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureLayer;

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target == "tickbridge" || target.starts_with("tickbridge::") {
            return;
        }
        let severity = match *metadata.level() {
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warning,
            Level::INFO => Severity::Log,
            _ => return,
        };

        let Some(state) = ACTIVE.with(|active| active.borrow().clone()) else {
            return;
        };
        let mut message = MessageVisitor::default();
        event.record(&mut message);

        let mut state = lock(&state);
        if state.attached {
            state.entries.push(LogEntry::new(severity, message.finish()));
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_outside_window_are_not_retained() {
        let sink = LogSink::new();
        sink.log("before");

        let capture = sink.capture();
        sink.log("inside");
        let entries = capture.finish();

        sink.error("after");
        assert_eq!(entries, vec![LogEntry::new(Severity::Log, "inside")]);
        assert!(!sink.is_attached());
    }

    #[test]
    fn test_each_window_starts_empty() {
        let sink = LogSink::new();

        let first = sink.capture();
        sink.warning("one");
        assert_eq!(first.finish().len(), 1);

        let second = sink.capture();
        sink.log("two");
        let entries = second.finish();
        assert_eq!(entries, vec![LogEntry::new(Severity::Log, "two")]);
    }

    #[test]
    fn test_dropped_capture_detaches() {
        let sink = LogSink::new();
        {
            let _capture = sink.capture();
            assert!(sink.is_attached());
        }
        assert!(!sink.is_attached());
    }

    #[test]
    fn test_tracing_events_land_in_open_window() {
        use tracing_subscriber::layer::SubscriberExt;

        let subscriber = tracing_subscriber::registry().with(CaptureLayer);
        tracing::subscriber::with_default(subscriber, || {
            let sink = LogSink::new();
            tracing::warn!(target: "game", "outside any window");

            let capture = sink.capture();
            tracing::warn!(target: "game", retries = 3, "slow asset load");
            tracing::debug!(target: "game", "too fine to keep");
            tracing::info!("crate-internal event");
            sink.log("direct");
            tracing::error!(target: "game::save", path = "slot1", "write failed");
            let entries = capture.finish();

            tracing::error!(target: "game", "after the window");
            assert_eq!(
                entries,
                vec![
                    LogEntry::new(Severity::Warning, "slow asset load retries=3"),
                    LogEntry::new(Severity::Log, "direct"),
                    LogEntry::new(Severity::Error, "write failed path=slot1"),
                ]
            );

            // A dropped window stops forwarding as well
            let other = LogSink::new();
            drop(other.capture());
            let capture = sink.capture();
            tracing::info!(target: "game", "second window");
            assert_eq!(capture.finish(), vec![LogEntry::new(Severity::Log, "second window")]);
            assert!(!other.is_attached());
        });
    }

    #[test]
    fn test_failure_severities() {
        assert!(!Severity::Log.is_failure());
        assert!(!Severity::Warning.is_failure());
        assert!(Severity::Error.is_failure());
        assert!(Severity::Assert.is_failure());
        assert!(Severity::Exception.is_failure());
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry::new(Severity::Warning, "Level: 'Warning'");
        assert_eq!(entry.to_string(), "Warning: Level: 'Warning'");
    }
}
