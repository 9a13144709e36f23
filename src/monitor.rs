//! Unhandled-rejection monitor.
//!
//! Tracks rejections that exist but have not yet been observed by any
//! consumer. A rejected handler registers a [`PromiseStatus`] at construction
//! and the engine arms an after-queue callback: if the rejection is still
//! unhandled once the queue drains, it is reported as potentially unhandled.
//! If a rejection handler attaches later, a second after-queue callback
//! retracts the earlier report. Fatal reports (from terminal `done`
//! consumers) are emitted immediately and never retracted.
//!
//! Reporting goes through the pluggable [`Reporter`] sink as structured,
//! serde-serializable events. The monitor can be constructed disabled, in
//! which case every operation is a no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rejection::Rejection;

// ---------------------------------------------------------------------------
// RejectionInfo / ReportEvent — the report payloads
// ---------------------------------------------------------------------------

/// Snapshot of one trackable rejection, as handed to the reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionInfo {
    /// Sequential id, unique for the lifetime of the monitor.
    pub id: u64,
    /// Rendered rejection reason.
    pub reason: String,
    /// Creation time of the rejected handler.
    pub created_at: DateTime<Utc>,
    /// Correlation label from the context capability, when one exists.
    pub context: Option<String>,
}

/// One report emitted through the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "rejection")]
pub enum ReportEvent {
    /// No handler attached within the rejection's creation tick.
    PotentiallyUnhandled(RejectionInfo),
    /// A previously reported rejection acquired a handler; retraction.
    Handled(RejectionInfo),
    /// A rejection reached a terminal consumer with no way out.
    Fatal(RejectionInfo),
}

impl ReportEvent {
    pub fn info(&self) -> &RejectionInfo {
        match self {
            Self::PotentiallyUnhandled(info) | Self::Handled(info) | Self::Fatal(info) => info,
        }
    }
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PotentiallyUnhandled(info) => {
                write!(f, "potentially unhandled rejection [{}]: {}", info.id, info.reason)
            }
            Self::Handled(info) => {
                write!(f, "rejection handled [{}]: {}", info.id, info.reason)
            }
            Self::Fatal(info) => write!(f, "fatal rejection [{}]: {}", info.id, info.reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter — pluggable sink
// ---------------------------------------------------------------------------

/// Reporting capability consumed by the monitor.
pub trait Reporter: Send + Sync {
    fn on_potentially_unhandled(&self, info: &RejectionInfo);
    fn on_handled(&self, info: &RejectionInfo);
    fn on_fatal(&self, info: &RejectionInfo);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_potentially_unhandled(&self, _info: &RejectionInfo) {}
    fn on_handled(&self, _info: &RejectionInfo) {}
    fn on_fatal(&self, _info: &RejectionInfo) {}
}

/// Buffers every report; the test-side sink.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events observed so far, in emission order.
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().expect("reporter lock").clone()
    }

    /// Removes and returns buffered events.
    pub fn drain_events(&self) -> Vec<ReportEvent> {
        std::mem::take(&mut *self.events.lock().expect("reporter lock"))
    }
}

impl Reporter for CollectingReporter {
    fn on_potentially_unhandled(&self, info: &RejectionInfo) {
        self.events
            .lock()
            .expect("reporter lock")
            .push(ReportEvent::PotentiallyUnhandled(info.clone()));
    }

    fn on_handled(&self, info: &RejectionInfo) {
        self.events
            .lock()
            .expect("reporter lock")
            .push(ReportEvent::Handled(info.clone()));
    }

    fn on_fatal(&self, info: &RejectionInfo) {
        self.events
            .lock()
            .expect("reporter lock")
            .push(ReportEvent::Fatal(info.clone()));
    }
}

/// Writes one JSON object per report to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineReporter;

impl JsonLineReporter {
    fn emit(&self, event: &ReportEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{line}");
        }
    }
}

impl Reporter for JsonLineReporter {
    fn on_potentially_unhandled(&self, info: &RejectionInfo) {
        self.emit(&ReportEvent::PotentiallyUnhandled(info.clone()));
    }

    fn on_handled(&self, info: &RejectionInfo) {
        self.emit(&ReportEvent::Handled(info.clone()));
    }

    fn on_fatal(&self, info: &RejectionInfo) {
        self.emit(&ReportEvent::Fatal(info.clone()));
    }
}

// ---------------------------------------------------------------------------
// PromiseStatus — one live table entry
// ---------------------------------------------------------------------------

/// Monitor record for one rejected-and-not-yet-observed promise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseStatus {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub context: Option<String>,
    pub reason: String,
    /// A rejection-handling consumer has attached.
    pub handled: bool,
    /// A potentially-unhandled report went out for this entry.
    pub reported: bool,
}

impl PromiseStatus {
    fn info(&self) -> RejectionInfo {
        RejectionInfo {
            id: self.id,
            reason: self.reason.clone(),
            created_at: self.created_at,
            context: self.context.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RejectionMonitor — the live table
// ---------------------------------------------------------------------------

struct MonitorInner {
    next_id: u64,
    table: BTreeMap<u64, PromiseStatus>,
}

/// Live table of trackable rejections plus the reporting sink.
///
/// Eviction is lifecycle-driven: observation removes an entry. The id
/// counter is 64-bit, monotonically increasing, and never reused, not even
/// across [`reset`](Self::reset).
pub struct RejectionMonitor {
    enabled: bool,
    reporter: Arc<dyn Reporter>,
    inner: Mutex<MonitorInner>,
}

impl RejectionMonitor {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            enabled: true,
            reporter,
            inner: Mutex::new(MonitorInner {
                next_id: 1,
                table: BTreeMap::new(),
            }),
        }
    }

    /// Production wiring with the diagnostic cost removed: every operation
    /// is a no-op and `register` returns the untracked id 0.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            reporter: Arc::new(NullReporter),
            inner: Mutex::new(MonitorInner {
                next_id: 1,
                table: BTreeMap::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a freshly rejected handler and returns its id (0 when the
    /// monitor is disabled).
    pub fn register(&self, context: Option<String>, reason: &Rejection) -> u64 {
        if !self.enabled {
            return 0;
        }
        let mut inner = self.inner.lock().expect("monitor lock");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.table.insert(
            id,
            PromiseStatus {
                id,
                created_at: Utc::now(),
                context,
                reason: reason.to_string(),
                handled: false,
                reported: false,
            },
        );
        id
    }

    /// A rejection-handling consumer attached to the rejection.
    pub fn mark_handled(&self, id: u64) {
        if id == 0 {
            return;
        }
        let mut inner = self.inner.lock().expect("monitor lock");
        if let Some(status) = inner.table.get_mut(&id) {
            status.handled = true;
        }
    }

    /// After-drain check: reports the entry as potentially unhandled when it
    /// is still live and no handler attached within its creation tick.
    pub fn report_unhandled_if_needed(&self, id: u64) {
        if id == 0 {
            return;
        }
        let info = {
            let mut inner = self.inner.lock().expect("monitor lock");
            match inner.table.get_mut(&id) {
                Some(status) if !status.handled && !status.reported => {
                    status.reported = true;
                    Some(status.info())
                }
                _ => None,
            }
        };
        if let Some(info) = &info {
            self.reporter.on_potentially_unhandled(info);
        }
    }

    /// A continuation with no rejection callback attached: the rejection is
    /// observed and responsibility moves to the downstream promise's own
    /// status. The entry is evicted without a retraction event — any pending
    /// or emitted report is superseded by the downstream status, which
    /// re-reports if the chain tail never handles the rejection.
    pub fn transfer(&self, id: u64) {
        if id == 0 {
            return;
        }
        self.inner.lock().expect("monitor lock").table.remove(&id);
    }

    /// After-drain check for the handled side: retracts an earlier report if
    /// one went out, and evicts the entry — observation removes it from the
    /// live table either way.
    pub fn retract_if_reported(&self, id: u64) {
        if id == 0 {
            return;
        }
        let retraction = {
            let mut inner = self.inner.lock().expect("monitor lock");
            match inner.table.remove(&id) {
                Some(status) if status.reported => Some(status.info()),
                _ => None,
            }
        };
        if let Some(info) = &retraction {
            self.reporter.on_handled(info);
        }
    }

    /// Fatal report for a rejection that reached a terminal consumer.
    /// Emitted immediately and never retracted; the entry, if any, is evicted.
    pub fn fatal(&self, id: u64, context: Option<String>, reason: &Rejection) {
        if !self.enabled {
            return;
        }
        let info = {
            let mut inner = self.inner.lock().expect("monitor lock");
            match inner.table.remove(&id) {
                Some(status) => status.info(),
                None => RejectionInfo {
                    id,
                    reason: reason.to_string(),
                    created_at: Utc::now(),
                    context,
                },
            }
        };
        self.reporter.on_fatal(&info);
    }

    /// Flushes the full table: every live, not-yet-reported entry is reported
    /// as potentially unhandled. Returns the flushed snapshot.
    pub fn report(&self) -> Vec<PromiseStatus> {
        if !self.enabled {
            return Vec::new();
        }
        let (snapshot, fresh) = {
            let mut inner = self.inner.lock().expect("monitor lock");
            let mut fresh = Vec::new();
            for status in inner.table.values_mut() {
                if !status.handled && !status.reported {
                    status.reported = true;
                    fresh.push(status.info());
                }
            }
            (inner.table.values().cloned().collect::<Vec<_>>(), fresh)
        };
        for info in &fresh {
            self.reporter.on_potentially_unhandled(info);
        }
        snapshot
    }

    /// Clears the live table for test isolation. The id counter keeps
    /// counting so ids stay unique across resets.
    pub fn reset(&self) {
        self.inner.lock().expect("monitor lock").table.clear();
    }

    /// Number of live (rejected, unobserved) entries.
    pub fn live_len(&self) -> usize {
        self.inner.lock().expect("monitor lock").table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn monitored() -> (Arc<CollectingReporter>, RejectionMonitor) {
        let reporter = Arc::new(CollectingReporter::new());
        let monitor = RejectionMonitor::new(reporter.clone());
        (reporter, monitor)
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let (_, monitor) = monitored();
        let a = monitor.register(None, &Rejection::message("a"));
        let b = monitor.register(None, &Rejection::message("b"));
        assert_eq!(b, a + 1);
        assert_eq!(monitor.live_len(), 2);
    }

    #[test]
    fn unhandled_entry_reports_once() {
        let (reporter, monitor) = monitored();
        let id = monitor.register(None, &Rejection::message("lost"));
        monitor.report_unhandled_if_needed(id);
        monitor.report_unhandled_if_needed(id);
        let events = reporter.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReportEvent::PotentiallyUnhandled(_)));
        assert_eq!(events[0].info().reason, "lost");
    }

    #[test]
    fn handled_within_tick_stays_silent() {
        let (reporter, monitor) = monitored();
        let id = monitor.register(None, &Rejection::message("caught"));
        monitor.mark_handled(id);
        monitor.report_unhandled_if_needed(id);
        monitor.retract_if_reported(id);
        assert!(reporter.events().is_empty());
        assert_eq!(monitor.live_len(), 0);
    }

    #[test]
    fn late_handler_retracts_an_earlier_report() {
        let (reporter, monitor) = monitored();
        let id = monitor.register(None, &Rejection::message("slow"));
        monitor.report_unhandled_if_needed(id);
        monitor.mark_handled(id);
        monitor.retract_if_reported(id);
        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ReportEvent::PotentiallyUnhandled(_)));
        assert!(matches!(events[1], ReportEvent::Handled(_)));
        assert_eq!(monitor.live_len(), 0);
    }

    #[test]
    fn transfer_evicts_without_any_event() {
        let (reporter, monitor) = monitored();
        let id = monitor.register(None, &Rejection::message("moved"));
        monitor.report_unhandled_if_needed(id);
        monitor.transfer(id);
        monitor.retract_if_reported(id);
        // The report stands (no retraction); the entry is simply gone.
        assert_eq!(reporter.events().len(), 1);
        assert_eq!(monitor.live_len(), 0);
    }

    #[test]
    fn fatal_reports_immediately_and_evicts() {
        let (reporter, monitor) = monitored();
        let id = monitor.register(None, &Rejection::message("terminal"));
        monitor.fatal(id, None, &Rejection::message("terminal"));
        let events = reporter.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReportEvent::Fatal(_)));
        assert_eq!(monitor.live_len(), 0);
    }

    #[test]
    fn fatal_without_a_table_entry_still_reports() {
        let (reporter, monitor) = monitored();
        monitor.fatal(0, Some("ctx".to_string()), &Rejection::Cycle);
        let events = reporter.events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].info().reason,
            Rejection::Cycle.to_string()
        );
    }

    #[test]
    fn report_flushes_every_live_unreported_entry() {
        let (reporter, monitor) = monitored();
        let a = monitor.register(None, &Rejection::message("a"));
        let _b = monitor.register(None, &Rejection::message("b"));
        monitor.report_unhandled_if_needed(a);
        let snapshot = monitor.report();
        assert_eq!(snapshot.len(), 2);
        // "a" was already reported; only "b" is new.
        assert_eq!(reporter.events().len(), 2);
    }

    #[test]
    fn reset_clears_the_table_but_not_the_counter() {
        let (_, monitor) = monitored();
        let a = monitor.register(None, &Rejection::message("a"));
        monitor.reset();
        assert_eq!(monitor.live_len(), 0);
        let b = monitor.register(None, &Rejection::message("b"));
        assert!(b > a, "ids must stay unique across resets");
    }

    #[test]
    fn disabled_monitor_is_a_no_op() {
        let monitor = RejectionMonitor::disabled();
        let id = monitor.register(None, &Rejection::message("ignored"));
        assert_eq!(id, 0);
        monitor.report_unhandled_if_needed(id);
        monitor.retract_if_reported(id);
        assert!(monitor.report().is_empty());
        assert_eq!(monitor.live_len(), 0);
        assert!(!monitor.is_enabled());
    }

    #[test]
    fn report_event_display_names_the_class() {
        let info = RejectionInfo {
            id: 7,
            reason: "boom".to_string(),
            created_at: Utc::now(),
            context: None,
        };
        assert_eq!(
            ReportEvent::PotentiallyUnhandled(info.clone()).to_string(),
            "potentially unhandled rejection [7]: boom"
        );
        assert_eq!(
            ReportEvent::Handled(info.clone()).to_string(),
            "rejection handled [7]: boom"
        );
        assert_eq!(
            ReportEvent::Fatal(info).to_string(),
            "fatal rejection [7]: boom"
        );
    }

    #[test]
    fn report_event_serde_roundtrip() {
        let info = RejectionInfo {
            id: 3,
            reason: "boom".to_string(),
            created_at: Utc::now(),
            context: Some("promise-3".to_string()),
        };
        for event in [
            ReportEvent::PotentiallyUnhandled(info.clone()),
            ReportEvent::Handled(info.clone()),
            ReportEvent::Fatal(info),
        ] {
            let json = serde_json::to_string(&event).expect("serialize");
            let restored: ReportEvent = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(event, restored);
        }
    }
}
