//! Error Fingerprint & Deduplication Engine.
//!
//! Captures are normalized through [`crate::stack`], fingerprinted on
//! (message, component, frame sequence) and merged into an existing record
//! when the fingerprint has been seen before. The backing store evicts the
//! least-recently-seen record rather than the oldest-inserted one, so errors
//! that keep recurring stay visible.

pub mod hooks;
pub mod record;

pub use hooks::{GlobalHooks, HookEvent, HookHandler, NoHooks, PanicHooks};
pub use record::{
    derive_component_name, CaptureContext, ErrorFilter, ErrorInput, ErrorKind, ErrorRecord,
    Fingerprint, Severity,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{ErrorCode, LensError, Result};
use crate::stack::{self, TraceSource};
use crate::store::{BoundedStore, RecordId, Subscription, Upsert};
use crate::telemetry::metrics::ERRORS_CAPTURED_TOTAL;

/// Number of components reported in [`ErrorStats::top_components`].
const TOP_COMPONENTS: usize = 5;

/// Evicts the record with the oldest `last_occurrence`; ties go to the
/// earliest inserted.
fn least_recently_seen(records: &VecDeque<ErrorRecord>) -> usize {
    records
        .iter()
        .enumerate()
        .min_by_key(|(index, r)| (r.last_occurrence, *index))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Aggregated read-only snapshot for analysis collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    /// Distinct fingerprints currently stored.
    pub total_records: usize,
    /// Sum of frequencies.
    pub total_occurrences: u64,
    pub unresolved: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Components with the most occurrences, highest first.
    pub top_components: Vec<(String, u64)>,
}

/// The error engine.
pub struct ErrorTracker {
    store: BoundedStore<ErrorRecord>,
    clock: Arc<dyn Clock>,
    traces: Arc<dyn TraceSource>,
    callbacks: Mutex<Vec<Arc<Subscription>>>,
    hooks: Mutex<Option<Arc<dyn GlobalHooks>>>,
}

impl ErrorTracker {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>, traces: Arc<dyn TraceSource>) -> Self {
        Self {
            store: BoundedStore::with_policy("errors", capacity, least_recently_seen),
            clock,
            traces,
            callbacks: Mutex::new(Vec::new()),
            hooks: Mutex::new(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capture
    // ─────────────────────────────────────────────────────────────────────────

    /// Fingerprint `error` and merge it into the store.
    ///
    /// Returns the stored record: the existing one with its frequency bumped,
    /// or a fresh one.
    pub fn capture(&self, error: &ErrorInput, context: &CaptureContext) -> ErrorRecord {
        let frames = stack::parse(error.stack.as_deref().unwrap_or_default());
        let component_name = derive_component_name(&frames);
        let fingerprint = Fingerprint::new(&error.message, component_name.as_deref(), &frames);
        let digest = fingerprint.digest();
        let now = self.clock.now();

        let severity = Severity::classify(error, context);

        let outcome = self.store.upsert(
            |r| r.fingerprint == digest && fingerprint.matches(r),
            |r| {
                r.frequency += 1;
                r.last_occurrence = now;
            },
            || ErrorRecord {
                id: RecordId::new(),
                fingerprint: digest.clone(),
                message: error.message.clone(),
                kind: error.kind.clone(),
                frames,
                component_name,
                severity,
                frequency: 1,
                first_occurrence: now,
                last_occurrence: now,
                resolved: false,
                context: context.extra.clone(),
            },
        );

        let record = match outcome {
            Upsert::Merged(merged) => {
                debug!(
                    id = %merged.id,
                    frequency = merged.frequency,
                    severity = %merged.severity,
                    "merged error into existing fingerprint"
                );
                counter!(ERRORS_CAPTURED_TOTAL, "severity" => merged.severity.to_string(), "merged" => "true")
                    .increment(1);
                return merged;
            }
            Upsert::Inserted(record) => record,
        };

        match severity {
            Severity::Critical | Severity::High => warn!(
                id = %record.id,
                kind = %record.kind,
                component = ?record.component_name,
                severity = %severity,
                "captured error: {}", record.message
            ),
            Severity::Medium | Severity::Low => debug!(
                id = %record.id,
                kind = %record.kind,
                component = ?record.component_name,
                severity = %severity,
                "captured error: {}", record.message
            ),
        }
        counter!(ERRORS_CAPTURED_TOTAL, "severity" => severity.to_string(), "merged" => "false")
            .increment(1);
        record
    }

    /// Capture a Rust error, taking the trace from the configured source.
    pub fn capture_error(&self, error: &(dyn std::error::Error + 'static)) -> ErrorRecord {
        let input = ErrorInput::from_error(error, self.traces.as_ref());
        self.capture(&input, &CaptureContext::default())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Records accepted by `filter`, most recently seen first.
    pub fn list(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        let mut records = self.store.query(|r| filter.accepts(r));
        records.sort_by(|a, b| b.last_occurrence.cmp(&a.last_occurrence));
        records
    }

    pub fn get(&self, id: RecordId) -> Option<ErrorRecord> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> ErrorStats {
        let records = self.store.records();
        let mut stats = ErrorStats {
            total_records: records.len(),
            ..ErrorStats::default()
        };

        let mut components: HashMap<String, u64> = HashMap::new();
        for record in &records {
            stats.total_occurrences += record.frequency;
            if !record.resolved {
                stats.unresolved += 1;
            }
            *stats.by_severity.entry(record.severity).or_default() += 1;
            if let Some(component) = &record.component_name {
                *components.entry(component.clone()).or_default() += record.frequency;
            }
        }

        let mut top: Vec<(String, u64)> = components.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_COMPONENTS);
        stats.top_components = top;
        stats
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark a record as resolved. Capture callbacks are not notified.
    pub fn resolve(&self, id: RecordId) -> Result<ErrorRecord> {
        self.store
            .update_silent(id, |r| r.resolved = true)
            .ok_or_else(|| LensError::not_found("error record", id))
    }

    /// Drop every stored record.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Register a callback run after every capture with the stored record.
    pub fn on_capture(&self, callback: impl Fn(&ErrorRecord) + Send + Sync + 'static) -> Subscription {
        let inner = Arc::new(self.store.subscribe(callback));
        self.callbacks.lock().push(Arc::clone(&inner));
        Subscription::new(move || inner.unsubscribe())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Global handlers
    // ─────────────────────────────────────────────────────────────────────────

    /// Funnel the host's uncaught errors into [`capture`](Self::capture).
    ///
    /// Idempotent. Fails with [`ErrorCode::HookUnavailable`] when the host
    /// offers no global hooks.
    pub fn install(self: &Arc<Self>, hooks: Arc<dyn GlobalHooks>) -> Result<()> {
        let mut installed = self.hooks.lock();
        if installed.is_some() {
            return Ok(());
        }

        let tracker: Weak<Self> = Arc::downgrade(self);
        let handler: HookHandler = Arc::new(move |event| {
            let Some(tracker) = tracker.upgrade() else {
                return;
            };
            match event {
                HookEvent::Uncaught(input) => {
                    tracker.capture(&input, &CaptureContext::default());
                }
                HookEvent::UnhandledRejection(input) => {
                    tracker.capture(&input, &CaptureContext::unhandled_rejection());
                }
            }
        });

        if !hooks.install(handler) {
            return Err(LensError::new(
                ErrorCode::HookUnavailable,
                "host offers no global error hooks",
            ));
        }
        *installed = Some(hooks);
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.hooks.lock().is_some()
    }

    /// Restore the host's previous hooks and drop `on_capture` callbacks.
    /// Stored records survive until [`clear`](Self::clear). Idempotent.
    pub fn teardown(&self) {
        if let Some(hooks) = self.hooks.lock().take() {
            hooks.restore();
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback.unsubscribe();
        }
    }
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("store", &self.store)
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::stack::NoTrace;

    fn tracker(capacity: usize) -> (ErrorTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tracker = ErrorTracker::new(capacity, clock.clone(), Arc::new(NoTrace));
        (tracker, clock)
    }

    fn error_at(message: &str, function: &str) -> ErrorInput {
        ErrorInput::new(ErrorKind::Error, message)
            .with_stack(format!("Error: {}\n    at {} (./src/App.js:1:1)", message, function))
    }

    #[test]
    fn test_least_recently_seen_policy() {
        let (t, clock) = tracker(10);
        let a = t.capture(&error_at("a", "f"), &CaptureContext::default());
        clock.advance_ms(10);
        let b = t.capture(&error_at("b", "f"), &CaptureContext::default());

        let records: VecDeque<ErrorRecord> = VecDeque::from(vec![a, b]);
        assert_eq!(least_recently_seen(&records), 0);

        let mut reversed = records.clone();
        reversed[0].last_occurrence = reversed[1].last_occurrence + chrono::Duration::seconds(1);
        assert_eq!(least_recently_seen(&reversed), 1);
    }

    #[test]
    fn test_capture_keeps_context() {
        let (t, _) = tracker(10);
        let record = t.capture(
            &error_at("boom", "handler"),
            &CaptureContext::default().with("route", "/settings"),
        );
        assert_eq!(record.context.get("route"), Some(&serde_json::json!("/settings")));
    }

    #[test]
    fn test_stats() {
        let (t, clock) = tracker(10);
        let render = ErrorInput::new(ErrorKind::TypeError, "undefined prop")
            .with_stack("    at Profile.render (./src/Profile.js:4:2)");
        t.capture(&render, &CaptureContext::default());
        clock.advance_ms(1);
        t.capture(&render, &CaptureContext::default());
        t.capture(&error_at("network down", "load"), &CaptureContext::default());

        let stats = t.stats();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.total_occurrences, 3);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::Medium), Some(&1));
        assert_eq!(stats.top_components, vec![("Profile".to_string(), 2)]);
    }

    #[test]
    fn test_capture_error_without_trace() {
        let (t, _) = tracker(10);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let record = t.capture_error(&io);
        assert_eq!(record.message, "disk full");
        assert!(record.frames.is_empty());
        assert_eq!(record.component_name, None);
    }
}
