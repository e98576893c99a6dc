//! Integration tests for error fingerprinting and deduplication.
//!
//! Tests cover:
//! - Deduplication on (message, component, frame sequence)
//! - Severity classification and merge behavior
//! - Resolution, filtering and ordering
//! - Concurrent captures of one fingerprint
//! - Least-recently-seen eviction
//! - Global hook installation and teardown
//! - Stack normalization across trace formats

use devlens_core::clock::ManualClock;
use devlens_core::errors::{
    CaptureContext, ErrorFilter, ErrorInput, ErrorKind, ErrorTracker, GlobalHooks, HookEvent,
    HookHandler, NoHooks, Severity,
};
use devlens_core::stack::{self, FixedTrace, NoTrace};
use devlens_core::store::RecordId;
use devlens_core::ErrorCode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

const APP_TRACE: &str = "TypeError: Cannot read properties of undefined (reading 'name')
    at Profile.render (webpack:///./src/Profile.js?a1b2:14:22)
    at App.render (./src/App.js:8:3)
    at renderWithHooks (./node_modules/react-dom/cjs/react-dom.development.js:14985:18)";

fn tracker(capacity: usize) -> (Arc<ErrorTracker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let tracker = Arc::new(ErrorTracker::new(capacity, clock.clone(), Arc::new(NoTrace)));
    (tracker, clock)
}

fn type_error(message: &str, trace: &str) -> ErrorInput {
    ErrorInput::new(ErrorKind::TypeError, message).with_stack(trace)
}

/// Host stand-in that records the installed handler and lets tests fire it.
#[derive(Default)]
struct FakeHooks {
    handler: Mutex<Option<HookHandler>>,
    installs: AtomicUsize,
    restores: AtomicUsize,
}

impl FakeHooks {
    fn fire(&self, event: HookEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl GlobalHooks for FakeHooks {
    fn install(&self, handler: HookHandler) -> bool {
        self.installs.fetch_add(1, Ordering::SeqCst);
        *self.handler.lock() = Some(handler);
        true
    }

    fn restore(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
        self.handler.lock().take();
    }
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn test_identical_errors_merge() {
    let (tracker, clock) = tracker(10);
    let first = tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
    clock.advance_ms(500);
    let second = tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());

    assert_eq!(tracker.len(), 1);
    assert_eq!(first.id, second.id);
    assert_eq!(second.frequency, 2);
    assert_eq!((second.last_occurrence - second.first_occurrence).num_milliseconds(), 500);
    assert_eq!(second.component_name.as_deref(), Some("Profile"));
}

#[test]
fn test_line_numbers_do_not_split_fingerprints() {
    let (tracker, _) = tracker(10);
    let moved = APP_TRACE.replace(":14:22", ":90:1");
    tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
    let merged = tracker.capture(&type_error("boom", &moved), &CaptureContext::default());

    assert_eq!(tracker.len(), 1);
    assert_eq!(merged.frequency, 2);
}

#[test]
fn test_distinct_frames_produce_distinct_records() {
    let (tracker, _) = tracker(10);
    let other = "    at Settings.render (./src/Settings.js:3:1)";
    tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
    tracker.capture(&type_error("boom", other), &CaptureContext::default());

    assert_eq!(tracker.len(), 2);
}

#[test]
fn test_distinct_messages_produce_distinct_records() {
    let (tracker, _) = tracker(10);
    tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
    tracker.capture(&type_error("bang", APP_TRACE), &CaptureContext::default());

    assert_eq!(tracker.len(), 2);
    assert_eq!(tracker.stats().total_occurrences, 2);
}

#[test]
fn test_errors_without_trace_dedupe_on_message() {
    let (tracker, _) = tracker(10);
    let input = ErrorInput::new(ErrorKind::Error, "config missing");
    tracker.capture(&input, &CaptureContext::default());
    let merged = tracker.capture(&input, &CaptureContext::default());

    assert!(merged.frames.is_empty());
    assert_eq!(merged.component_name, None);
    assert_eq!(merged.frequency, 2);
}

#[test]
fn test_merge_keeps_original_severity_and_resolution() {
    let (tracker, _) = tracker(10);
    let input = ErrorInput::new(ErrorKind::Error, "fetch failed");
    let first = tracker.capture(&input, &CaptureContext::default());
    assert_eq!(first.severity, Severity::Medium);

    tracker.resolve(first.id).unwrap();
    let merged = tracker.capture(&input, &CaptureContext::unhandled_rejection());

    assert_eq!(merged.severity, Severity::Medium);
    assert!(merged.resolved);
    assert_eq!(merged.frequency, 2);
}

// ============================================================================
// Severity
// ============================================================================

#[test]
fn test_severity_rules() {
    let (tracker, _) = tracker(10);
    let plain = CaptureContext::default();

    let rejected = tracker.capture(
        &ErrorInput::new(ErrorKind::Error, "promise rejected"),
        &CaptureContext::unhandled_rejection(),
    );
    let reference = tracker.capture(&ErrorInput::new(ErrorKind::ReferenceError, "x is not defined"), &plain);
    let network = tracker.capture(&ErrorInput::new(ErrorKind::Error, "Network request failed"), &plain);
    let other = tracker.capture(&ErrorInput::new(ErrorKind::SyntaxError, "unexpected token"), &plain);

    assert_eq!(rejected.severity, Severity::Critical);
    assert_eq!(reference.severity, Severity::High);
    assert_eq!(network.severity, Severity::Medium);
    assert_eq!(other.severity, Severity::Low);
}

// ============================================================================
// Reads and mutations
// ============================================================================

#[test]
fn test_resolve_unknown_id_is_not_found() {
    let (tracker, _) = tracker(10);
    let err = tracker.resolve(RecordId::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RecordNotFound);
}

#[test]
fn test_resolve_does_not_fire_capture_callbacks() {
    let (tracker, _) = tracker(10);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = tracker.on_capture(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let record = tracker.capture(&ErrorInput::new(ErrorKind::Error, "boom"), &CaptureContext::default());
    let resolved = tracker.resolve(record.id).unwrap();

    assert!(resolved.resolved);
    assert!(tracker.get(record.id).unwrap().resolved);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_list_filters_and_sorts_by_last_occurrence() {
    let (tracker, clock) = tracker(10);
    let plain = CaptureContext::default();

    let a = tracker.capture(&ErrorInput::new(ErrorKind::TypeError, "a"), &plain);
    clock.advance_ms(10);
    let b = tracker.capture(&ErrorInput::new(ErrorKind::RangeError, "b"), &plain);
    clock.advance_ms(10);
    let c = tracker.capture(&ErrorInput::new(ErrorKind::TypeError, "c"), &plain);
    clock.advance_ms(10);
    tracker.capture(&ErrorInput::new(ErrorKind::TypeError, "a"), &plain);

    let all: Vec<_> = tracker.list(&ErrorFilter::default()).into_iter().map(|r| r.id).collect();
    assert_eq!(all, vec![a.id, c.id, b.id]);

    let high: Vec<_> = tracker
        .list(&ErrorFilter::severity(Severity::High))
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(high, vec![a.id, c.id]);

    tracker.resolve(c.id).unwrap();
    let open: Vec<_> = tracker.list(&ErrorFilter::unresolved()).into_iter().map(|r| r.id).collect();
    assert_eq!(open, vec![a.id, b.id]);
}

#[test]
fn test_filter_by_component() {
    let (tracker, _) = tracker(10);
    tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
    tracker.capture(&ErrorInput::new(ErrorKind::Error, "plain"), &CaptureContext::default());

    let profile = tracker.list(&ErrorFilter::component("Profile"));
    assert_eq!(profile.len(), 1);
    assert_eq!(profile[0].message, "boom");
}

#[test]
fn test_stats_aggregate_records() {
    let (tracker, _) = tracker(10);
    for _ in 0..3 {
        tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
    }
    tracker.capture(&ErrorInput::new(ErrorKind::Error, "other"), &CaptureContext::default());

    let stats = tracker.stats();
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.total_occurrences, 4);
    assert_eq!(stats.unresolved, 2);
    assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
    assert_eq!(stats.top_components, vec![("Profile".to_string(), 3)]);
}

#[test]
fn test_capture_error_uses_trace_source() {
    let clock = Arc::new(ManualClock::default());
    let traces = Arc::new(FixedTrace("    at Cart.render (./src/Cart.js:4:2)".to_string()));
    let tracker = ErrorTracker::new(10, clock, traces);

    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
    let record = tracker.capture_error(&io);

    assert_eq!(record.message, "disk full");
    assert_eq!(record.kind, ErrorKind::Error);
    assert_eq!(record.component_name.as_deref(), Some("Cart"));
}

#[test]
fn test_concurrent_captures_merge_into_one_record() {
    for _ in 0..50 {
        let (tracker, _) = tracker(10);
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    tracker.capture(&type_error("boom", APP_TRACE), &CaptureContext::default());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = tracker.list(&ErrorFilter::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frequency, 8);
    }
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn test_evicts_least_recently_seen() {
    let (tracker, clock) = tracker(2);
    let plain = CaptureContext::default();

    let old = tracker.capture(&ErrorInput::new(ErrorKind::Error, "old"), &plain);
    clock.advance_ms(10);
    let newer = tracker.capture(&ErrorInput::new(ErrorKind::Error, "newer"), &plain);
    clock.advance_ms(10);
    tracker.capture(&ErrorInput::new(ErrorKind::Error, "old"), &plain);
    clock.advance_ms(10);
    tracker.capture(&ErrorInput::new(ErrorKind::Error, "newest"), &plain);

    assert_eq!(tracker.len(), 2);
    assert!(tracker.get(old.id).is_some());
    assert!(tracker.get(newer.id).is_none());
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn test_hooks_route_uncaught_failures() {
    let (tracker, _) = tracker(10);
    let hooks = Arc::new(FakeHooks::default());
    tracker.install(hooks.clone()).unwrap();
    tracker.install(hooks.clone()).unwrap();
    assert_eq!(hooks.installs.load(Ordering::SeqCst), 1);

    hooks.fire(HookEvent::Uncaught(ErrorInput::new(ErrorKind::RangeError, "overflow")));
    hooks.fire(HookEvent::UnhandledRejection(ErrorInput::new(ErrorKind::Error, "rejected")));

    let severities: Vec<_> = tracker
        .list(&ErrorFilter::default())
        .into_iter()
        .map(|r| r.severity)
        .collect();
    assert_eq!(tracker.len(), 2);
    assert!(severities.contains(&Severity::Critical));
    assert!(severities.contains(&Severity::Low));
}

#[test]
fn test_teardown_restores_hooks_and_keeps_records() {
    let (tracker, _) = tracker(10);
    let hooks = Arc::new(FakeHooks::default());
    tracker.install(hooks.clone()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = tracker.on_capture(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    hooks.fire(HookEvent::Uncaught(ErrorInput::new(ErrorKind::Error, "before")));
    tracker.teardown();
    tracker.teardown();
    hooks.fire(HookEvent::Uncaught(ErrorInput::new(ErrorKind::Error, "after")));
    tracker.capture(&ErrorInput::new(ErrorKind::Error, "manual"), &CaptureContext::default());

    assert_eq!(hooks.restores.load(Ordering::SeqCst), 1);
    assert!(!tracker.is_installed());
    assert_eq!(tracker.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_host_without_hooks_declines_install() {
    let (tracker, _) = tracker(10);
    let err = tracker.install(Arc::new(NoHooks)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::HookUnavailable);
    assert!(!tracker.is_installed());
}

// ============================================================================
// Stack normalization
// ============================================================================

#[test]
fn test_trace_formats_normalize_to_same_frames() {
    let v8 = "    at handleClick (webpack:///./src/App.js?abc:12:5)";
    let gecko = "handleClick@webpack:///./src/App.js:12:5";

    let a = stack::parse(v8);
    let b = stack::parse(gecko);
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].file_name, "./src/App.js");
    assert_eq!(a[0].file_name, b[0].file_name);
    assert_eq!(a[0].function_name, b[0].function_name);
    assert_eq!(a[0].line_number, Some(12));
}

#[test]
fn test_user_frames_skip_vendor_code() {
    let frames = stack::parse(APP_TRACE);
    assert_eq!(frames.len(), 3);

    let user = stack::user_frames(&frames);
    assert_eq!(user.len(), 2);
    assert!(user.iter().all(|f| !f.file_name.contains("node_modules")));
}

#[test]
fn test_garbage_trace_yields_no_frames() {
    assert!(stack::parse("not a stack trace\n\n???").is_empty());
}
