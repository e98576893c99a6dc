//! Integration tests for the panic hook.
//!
//! Kept in their own binary: the panic hook is process-global, so nothing
//! else may run in parallel with these tests.
//!
//! Tests cover:
//! - Panics captured as `Panic` records
//! - Restoring the previous hook on teardown

use devlens_core::clock::ManualClock;
use devlens_core::errors::{ErrorFilter, ErrorKind, ErrorTracker, GlobalHooks, PanicHooks, Severity};
use devlens_core::stack::NoTrace;
use std::panic;
use std::sync::Arc;

#[test]
fn test_panic_hook_lifecycle() {
    let tracker = Arc::new(ErrorTracker::new(
        10,
        Arc::new(ManualClock::default()),
        Arc::new(NoTrace),
    ));
    let hooks = Arc::new(PanicHooks::new());

    tracker.install(hooks.clone()).unwrap();
    assert!(hooks.is_installed());

    for _ in 0..2 {
        let result = panic::catch_unwind(|| panic!("checkout total overflowed"));
        assert!(result.is_err());
    }

    let records = tracker.list(&ErrorFilter::default());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ErrorKind::Panic);
    assert_eq!(records[0].message, "checkout total overflowed");
    assert_eq!(records[0].frequency, 2);
    assert_eq!(records[0].severity, Severity::Low);

    tracker.teardown();
    assert!(!hooks.is_installed());

    let result = panic::catch_unwind(|| panic!("after teardown"));
    assert!(result.is_err());
    assert_eq!(tracker.len(), 1);

    // Restoring twice is harmless.
    hooks.restore();
}
