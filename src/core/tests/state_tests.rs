//! Integration tests for the state change tracker.
//!
//! Tests cover:
//! - Shallow diff semantics
//! - Reducer middleware, component state and snapshots
//! - Context coalescing inside the debounce window
//! - Filters, history and subscriptions

use devlens_core::clock::ManualClock;
use devlens_core::state::{diff, ChangeType, StateFilter, StateTracker};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn tracker() -> (StateTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let tracker = StateTracker::new(100, clock.clone()).with_context_debounce(Duration::from_millis(100));
    (tracker, clock)
}

// ============================================================================
// Diffs
// ============================================================================

#[test]
fn test_diff_groups() {
    let prev = json!({"count": 1, "user": {"name": "ada"}, "stale": true});
    let next = json!({"count": 2, "user": {"name": "ada"}, "fresh": [1]});
    let d = diff(Some(&prev), Some(&next));

    assert_eq!(
        serde_json::to_value(&d).unwrap(),
        json!({
            "added": {"fresh": [1]},
            "updated": {"count": {"from": 1, "to": 2}},
            "removed": {"stale": true}
        })
    );
    assert_eq!(d.changed_keys(), 3);
}

#[test]
fn test_nested_changes_are_not_recursed() {
    let prev = json!({"user": {"name": "ada", "age": 36}});
    let next = json!({"user": {"name": "ada", "age": 37}});
    let d = diff(Some(&prev), Some(&next));

    let updated = d.updated.unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated["user"].to, json!({"name": "ada", "age": 37}));
}

#[test]
fn test_arrays_diff_by_index_and_scalars_have_no_keys() {
    let d = diff(Some(&json!(["a", "b"])), Some(&json!(["a", "c", "d"])));
    assert_eq!(d.updated.as_ref().map(|u| u.len()), Some(1));
    assert_eq!(d.added.unwrap().get("2"), Some(&json!("d")));

    assert!(diff(Some(&json!(1)), Some(&json!(2))).is_empty());
}

// ============================================================================
// Tracking
// ============================================================================

#[derive(Serialize)]
struct Cart {
    items: Vec<&'static str>,
    total: u32,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "payload")]
enum CartAction {
    AddItem(&'static str),
}

#[test]
fn test_dispatch_records_reducer_transition() {
    let (tracker, _) = tracker();
    let cart = Mutex::new(Cart { items: vec![], total: 0 });

    let returned = tracker.dispatch(
        &CartAction::AddItem("apple"),
        || serde_json::to_value(&*cart.lock()).unwrap(),
        |action| {
            let CartAction::AddItem(item) = action;
            let mut cart = cart.lock();
            cart.items.push(*item);
            cart.total += 3;
            cart.items.len()
        },
    );
    assert_eq!(returned, 1);

    let changes = tracker.query(&StateFilter::change_type(ChangeType::Redux));
    assert_eq!(changes.len(), 1);
    let change = &changes[0];
    assert_eq!(change.action, Some(json!({"type": "AddItem", "payload": "apple"})));
    assert_eq!(change.prev_state, Some(json!({"items": [], "total": 0})));
    assert_eq!(change.diff.updated.as_ref().map(|u| u.len()), Some(2));
}

#[test]
fn test_use_state_without_prior_value() {
    let (tracker, _) = tracker();
    let change = tracker.track_use_state("SearchBox", None, Some(json!({"query": "rust"})));

    assert_eq!(change.change_type, ChangeType::UseState);
    assert_eq!(change.component_name.as_deref(), Some("SearchBox"));
    assert!(change.diff.is_empty());
}

#[test]
fn test_snapshots_diff_against_previous_snapshot() {
    let (tracker, _) = tracker();
    let first = tracker.track_snapshot("router", &json!({"path": "/"}));
    let second = tracker.track_snapshot("router", &json!({"path": "/cart"}));
    let other = tracker.track_snapshot("theme", &json!({"dark": true}));

    assert!(first.diff.is_empty());
    assert_eq!(second.prev_state, Some(json!({"path": "/"})));
    assert!(second.diff.updated.is_some());
    assert!(other.diff.is_empty());
}

// ============================================================================
// Context coalescing
// ============================================================================

#[test]
fn test_context_changes_coalesce_within_window() {
    let (tracker, clock) = tracker();

    let first = tracker.track_context("Theme", Some(json!({"mode": "light"})), Some(json!({"mode": "dark"})));
    clock.advance_ms(60);
    let second = tracker.track_context("Theme", Some(json!({"mode": "dark"})), Some(json!({"mode": "dim"})));
    clock.advance_ms(60);
    let third = tracker.track_context("Theme", Some(json!({"mode": "dim"})), Some(json!({"mode": "auto"})));

    assert_eq!(tracker.len(), 1);
    assert_eq!(first.id, second.id);
    assert_eq!(second.id, third.id);
    assert_eq!(third.prev_state, Some(json!({"mode": "light"})));
    assert_eq!(third.next_state, Some(json!({"mode": "auto"})));
    assert_eq!(
        third.diff.updated.unwrap()["mode"].to,
        json!("auto")
    );
}

#[test]
fn test_context_window_expires() {
    let (tracker, clock) = tracker();
    tracker.track_context("Auth", None, Some(json!({"user": null})));
    clock.advance_ms(150);
    tracker.track_context("Auth", Some(json!({"user": null})), Some(json!({"user": "ada"})));

    assert_eq!(tracker.history("Auth").len(), 2);
}

#[test]
fn test_contexts_coalesce_independently() {
    let (tracker, _) = tracker();
    tracker.track_context("Theme", None, Some(json!({"mode": "dark"})));
    tracker.track_context("Locale", None, Some(json!({"lang": "en"})));
    tracker.track_context("Theme", None, Some(json!({"mode": "light"})));

    assert_eq!(tracker.len(), 2);
    assert_eq!(tracker.query(&StateFilter::change_type(ChangeType::Context)).len(), 2);
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_filters_and_history() {
    let (tracker, _) = tracker();
    tracker.track_use_state("Form", Some(json!({"a": 1})), Some(json!({"a": 1})));
    tracker.track_use_state("Form", Some(json!({"a": 1})), Some(json!({"a": 2})));
    tracker.track_use_state("Nav", Some(json!({"open": false})), Some(json!({"open": true})));

    assert_eq!(tracker.history("Form").len(), 2);
    let changed = tracker.query(&StateFilter {
        component_name: Some("Form".into()),
        changed_only: true,
        ..StateFilter::default()
    });
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].next_state, Some(json!({"a": 2})));

    let newest = &tracker.query(&StateFilter::default())[0];
    assert_eq!(newest.component_name.as_deref(), Some("Nav"));
}

#[test]
fn test_subscribers_and_clear() {
    let (tracker, _) = tracker();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = tracker.subscribe(move |c| sink.lock().push(c.change_type));

    tracker.track_use_state("Form", None, None);
    tracker.track_change(ChangeType::Custom, None, None, Some(json!(1)), Some(json!(2)));
    assert_eq!(*seen.lock(), vec![ChangeType::UseState, ChangeType::Custom]);

    tracker.track_snapshot("router", &json!({"path": "/"}));
    tracker.clear();
    assert!(tracker.is_empty());

    let fresh = tracker.track_snapshot("router", &json!({"path": "/cart"}));
    assert!(fresh.prev_state.is_none());
}

#[test]
fn test_change_serializes_type_field() {
    let (tracker, _) = tracker();
    let change = tracker.track_use_state("Form", None, None);
    let value = serde_json::to_value(&change).unwrap();

    assert_eq!(value["type"], json!("useState"));
    assert_eq!(value["componentName"], json!("Form"));
}
