//! State Change Tracker.
//!
//! Every tracked transition is diffed with [`diff`] and appended to a FIFO
//! store. Named contexts are coalesced: changes to the same context inside
//! the debounce window rewrite the pending record instead of adding another.

pub mod diff;

pub use diff::{diff, StateDiff, ValueChange};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::store::{BoundedStore, Record, RecordId, Subscription};
use crate::telemetry::metrics::STATE_CHANGES_TOTAL;

/// Default coalescing window for context changes.
pub const DEFAULT_CONTEXT_DEBOUNCE_MS: i64 = 100;

/// Where a state transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    Redux,
    Context,
    UseState,
    Custom,
}

impl ChangeType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Redux => "redux",
            Self::Context => "context",
            Self::UseState => "useState",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    pub prev_state: Option<Value>,
    pub next_state: Option<Value>,
    pub diff: StateDiff,
}

impl Record for StateChange {
    fn id(&self) -> RecordId {
        self.id
    }
}

/// Read filter for [`StateTracker::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateFilter {
    pub change_type: Option<ChangeType>,
    pub component_name: Option<String>,
    /// Drop records whose diff is empty.
    pub changed_only: bool,
}

impl StateFilter {
    pub fn change_type(change_type: ChangeType) -> Self {
        Self {
            change_type: Some(change_type),
            ..Self::default()
        }
    }

    pub fn component(name: impl Into<String>) -> Self {
        Self {
            component_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn accepts(&self, change: &StateChange) -> bool {
        self.change_type.map_or(true, |t| change.change_type == t)
            && self
                .component_name
                .as_ref()
                .map_or(true, |c| change.component_name.as_ref() == Some(c))
            && (!self.changed_only || !change.diff.is_empty())
    }
}

/// Most recent change of a named context, kept while its window is open.
struct PendingContext {
    record: RecordId,
    last_change: DateTime<Utc>,
}

/// Records state transitions from reducer stores, component state, named
/// contexts and arbitrary snapshots.
pub struct StateTracker {
    store: BoundedStore<StateChange>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    contexts: Mutex<HashMap<String, PendingContext>>,
    snapshots: Mutex<HashMap<String, Value>>,
}

impl StateTracker {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: BoundedStore::new("state", capacity),
            clock,
            debounce: Duration::milliseconds(DEFAULT_CONTEXT_DEBOUNCE_MS),
            contexts: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_context_debounce(mut self, window: std::time::Duration) -> Self {
        self.debounce = Duration::from_std(window)
            .unwrap_or_else(|_| Duration::milliseconds(DEFAULT_CONTEXT_DEBOUNCE_MS));
        self
    }

    /// Diff `prev` against `next` and record the transition.
    pub fn track_change(
        &self,
        change_type: ChangeType,
        component_name: Option<&str>,
        action: Option<Value>,
        prev: Option<Value>,
        next: Option<Value>,
    ) -> StateChange {
        let change = StateChange {
            id: RecordId::new(),
            timestamp: self.clock.now(),
            change_type,
            component_name: component_name.map(str::to_string),
            action,
            diff: diff(prev.as_ref(), next.as_ref()),
            prev_state: prev,
            next_state: next,
        };

        counter!(STATE_CHANGES_TOTAL, "type" => change_type.as_str()).increment(1);
        debug!(
            change_type = %change.change_type,
            component = ?change.component_name,
            changed_keys = change.diff.changed_keys(),
            "state change tracked"
        );

        self.store.append(change.clone());
        change
    }

    /// Record a named context change, coalescing with the previous change of
    /// the same context when it happened within the debounce window. The
    /// window slides: every coalesced change restarts it.
    pub fn track_context(&self, name: &str, prev: Option<Value>, next: Option<Value>) -> StateChange {
        let now = self.clock.now();
        let open = {
            let mut contexts = self.contexts.lock();
            // Closed windows never coalesce again.
            contexts.retain(|_, pending| now - pending.last_change < self.debounce);
            contexts.get(name).map(|pending| pending.record)
        };

        if let Some(record) = open {
            let coalesced = self.store.update(record, |change| {
                change.diff = diff(change.prev_state.as_ref(), next.as_ref());
                change.next_state = next.clone();
            });
            if let Some(change) = coalesced {
                if let Some(pending) = self.contexts.lock().get_mut(name) {
                    pending.last_change = now;
                }
                debug!(context = name, "context change coalesced");
                return change;
            }
        }

        let change = self.track_change(ChangeType::Context, Some(name), None, prev, next);
        self.contexts.lock().insert(
            name.to_string(),
            PendingContext {
                record: change.id,
                last_change: now,
            },
        );
        change
    }

    /// Component-local state setter.
    pub fn track_use_state(&self, component: &str, prev: Option<Value>, next: Option<Value>) -> StateChange {
        self.track_change(ChangeType::UseState, Some(component), None, prev, next)
    }

    /// Reducer-store middleware: read the state, run `next`, read it again
    /// and record the transition with `action`. Returns what `next` returned.
    pub fn dispatch<S, A, R>(&self, action: &A, get_state: impl Fn() -> S, next: impl FnOnce(&A) -> R) -> R
    where
        S: Serialize,
        A: Serialize,
    {
        let prev = to_json(&get_state());
        let result = next(action);
        let current = to_json(&get_state());
        self.track_change(ChangeType::Redux, None, to_json(action), prev, current);
        result
    }

    /// Record `state` under `name`, diffed against the previous snapshot of
    /// the same name. The first snapshot has an empty diff.
    pub fn track_snapshot(&self, name: &str, state: &impl Serialize) -> StateChange {
        let next = to_json(state);
        let prev = match &next {
            Some(value) => self.snapshots.lock().insert(name.to_string(), value.clone()),
            None => self.snapshots.lock().get(name).cloned(),
        };
        self.track_change(ChangeType::Custom, Some(name), None, prev, next)
    }

    /// Newest-first changes accepted by `filter`.
    pub fn query(&self, filter: &StateFilter) -> Vec<StateChange> {
        self.store.query(|c| filter.accepts(c))
    }

    /// Newest-first changes of one component or context.
    pub fn history(&self, component: &str) -> Vec<StateChange> {
        self.store
            .query(|c| c.component_name.as_deref() == Some(component))
    }

    pub fn get(&self, id: RecordId) -> Option<StateChange> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn subscribe(&self, callback: impl Fn(&StateChange) + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(callback)
    }

    /// Drop records, open context windows and remembered snapshots.
    pub fn clear(&self) {
        self.store.clear();
        self.contexts.lock().clear();
        self.snapshots.lock().clear();
    }
}

fn to_json(value: &impl Serialize) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "state snapshot not serializable");
            None
        }
    }
}

impl fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTracker")
            .field("records", &self.store.len())
            .field("debounce_ms", &self.debounce.num_milliseconds())
            .finish()
    }
}
