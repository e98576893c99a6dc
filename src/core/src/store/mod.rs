//! Bounded Event Store.
//!
//! The append/evict/filter/subscribe primitive every engine is built on:
//!
//! - Fixed capacity, chosen at construction (default 1000)
//! - Pluggable eviction via [`EvictionPolicy`]; [`Fifo`] by default
//! - Synchronous subscriber fan-out in subscription order, each callback isolated
//! - Records are inserted immediately; a notification raised while another
//!   fan-out is running is queued and delivered after it, in order
//!
//! Queries return records most-recent-first.

pub mod eviction;
pub mod subscription;

pub use eviction::{EvictionPolicy, Fifo};
pub use subscription::Subscription;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use metrics::counter;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::telemetry::metrics::STORE_EVICTIONS_TOTAL;

/// Default number of records a store retains.
pub const DEFAULT_CAPACITY: usize = 1000;

// =============================================================================
// Record identity
// =============================================================================

/// Opaque unique identifier of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Anything a [`BoundedStore`] can hold.
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> RecordId;
}

/// Subscriber callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Outcome of [`BoundedStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<T> {
    Merged(T),
    Inserted(T),
}

impl<T> Upsert<T> {
    pub fn record(&self) -> &T {
        match self {
            Self::Merged(record) | Self::Inserted(record) => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Self::Merged(record) | Self::Inserted(record) => record,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

struct Buffer<T> {
    records: VecDeque<T>,
    dispatching: bool,
    /// Notifications raised during a fan-out.
    deferred: VecDeque<T>,
}

pub(crate) struct SubscriberList<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A bounded, subscriber-notified record buffer.
pub struct BoundedStore<T: Record> {
    name: &'static str,
    capacity: usize,
    policy: Box<dyn EvictionPolicy<T>>,
    buffer: Mutex<Buffer<T>>,
    subscribers: Arc<Mutex<SubscriberList<T>>>,
}

impl<T: Record> BoundedStore<T> {
    /// Create a FIFO store with the given capacity. A zero capacity is clamped to one.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self::with_policy(name, capacity, Fifo)
    }

    /// Create a store that evicts according to `policy`.
    pub fn with_policy(
        name: &'static str,
        capacity: usize,
        policy: impl EvictionPolicy<T> + 'static,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            policy: Box::new(policy),
            buffer: Mutex::new(Buffer {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                dispatching: false,
                deferred: VecDeque::new(),
            }),
            subscribers: Arc::new(Mutex::new(SubscriberList {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record, evict past capacity, then notify subscribers.
    pub fn append(&self, record: T) {
        let mut buffer = self.buffer.lock();
        buffer.records.push_back(record.clone());
        self.evict(&mut buffer.records);
        self.dispatch(buffer, record);
    }

    /// Every record, most-recent-first.
    pub fn records(&self) -> Vec<T> {
        self.buffer.lock().records.iter().rev().cloned().collect()
    }

    /// Records matching `predicate`, most-recent-first.
    pub fn query(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.buffer
            .lock()
            .records
            .iter()
            .rev()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    /// First record (most-recent-first) matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.buffer
            .lock()
            .records
            .iter()
            .rev()
            .find(|r| predicate(r))
            .cloned()
    }

    pub fn get(&self, id: RecordId) -> Option<T> {
        self.find(|r| r.id() == id)
    }

    /// Mutate a record in place and notify subscribers with the updated copy.
    ///
    /// Returns `None` when the record is not (or no longer) stored. `mutate`
    /// runs under the store lock and must not call back into the store.
    pub fn update(&self, id: RecordId, mutate: impl FnOnce(&mut T)) -> Option<T> {
        self.update_if(id, |record| {
            mutate(record);
            true
        })
    }

    /// Like [`update`](Self::update), but `mutate` reports whether it changed
    /// anything. Subscribers are notified, and the record returned, only then.
    pub fn update_if(&self, id: RecordId, mutate: impl FnOnce(&mut T) -> bool) -> Option<T> {
        let mut buffer = self.buffer.lock();
        let record = buffer.records.iter_mut().find(|r| r.id() == id)?;
        if !mutate(record) {
            return None;
        }
        let updated = record.clone();
        self.dispatch(buffer, updated.clone());
        Some(updated)
    }

    /// Mutate a record in place without notifying subscribers.
    pub fn update_silent(&self, id: RecordId, mutate: impl FnOnce(&mut T)) -> Option<T> {
        let mut buffer = self.buffer.lock();
        let record = buffer.records.iter_mut().find(|r| r.id() == id)?;
        mutate(record);
        Some(record.clone())
    }

    /// Merge into the most recent record accepted by `matches`, or append
    /// `make_new()` when none is. Lookup and write happen under one lock, so
    /// concurrent upserts of the same key never produce two records.
    /// Subscribers are notified either way.
    pub fn upsert(
        &self,
        matches: impl Fn(&T) -> bool,
        mutate: impl FnOnce(&mut T),
        make_new: impl FnOnce() -> T,
    ) -> Upsert<T> {
        let mut buffer = self.buffer.lock();
        let outcome = match buffer.records.iter_mut().rev().find(|r| matches(r)) {
            Some(existing) => {
                mutate(existing);
                Upsert::Merged(existing.clone())
            }
            None => {
                let record = make_new();
                buffer.records.push_back(record.clone());
                self.evict(&mut buffer.records);
                Upsert::Inserted(record)
            }
        };
        self.dispatch(buffer, outcome.record().clone());
        outcome
    }

    /// Remove a record without notifying subscribers.
    pub fn remove(&self, id: RecordId) -> Option<T> {
        let mut buffer = self.buffer.lock();
        let index = buffer.records.iter().position(|r| r.id() == id)?;
        buffer.records.remove(index)
    }

    /// Drop every record. Subscribers stay registered.
    pub fn clear(&self) {
        let mut buffer = self.buffer.lock();
        buffer.records.clear();
        trace!(store = self.name, "store cleared");
    }

    /// Register a callback invoked after every append or update.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut list = self.subscribers.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, Arc::new(callback)));
            id
        };

        let list = Arc::downgrade(&self.subscribers);
        Subscription::new(move || {
            if let Some(list) = list.upgrade() {
                list.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }

    /// Deliver `record` to subscribers, or queue it when a fan-out is already
    /// running. Takes the held buffer lock and releases it around callbacks.
    fn dispatch<'a>(&'a self, mut buffer: MutexGuard<'a, Buffer<T>>, record: T) {
        if buffer.dispatching {
            buffer.deferred.push_back(record);
            return;
        }
        buffer.dispatching = true;

        let mut next = Some(record);
        while let Some(record) = next.take() {
            drop(buffer);
            self.fan_out(&record);
            buffer = self.buffer.lock();
            next = buffer.deferred.pop_front();
        }
        buffer.dispatching = false;
    }

    fn evict(&self, records: &mut VecDeque<T>) {
        while records.len() > self.capacity {
            let victim = self.policy.select_victim(records).min(records.len() - 1);
            if let Some(evicted) = records.remove(victim) {
                trace!(store = self.name, id = %evicted.id(), "evicted record");
                counter!(STORE_EVICTIONS_TOTAL, "store" => self.name).increment(1);
            }
        }
    }

    fn fan_out(&self, record: &T) {
        let callbacks: Vec<Callback<T>> = self
            .subscribers
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(record))).is_err() {
                warn!(store = self.name, id = %record.id(), "subscriber panicked; continuing");
            }
        }
    }
}

impl<T: Record> std::fmt::Debug for BoundedStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStore")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
