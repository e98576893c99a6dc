//! Eviction policies for [`BoundedStore`](super::BoundedStore).

use std::collections::VecDeque;

/// Chooses which record to drop once a store exceeds its capacity.
///
/// `records` is in insertion order, oldest first. The returned index must be
/// within bounds; out-of-range answers are clamped to the newest record.
pub trait EvictionPolicy<T>: Send + Sync {
    fn select_victim(&self, records: &VecDeque<T>) -> usize;
}

/// Strict FIFO by insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl<T> EvictionPolicy<T> for Fifo {
    fn select_victim(&self, _records: &VecDeque<T>) -> usize {
        0
    }
}

impl<T, F> EvictionPolicy<T> for F
where
    F: Fn(&VecDeque<T>) -> usize + Send + Sync,
{
    fn select_victim(&self, records: &VecDeque<T>) -> usize {
        self(records)
    }
}
