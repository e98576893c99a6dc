//! Benchmarks for the bounded event store.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use devlens_core::clock::ManualClock;
use devlens_core::state::StateTracker;
use devlens_core::store::{BoundedStore, Record, RecordId};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Event {
    id: RecordId,
    seq: u64,
}

impl Record for Event {
    fn id(&self) -> RecordId {
        self.id
    }
}

fn event(seq: u64) -> Event {
    Event { id: RecordId::new(), seq }
}

fn bench_store_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");
    group.throughput(Throughput::Elements(1));
    for cap in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(cap), &cap, |b, &capacity| {
            let store = BoundedStore::new("bench", capacity);
            let mut seq = 0;
            b.iter(|| { seq += 1; store.append(black_box(event(seq))); });
        });
    }
    group.finish();
}

fn bench_store_append_with_subscribers(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append_with_subscribers");
    for subs in [1, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(subs), &subs, |b, &count| {
            let store = BoundedStore::new("bench", 1_000);
            let _subs: Vec<_> = (0..count).map(|_| store.subscribe(|e: &Event| { black_box(e.seq); })).collect();
            let mut seq = 0;
            b.iter(|| { seq += 1; store.append(event(seq)); });
        });
    }
    group.finish();
}

fn bench_store_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_query");
    let store = BoundedStore::new("bench", 1_000);
    for seq in 0..1_000 { store.append(event(seq)); }
    group.bench_function("records", |b| { b.iter(|| black_box(store.records())); });
    group.bench_function("query_even", |b| { b.iter(|| black_box(store.query(|e| e.seq % 2 == 0))); });
    group.bench_function("find_oldest", |b| { b.iter(|| black_box(store.find(|e| e.seq == 0))); });
    group.finish();
}

fn bench_state_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_tracking");
    let tracker = StateTracker::new(1_000, Arc::new(ManualClock::default()));
    let prev = json!({"items": ["a", "b"], "total": 7, "user": {"name": "ada"}});
    let next = json!({"items": ["a", "b", "c"], "total": 9, "user": {"name": "ada"}});
    group.bench_function("use_state", |b| { b.iter(|| black_box(tracker.track_use_state("Cart", Some(prev.clone()), Some(next.clone())))); });
    group.bench_function("context_coalesced", |b| { b.iter(|| black_box(tracker.track_context("Theme", Some(prev.clone()), Some(next.clone())))); });
    group.finish();
}

criterion_group!(benches, bench_store_append, bench_store_append_with_subscribers, bench_store_query, bench_state_tracking);
criterion_main!(benches);
