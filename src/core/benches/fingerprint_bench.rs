//! Benchmarks for stack normalization and error fingerprinting.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use devlens_core::clock::ManualClock;
use devlens_core::errors::{CaptureContext, ErrorInput, ErrorKind, ErrorTracker, Fingerprint};
use devlens_core::stack::{self, NoTrace};
use std::sync::Arc;

const V8_TRACE: &str = "TypeError: Cannot read properties of undefined (reading 'id')
    at Profile.render (webpack:///./src/Profile.js?a1b2:14:22)
    at App.render (./src/App.js:8:3)
    at renderWithHooks (./node_modules/react-dom/cjs/react-dom.development.js:14985:18)
    at mountIndeterminateComponent (./node_modules/react-dom/cjs/react-dom.development.js:17811:13)
    at __webpack_require__.Object.beginWork (webpack:///webpack/bootstrap:19049:16)";

const GECKO_TRACE: &str = "render@http://localhost:3000/src/Profile.js:14:22
App@http://localhost:3000/src/App.js:8:3
renderWithHooks@http://localhost:3000/node_modules/react-dom/index.js:14985:18";

fn synthetic_trace(depth: usize) -> String {
    (0..depth).map(|i| format!("    at Component{i}.render (./src/components/Component{i}.js:{i}:1)")).collect::<Vec<_>>().join("\n")
}

fn bench_stack_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_parse");
    group.bench_function("v8", |b| { b.iter(|| black_box(stack::parse(black_box(V8_TRACE)))); });
    group.bench_function("gecko", |b| { b.iter(|| black_box(stack::parse(black_box(GECKO_TRACE)))); });
    for depth in [10, 50, 200] {
        let trace = synthetic_trace(depth);
        group.bench_with_input(BenchmarkId::new("synthetic", depth), &trace, |b, t| { b.iter(|| black_box(stack::parse(t))); });
    }
    group.finish();
}

fn bench_fingerprint_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_digest");
    let frames = stack::parse(V8_TRACE);
    let fingerprint = Fingerprint::new("Cannot read properties of undefined", Some("Profile"), &frames);
    group.bench_function("build", |b| { b.iter(|| black_box(Fingerprint::new("Cannot read properties of undefined", Some("Profile"), &frames))); });
    group.bench_function("digest", |b| { b.iter(|| black_box(fingerprint.digest())); });
    group.finish();
}

fn bench_error_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_capture");
    let input = ErrorInput::new(ErrorKind::TypeError, "Cannot read properties of undefined").with_stack(V8_TRACE);
    let context = CaptureContext::default();

    group.bench_function("merge_existing", |b| {
        let tracker = ErrorTracker::new(1_000, Arc::new(ManualClock::default()), Arc::new(NoTrace));
        tracker.capture(&input, &context);
        b.iter(|| black_box(tracker.capture(&input, &context)));
    });

    for distinct in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("distinct_fingerprints", distinct), &distinct, |b, &count| {
            let tracker = ErrorTracker::new(count, Arc::new(ManualClock::default()), Arc::new(NoTrace));
            let inputs: Vec<_> = (0..count).map(|i| ErrorInput::new(ErrorKind::Error, format!("failure {i}")).with_stack(V8_TRACE)).collect();
            let mut next = 0;
            b.iter(|| { next = (next + 1) % count; black_box(tracker.capture(&inputs[next], &context)); });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stack_parse, bench_fingerprint_digest, bench_error_capture);
criterion_main!(benches);
