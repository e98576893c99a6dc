//! Metric names and descriptions.
//!
//! The engines record through the `metrics` facade only. Installing a
//! recorder (Prometheus, statsd, ...) is up to the host; without one every
//! call is a no-op.

use metrics::{describe_counter, describe_histogram, Unit};
use std::sync::Once;

pub const ERRORS_CAPTURED_TOTAL: &str = "devlens_errors_captured_total";
pub const STORE_EVICTIONS_TOTAL: &str = "devlens_store_evictions_total";
pub const REQUESTS_TOTAL: &str = "devlens_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "devlens_request_duration_seconds";
pub const STATE_CHANGES_TOTAL: &str = "devlens_state_changes_total";
pub const INTERNAL_ERRORS_TOTAL: &str = "devlens_internal_errors_total";

static DESCRIBED: Once = Once::new();

/// Register descriptions with whatever recorder is installed. Call after the
/// host installs its recorder; repeat calls are ignored.
pub fn describe_metrics() {
    DESCRIBED.call_once(|| {
        describe_counter!(
            ERRORS_CAPTURED_TOTAL,
            "Errors captured, by severity and whether they merged into an existing record"
        );
        describe_counter!(
            STORE_EVICTIONS_TOTAL,
            "Records dropped because a store reached capacity"
        );
        describe_counter!(REQUESTS_TOTAL, "Tracked requests that reached a terminal state");
        describe_histogram!(
            REQUEST_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of tracked requests from interception to settlement"
        );
        describe_counter!(STATE_CHANGES_TOTAL, "State transitions recorded, by source");
        describe_counter!(
            INTERNAL_ERRORS_TOTAL,
            "Errors raised by the instrumentation itself, by error code"
        );
    });
}
