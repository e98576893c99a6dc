#![allow(clippy::result_large_err)]
//! # devlens core
//!
//! In-process instrumentation for a running application, feeding a debugging
//! overlay and an analysis collaborator.
//!
//! ## Architecture
//!
//! - **Store**: Bounded, subscribable event buffer shared by every engine
//! - **Stack**: Stack trace normalizer for V8, Gecko and Rust backtraces
//! - **Errors**: Error fingerprinting and deduplication with severity classification
//! - **Network**: Request lifecycle tracking over interceptable fetch/XHR primitives
//! - **State**: State change tracking with shallow structural diffs
//! - **Logs**: Write-gated debug log and a `tracing` capture layer
//! - **Telemetry**: Subscriber setup, redaction and metric descriptions
//!
//! Engines are plain values. [`Instrumentation`] wires one of each together;
//! nothing in this crate is a process-wide singleton.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod errors;
pub mod logs;
pub mod network;
pub mod stack;
pub mod state;
pub mod store;
pub mod telemetry;

pub use context::{Instrumentation, InstrumentationSnapshot};
pub use error::{ErrorCode, ErrorContext, LensError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::InstrumentationConfig;
    pub use crate::context::{Instrumentation, InstrumentationSnapshot};
    pub use crate::error::{ErrorCode, ErrorContext, LensError, Result};
    pub use crate::errors::{
        CaptureContext, ErrorFilter, ErrorInput, ErrorKind, ErrorRecord, ErrorStats,
        ErrorTracker, GlobalHooks, PanicHooks, Severity,
    };
    pub use crate::logs::{DebugLog, DebugLogLayer, LogCategory, LogEntry, LogFilter, LogLevel};
    pub use crate::network::{
        Fetch, FetchError, FetchRequest, FetchResponse, HostPrimitives, NetworkHost,
        NetworkRequest, NetworkStats, NetworkTracker, RequestFilter, RequestState,
        ReqwestFetch, Xhr, XhrEvent, XhrFactory,
    };
    pub use crate::stack::{StackFrame, TraceSource};
    pub use crate::state::{ChangeType, StateChange, StateDiff, StateFilter, StateTracker};
    pub use crate::store::{BoundedStore, Record, RecordId, Subscription, Upsert};
}
