//! Application-level instrumentation context.
//!
//! One [`Instrumentation`] owns an instance of every engine. Hosts build it
//! once at startup and hand references to whatever needs them; tests build a
//! fresh one per case.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::InstrumentationConfig;
use crate::errors::{ErrorStats, ErrorTracker, GlobalHooks, PanicHooks};
use crate::logs::DebugLog;
use crate::network::{NetworkHost, NetworkStats, NetworkTracker};
use crate::stack::{BacktraceSource, NoTrace, TraceSource};
use crate::state::StateTracker;
use crate::telemetry::SensitiveFieldRedactor;

/// Read-only summary handed to analysis collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationSnapshot {
    pub errors: ErrorStats,
    pub network: NetworkStats,
    pub state_changes: usize,
    pub log_entries: usize,
}

/// Every engine, wired to one clock and trace source.
pub struct Instrumentation {
    config: InstrumentationConfig,
    clock: Arc<dyn Clock>,
    errors: Arc<ErrorTracker>,
    network: NetworkTracker,
    state: StateTracker,
    logs: Arc<DebugLog>,
}

impl Instrumentation {
    pub fn new(config: &InstrumentationConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Build against an explicit clock, e.g. a `ManualClock` in tests.
    pub fn with_clock(config: &InstrumentationConfig, clock: Arc<dyn Clock>) -> Self {
        let traces: Arc<dyn TraceSource> = if config.errors.capture_traces {
            Arc::new(BacktraceSource)
        } else {
            Arc::new(NoTrace)
        };
        Self::with_parts(config, clock, traces)
    }

    /// Build against an explicit clock and trace source.
    pub fn with_parts(
        config: &InstrumentationConfig,
        clock: Arc<dyn Clock>,
        traces: Arc<dyn TraceSource>,
    ) -> Self {
        let errors = Arc::new(ErrorTracker::new(
            config.errors.capacity,
            Arc::clone(&clock),
            Arc::clone(&traces),
        ));
        let redactor = SensitiveFieldRedactor::new(&config.telemetry.logging.redaction);
        let network = NetworkTracker::new(config.network.capacity, Arc::clone(&clock))
            .with_redactor(redactor.clone())
            .with_body_capture(config.network.capture_bodies);
        let state = StateTracker::new(config.state.capacity, Arc::clone(&clock))
            .with_context_debounce(config.state.context_debounce());
        let logs = DebugLog::new(config.logs.capacity, Arc::clone(&clock), traces).with_redactor(redactor);
        logs.set_levels(config.logs.levels.iter().copied());
        logs.set_categories(config.logs.categories.iter().copied());

        Self {
            config: config.clone(),
            clock,
            errors,
            network,
            state,
            logs: Arc::new(logs),
        }
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn errors(&self) -> &Arc<ErrorTracker> {
        &self.errors
    }

    pub fn network(&self) -> &NetworkTracker {
        &self.network
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    pub fn logs(&self) -> &Arc<DebugLog> {
        &self.logs
    }

    /// Wrap the host's request primitives.
    pub fn install_network(&self, host: Arc<dyn NetworkHost>) {
        self.network.install(host);
    }

    /// Route the host's uncaught failures into the error tracker. A host
    /// without hooks is logged and reported as `false`.
    pub fn install_error_hooks(&self, hooks: Arc<dyn GlobalHooks>) -> bool {
        match self.errors.install(hooks) {
            Ok(()) => true,
            Err(err) => {
                err.log();
                false
            }
        }
    }

    /// Install the panic hook when the configuration asks for it.
    pub fn install_panic_hook(&self) -> bool {
        if !self.config.errors.install_panic_hook {
            return false;
        }
        self.install_error_hooks(Arc::new(PanicHooks::new()))
    }

    /// Restore every interception point. Records stay until cleared.
    pub fn teardown(&self) {
        self.errors.teardown();
        self.network.teardown();
        info!("instrumentation torn down");
    }

    pub fn clear_all(&self) {
        self.errors.clear();
        self.network.clear();
        self.state.clear();
        self.logs.clear();
    }

    pub fn snapshot(&self) -> InstrumentationSnapshot {
        InstrumentationSnapshot {
            errors: self.errors.stats(),
            network: self.network.stats(),
            state_changes: self.state.len(),
            log_entries: self.logs.len(),
        }
    }
}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        if self.errors.is_installed() || self.network.is_installed() {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("errors", &self.errors)
            .field("network", &self.network)
            .field("state", &self.state)
            .field("logs", &self.logs)
            .finish()
    }
}
