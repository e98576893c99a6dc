//! Global uncaught-error hooks.
//!
//! The tracker never touches process-global state itself. A [`GlobalHooks`]
//! implementation installs the handler wherever the host surfaces uncaught
//! failures and puts the previous handler back on `restore`.

use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

use super::record::{ErrorInput, ErrorKind};

/// A failure the host did not handle.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// Uncaught exception (a panic, for Rust hosts).
    Uncaught(ErrorInput),
    /// Promise rejection nobody awaited.
    UnhandledRejection(ErrorInput),
}

/// Callback the tracker registers with the host.
pub type HookHandler = Arc<dyn Fn(HookEvent) + Send + Sync>;

/// Host-side installation point for uncaught-error handlers.
pub trait GlobalHooks: Send + Sync {
    /// Route uncaught failures to `handler`. Returns `false` when the host has
    /// no such hook, in which case nothing was installed.
    fn install(&self, handler: HookHandler) -> bool;

    /// Put back whatever was installed before `install`. No-op when nothing
    /// is installed.
    fn restore(&self);
}

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Funnels Rust panics into the tracker via `std::panic::set_hook`.
///
/// The previously installed hook keeps running after ours and is reinstated
/// by `restore`.
#[derive(Default)]
pub struct PanicHooks {
    previous: Mutex<Option<Arc<PanicHook>>>,
}

impl PanicHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self) -> bool {
        self.previous.lock().is_some()
    }
}

impl GlobalHooks for PanicHooks {
    fn install(&self, handler: HookHandler) -> bool {
        let mut previous = self.previous.lock();
        if previous.is_some() {
            return true;
        }

        let prior: Arc<PanicHook> = Arc::new(panic::take_hook());
        let chained = Arc::clone(&prior);
        panic::set_hook(Box::new(move |info| {
            let input = ErrorInput::new(ErrorKind::Panic, panic_message(info))
                .with_stack(Backtrace::force_capture().to_string());
            handler(HookEvent::Uncaught(input));
            chained(info);
        }));

        *previous = Some(prior);
        tracing::debug!("panic hook installed");
        true
    }

    fn restore(&self) {
        if let Some(prior) = self.previous.lock().take() {
            panic::set_hook(Box::new(move |info| prior(info)));
            tracing::debug!("panic hook restored");
        }
    }
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Hooks for hosts that surface nothing; `install` always declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl GlobalHooks for NoHooks {
    fn install(&self, _handler: HookHandler) -> bool {
        false
    }

    fn restore(&self) {}
}
