//! Unsubscribe handles.

use parking_lot::Mutex;

type Cancel = Box<dyn FnOnce() + Send>;

/// Handle returned by every `subscribe`/`on_*` operation.
///
/// `unsubscribe` may be called any number of times; only the first call has an
/// effect. Dropping the handle leaves the callback registered.
pub struct Subscription {
    cancel: Mutex<Option<Cancel>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A handle that is already inert, for hosts where nothing was registered.
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
