//! `tracing` layer that mirrors host events into a [`DebugLog`].
//!
//! Stack it on the host's subscriber registry and every `tracing` event the
//! host emits becomes a `Console` entry, subject to the log's write gate.
//! Events emitted by this crate are skipped so store diagnostics cannot
//! feed back into the log.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::{DebugLog, LogCategory, LogLevel};

const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Captures `tracing` events as console entries.
#[derive(Debug, Clone)]
pub struct DebugLogLayer {
    log: Weak<DebugLog>,
}

impl DebugLogLayer {
    /// The layer does not keep the log alive; once it is dropped, events are
    /// ignored.
    pub fn new(log: &Arc<DebugLog>) -> Self {
        Self {
            log: Arc::downgrade(log),
        }
    }
}

impl<S> Layer<S> for DebugLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(OWN_TARGET) {
            return;
        }
        let Some(log) = self.log.upgrade() else {
            return;
        };
        let level = LogLevel::from(*metadata.level());
        if !log.is_enabled(level, LogCategory::Console) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        visitor
            .fields
            .insert("target".to_string(), Value::String(metadata.target().to_string()));

        log.log(
            level,
            LogCategory::Console,
            visitor.message.unwrap_or_default(),
            Some(Value::Object(visitor.fields)),
        );
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl EventVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }
}
