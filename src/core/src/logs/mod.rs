//! Debug Log.
//!
//! Free-form entries in a FIFO store. The enabled level-set and category-set
//! are checked when an entry is written; entries they exclude are never
//! stored, so widening the sets later does not bring them back.

pub mod layer;

pub use layer::DebugLogLayer;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::LensError;
use crate::stack::{self, StackFrame, TraceSource};
use crate::store::{BoundedStore, Record, RecordId, Subscription};
use crate::telemetry::SensitiveFieldRedactor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LensError::invalid_input(format!("unknown log level '{s}'")))
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::TRACE => Self::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Render,
    State,
    Network,
    Performance,
    Lifecycle,
    Error,
    Console,
    Custom,
}

impl LogCategory {
    pub const ALL: [LogCategory; 8] = [
        LogCategory::Render,
        LogCategory::State,
        LogCategory::Network,
        LogCategory::Performance,
        LogCategory::Lifecycle,
        LogCategory::Error,
        LogCategory::Console,
        LogCategory::Custom,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::State => "state",
            Self::Network => "network",
            Self::Performance => "performance",
            Self::Lifecycle => "lifecycle",
            Self::Error => "error",
            Self::Console => "console",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LensError::invalid_input(format!("unknown log category '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<StackFrame>>,
}

impl Record for LogEntry {
    fn id(&self) -> RecordId {
        self.id
    }
}

/// Read filter for [`DebugLog::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub levels: Option<HashSet<LogLevel>>,
    pub category: Option<LogCategory>,
    /// Case-insensitive substring of the message.
    pub search: Option<String>,
}

impl LogFilter {
    pub fn category(category: LogCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn level(level: LogLevel) -> Self {
        Self {
            levels: Some(HashSet::from([level])),
            ..Self::default()
        }
    }

    pub fn accepts(&self, entry: &LogEntry) -> bool {
        self.levels.as_ref().map_or(true, |l| l.contains(&entry.level))
            && self.category.map_or(true, |c| entry.category == c)
            && self.search.as_ref().map_or(true, |needle| {
                entry.message.to_lowercase().contains(&needle.to_lowercase())
            })
    }
}

/// Write-gated debug log.
pub struct DebugLog {
    store: BoundedStore<LogEntry>,
    clock: Arc<dyn Clock>,
    traces: Arc<dyn TraceSource>,
    redactor: SensitiveFieldRedactor,
    levels: RwLock<HashSet<LogLevel>>,
    categories: RwLock<HashSet<LogCategory>>,
}

impl DebugLog {
    /// All levels and categories enabled.
    pub fn new(capacity: usize, clock: Arc<dyn Clock>, traces: Arc<dyn TraceSource>) -> Self {
        Self {
            store: BoundedStore::new("logs", capacity),
            clock,
            traces,
            redactor: SensitiveFieldRedactor::global().clone(),
            levels: RwLock::new(LogLevel::ALL.into_iter().collect()),
            categories: RwLock::new(LogCategory::ALL.into_iter().collect()),
        }
    }

    pub fn with_redactor(mut self, redactor: SensitiveFieldRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn set_levels(&self, levels: impl IntoIterator<Item = LogLevel>) {
        *self.levels.write() = levels.into_iter().collect();
    }

    pub fn set_categories(&self, categories: impl IntoIterator<Item = LogCategory>) {
        *self.categories.write() = categories.into_iter().collect();
    }

    pub fn is_enabled(&self, level: LogLevel, category: LogCategory) -> bool {
        self.levels.read().contains(&level) && self.categories.read().contains(&category)
    }

    /// Store an entry unless the gate excludes it. ERROR entries carry the
    /// current stack when the trace source can produce one.
    pub fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Option<LogEntry> {
        if !self.is_enabled(level, category) {
            return None;
        }

        let stack_trace = match level {
            LogLevel::Error => self
                .traces
                .capture()
                .map(|raw| stack::parse(&raw))
                .filter(|frames| !frames.is_empty()),
            _ => None,
        };

        let entry = LogEntry {
            id: RecordId::new(),
            timestamp: self.clock.now(),
            level,
            category,
            message: message.into(),
            data: data.map(|d| self.redact(d)),
            stack_trace,
        };
        self.store.append(entry.clone());
        Some(entry)
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>) -> Option<LogEntry> {
        self.log(LogLevel::Error, category, message, None)
    }

    pub fn warn(&self, category: LogCategory, message: impl Into<String>) -> Option<LogEntry> {
        self.log(LogLevel::Warn, category, message, None)
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>) -> Option<LogEntry> {
        self.log(LogLevel::Info, category, message, None)
    }

    pub fn debug(&self, category: LogCategory, message: impl Into<String>) -> Option<LogEntry> {
        self.log(LogLevel::Debug, category, message, None)
    }

    pub fn trace(&self, category: LogCategory, message: impl Into<String>) -> Option<LogEntry> {
        self.log(LogLevel::Trace, category, message, None)
    }

    /// Newest-first entries accepted by `filter`.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        self.store.query(|e| filter.accepts(e))
    }

    pub fn get(&self, id: RecordId) -> Option<LogEntry> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn subscribe(&self, callback: impl Fn(&LogEntry) + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(callback)
    }

    fn redact(&self, data: Value) -> Value {
        match data {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let value = if self.redactor.should_redact_field(&key) {
                            Value::String(self.redactor.redact(&key, ""))
                        } else {
                            self.redact(value)
                        };
                        (key, value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact(v)).collect()),
            Value::String(s) => Value::String(self.redactor.redact_value(&s)),
            other => other,
        }
    }
}

impl fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLog")
            .field("entries", &self.store.len())
            .field("levels", &*self.levels.read())
            .field("categories", &*self.categories.read())
            .finish()
    }
}
