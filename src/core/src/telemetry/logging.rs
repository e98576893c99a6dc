//! Subscriber setup and sensitive-value redaction.
//!
//! [`init_logging`] installs a `tracing-subscriber` registry with an
//! `EnvFilter`, one formatting layer (json, pretty or compact) and, when a
//! [`DebugLog`] is supplied, a [`DebugLogLayer`] mirroring host events into
//! it. [`SensitiveFieldRedactor`] scrubs captured header values and log data.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::logs::{DebugLog, DebugLogLayer};

/// Process-wide redactor, set by [`init_logging`] unless a tracker built
/// without an explicit redactor got there first.
static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive for the registry, e.g. `info` or `devlens_core=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Extra `target=level` directives.
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    #[serde(default = "default_include_location")]
    pub include_location: bool,

    #[serde(default)]
    pub include_thread: bool,

    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Log span closes with their busy/idle timings.
    #[serde(default)]
    pub span_close_events: bool,

    /// Mirror host `tracing` events into the debug log as console entries.
    #[serde(default = "default_capture_console")]
    pub capture_console: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: default_include_location(),
            include_thread: false,
            include_target: default_include_target(),
            span_close_events: false,
            capture_console: default_capture_console(),
            redaction: RedactionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// Field names (case-insensitive substrings) and an optional value regex
/// that mark data as sensitive.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    #[serde(default)]
    pub field_names: Vec<String>,

    #[serde(default)]
    pub value_pattern: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redaction
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    field_names: Vec<String>,
    value_patterns: Vec<regex::Regex>,
    replacement: String,
    enabled: bool,
}

impl SensitiveFieldRedactor {
    /// Compile `config`. Value patterns that fail to compile are skipped with
    /// a warning.
    pub fn new(config: &RedactionConfig) -> Self {
        let field_names = config
            .patterns
            .iter()
            .flat_map(|p| p.field_names.iter().map(|f| f.to_lowercase()))
            .collect();
        let value_patterns = config
            .patterns
            .iter()
            .filter_map(|p| {
                let pattern = p.value_pattern.as_ref()?;
                match regex::Regex::new(pattern) {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        tracing::warn!(pattern = %p.name, error = %err, "invalid redaction pattern skipped");
                        None
                    }
                }
            })
            .collect();

        Self {
            field_names,
            value_patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    /// A redactor that leaves everything untouched.
    pub fn disabled() -> Self {
        Self {
            field_names: Vec::new(),
            value_patterns: Vec::new(),
            replacement: String::new(),
            enabled: false,
        }
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let lower = field_name.to_lowercase();
        self.field_names.iter().any(|f| lower.contains(f.as_str()))
    }

    /// Replace every match of the value patterns.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }
        self.value_patterns
            .iter()
            .fold(value.to_string(), |acc, regex| {
                regex.replace_all(&acc, self.replacement.as_str()).into_owned()
            })
    }

    /// Whole value replaced when the field name is sensitive, pattern
    /// matches replaced otherwise.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    /// The redactor installed by [`init_logging`], or the default one.
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_location() -> bool {
    true
}

fn default_include_target() -> bool {
    true
}

fn default_capture_console() -> bool {
    true
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn pattern(name: &str, field_names: &[&str], value_pattern: Option<&str>) -> RedactionPattern {
    RedactionPattern {
        name: name.to_string(),
        field_names: field_names.iter().map(|f| f.to_string()).collect(),
        value_pattern: value_pattern.map(str::to_string),
    }
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        pattern(
            "api_keys",
            &["api_key", "apikey", "api-key", "x-api-key"],
            Some(r"sk-[a-zA-Z0-9]{20,}"),
        ),
        pattern("passwords", &["password", "passwd", "secret", "credential"], None),
        pattern(
            "tokens",
            &["token", "bearer", "jwt", "authorization"],
            Some(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+"),
        ),
        pattern("sessions", &["cookie", "session", "x-csrf"], None),
        pattern(
            "credit_cards",
            &["credit_card", "card_number", "cc_number"],
            Some(r"\b(?:\d{4}[-\s]?){3}\d{4}\b"),
        ),
        pattern("ssn", &["ssn", "social_security"], Some(r"\b\d{3}-\d{2}-\d{4}\b")),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subscriber
// ═══════════════════════════════════════════════════════════════════════════════

/// Install the global subscriber.
///
/// In `development` the json default is swapped for pretty output. When
/// `debug_log` is given and `capture_console` is set, host events are
/// mirrored into it.
///
/// # Errors
///
/// Returns an error if a filter directive does not parse or a global
/// subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
    environment: &str,
    debug_log: Option<&Arc<DebugLog>>,
) -> anyhow::Result<()> {
    let redactor_set = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction)).is_ok();

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{module}={level}").parse()?);
    }

    let format = if environment == "development" && config.format == LogFormat::Json {
        LogFormat::Pretty
    } else {
        config.format
    };

    let capture = debug_log
        .filter(|_| config.capture_console)
        .map(DebugLogLayer::new);

    tracing_subscriber::registry()
        .with(fmt_layer(config, format))
        .with(capture)
        .with(filter)
        .try_init()?;

    if !redactor_set {
        tracing::warn!(
            "process-wide redactor was already in use; engines built before init_logging keep their own redaction settings"
        );
    }
    Ok(())
}

fn fmt_layer(config: &LoggingConfig, format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.span_close_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread)
        .with_thread_names(config.include_thread)
        .with_target(config.include_target);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}
