//! Configuration management.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{LensError, Result};
use crate::logs::{LogCategory, LogLevel};
use crate::store::DEFAULT_CAPACITY;
use crate::telemetry::TelemetryConfig;

const ENV_PREFIX: &str = "DEVLENS";

/// Settings for every engine of an [`Instrumentation`](crate::Instrumentation).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentationConfig {
    #[serde(default)]
    pub errors: ErrorsConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorsConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Route panics into the tracker on startup.
    #[serde(default = "default_true")]
    pub install_panic_hook: bool,

    /// Capture a backtrace for errors that do not carry one.
    #[serde(default = "default_true")]
    pub capture_traces: bool,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            install_panic_hook: true,
            capture_traces: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Keep request and response bodies on records.
    #[serde(default = "default_true")]
    pub capture_bodies: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            capture_bodies: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Coalescing window for named context changes.
    #[serde(default = "default_context_debounce_ms")]
    pub context_debounce_ms: u64,
}

impl StateConfig {
    pub fn context_debounce(&self) -> Duration {
        Duration::from_millis(self.context_debounce_ms)
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            context_debounce_ms: default_context_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_levels")]
    pub levels: Vec<LogLevel>,

    #[serde(default = "default_categories")]
    pub categories: Vec<LogCategory>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            levels: default_levels(),
            categories: default_categories(),
        }
    }
}

// Default value functions
fn default_capacity() -> usize { DEFAULT_CAPACITY }
fn default_true() -> bool { true }
fn default_context_debounce_ms() -> u64 { 100 }
fn default_levels() -> Vec<LogLevel> { LogLevel::ALL.to_vec() }
fn default_categories() -> Vec<LogCategory> { LogCategory::ALL.to_vec() }

impl InstrumentationConfig {
    /// Load configuration from `DEVLENS__*` environment variables, e.g.
    /// `DEVLENS__NETWORK__CAPACITY=200` or `DEVLENS__LOGS__LEVELS=ERROR,WARN`.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: InstrumentationConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file (format picked by extension), with environment
    /// variables taking precedence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        let cfg: InstrumentationConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (section, capacity) in [
            ("errors", self.errors.capacity),
            ("network", self.network.capacity),
            ("state", self.state.capacity),
            ("logs", self.logs.capacity),
        ] {
            if capacity == 0 {
                return Err(LensError::invalid_config(format!(
                    "{section}.capacity must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("logs.levels")
        .with_list_parse_key("logs.categories")
}
