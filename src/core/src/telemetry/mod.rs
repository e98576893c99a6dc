//! Telemetry: subscriber setup, redaction and metric descriptions.
//!
//! ```rust,no_run
//! use devlens_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::default(), None).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
pub use metrics::describe_metrics;

use serde::Deserialize;
use std::sync::Arc;

use crate::logs::DebugLog;

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// `development` switches json output to pretty.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "devlens".to_string()
}

fn default_environment() -> String {
    std::env::var("DEVLENS_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Install logging and describe metrics. Call once at startup, after the
/// host has installed its metrics recorder if it has one.
///
/// # Errors
///
/// Returns an error if the subscriber cannot be installed.
pub fn init_telemetry(config: &TelemetryConfig, debug_log: Option<&Arc<DebugLog>>) -> anyhow::Result<()> {
    init_logging(&config.logging, &config.environment, debug_log)?;
    describe_metrics();

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "telemetry initialized"
    );
    Ok(())
}
