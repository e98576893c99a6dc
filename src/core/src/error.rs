//! Error handling for devlens core.
//!
//! Nothing in the instrumentation engines is allowed to take the host
//! application down, so most capture paths degrade silently. `LensError` is
//! reserved for the few operations that have a caller who can act on the
//! failure: configuration loading, `resolve` on an unknown record, and
//! installing global hooks on a host that has none.
//!
//! # Usage
//!
//! ```rust,ignore
//! use devlens_core::error::{LensError, Result, ErrorContext};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("devlens.toml").context("Failed to read config file")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::telemetry::metrics::INTERNAL_ERRORS_TOTAL;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for devlens operations.
pub type Result<T> = std::result::Result<T, LensError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and are what the overlay and AI collaborators match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Store Errors (1000-1099)
    RecordNotFound,
    InvalidInput,

    // Interception Errors (1100-1199)
    HookUnavailable,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::RecordNotFound => 1000,
            Self::InvalidInput => 1001,

            Self::HookUnavailable => 1100,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "store",
            1100..=1199 => "interception",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for devlens core.
#[derive(Error, Debug)]
pub struct LensError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human readable message
    message: Cow<'static, str>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for LensError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl LensError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a not found error for a stored record.
    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::RecordNotFound, format!("{} not found: {}", kind, id))
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a configuration validation error.
    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check whether this is a not-found signal.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::RecordNotFound
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error at a level matching its category.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.code {
            ErrorCode::InternalError => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    source = ?self.source,
                    "devlens internal error"
                );
            }
            ErrorCode::RecordNotFound | ErrorCode::InvalidInput => {
                debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "devlens request error"
                );
            }
            _ => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "devlens operational error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            INTERNAL_ERRORS_TOTAL,
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| LensError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| LensError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| LensError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| LensError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for LensError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_data() || error.is_syntax() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };
        LensError::new(code, "JSON processing failed").with_source(error)
    }
}

impl From<config::ConfigError> for LensError {
    fn from(error: config::ConfigError) -> Self {
        let message = match &error {
            config::ConfigError::NotFound(key) => format!("Missing configuration key: {}", key),
            config::ConfigError::FileParse { .. } => "Configuration file could not be parsed".to_string(),
            _ => "Configuration could not be loaded".to_string(),
        };
        LensError::new(ErrorCode::ConfigurationError, message).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
