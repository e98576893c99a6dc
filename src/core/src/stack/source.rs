//! Trace capture port.
//!
//! The normalizer never grabs the current call stack itself; hosts hand one in
//! through a [`TraceSource`].

use std::backtrace::Backtrace;

/// Captures the current call stack as raw text.
pub trait TraceSource: Send + Sync {
    /// Raw trace, or `None` when the host cannot produce one.
    fn capture(&self) -> Option<String>;
}

/// Captures through `std::backtrace`, regardless of `RUST_BACKTRACE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceSource;

impl TraceSource for BacktraceSource {
    fn capture(&self) -> Option<String> {
        Some(Backtrace::force_capture().to_string())
    }
}

/// For hosts without stack introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrace;

impl TraceSource for NoTrace {
    fn capture(&self) -> Option<String> {
        None
    }
}

/// Always returns the same trace. Handy for replaying traces reported by a
/// remote runtime.
#[derive(Debug, Clone, Default)]
pub struct FixedTrace(pub String);

impl TraceSource for FixedTrace {
    fn capture(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_trace() {
        assert!(NoTrace.capture().is_none());
    }

    #[test]
    fn test_fixed_trace() {
        let source = FixedTrace("    at App (./src/App.js:1:1)".to_string());
        let frames = crate::stack::parse(&source.capture().unwrap());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function_name, "App");
    }

    #[test]
    fn test_backtrace_source_produces_text() {
        let trace = BacktraceSource.capture().unwrap();
        assert!(!trace.is_empty());
    }
}
