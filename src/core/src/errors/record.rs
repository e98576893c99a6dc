//! Error records, fingerprints and severity classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use crate::stack::StackFrame;
use crate::store::{Record, RecordId};

/// Function-name fragments that mark a UI render or lifecycle entry point.
const COMPONENT_MARKERS: &[&str] = &[
    "render",
    "Render",
    "componentDidMount",
    "componentDidUpdate",
    "useEffect",
    "useLayoutEffect",
];

// =============================================================================
// Input
// =============================================================================

/// Runtime class of a captured error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    SyntaxError,
    RangeError,
    /// Rust panic funneled in through the panic hook.
    Panic,
    Other(String),
}

impl ErrorKind {
    /// Map a runtime class name onto a kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Error" => Self::Error,
            "TypeError" => Self::TypeError,
            "ReferenceError" => Self::ReferenceError,
            "SyntaxError" => Self::SyntaxError,
            "RangeError" => Self::RangeError,
            "Panic" => Self::Panic,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(name) => write!(f, "{}", name),
            known => write!(f, "{:?}", known),
        }
    }
}

/// An error as handed to [`ErrorTracker::capture`](super::ErrorTracker::capture).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInput {
    pub kind: ErrorKind,
    pub message: String,
    /// Raw, unparsed trace.
    pub stack: Option<String>,
}

impl ErrorInput {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Wrap a Rust error, taking the current trace from `traces`.
    pub fn from_error(
        error: &(dyn std::error::Error + 'static),
        traces: &dyn crate::stack::TraceSource,
    ) -> Self {
        Self {
            kind: ErrorKind::Error,
            message: error.to_string(),
            stack: traces.capture(),
        }
    }
}

/// Circumstances of a capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureContext {
    /// The error surfaced as an unhandled promise rejection.
    pub unhandled_rejection: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CaptureContext {
    pub fn unhandled_rejection() -> Self {
        Self {
            unhandled_rejection: true,
            ..Self::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extra.insert(key.into(), v);
        }
        self
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Derived severity of an error fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn classify(error: &ErrorInput, context: &CaptureContext) -> Self {
        if context.unhandled_rejection {
            return Self::Critical;
        }
        if matches!(error.kind, ErrorKind::TypeError | ErrorKind::ReferenceError) {
            return Self::High;
        }
        let message = error.message.to_lowercase();
        if ["network", "fetch", "xhr"].iter().any(|m| message.contains(m)) {
            return Self::Medium;
        }
        Self::Low
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Component owning the first render/lifecycle frame.
///
/// `App.render` yields `App`; an unqualified match such as `renderList`
/// yields the function name itself.
pub fn derive_component_name(frames: &[StackFrame]) -> Option<String> {
    let frame = frames
        .iter()
        .find(|f| COMPONENT_MARKERS.iter().any(|m| f.function_name.contains(m)))?;
    let name = match frame.function_name.split_once('.') {
        Some((owner, _)) if !owner.is_empty() => owner,
        _ => frame.function_name.as_str(),
    };
    Some(name.to_string())
}

// =============================================================================
// Fingerprint
// =============================================================================

/// The (message, component, frame sequence) tuple errors are deduplicated on.
///
/// Frames are compared by file and function only; line and column are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub message: String,
    pub component_name: Option<String>,
    pub frames: Vec<(String, String)>,
}

impl Fingerprint {
    pub fn new(message: &str, component_name: Option<&str>, frames: &[StackFrame]) -> Self {
        Self {
            message: message.to_string(),
            component_name: component_name.map(str::to_string),
            frames: frames
                .iter()
                .map(|f| (f.file_name.clone(), f.function_name.clone()))
                .collect(),
        }
    }

    /// Stable hex digest, usable as a correlation key outside the process.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.message.as_bytes());
        hasher.update([0u8]);
        if let Some(component) = &self.component_name {
            hasher.update(component.as_bytes());
        }
        hasher.update([0u8]);
        for (file, function) in &self.frames {
            hasher.update(file.as_bytes());
            hasher.update([1u8]);
            hasher.update(function.as_bytes());
            hasher.update([2u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Whether `record` carries this exact fingerprint.
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        self.message == record.message
            && self.component_name == record.component_name
            && self.frames.len() == record.frames.len()
            && self
                .frames
                .iter()
                .zip(&record.frames)
                .all(|((file, function), frame)| {
                    *file == frame.file_name && *function == frame.function_name
                })
    }
}

// =============================================================================
// Record
// =============================================================================

/// A deduplicated error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: RecordId,
    pub fingerprint: String,
    pub message: String,
    pub kind: ErrorKind,
    pub frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    pub severity: Severity,
    pub frequency: u64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl Record for ErrorRecord {
    fn id(&self) -> RecordId {
        self.id
    }
}

/// Read filter for [`ErrorTracker::list`](super::ErrorTracker::list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFilter {
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub component_name: Option<String>,
}

impl ErrorFilter {
    pub fn severity(severity: Severity) -> Self {
        Self {
            severity: Some(severity),
            ..Self::default()
        }
    }

    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Self::default()
        }
    }

    pub fn component(name: impl Into<String>) -> Self {
        Self {
            component_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn accepts(&self, record: &ErrorRecord) -> bool {
        self.severity.map_or(true, |s| record.severity == s)
            && self.resolved.map_or(true, |r| record.resolved == r)
            && self
                .component_name
                .as_ref()
                .map_or(true, |c| record.component_name.as_ref() == Some(c))
    }
}
