//! Stack Trace Normalizer.
//!
//! Turns a raw trace string into [`StackFrame`]s with canonical file and
//! function names so that the same failure produced by different builds or
//! loaders compares equal. Three line formats are understood:
//!
//! - V8: `    at handleClick (webpack:///./src/App.js?abc:12:5)` and `    at ./src/App.js:12:5`
//! - Gecko / JavaScriptCore: `handleClick@http://localhost/src/App.js:12:5`
//! - Rust `std::backtrace`: `   3: my_crate::handler` followed by `             at ./src/lib.rs:12:5`
//!
//! Anything else is skipped. Parsing never fails; garbage in yields an empty vector.

pub mod source;

pub use source::{BacktraceSource, FixedTrace, NoTrace, TraceSource};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Directory marker identifying vendored dependency code.
const VENDOR_MARKER: &str = "node_modules/";

/// File markers for code injected by the bundler runtime.
const BUNDLER_MARKERS: &[&str] = &["webpack/bootstrap", "webpack/runtime", "(webpack)", "__webpack"];

/// Synthetic wrapper prefix the bundler puts in front of module functions.
const WRAPPER_PREFIX: &str = "__webpack_require__.";

const QUALIFIERS: &[&str] = &["Object.", "Array.", "Function."];

const ANONYMOUS: &str = "anonymous";

/// One normalized entry of a parsed stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub file_name: String,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
    pub function_name: String,
    /// Raw line the frame was parsed from.
    pub source: String,
}

impl StackFrame {
    /// Build a frame from raw parts, canonicalizing file and function names.
    pub fn new(
        file: &str,
        function: &str,
        line_number: Option<u32>,
        column_number: Option<u32>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            file_name: normalize_file_name(file),
            line_number,
            column_number,
            function_name: normalize_function_name(function),
            source: source.into(),
        }
    }

    /// Frame belongs to a vendored dependency.
    pub fn is_node_module(&self) -> bool {
        self.file_name.contains(VENDOR_MARKER)
    }

    /// Frame belongs to bundler-injected runtime code.
    pub fn is_bundler_internal(&self) -> bool {
        BUNDLER_MARKERS.iter().any(|m| self.file_name.contains(m))
    }

    /// Frame belongs to the application itself.
    pub fn is_user_code(&self) -> bool {
        !self.is_node_module() && !self.is_bundler_internal()
    }
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}", self.function_name, self.file_name)?;
        if let Some(line) = self.line_number {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column_number {
                write!(f, ":{}", column)?;
            }
        }
        write!(f, ")")
    }
}

// =============================================================================
// Normalization
// =============================================================================

fn scheme_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:webpack-internal|webpack|file):///?").expect("valid regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Canonicalize a file reference: scheme prefix stripped, query removed,
/// backslashes turned into forward slashes.
pub fn normalize_file_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = scheme_prefix().replace(trimmed, "");
    let without_query = match without_scheme.find('?') {
        Some(index) => &without_scheme[..index],
        None => &without_scheme[..],
    };
    without_query.replace('\\', "/")
}

/// Canonicalize a function name: wrapper prefix, `async ` marker and
/// `Object.`/`Array.`/`Function.` qualifiers stripped, `<anonymous>` spelled
/// `anonymous`, whitespace collapsed.
pub fn normalize_function_name(raw: &str) -> String {
    let mut name = raw.trim();
    name = name.strip_prefix(WRAPPER_PREFIX).unwrap_or(name);
    name = name.strip_prefix("async ").unwrap_or(name);

    let name = name.replace("<anonymous>", ANONYMOUS);
    let name = whitespace().replace_all(name.trim(), " ");

    let mut name: &str = &name;
    for qualifier in QUALIFIERS {
        if let Some(rest) = name.strip_prefix(qualifier) {
            name = rest;
            break;
        }
    }

    let name = name.trim();
    if name.is_empty() {
        ANONYMOUS.to_string()
    } else {
        name.to_string()
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn v8_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*at\s+(.+?)\s+\((.+?)(?::(\d+))?(?::(\d+))?\)\s*$").expect("valid regex")
    })
}

fn v8_bare() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*at\s+(.+?)(?::(\d+))?(?::(\d+))?\s*$").expect("valid regex"))
}

fn gecko() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([^@\s]*)@(.+?):(\d+)(?::(\d+))?\s*$").expect("valid regex"))
}

fn rust_symbol() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s+\d+:\s+(\S.*?)\s*$").expect("valid regex"))
}

fn rust_hash_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"::h[0-9a-f]{16}$").expect("valid regex"))
}

fn number(capture: Option<regex::Match<'_>>) -> Option<u32> {
    capture.and_then(|m| m.as_str().parse().ok())
}

/// Parse a raw trace into normalized frames, outermost call last.
pub fn parse(raw: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    // Rust backtraces put the location on the line after the symbol.
    let mut pending_symbol: Option<(String, String)> = None;

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = rust_symbol().captures(line) {
            flush_symbol(&mut frames, pending_symbol.take());
            let symbol = rust_hash_suffix().replace(&caps[1], "").into_owned();
            pending_symbol = Some((symbol, line.to_string()));
            continue;
        }

        if let Some(caps) = v8_call().captures(line) {
            flush_symbol(&mut frames, pending_symbol.take());
            frames.push(StackFrame::new(
                &caps[2],
                &caps[1],
                number(caps.get(3)),
                number(caps.get(4)),
                line.trim(),
            ));
            continue;
        }

        if let Some(caps) = v8_bare().captures(line) {
            match pending_symbol.take() {
                Some((symbol, symbol_line)) => frames.push(StackFrame::new(
                    &caps[1],
                    &symbol,
                    number(caps.get(2)),
                    number(caps.get(3)),
                    format!("{}\n{}", symbol_line.trim(), line.trim()),
                )),
                None => frames.push(StackFrame::new(
                    &caps[1],
                    ANONYMOUS,
                    number(caps.get(2)),
                    number(caps.get(3)),
                    line.trim(),
                )),
            }
            continue;
        }

        if let Some(caps) = gecko().captures(line) {
            flush_symbol(&mut frames, pending_symbol.take());
            frames.push(StackFrame::new(
                &caps[2],
                &caps[1],
                number(caps.get(3)),
                number(caps.get(4)),
                line.trim(),
            ));
        }
    }

    flush_symbol(&mut frames, pending_symbol.take());
    frames
}

fn flush_symbol(frames: &mut Vec<StackFrame>, pending: Option<(String, String)>) {
    if let Some((symbol, line)) = pending {
        frames.push(StackFrame::new("", &symbol, None, None, line.trim()));
    }
}

/// Frames that belong to the application, dropping vendor and bundler frames.
pub fn user_frames(frames: &[StackFrame]) -> Vec<&StackFrame> {
    frames.iter().filter(|f| f.is_user_code()).collect()
}
