//! Network primitives the tracker wraps.
//!
//! Two request styles are modeled: a promise-like [`Fetch`] that resolves to a
//! response, and an event-driven [`Xhr`] that reports exactly one terminal
//! [`XhrEvent`]. A [`NetworkHost`] owns the currently installed primitives so
//! the tracker can swap in wrappers and later put the originals back.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

// =============================================================================
// Fetch
// =============================================================================

/// An outgoing request handed to a [`Fetch`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A fully read response. Any status code counts as a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why a fetch produced no response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request aborted")]
    Aborted,

    #[error("request timed out")]
    Timeout,
}

/// Promise-style request primitive.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

// =============================================================================
// XHR
// =============================================================================

/// The single terminal notification of an [`Xhr`] send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrEvent {
    Load {
        status: u16,
        status_text: String,
        /// CRLF-joined response header block.
        raw_headers: String,
        response_text: String,
    },
    Error,
    Abort,
    Timeout,
}

/// Receives the terminal event of a send.
pub type XhrListener = Box<dyn FnOnce(XhrEvent) + Send>;

/// Event-driven request object: configure with `open` and headers, then
/// `send`, and receive one terminal event on the listener.
pub trait Xhr: Send {
    fn open(&mut self, method: &str, url: &str);

    fn set_request_header(&mut self, name: &str, value: &str);

    fn send(&mut self, body: Option<String>, listener: XhrListener);
}

/// Constructs request objects; the equivalent of the XHR constructor.
pub trait XhrFactory: Send + Sync {
    fn create(&self) -> Box<dyn Xhr>;
}

// =============================================================================
// Host
// =============================================================================

/// Holder of the currently installed request primitives.
pub trait NetworkHost: Send + Sync {
    fn fetch(&self) -> Option<Arc<dyn Fetch>>;

    fn replace_fetch(&self, fetch: Arc<dyn Fetch>);

    fn xhr(&self) -> Option<Arc<dyn XhrFactory>>;

    fn replace_xhr(&self, factory: Arc<dyn XhrFactory>);
}

/// In-process [`NetworkHost`]. Application code resolves its primitives here
/// on every call so a swap takes effect immediately.
#[derive(Default)]
pub struct HostPrimitives {
    fetch: RwLock<Option<Arc<dyn Fetch>>>,
    xhr: RwLock<Option<Arc<dyn XhrFactory>>>,
}

impl HostPrimitives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch(self, fetch: Arc<dyn Fetch>) -> Self {
        *self.fetch.write() = Some(fetch);
        self
    }

    pub fn with_xhr(self, factory: Arc<dyn XhrFactory>) -> Self {
        *self.xhr.write() = Some(factory);
        self
    }
}

impl NetworkHost for HostPrimitives {
    fn fetch(&self) -> Option<Arc<dyn Fetch>> {
        self.fetch.read().clone()
    }

    fn replace_fetch(&self, fetch: Arc<dyn Fetch>) {
        *self.fetch.write() = Some(fetch);
    }

    fn xhr(&self) -> Option<Arc<dyn XhrFactory>> {
        self.xhr.read().clone()
    }

    fn replace_xhr(&self, factory: Arc<dyn XhrFactory>) {
        *self.xhr.write() = Some(factory);
    }
}

impl std::fmt::Debug for HostPrimitives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPrimitives")
            .field("fetch", &self.fetch.read().is_some())
            .field("xhr", &self.xhr.read().is_some())
            .finish()
    }
}
