//! Request Lifecycle Tracker.
//!
//! [`NetworkTracker::install`] swaps wrapped versions of the host's request
//! primitives into a [`NetworkHost`]. Each call through a wrapper creates a
//! pending [`NetworkRequest`] record and moves it to exactly one terminal
//! state when the underlying primitive settles. The caller always gets the
//! original outcome back untouched.
//!
//! Completions that arrive after [`NetworkTracker::teardown`] are dropped, even
//! if the same tracker has been installed again in the meantime.

pub mod ports;
pub mod record;
pub mod reqwest_fetch;

pub use ports::{
    Fetch, FetchError, FetchRequest, FetchResponse, HostPrimitives, NetworkHost, Xhr, XhrEvent,
    XhrFactory, XhrListener,
};
pub use record::{
    parse_body, parse_headers, Initiator, NetworkRequest, NetworkStats, RawHeaders,
    RequestFilter, RequestState,
};
pub use reqwest_fetch::ReqwestFetch;

use async_trait::async_trait;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{BoundedStore, RecordId, Subscription};
use crate::telemetry::SensitiveFieldRedactor;
use crate::telemetry::metrics::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use record::ResponseParts;

// =============================================================================
// Tracker
// =============================================================================

/// Records the lifecycle of outgoing requests made through a [`NetworkHost`].
pub struct NetworkTracker {
    core: Arc<TrackerCore>,
    installation: Mutex<Option<Installation>>,
}

struct Installation {
    host: Arc<dyn NetworkHost>,
    original_fetch: Option<Arc<dyn Fetch>>,
    original_xhr: Option<Arc<dyn XhrFactory>>,
}

struct TrackerCore {
    store: BoundedStore<NetworkRequest>,
    clock: Arc<dyn Clock>,
    redactor: SensitiveFieldRedactor,
    capture_bodies: bool,
    /// Bumped on teardown; wrappers from older installs stop recording.
    generation: AtomicU64,
}

impl NetworkTracker {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: Arc::new(TrackerCore {
                store: BoundedStore::new("network", capacity),
                clock,
                redactor: SensitiveFieldRedactor::global().clone(),
                capture_bodies: true,
                generation: AtomicU64::new(0),
            }),
            installation: Mutex::new(None),
        }
    }

    /// Redact request and response headers with `redactor` instead of the
    /// process-wide one.
    pub fn with_redactor(self, redactor: SensitiveFieldRedactor) -> Self {
        self.reconfigure(|core| core.redactor = redactor)
    }

    /// Whether request and response bodies are kept on records.
    pub fn with_body_capture(self, enabled: bool) -> Self {
        self.reconfigure(|core| core.capture_bodies = enabled)
    }

    fn reconfigure(self, apply: impl FnOnce(&mut TrackerCore)) -> Self {
        let Self { core, installation } = self;
        let core = match Arc::try_unwrap(core) {
            Ok(mut core) => {
                apply(&mut core);
                Arc::new(core)
            }
            Err(shared) => {
                warn!("network tracker already shared; configuration change ignored");
                shared
            }
        };
        Self { core, installation }
    }

    /// Wrap the host's primitives. Primitives the host lacks are skipped.
    /// Idempotent while installed.
    pub fn install(&self, host: Arc<dyn NetworkHost>) {
        let mut installation = self.installation.lock();
        if installation.is_some() {
            return;
        }

        let generation = self.core.generation.load(Ordering::SeqCst);
        let original_fetch = host.fetch();
        let original_xhr = host.xhr();

        if let Some(inner) = &original_fetch {
            host.replace_fetch(Arc::new(TrackedFetch {
                inner: Arc::clone(inner),
                core: Arc::downgrade(&self.core),
                generation,
            }));
        }
        if let Some(inner) = &original_xhr {
            host.replace_xhr(Arc::new(TrackedXhrFactory {
                inner: Arc::clone(inner),
                core: Arc::downgrade(&self.core),
                generation,
            }));
        }

        debug!(
            fetch = original_fetch.is_some(),
            xhr = original_xhr.is_some(),
            "network tracker installed"
        );
        *installation = Some(Installation {
            host,
            original_fetch,
            original_xhr,
        });
    }

    pub fn is_installed(&self) -> bool {
        self.installation.lock().is_some()
    }

    /// Put the original primitives back. Requests still in flight are not
    /// recorded when they settle. Records and subscribers are kept.
    pub fn teardown(&self) {
        let Some(installation) = self.installation.lock().take() else {
            return;
        };
        self.core.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(original) = installation.original_fetch {
            installation.host.replace_fetch(original);
        }
        if let Some(original) = installation.original_xhr {
            installation.host.replace_xhr(original);
        }
        debug!("network tracker torn down");
    }

    /// Newest-first requests accepted by `filter`.
    pub fn list(&self, filter: &RequestFilter) -> Vec<NetworkRequest> {
        self.core.store.query(|r| filter.accepts(r))
    }

    pub fn get(&self, id: RecordId) -> Option<NetworkRequest> {
        self.core.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.core.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.store.is_empty()
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats::from_requests(&self.core.store.records())
    }

    pub fn clear(&self) {
        self.core.store.clear();
    }

    /// Called once per request, when it reaches a terminal state.
    pub fn on_request(
        &self,
        callback: impl Fn(&NetworkRequest) + Send + Sync + 'static,
    ) -> Subscription {
        self.core.store.subscribe(move |request: &NetworkRequest| {
            if request.is_terminal() {
                callback(request);
            }
        })
    }

    /// Track a request issued outside the wrapped primitives. Settle it with
    /// [`complete_manual`](Self::complete_manual) or
    /// [`fail_manual`](Self::fail_manual).
    pub fn begin_manual(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> RecordId {
        self.core
            .begin(Initiator::Fetch, method, url, RawHeaders::Collection(headers), body)
            .0
    }

    pub fn complete_manual(&self, id: RecordId, response: &FetchResponse) {
        let generation = self.core.generation.load(Ordering::SeqCst);
        self.core.complete_fetch(id, generation, response);
    }

    pub fn fail_manual(&self, id: RecordId, error: impl Into<String>) {
        let generation = self.core.generation.load(Ordering::SeqCst);
        self.core.fail(id, generation, Initiator::Fetch, error.into());
    }
}

impl std::fmt::Debug for NetworkTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTracker")
            .field("records", &self.core.store.len())
            .field("installed", &self.is_installed())
            .finish()
    }
}

// =============================================================================
// Record transitions
// =============================================================================

impl TrackerCore {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn redact_headers(&self, headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
        headers
            .into_iter()
            .map(|(name, value)| {
                let value = self.redactor.redact(&name, &value);
                (name, value)
            })
            .collect()
    }

    fn body(&self, text: Option<&str>) -> Option<serde_json::Value> {
        if !self.capture_bodies {
            return None;
        }
        text.and_then(parse_body)
    }

    fn begin(
        &self,
        initiator: Initiator,
        method: &str,
        url: &str,
        headers: RawHeaders<'_>,
        body: Option<&str>,
    ) -> (RecordId, u64) {
        let generation = self.generation.load(Ordering::SeqCst);
        let method = if method.is_empty() {
            "GET".to_string()
        } else {
            method.to_uppercase()
        };
        let request = NetworkRequest {
            id: RecordId::new(),
            url: url.to_string(),
            method,
            initiator,
            state: RequestState::Pending,
            start_time: self.clock.now(),
            end_time: None,
            duration_ms: None,
            status: None,
            status_text: None,
            headers: None,
            request_headers: self.redact_headers(parse_headers(headers)),
            request_body: self.body(body),
            response_body: None,
            error: None,
        };
        let id = request.id;
        self.store.append(request);
        (id, generation)
    }

    fn complete_fetch(&self, id: RecordId, generation: u64, response: &FetchResponse) {
        let parts = ResponseParts {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: self.redact_headers(parse_headers(RawHeaders::Collection(&response.headers))),
            body: self.body(Some(&response.body)),
        };
        self.settle(id, generation, Initiator::Fetch, |request, end| {
            request.complete(end, parts)
        });
    }

    fn complete_xhr(&self, id: RecordId, generation: u64, event: &XhrEvent) {
        match event {
            XhrEvent::Load {
                status,
                status_text,
                raw_headers,
                response_text,
            } => {
                let parts = ResponseParts {
                    status: *status,
                    status_text: status_text.clone(),
                    headers: self.redact_headers(parse_headers(RawHeaders::Block(raw_headers))),
                    body: self.body(Some(response_text)),
                };
                self.settle(id, generation, Initiator::Xhr, |request, end| {
                    request.complete(end, parts)
                });
            }
            XhrEvent::Error => self.fail(id, generation, Initiator::Xhr, "Network request failed".into()),
            XhrEvent::Abort => self.fail(id, generation, Initiator::Xhr, "Request aborted".into()),
            XhrEvent::Timeout => self.fail(id, generation, Initiator::Xhr, "Request timed out".into()),
        }
    }

    fn fail(&self, id: RecordId, generation: u64, initiator: Initiator, error: String) {
        self.settle(id, generation, initiator, |request, end| {
            request.fail(end, error)
        });
    }

    fn settle(
        &self,
        id: RecordId,
        generation: u64,
        initiator: Initiator,
        transition: impl FnOnce(&mut NetworkRequest, chrono::DateTime<chrono::Utc>),
    ) {
        if !self.is_current(generation) {
            debug!(request_id = %id, "completion after teardown ignored");
            return;
        }
        let end = self.clock.now();
        // `None` when already settled or evicted while in flight.
        let Some(settled) = self.store.update_if(id, |request| {
            if request.is_terminal() {
                return false;
            }
            transition(request, end);
            true
        }) else {
            return;
        };

        let initiator = match initiator {
            Initiator::Fetch => "fetch",
            Initiator::Xhr => "xhr",
        };
        counter!(
            REQUESTS_TOTAL,
            "initiator" => initiator,
            "state" => settled.state.to_string()
        )
        .increment(1);
        if let Some(duration) = settled.duration_ms {
            histogram!(REQUEST_DURATION_SECONDS, "initiator" => initiator)
                .record(duration as f64 / 1000.0);
        }
        debug!(
            request_id = %id,
            method = %settled.method,
            url = %settled.url,
            state = %settled.state,
            status = ?settled.status,
            duration_ms = ?settled.duration_ms,
            "request settled"
        );
    }
}

// =============================================================================
// Wrappers
// =============================================================================

struct TrackedFetch {
    inner: Arc<dyn Fetch>,
    core: Weak<TrackerCore>,
    generation: u64,
}

#[async_trait]
impl Fetch for TrackedFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let pending = self
            .core
            .upgrade()
            .filter(|core| core.is_current(self.generation))
            .map(|core| {
                core.begin(
                    Initiator::Fetch,
                    &request.method,
                    &request.url,
                    RawHeaders::Collection(&request.headers),
                    request.body.as_deref(),
                )
            });

        let result = self.inner.fetch(request).await;

        if let (Some((id, generation)), Some(core)) = (pending, self.core.upgrade()) {
            match &result {
                Ok(response) => core.complete_fetch(id, generation, response),
                Err(err) => core.fail(id, generation, Initiator::Fetch, err.to_string()),
            }
        }
        result
    }
}

struct TrackedXhrFactory {
    inner: Arc<dyn XhrFactory>,
    core: Weak<TrackerCore>,
    generation: u64,
}

impl XhrFactory for TrackedXhrFactory {
    fn create(&self) -> Box<dyn Xhr> {
        Box::new(TrackedXhr {
            inner: self.inner.create(),
            core: Weak::clone(&self.core),
            generation: self.generation,
            method: String::new(),
            url: String::new(),
            headers: Vec::new(),
        })
    }
}

struct TrackedXhr {
    inner: Box<dyn Xhr>,
    core: Weak<TrackerCore>,
    generation: u64,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
}

impl Xhr for TrackedXhr {
    fn open(&mut self, method: &str, url: &str) {
        self.method = method.to_string();
        self.url = url.to_string();
        self.inner.open(method, url);
    }

    fn set_request_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
        self.inner.set_request_header(name, value);
    }

    fn send(&mut self, body: Option<String>, listener: XhrListener) {
        let pending = self
            .core
            .upgrade()
            .filter(|core| core.is_current(self.generation))
            .map(|core| {
                core.begin(
                    Initiator::Xhr,
                    &self.method,
                    &self.url,
                    RawHeaders::Collection(&self.headers),
                    body.as_deref(),
                )
            });

        let Some((id, generation)) = pending else {
            self.inner.send(body, listener);
            return;
        };

        let core = Weak::clone(&self.core);
        self.inner.send(
            body,
            Box::new(move |event: XhrEvent| {
                if let Some(core) = core.upgrade() {
                    core.complete_xhr(id, generation, &event);
                }
                listener(event);
            }),
        );
    }
}
