//! Network request records, header flattening and body decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::store::{Record, RecordId};

/// Lifecycle state of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which intercepted primitive issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initiator {
    Fetch,
    Xhr,
}

/// One outgoing call and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub id: RecordId,
    pub url: String,
    pub method: String,
    pub initiator: Initiator,
    pub state: RequestState,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    /// Response headers, lowercase keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record for NetworkRequest {
    fn id(&self) -> RecordId {
        self.id
    }
}

impl NetworkRequest {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn finish(&mut self, end: DateTime<Utc>, state: RequestState) {
        let duration = (end - self.start_time).num_milliseconds().max(0) as u64;
        self.end_time = Some(end);
        self.duration_ms = Some(duration);
        self.state = state;
    }

    /// Terminal transition for a received response, whatever its status.
    pub(crate) fn complete(&mut self, end: DateTime<Utc>, response: ResponseParts) {
        if self.is_terminal() {
            return;
        }
        self.status = Some(response.status);
        self.status_text = Some(response.status_text);
        self.headers = Some(response.headers);
        self.response_body = response.body;
        self.finish(end, RequestState::Completed);
    }

    /// Terminal transition for a call that never produced a response.
    pub(crate) fn fail(&mut self, end: DateTime<Utc>, error: String) {
        if self.is_terminal() {
            return;
        }
        self.error = Some(error);
        self.finish(end, RequestState::Failed);
    }
}

/// Decoded response parts, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResponseParts {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

// =============================================================================
// Headers and bodies
// =============================================================================

/// Header input in either shape a primitive hands out.
#[derive(Debug, Clone, Copy)]
pub enum RawHeaders<'a> {
    /// Iterable name/value collection.
    Collection(&'a [(String, String)]),
    /// CRLF-joined `name: value` block.
    Block(&'a str),
}

/// Flatten headers into a lowercase-keyed map. Repeated names are joined
/// with `", "`.
pub fn parse_headers(raw: RawHeaders<'_>) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let mut insert = |name: &str, value: &str| {
        headers
            .entry(name.trim().to_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    };

    match raw {
        RawHeaders::Collection(pairs) => {
            for (name, value) in pairs {
                insert(name, value);
            }
        }
        RawHeaders::Block(block) => {
            for line in block.split("\r\n").filter(|l| !l.trim().is_empty()) {
                if let Some((name, value)) = line.split_once(": ") {
                    insert(name, value);
                }
            }
        }
    }
    headers
}

/// Best-effort structured decode: JSON when it parses, raw text otherwise.
/// Empty bodies decode to `None`.
pub fn parse_body(text: &str) -> Option<serde_json::Value> {
    if text.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
    )
}

// =============================================================================
// Reads
// =============================================================================

/// Read filter for [`NetworkTracker::list`](super::NetworkTracker::list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFilter {
    pub method: Option<String>,
    pub state: Option<RequestState>,
    pub url_contains: Option<String>,
    /// Inclusive lower bound on the status code.
    pub min_status: Option<u16>,
}

impl RequestFilter {
    pub fn state(state: RequestState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Completed requests answered with 4xx or 5xx.
    pub fn errors() -> Self {
        Self {
            min_status: Some(400),
            ..Self::default()
        }
    }

    pub fn accepts(&self, request: &NetworkRequest) -> bool {
        self.method
            .as_ref()
            .map_or(true, |m| request.method.eq_ignore_ascii_case(m))
            && self.state.map_or(true, |s| request.state == s)
            && self
                .url_contains
                .as_ref()
                .map_or(true, |u| request.url.contains(u.as_str()))
            && self
                .min_status
                .map_or(true, |min| request.status.is_some_and(|s| s >= min))
    }
}

/// Aggregated read-only snapshot for analysis collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub client_errors: usize,
    pub server_errors: usize,
    pub average_duration_ms: Option<f64>,
    pub max_duration_ms: Option<u64>,
    pub slowest_url: Option<String>,
}

impl NetworkStats {
    pub fn from_requests(requests: &[NetworkRequest]) -> Self {
        let mut stats = Self {
            total: requests.len(),
            ..Self::default()
        };

        let mut duration_sum = 0u64;
        let mut duration_count = 0u64;
        for request in requests {
            match request.state {
                RequestState::Pending => stats.pending += 1,
                RequestState::Completed => stats.completed += 1,
                RequestState::Failed => stats.failed += 1,
            }
            match request.status {
                Some(400..=499) => stats.client_errors += 1,
                Some(500..=599) => stats.server_errors += 1,
                _ => {}
            }
            if let Some(duration) = request.duration_ms {
                duration_sum += duration;
                duration_count += 1;
                if stats.max_duration_ms.map_or(true, |max| duration > max) {
                    stats.max_duration_ms = Some(duration);
                    stats.slowest_url = Some(request.url.clone());
                }
            }
        }

        if duration_count > 0 {
            stats.average_duration_ms = Some(duration_sum as f64 / duration_count as f64);
        }
        stats
    }

    /// Share of settled requests that failed or returned an error status.
    pub fn error_rate(&self) -> f64 {
        let settled = self.completed + self.failed;
        if settled == 0 {
            return 0.0;
        }
        (self.failed + self.client_errors + self.server_errors) as f64 / settled as f64
    }
}
