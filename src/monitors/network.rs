// Network monitor - observes fetch and XHR without touching their contracts
//
// Both interception paths feed one capped log. A request entry is created
// when the call is observed and completed in place when the host delivers
// the terminal callback; requests whose entries were evicted in between are
// dropped quietly. The wrapped APIs keep their own shapes: fetch stays
// promise-shaped, XHR callbacks fire at their original times, and the
// monitor never changes a result the host code sees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};

use crate::config::VERSION;
use crate::error::Result;
use crate::events::{
    generate_id, NetworkRequest, RequestInitiator, RequestStatus, TelemetryEvent,
};
use crate::host::{FetchTap, HostPage, HostRequest, HostResponse, HostValue, XhrTap};
use crate::serialize::safe_clone;

use super::{GuardSlot, RingLog, Tee};

pub struct NetworkMonitor {
    page: Arc<dyn HostPage>,
    state: Arc<NetState>,
    fetch_guard: GuardSlot,
    xhr_guard: GuardSlot,
}

struct NetState {
    log: Mutex<RingLog<NetworkRequest>>,
    /// (initiator, host token) -> (entry id, start instant)
    pending: Mutex<HashMap<(RequestInitiator, u64), (String, Instant)>>,
    tee: Mutex<Tee>,
}

impl NetworkMonitor {
    pub fn new(page: Arc<dyn HostPage>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            page,
            state: Arc::new(NetState {
                log: Mutex::new(RingLog::new(capacity)),
                pending: Mutex::new(HashMap::new()),
                tee: Mutex::new(Tee::default()),
            }),
            fetch_guard: GuardSlot::new(),
            xhr_guard: GuardSlot::new(),
        })
    }

    pub fn with_tee(&self, sender: tokio::sync::mpsc::Sender<TelemetryEvent>) {
        crate::lock(&self.state.tee).set(sender);
    }

    /// Install both taps. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let fetch_tap = Arc::new(FetchSide(self.state.clone()));
        let fetch_guard = self.page.fetch().install(fetch_tap)?;
        let xhr_tap = Arc::new(XhrSide(self.state.clone()));
        let xhr_guard = match self.page.xhr().install(xhr_tap) {
            Ok(guard) => guard,
            Err(e) => {
                // Leave nothing half-installed.
                let mut fetch_guard = fetch_guard;
                fetch_guard.restore();
                return Err(e);
            }
        };
        self.fetch_guard.install(fetch_guard);
        self.xhr_guard.install(xhr_guard);
        tracing::debug!("network monitor started");
        Ok(())
    }

    /// Restore fetch and XHR. Always succeeds.
    pub fn stop(&self) {
        self.fetch_guard.release();
        self.xhr_guard.release();
    }

    pub fn is_running(&self) -> bool {
        self.fetch_guard.is_active() || self.xhr_guard.is_active()
    }

    /// All captured requests, insertion order.
    pub fn entries(&self) -> Vec<NetworkRequest> {
        crate::lock(&self.state.log).snapshot()
    }

    /// Only requests that reached a terminal failure.
    pub fn failures(&self) -> Vec<NetworkRequest> {
        crate::lock(&self.state.log)
            .iter()
            .filter(|r| r.status == RequestStatus::Failed)
            .cloned()
            .collect()
    }

    /// The newest `count` requests.
    pub fn recent(&self, count: usize) -> Vec<NetworkRequest> {
        crate::lock(&self.state.log).tail(count)
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.state.log).len()
    }

    pub fn is_empty(&self) -> bool {
        crate::lock(&self.state.log).is_empty()
    }

    /// HAR-style structured export of the captured log, derivable at any
    /// time regardless of monitor state.
    pub fn har(&self) -> Value {
        let entries: Vec<Value> = crate::lock(&self.state.log)
            .iter()
            .map(|request| {
                json!({
                    "startedDateTime": request.started_at.to_rfc3339(),
                    "time": request.duration_ms.unwrap_or(0.0),
                    "request": {
                        "method": request.method,
                        "url": request.url,
                        "headers": header_pairs(&request.request_headers),
                        "postData": request.request_body,
                    },
                    "response": {
                        "status": request.status_code.unwrap_or(0),
                        "headers": header_pairs(&request.response_headers),
                        "content": { "text": request.response_body },
                    },
                    "_initiator": request.initiator,
                    "_status": request.status,
                    "_error": request.error,
                })
            })
            .collect();
        json!({
            "log": {
                "version": "1.2",
                "creator": { "name": "rspy", "version": VERSION },
                "entries": entries,
            }
        })
    }
}

impl NetState {
    fn open(&self, initiator: RequestInitiator, token: u64, request: &HostRequest) {
        let entry = NetworkRequest {
            id: generate_id(),
            initiator,
            method: request.method.clone(),
            url: request.url.clone(),
            started_at: Utc::now(),
            status: RequestStatus::Pending,
            status_code: None,
            request_body: request.body.as_ref().map(capture_request_body),
            request_headers: request.headers.clone(),
            response_headers: Vec::new(),
            response_body: None,
            error: None,
            duration_ms: None,
        };
        crate::lock(&self.pending)
            .insert((initiator, token), (entry.id.clone(), Instant::now()));
        crate::lock(&self.log).push(entry);
    }

    fn close(
        &self,
        initiator: RequestInitiator,
        token: u64,
        outcome: std::result::Result<&HostResponse, &str>,
    ) {
        let Some((entry_id, started)) = crate::lock(&self.pending).remove(&(initiator, token))
        else {
            return;
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut log = crate::lock(&self.log);
        let Some(entry) = log.iter_mut().find(|e| e.id == entry_id) else {
            // Evicted while in flight; nothing to update.
            return;
        };
        match outcome {
            Ok(response) => {
                entry.status = RequestStatus::Completed;
                entry.status_code = Some(response.status);
                entry.response_headers = response.headers.clone();
                entry.response_body = Some(parse_response_body(response));
            }
            Err(error) => {
                entry.status = RequestStatus::Failed;
                entry.error = Some(error.to_string());
            }
        }
        entry.duration_ms = Some(duration_ms);
        let finished = entry.clone();
        drop(log);
        crate::lock(&self.tee).forward(TelemetryEvent::Network(finished));
    }
}

struct FetchSide(Arc<NetState>);

impl FetchTap for FetchSide {
    fn on_request(&self, token: u64, request: &HostRequest) {
        self.0.open(RequestInitiator::Fetch, token, request);
    }

    fn on_response(&self, token: u64, response: &HostResponse) {
        self.0.close(RequestInitiator::Fetch, token, Ok(response));
    }

    fn on_failure(&self, token: u64, error: &str) {
        self.0.close(RequestInitiator::Fetch, token, Err(error));
    }
}

struct XhrSide(Arc<NetState>);

impl XhrTap for XhrSide {
    fn on_send(&self, token: u64, request: &HostRequest) {
        self.0.open(RequestInitiator::Xhr, token, request);
    }

    fn on_load(&self, token: u64, response: &HostResponse) {
        self.0.close(RequestInitiator::Xhr, token, Ok(response));
    }

    fn on_error(&self, token: u64, error: &str) {
        self.0.close(RequestInitiator::Xhr, token, Err(error));
    }
}

/// Request bodies: strings pass through, form-data-style objects flatten to
/// a mapping, binary decodes best-effort as text.
fn capture_request_body(body: &HostValue) -> Value {
    match body {
        HostValue::String(s) => Value::String(s.clone()),
        HostValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => json!({ "binary_bytes": bytes.len() }),
        },
        other => safe_clone(other),
    }
}

/// Response bodies: JSON when the content-type says so, else text, else a
/// byte-count placeholder.
fn parse_response_body(response: &HostResponse) -> Value {
    let content_type = response.header("content-type").unwrap_or("");
    match &response.body {
        HostValue::String(text) if content_type.contains("json") => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        HostValue::String(text) => Value::String(text.clone()),
        HostValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => json!({ "binary_bytes": bytes.len() }),
        },
        other => safe_clone(other),
    }
}

fn header_pairs(headers: &[(String, String)]) -> Vec<Value> {
    headers
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}
