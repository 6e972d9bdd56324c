// Telemetry events captured from the host page
//
// These are the typed records the four monitors buffer and the context
// assembler formats. Using a tagged enum allows pattern matching and gives
// the JSONL export a self-describing {"type": "console", ...} shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::{ConsoleLevel, MutationKind, PerfEntry};

/// One captured telemetry event, any monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Console(ConsoleEntry),
    Network(NetworkRequest),
    Performance(PerformanceMetric),
    Dom(DomChange),
}

impl TelemetryEvent {
    pub fn id(&self) -> &str {
        match self {
            TelemetryEvent::Console(e) => &e.id,
            TelemetryEvent::Network(e) => &e.id,
            TelemetryEvent::Performance(e) => &e.id,
            TelemetryEvent::Dom(e) => &e.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryEvent::Console(e) => e.timestamp,
            TelemetryEvent::Network(e) => e.started_at,
            TelemetryEvent::Performance(e) => e.timestamp,
            TelemetryEvent::Dom(e) => e.timestamp,
        }
    }
}

/// A captured console call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLevel,
    /// Human-readable rendering of the arguments, one line.
    pub formatted: String,
    /// Safe-serialized arguments (no live references).
    pub args: Vec<serde_json::Value>,
    /// Best-effort "function (file:line:col)" parsed from the stack.
    pub call_site: Option<String>,
}

/// Terminal state of an observed network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

/// Which interception path produced a network entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestInitiator {
    Fetch,
    Xhr,
}

/// An observed network request, updated in place when it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub id: String,
    pub initiator: RequestInitiator,
    pub method: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

/// One performance timeline entry plus capture metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: PerfEntry,
}

/// One observed DOM mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomChange {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MutationKind,
    /// CSS-path-like locator of the affected element.
    pub target_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

/// Aggregate statistics over the monitors, for the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetryStats {
    pub console_total: usize,
    pub console_errors: usize,
    pub console_warnings: usize,
    pub requests_total: usize,
    pub requests_completed: usize,
    pub requests_failed: usize,
    pub avg_request_ms: f64,
    pub dom_mutations: usize,
    pub perf_entries: usize,
    pub cumulative_layout_shift: f64,
}

impl TelemetryStats {
    pub fn request_success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            0.0
        } else {
            (self.requests_completed as f64 / self.requests_total as f64) * 100.0
        }
    }
}

/// Render console-style arguments into one display line: bare strings stay
/// bare, everything else gets its JSON rendering.
pub fn format_args(args: &[serde_json::Value]) -> String {
    args.iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Helper to generate unique ids for telemetry entries.
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let count = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", Utc::now().timestamp_millis(), count)
}
