// Performance monitor - timeline entries and derived vitals
//
// Subscribes to every entry stream the platform offers and keeps the raw
// per-type log append-only (the timeline is the platform's own bounded
// surface; eviction here would silently skew the derived summary). On top
// of the log it maintains a rolling cumulative-layout-shift total that only
// counts shifts without recent input attribution, and derives the usual
// vitals summary on demand.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::events::{generate_id, PerformanceMetric, TelemetryEvent};
use crate::host::{HostPage, PerfEntry, PerfEntryType};

use super::{GuardSlot, RingLog, Tee};

/// Derived vitals, all milliseconds unless noted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    pub page_load_ms: Option<f64>,
    pub ttfb_ms: Option<f64>,
    pub first_paint_ms: Option<f64>,
    pub first_contentful_paint_ms: Option<f64>,
    pub largest_contentful_paint_ms: Option<f64>,
    pub first_input_delay_ms: Option<f64>,
    /// Unitless score.
    pub cumulative_layout_shift: f64,
    pub resource_count: usize,
}

pub struct PerformanceMonitor {
    page: Arc<dyn HostPage>,
    state: Arc<PerfState>,
    guard: GuardSlot,
}

struct PerfState {
    /// Append-only (capacity 0): the raw timeline.
    log: Mutex<RingLog<PerformanceMetric>>,
    /// Rolling CLS total, input-attributed shifts excluded.
    cls: Mutex<f64>,
    tee: Mutex<Tee>,
}

impl PerformanceMonitor {
    pub fn new(page: Arc<dyn HostPage>) -> Arc<Self> {
        Arc::new(Self {
            page,
            state: Arc::new(PerfState {
                log: Mutex::new(RingLog::new(0)),
                cls: Mutex::new(0.0),
                tee: Mutex::new(Tee::default()),
            }),
            guard: GuardSlot::new(),
        })
    }

    pub fn with_tee(&self, sender: tokio::sync::mpsc::Sender<TelemetryEvent>) {
        crate::lock(&self.state.tee).set(sender);
    }

    /// Subscribe to all entry streams. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.guard.is_active() {
            return Ok(());
        }
        let state = self.state.clone();
        let guard = self.page.performance().observe(
            &PerfEntryType::ALL,
            Arc::new(move |entry| state.ingest(entry)),
        )?;
        if self.guard.install(guard) {
            tracing::debug!("performance monitor started");
        }
        Ok(())
    }

    /// Disconnect the observer. Always succeeds.
    pub fn stop(&self) {
        self.guard.release();
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Raw entries, optionally restricted to one stream.
    pub fn entries(&self, entry_type: Option<PerfEntryType>) -> Vec<PerformanceMetric> {
        crate::lock(&self.state.log)
            .iter()
            .filter(|metric| entry_type.map_or(true, |t| metric.entry.entry_type == t))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.state.log).len()
    }

    pub fn is_empty(&self) -> bool {
        crate::lock(&self.state.log).is_empty()
    }

    /// Current rolling CLS total.
    pub fn cumulative_layout_shift(&self) -> f64 {
        *crate::lock(&self.state.cls)
    }

    /// Derive the vitals summary from the captured timeline.
    pub fn summary(&self) -> PerformanceSummary {
        let log = crate::lock(&self.state.log);
        let mut summary = PerformanceSummary {
            cumulative_layout_shift: *crate::lock(&self.state.cls),
            ..PerformanceSummary::default()
        };

        for metric in log.iter() {
            let entry = &metric.entry;
            match entry.entry_type {
                PerfEntryType::Navigation => {
                    summary.page_load_ms = entry
                        .detail
                        .get("load_event_end")
                        .and_then(|v| v.as_f64())
                        .or(Some(entry.duration));
                    summary.ttfb_ms = entry.detail.get("response_start").and_then(|v| v.as_f64());
                }
                PerfEntryType::Paint => match entry.name.as_str() {
                    "first-paint" => summary.first_paint_ms = Some(entry.start_time),
                    "first-contentful-paint" => {
                        summary.first_contentful_paint_ms = Some(entry.start_time)
                    }
                    _ => {}
                },
                PerfEntryType::LargestContentfulPaint => {
                    // The latest candidate wins, as in the platform API.
                    let candidate = entry.start_time;
                    summary.largest_contentful_paint_ms = Some(
                        summary
                            .largest_contentful_paint_ms
                            .map_or(candidate, |current| current.max(candidate)),
                    );
                }
                PerfEntryType::FirstInput => {
                    if summary.first_input_delay_ms.is_none() {
                        let processing = entry
                            .detail
                            .get("processing_start")
                            .and_then(|v| v.as_f64())
                            .unwrap_or(entry.start_time);
                        summary.first_input_delay_ms = Some(processing - entry.start_time);
                    }
                }
                PerfEntryType::Resource => summary.resource_count += 1,
                PerfEntryType::LayoutShift | PerfEntryType::Mark | PerfEntryType::Measure => {}
            }
        }
        summary
    }
}

impl PerfState {
    fn ingest(&self, entry: PerfEntry) {
        if entry.entry_type == PerfEntryType::LayoutShift {
            let had_recent_input = entry
                .detail
                .get("had_recent_input")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !had_recent_input {
                if let Some(value) = entry.detail.get("value").and_then(|v| v.as_f64()) {
                    *crate::lock(&self.cls) += value;
                }
            }
        }
        let metric = PerformanceMetric {
            id: generate_id(),
            timestamp: Utc::now(),
            entry,
        };
        crate::lock(&self.tee).forward(TelemetryEvent::Performance(metric.clone()));
        crate::lock(&self.log).push(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimPage;
    use serde_json::json;

    fn entry(entry_type: PerfEntryType, name: &str, start: f64, detail: serde_json::Value) -> PerfEntry {
        PerfEntry {
            entry_type,
            name: name.into(),
            start_time: start,
            duration: 0.0,
            detail,
        }
    }

    fn started_monitor() -> (Arc<SimPage>, Arc<PerformanceMonitor>) {
        let page = SimPage::new();
        let monitor = PerformanceMonitor::new(page.clone());
        monitor.start().unwrap();
        (page, monitor)
    }

    #[test]
    fn test_cls_skips_input_attributed_shifts() {
        let (page, monitor) = started_monitor();
        page.emit_perf(entry(
            PerfEntryType::LayoutShift,
            "layout-shift",
            100.0,
            json!({"value": 0.08, "had_recent_input": false}),
        ));
        page.emit_perf(entry(
            PerfEntryType::LayoutShift,
            "layout-shift",
            150.0,
            json!({"value": 0.5, "had_recent_input": true}),
        ));
        page.emit_perf(entry(
            PerfEntryType::LayoutShift,
            "layout-shift",
            200.0,
            json!({"value": 0.02, "had_recent_input": false}),
        ));
        assert!((monitor.cumulative_layout_shift() - 0.10).abs() < 1e-9);
        // The raw log still holds all three entries.
        assert_eq!(monitor.entries(Some(PerfEntryType::LayoutShift)).len(), 3);
    }

    #[test]
    fn test_summary_derivation() {
        let (page, monitor) = started_monitor();
        page.emit_perf(entry(
            PerfEntryType::Navigation,
            "document",
            0.0,
            json!({"response_start": 120.0, "load_event_end": 1800.0}),
        ));
        page.emit_perf(entry(PerfEntryType::Paint, "first-paint", 300.0, json!({})));
        page.emit_perf(entry(
            PerfEntryType::Paint,
            "first-contentful-paint",
            450.0,
            json!({}),
        ));
        page.emit_perf(entry(
            PerfEntryType::LargestContentfulPaint,
            "largest-contentful-paint",
            900.0,
            json!({}),
        ));
        page.emit_perf(entry(
            PerfEntryType::LargestContentfulPaint,
            "largest-contentful-paint",
            1200.0,
            json!({}),
        ));
        page.emit_perf(entry(
            PerfEntryType::FirstInput,
            "pointerdown",
            600.0,
            json!({"processing_start": 648.0}),
        ));
        page.emit_perf(entry(PerfEntryType::Resource, "/logo.png", 50.0, json!({})));
        page.emit_perf(entry(PerfEntryType::Resource, "/app.js", 60.0, json!({})));

        let summary = monitor.summary();
        assert_eq!(summary.page_load_ms, Some(1800.0));
        assert_eq!(summary.ttfb_ms, Some(120.0));
        assert_eq!(summary.first_paint_ms, Some(300.0));
        assert_eq!(summary.first_contentful_paint_ms, Some(450.0));
        assert_eq!(summary.largest_contentful_paint_ms, Some(1200.0));
        assert_eq!(summary.first_input_delay_ms, Some(48.0));
        assert_eq!(summary.resource_count, 2);
    }

    #[test]
    fn test_stop_disconnects_and_double_start_is_noop() {
        let (page, monitor) = started_monitor();
        monitor.start().unwrap();
        page.emit_perf(entry(PerfEntryType::Mark, "boot", 10.0, json!({})));
        assert_eq!(monitor.len(), 1, "double start must not double-capture");

        monitor.stop();
        assert!(!monitor.is_running());
        page.emit_perf(entry(PerfEntryType::Mark, "after", 20.0, json!({})));
        assert_eq!(monitor.len(), 1);
        // Stop again: still fine.
        monitor.stop();
    }

    #[test]
    fn test_summary_on_empty_timeline() {
        let page = SimPage::new();
        let monitor = PerformanceMonitor::new(page);
        let summary = monitor.summary();
        assert_eq!(summary.page_load_ms, None);
        assert_eq!(summary.cumulative_layout_shift, 0.0);
        assert_eq!(summary.resource_count, 0);
    }
}
