// Context assembler - telemetry and selection, rendered for the model
//
// Pure formatting over monitor/registry/selection state at call time: a
// heading plus one line per event, most recent bounded slice per telemetry
// type, full summary for performance. Selected components are rendered to
// structured text (props/state pretty-printed through the serialization
// chain, hooks truncated) - a context block never carries live handles.
// The assembled string is what gets prepended to an outbound chat request.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::AssemblerConfig;
use crate::events::{RequestStatus, TelemetryStats};
use crate::host::ConsoleLevel;
use crate::monitors::{ConsoleFilter, ConsoleMonitor, DomMonitor, NetworkMonitor, PerformanceMonitor};
use crate::picker::Picker;
use crate::registry::{ComponentRecord, Registry};
use crate::serialize::{safe_clone, safe_display, truncate_chars};

/// The telemetry/context sources a chat turn can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    Console,
    Network,
    Performance,
    Dom,
    Components,
}

/// Query narrowing for a context block.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub level: Option<ConsoleLevel>,
    pub since: Option<DateTime<Utc>>,
    pub contains: Option<String>,
    /// Network: only requests that reached a terminal failure.
    pub failures_only: bool,
}

/// One "@mention" catalog entry. Immutable configuration, not runtime state.
#[derive(Debug, Clone)]
pub struct ContextOption {
    pub id: &'static str,
    pub context_type: ContextType,
    pub label: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub filter: Option<ContextFilter>,
}

/// The static mention catalog.
pub fn catalog() -> Vec<ContextOption> {
    vec![
        ContextOption {
            id: "console",
            context_type: ContextType::Console,
            label: "Console",
            icon: "terminal",
            description: "Recent console output from the page",
            filter: None,
        },
        ContextOption {
            id: "console-errors",
            context_type: ContextType::Console,
            label: "Console errors",
            icon: "alert",
            description: "Only error-level console output",
            filter: Some(ContextFilter {
                level: Some(ConsoleLevel::Error),
                ..ContextFilter::default()
            }),
        },
        ContextOption {
            id: "network",
            context_type: ContextType::Network,
            label: "Network",
            icon: "globe",
            description: "Recent fetch/XHR activity",
            filter: None,
        },
        ContextOption {
            id: "network-failures",
            context_type: ContextType::Network,
            label: "Failed requests",
            icon: "cloud-off",
            description: "Requests that errored or never completed",
            filter: Some(ContextFilter {
                failures_only: true,
                ..ContextFilter::default()
            }),
        },
        ContextOption {
            id: "performance",
            context_type: ContextType::Performance,
            label: "Performance",
            icon: "gauge",
            description: "Page load vitals and layout stability",
            filter: None,
        },
        ContextOption {
            id: "dom",
            context_type: ContextType::Dom,
            label: "DOM changes",
            icon: "layout",
            description: "Recent DOM mutations",
            filter: None,
        },
        ContextOption {
            id: "components",
            context_type: ContextType::Components,
            label: "Selected components",
            icon: "component",
            description: "Props, state and hooks of the picked components",
            filter: None,
        },
    ]
}

/// Assembles context blocks. All sources are optional; an absent source
/// yields an explicit placeholder line rather than an error.
#[derive(Default)]
pub struct ContextAssembler {
    config: AssemblerConfig,
    console: Option<Arc<ConsoleMonitor>>,
    network: Option<Arc<NetworkMonitor>>,
    performance: Option<Arc<PerformanceMonitor>>,
    dom: Option<Arc<DomMonitor>>,
    registry: Option<Arc<Registry>>,
    picker: Option<Arc<Picker>>,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_console(mut self, monitor: Arc<ConsoleMonitor>) -> Self {
        self.console = Some(monitor);
        self
    }

    pub fn with_network(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn with_performance(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.performance = Some(monitor);
        self
    }

    pub fn with_dom(mut self, monitor: Arc<DomMonitor>) -> Self {
        self.dom = Some(monitor);
        self
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_picker(mut self, picker: Arc<Picker>) -> Self {
        self.picker = Some(picker);
        self
    }

    /// Render one context block. Never fails, never returns an empty string.
    pub fn context_for(&self, context_type: ContextType, filter: Option<&ContextFilter>) -> String {
        match context_type {
            ContextType::Console => self.console_block(filter),
            ContextType::Network => self.network_block(filter),
            ContextType::Performance => self.performance_block(),
            ContextType::Dom => self.dom_block(),
            ContextType::Components => self.components_block(),
        }
    }

    /// Aggregate counters over every attached monitor.
    pub fn stats(&self) -> TelemetryStats {
        let mut stats = TelemetryStats::default();
        if let Some(console) = &self.console {
            let entries = console.entries(&ConsoleFilter::default());
            stats.console_total = entries.len();
            stats.console_errors = entries
                .iter()
                .filter(|e| e.level == ConsoleLevel::Error)
                .count();
            stats.console_warnings = entries
                .iter()
                .filter(|e| e.level == ConsoleLevel::Warn)
                .count();
        }
        if let Some(network) = &self.network {
            let entries = network.entries();
            stats.requests_total = entries.len();
            stats.requests_completed = entries
                .iter()
                .filter(|e| e.status == RequestStatus::Completed)
                .count();
            stats.requests_failed = entries
                .iter()
                .filter(|e| e.status == RequestStatus::Failed)
                .count();
            let durations: Vec<f64> = entries.iter().filter_map(|e| e.duration_ms).collect();
            if !durations.is_empty() {
                stats.avg_request_ms = durations.iter().sum::<f64>() / durations.len() as f64;
            }
        }
        if let Some(dom) = &self.dom {
            stats.dom_mutations = dom.len();
        }
        if let Some(performance) = &self.performance {
            stats.perf_entries = performance.len();
            stats.cumulative_layout_shift = performance.cumulative_layout_shift();
        }
        stats
    }

    // ── Blocks ───────────────────────────────────────────────────────────

    fn console_block(&self, filter: Option<&ContextFilter>) -> String {
        let Some(monitor) = &self.console else {
            return "## Console\n(console monitor not active)".to_string();
        };
        let console_filter = ConsoleFilter {
            level: filter.and_then(|f| f.level),
            since: filter.and_then(|f| f.since),
            contains: filter.and_then(|f| f.contains.clone()),
        };
        let matched = monitor.entries(&console_filter);
        let total = matched.len();
        let slice_start = total.saturating_sub(self.config.console_slice);
        let shown = &matched[slice_start..];

        if shown.is_empty() {
            return "## Console\n(no console output captured)".to_string();
        }
        let mut block = format!("## Console (last {} of {})\n", shown.len(), total);
        for entry in shown {
            block.push_str(&format!(
                "[{}] {} {}",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.level.as_str().to_uppercase(),
                truncate_chars(&entry.formatted, self.config.value_preview_chars),
            ));
            if let Some(call_site) = &entry.call_site {
                block.push_str(&format!("  (at {call_site})"));
            }
            block.push('\n');
        }
        block.trim_end().to_string()
    }

    fn network_block(&self, filter: Option<&ContextFilter>) -> String {
        let Some(monitor) = &self.network else {
            return "## Network\n(network monitor not active)".to_string();
        };
        let entries = if filter.is_some_and(|f| f.failures_only) {
            monitor.failures()
        } else {
            monitor.entries()
        };
        let total = entries.len();
        let slice_start = total.saturating_sub(self.config.network_slice);
        let shown = &entries[slice_start..];

        if shown.is_empty() {
            return "## Network\n(no requests captured)".to_string();
        }
        let mut block = format!("## Network (last {} of {})\n", shown.len(), total);
        for entry in shown {
            let status = match entry.status {
                RequestStatus::Pending => "pending".to_string(),
                RequestStatus::Completed => entry
                    .status_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "done".to_string()),
                RequestStatus::Failed => {
                    format!("FAILED: {}", entry.error.as_deref().unwrap_or("unknown"))
                }
            };
            let duration = entry
                .duration_ms
                .map(|d| format!(" ({d:.1}ms)"))
                .unwrap_or_default();
            block.push_str(&format!(
                "{} {} -> {}{}\n",
                entry.method, entry.url, status, duration
            ));
        }
        block.trim_end().to_string()
    }

    fn performance_block(&self) -> String {
        let Some(monitor) = &self.performance else {
            return "## Performance\n(performance monitor not active)".to_string();
        };
        let summary = monitor.summary();
        let mut block = String::from("## Performance\n");
        push_metric(&mut block, "Page load", summary.page_load_ms);
        push_metric(&mut block, "TTFB", summary.ttfb_ms);
        push_metric(&mut block, "First paint", summary.first_paint_ms);
        push_metric(&mut block, "First contentful paint", summary.first_contentful_paint_ms);
        push_metric(&mut block, "Largest contentful paint", summary.largest_contentful_paint_ms);
        push_metric(&mut block, "First input delay", summary.first_input_delay_ms);
        block.push_str(&format!(
            "Cumulative layout shift: {:.4}\n",
            summary.cumulative_layout_shift
        ));
        block.push_str(&format!("Resources loaded: {}", summary.resource_count));
        block
    }

    fn dom_block(&self) -> String {
        let Some(monitor) = &self.dom else {
            return "## DOM changes\n(dom monitor not active)".to_string();
        };
        let shown = monitor.recent(self.config.dom_slice);
        let total = monitor.len();
        if shown.is_empty() {
            return "## DOM changes\n(no mutations captured)".to_string();
        }
        let mut block = format!("## DOM changes (last {} of {})\n", shown.len(), total);
        for change in &shown {
            let detail = match change.kind {
                crate::host::MutationKind::Attributes => format!(
                    "{}: {:?} -> {:?}",
                    change.attribute.as_deref().unwrap_or("?"),
                    change.old_value.as_deref().unwrap_or(""),
                    change.new_value.as_deref().unwrap_or(""),
                ),
                crate::host::MutationKind::CharacterData => format!(
                    "text: {:?} -> {:?}",
                    change.old_value.as_deref().unwrap_or(""),
                    change.new_value.as_deref().unwrap_or(""),
                ),
                crate::host::MutationKind::ChildList => {
                    format!("+{:?} -{:?}", change.added, change.removed)
                }
            };
            block.push_str(&format!("[{:?}] {} {}\n", change.kind, change.target_path, detail));
        }
        block.trim_end().to_string()
    }

    fn components_block(&self) -> String {
        let selected = self
            .picker
            .as_ref()
            .map(|p| p.selected())
            .unwrap_or_default();
        if selected.is_empty() {
            return "## Selected components\nNo components are currently selected. \
                    Use the picker to select one."
                .to_string();
        }
        let mut block = String::from("## Selected components\n");
        for record in &selected {
            block.push_str(&self.render_component(record));
            block.push('\n');
        }
        block.trim_end().to_string()
    }

    fn render_component(&self, record: &ComponentRecord) -> String {
        let cap = self.config.value_preview_chars;
        let mut out = format!("### {} ({:?})\n", record.name, record.kind);
        out.push_str(&format!("id: {}\n", record.id));
        if let Some(source) = &record.source_location {
            out.push_str(&format!(
                "source: {}:{}:{}\n",
                source.file, source.line, source.column
            ));
        }
        if let Some(parent) = self
            .registry
            .as_ref()
            .and_then(|r| record.parent.as_deref().and_then(|id| r.by_id(id)))
        {
            out.push_str(&format!("parent: {}\n", parent.name));
        }

        match &record.props {
            Some(props) => {
                let rendered = serde_json::to_string_pretty(&safe_clone(props))
                    .unwrap_or_else(|_| "{}".to_string());
                out.push_str(&format!("props:\n{}\n", truncate_chars(&rendered, cap)));
            }
            None => out.push_str("props: (none)\n"),
        }
        if let Some(state) = &record.state {
            let rendered = serde_json::to_string_pretty(&safe_clone(state))
                .unwrap_or_else(|_| "{}".to_string());
            out.push_str(&format!("state:\n{}\n", truncate_chars(&rendered, cap)));
        }

        if record.hooks.is_empty() {
            out.push_str("hooks: (none)\n");
        } else {
            let preview = self.config.hook_preview;
            out.push_str(&format!("hooks ({} total):\n", record.hooks.len()));
            for hook in record.hooks.iter().take(preview) {
                out.push_str(&format!(
                    "  [{}] {}\n",
                    hook.index,
                    safe_display(&hook.value, 80)
                ));
            }
            if record.hooks.len() > preview {
                out.push_str(&format!("  … {} more\n", record.hooks.len() - preview));
            }
        }
        out
    }
}

fn push_metric(block: &mut String, label: &str, value: Option<f64>) {
    match value {
        Some(v) => block.push_str(&format!("{label}: {v:.0}ms\n")),
        None => block.push_str(&format!("{label}: n/a\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimPage;
    use crate::host::{HostValue, PerfEntry, PerfEntryType};

    fn assembler_with_console() -> (Arc<SimPage>, ContextAssembler) {
        let page = SimPage::new();
        let console = ConsoleMonitor::new(page.clone(), 100);
        console.start().unwrap();
        let assembler = ContextAssembler::new(AssemblerConfig::default()).with_console(console);
        (page, assembler)
    }

    #[test]
    fn test_console_block_heading_and_lines() {
        let (page, assembler) = assembler_with_console();
        page.console_error(&[HostValue::string("boom")]);
        page.console_log(&[HostValue::string("fine")]);

        let block = assembler.context_for(ContextType::Console, None);
        assert!(block.starts_with("## Console (last 2 of 2)"));
        assert!(block.contains("ERROR boom"));
        assert!(block.contains("LOG fine"));
    }

    #[test]
    fn test_console_block_respects_slice_and_filter() {
        let (page, assembler) = assembler_with_console();
        for i in 0..60 {
            page.console_log(&[HostValue::string(format!("line {i}"))]);
        }
        let block = assembler.context_for(ContextType::Console, None);
        assert!(block.starts_with("## Console (last 50 of 60)"));
        assert!(!block.contains("line 9\n"), "old entries fall out of the slice");

        let filter = ContextFilter {
            contains: Some("line 59".into()),
            ..ContextFilter::default()
        };
        let block = assembler.context_for(ContextType::Console, Some(&filter));
        assert!(block.contains("last 1 of 1"));
    }

    #[test]
    fn test_components_block_empty_selection_is_explicit() {
        let assembler = ContextAssembler::new(AssemblerConfig::default());
        let block = assembler.context_for(ContextType::Components, None);
        assert!(!block.is_empty());
        assert!(block.contains("No components are currently selected"));
    }

    #[test]
    fn test_missing_monitors_yield_placeholders() {
        let assembler = ContextAssembler::new(AssemblerConfig::default());
        for context_type in [
            ContextType::Console,
            ContextType::Network,
            ContextType::Performance,
            ContextType::Dom,
        ] {
            let block = assembler.context_for(context_type, None);
            assert!(block.contains("not active"), "{context_type:?} placeholder");
        }
    }

    #[test]
    fn test_performance_block_includes_cls() {
        let page = SimPage::new();
        let monitor = PerformanceMonitor::new(page.clone());
        monitor.start().unwrap();
        page.emit_perf(PerfEntry {
            entry_type: PerfEntryType::LayoutShift,
            name: "layout-shift".into(),
            start_time: 10.0,
            duration: 0.0,
            detail: serde_json::json!({"value": 0.25, "had_recent_input": false}),
        });
        let assembler = ContextAssembler::new(AssemblerConfig::default()).with_performance(monitor);
        let block = assembler.context_for(ContextType::Performance, None);
        assert!(block.contains("Cumulative layout shift: 0.2500"));
        assert!(block.contains("Page load: n/a"));
    }

    #[test]
    fn test_catalog_is_complete_and_stable() {
        let options = catalog();
        assert_eq!(options.len(), 7);
        assert!(options.iter().any(|o| o.id == "components"));
        let errors_option = options.iter().find(|o| o.id == "console-errors").unwrap();
        assert_eq!(
            errors_option.filter.as_ref().and_then(|f| f.level),
            Some(ConsoleLevel::Error)
        );
    }

    #[test]
    fn test_stats_aggregation() {
        let (page, assembler) = assembler_with_console();
        page.console_error(&[HostValue::string("x")]);
        page.console_log(&[HostValue::string("y")]);
        let stats = assembler.stats();
        assert_eq!(stats.console_total, 2);
        assert_eq!(stats.console_errors, 1);
        assert_eq!(stats.requests_total, 0);
    }
}
