// Console monitor - wraps the page's console methods
//
// Interception never hides output: the host's original method has already
// run by the time the tap fires (the hook contract). Arguments are deep-
// cloned through the serialization chain, the call site is parsed out of the
// captured stack string, and the entry lands in a capped ring log.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::Result;
use crate::events::{format_args, generate_id, ConsoleEntry, TelemetryEvent};
use crate::host::{ConsoleLevel, ConsoleTap, HostPage, HostValue};
use crate::serialize::safe_clone;

use super::{GuardSlot, RingLog, Tee};

/// Query filter for captured console entries.
#[derive(Debug, Clone, Default)]
pub struct ConsoleFilter {
    pub level: Option<ConsoleLevel>,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring over the formatted text.
    pub contains: Option<String>,
}

pub struct ConsoleMonitor {
    page: Arc<dyn HostPage>,
    log: Arc<Mutex<RingLog<ConsoleEntry>>>,
    guard: GuardSlot,
    tee: Mutex<Tee>,
}

impl ConsoleMonitor {
    pub fn new(page: Arc<dyn HostPage>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            page,
            log: Arc::new(Mutex::new(RingLog::new(capacity))),
            guard: GuardSlot::new(),
            tee: Mutex::new(Tee::default()),
        })
    }

    /// Forward captured entries to the session exporter as well.
    pub fn with_tee(&self, sender: tokio::sync::mpsc::Sender<TelemetryEvent>) {
        crate::lock(&self.tee).set(sender);
    }

    /// Install the console tap. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.guard.is_active() {
            return Ok(());
        }
        let tap = Arc::new(Tap {
            log: self.log.clone(),
            tee: crate::lock(&self.tee).clone(),
        });
        let guard = self.page.console().install(tap)?;
        if self.guard.install(guard) {
            tracing::debug!("console monitor started");
        }
        Ok(())
    }

    /// Restore the original console methods. Always succeeds.
    pub fn stop(&self) {
        self.guard.release();
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Filtered entries, insertion order preserved.
    pub fn entries(&self, filter: &ConsoleFilter) -> Vec<ConsoleEntry> {
        crate::lock(&self.log)
            .iter()
            .filter(|entry| {
                filter.level.map_or(true, |level| entry.level == level)
                    && filter.since.map_or(true, |since| entry.timestamp >= since)
                    && filter.contains.as_ref().map_or(true, |needle| {
                        entry
                            .formatted
                            .to_lowercase()
                            .contains(&needle.to_lowercase())
                    })
            })
            .cloned()
            .collect()
    }

    /// The newest `count` entries.
    pub fn recent(&self, count: usize) -> Vec<ConsoleEntry> {
        crate::lock(&self.log).tail(count)
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        crate::lock(&self.log).is_empty()
    }
}

struct Tap {
    log: Arc<Mutex<RingLog<ConsoleEntry>>>,
    tee: Tee,
}

impl ConsoleTap for Tap {
    fn on_call(&self, level: ConsoleLevel, args: &[HostValue], stack: Option<&str>) {
        // Everything below is best-effort; an entry that cannot be built is
        // dropped rather than disturbing the intercepted call.
        let args: Vec<serde_json::Value> = args.iter().map(safe_clone).collect();
        let entry = ConsoleEntry {
            id: generate_id(),
            timestamp: Utc::now(),
            level,
            formatted: format_args(&args),
            args,
            call_site: stack.and_then(parse_call_site),
        };
        self.tee.forward(TelemetryEvent::Console(entry.clone()));
        crate::lock(&self.log).push(entry);
    }
}

/// Pull the first app frame out of a stack string:
/// "    at handleClick (https://app/x.js:88:13)" -> "handleClick (x.js:88:13)"
fn parse_call_site(stack: &str) -> Option<String> {
    // Function name, then (url:line:col); tolerates a missing function name.
    static FRAME: OnceLock<Option<Regex>> = OnceLock::new();
    let frame = FRAME
        .get_or_init(|| Regex::new(r"at\s+(?:(\S+)\s+)?\(?([^()\s]+):(\d+):(\d+)\)?").ok())
        .as_ref()?;

    let captures = frame.captures(stack)?;
    let function = captures.get(1).map(|m| m.as_str()).unwrap_or("<anonymous>");
    let file = captures.get(2)?.as_str();
    let file_short = file.rsplit('/').next().unwrap_or(file);
    let line = captures.get(3)?.as_str();
    let column = captures.get(4)?.as_str();
    Some(format!("{function} ({file_short}:{line}:{column})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimPage;

    fn started_monitor() -> (Arc<SimPage>, Arc<ConsoleMonitor>) {
        let page = SimPage::new();
        let monitor = ConsoleMonitor::new(page.clone(), 5);
        monitor.start().unwrap();
        (page, monitor)
    }

    #[test]
    fn test_capture_preserves_original_output() {
        let (page, monitor) = started_monitor();
        page.console_error(&[
            HostValue::string("boom"),
            HostValue::object([("a", HostValue::number(1.0))]),
        ]);

        let entries = monitor.entries(&ConsoleFilter {
            level: Some(ConsoleLevel::Error),
            ..Default::default()
        });
        assert_eq!(entries.len(), 1);
        assert!(entries[0].formatted.contains("boom"));
        assert!(entries[0].formatted.contains("{\"a\":1}"));
        // The page's own console still printed.
        assert_eq!(page.console_sim().printed().len(), 1);
    }

    #[test]
    fn test_stop_restores_and_silences_capture() {
        let (page, monitor) = started_monitor();
        let before = page.console_sim().writer_ptr();
        monitor.stop();
        // Stopped monitor: original behavior, no new entries.
        assert_eq!(page.console_sim().writer_ptr(), before);
        page.console_log(&[HostValue::string("quiet")]);
        assert!(monitor.is_empty());
        assert_eq!(page.console_sim().printed().len(), 1);
    }

    #[test]
    fn test_stop_without_start_is_fine() {
        let page = SimPage::new();
        let monitor = ConsoleMonitor::new(page, 5);
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_double_start_is_noop() {
        let (page, monitor) = started_monitor();
        let installed = page.console_sim().writer_ptr();
        monitor.start().unwrap();
        assert_eq!(
            page.console_sim().writer_ptr(),
            installed,
            "second start must not stack another wrapper"
        );
        page.console_log(&[HostValue::string("once")]);
        assert_eq!(monitor.len(), 1, "one entry, not two");
    }

    #[test]
    fn test_capacity_eviction() {
        let (page, monitor) = started_monitor();
        for i in 0..8 {
            page.console_log(&[HostValue::string(format!("line {i}"))]);
        }
        let entries = monitor.entries(&ConsoleFilter::default());
        assert_eq!(entries.len(), 5);
        assert!(entries[0].formatted.contains("line 3"));
        assert!(entries[4].formatted.contains("line 7"));
    }

    #[test]
    fn test_filter_by_substring_and_level() {
        let (page, monitor) = started_monitor();
        page.console_log(&[HostValue::string("fetching users")]);
        page.console_call(ConsoleLevel::Warn, &[HostValue::string("slow frame")]);
        page.console_error(&[HostValue::string("Users endpoint failed")]);

        let hits = monitor.entries(&ConsoleFilter {
            contains: Some("users".into()),
            ..Default::default()
        });
        assert_eq!(hits.len(), 2, "substring match is case-insensitive");

        let errors = monitor.entries(&ConsoleFilter {
            level: Some(ConsoleLevel::Error),
            contains: Some("users".into()),
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_call_site_parsed_from_stack() {
        let (page, monitor) = started_monitor();
        page.console_log(&[HostValue::string("where am I")]);
        let entry = &monitor.entries(&ConsoleFilter::default())[0];
        let call_site = entry.call_site.as_deref().expect("call site");
        assert!(call_site.contains("appHandler"));
        assert!(call_site.contains("app.js:"));
    }

    #[test]
    fn test_unclonable_arguments_degrade_not_fail() {
        let (page, monitor) = started_monitor();
        let circular = HostValue::object([("x", HostValue::number(1.0))]);
        circular.insert("me", circular.clone());
        page.console_log(&[circular, HostValue::function("cb")]);

        let entry = &monitor.entries(&ConsoleFilter::default())[0];
        assert_eq!(entry.args.len(), 2);
        assert_eq!(entry.args[0]["me"], "[Circular]");
        assert_eq!(entry.args[1], "[Function: cb]");
    }

    #[test]
    fn test_parse_call_site_variants() {
        let chrome = "Error\n    at doWork (https://x.dev/static/main.js:42:7)";
        assert_eq!(
            parse_call_site(chrome).as_deref(),
            Some("doWork (main.js:42:7)")
        );
        assert_eq!(parse_call_site("garbage"), None);
    }
}
