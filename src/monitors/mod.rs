// Telemetry monitors - four independent interceptors over the host globals
//
// Each monitor owns exactly one patch point (console methods, fetch, XHR,
// the performance observer, the mutation observer), buffers what it sees in
// a capped ring log, and answers filtered queries. The shared rules:
//
// - start() is idempotent: a second call while running is a no-op, so the
//   restoration state can never become ambiguous
// - stop() restores the exact intercepted state via the patch guard captured
//   at install time, and always succeeds, even if start() never ran
// - per-entry processing failures are swallowed (logged at trace); nothing
//   may throw out of an intercepted call path
// - an optional tee forwards every captured event to the session exporter

pub mod console;
pub mod dom;
pub mod network;
pub mod performance;

pub use console::{ConsoleFilter, ConsoleMonitor};
pub use dom::DomMonitor;
pub use network::NetworkMonitor;
pub use performance::{PerformanceMonitor, PerformanceSummary};

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::events::TelemetryEvent;
use crate::host::PatchGuard;

/// Fixed-capacity insertion-ordered log. Capacity zero means append-only.
pub struct RingLog<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T: Clone> RingLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    /// Append, evicting the oldest entry once over capacity.
    pub fn push(&mut self, item: T) {
        if self.capacity > 0 && self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Insertion-ordered copy of the whole log.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// The newest `count` entries, still in insertion order.
    pub fn tail(&self, count: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(count);
        self.items.iter().skip(skip).cloned().collect()
    }
}

/// Holder for the installed patch guard; shared shape across monitors.
pub(crate) struct GuardSlot {
    guard: Mutex<Option<Box<dyn PatchGuard>>>,
}

impl GuardSlot {
    pub(crate) fn new() -> Self {
        Self {
            guard: Mutex::new(None),
        }
    }

    /// True when a guard is installed (the monitor is running).
    pub(crate) fn is_active(&self) -> bool {
        crate::lock(&self.guard).is_some()
    }

    /// Store a guard unless one is already present. Returns false (and
    /// restores the new guard) when already running - double-start no-op.
    pub(crate) fn install(&self, new_guard: Box<dyn PatchGuard>) -> bool {
        let mut slot = crate::lock(&self.guard);
        if slot.is_some() {
            let mut rejected = new_guard;
            rejected.restore();
            return false;
        }
        *slot = Some(new_guard);
        true
    }

    /// Restore and drop the guard, if any. Safe to call at any time.
    pub(crate) fn release(&self) {
        if let Some(mut guard) = crate::lock(&self.guard).take() {
            guard.restore();
        }
    }
}

/// Optional forwarding channel into the session exporter. Send failures are
/// dropped: export must never stall an intercepted call.
#[derive(Clone, Default)]
pub(crate) struct Tee {
    sender: Option<mpsc::Sender<TelemetryEvent>>,
}

impl Tee {
    pub(crate) fn set(&mut self, sender: mpsc::Sender<TelemetryEvent>) {
        self.sender = Some(sender);
    }

    pub(crate) fn forward(&self, event: TelemetryEvent) {
        if let Some(sender) = &self.sender {
            if let Err(e) = sender.try_send(event) {
                tracing::trace!("telemetry tee dropped an event: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_log_evicts_oldest_in_order() {
        let mut log = RingLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        // Over capacity by 2: 0 and 1 are gone, 2..4 remain in order.
        assert_eq!(log.snapshot(), vec![2, 3, 4]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_ring_log_zero_capacity_is_append_only() {
        let mut log = RingLog::new(0);
        for i in 0..2000 {
            log.push(i);
        }
        assert_eq!(log.len(), 2000);
    }

    #[test]
    fn test_ring_log_tail_keeps_order() {
        let mut log = RingLog::new(10);
        for i in 0..6 {
            log.push(i);
        }
        assert_eq!(log.tail(3), vec![3, 4, 5]);
        assert_eq!(log.tail(100), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_guard_slot_double_install_rejected() {
        struct Flag(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl PatchGuard for Flag {
            fn restore(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
        let slot = GuardSlot::new();
        let first = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let second = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        assert!(slot.install(Box::new(Flag(first.clone()))));
        assert!(!slot.install(Box::new(Flag(second.clone()))));
        // The rejected guard restored itself immediately; the first stays.
        assert!(second.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!first.load(std::sync::atomic::Ordering::SeqCst));
        slot.release();
        assert!(first.load(std::sync::atomic::Ordering::SeqCst));
        // Releasing again is a no-op.
        slot.release();
    }
}
