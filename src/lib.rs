// rspy - React Runtime Spy
//
// Core of an injectable developer assistant for live React pages: point at a
// rendered component, gather runtime telemetry (console, network, performance,
// DOM mutations), and hand an LLM a structured context block describing both.
//
// Architecture:
// - Detection bootstrap: probes for a compatible React runtime before anything attaches
// - Render-tree bridge: subscribes to commit notifications and walks the fiber tree
// - Component registry: current-generation index of component records, DOM-addressable
// - Picker: hit-tests screen points back to components and drives the highlight overlay
// - Monitors: four independent interceptors with bounded ring logs
// - Context assembler: turns registry + monitor state into LLM-ready text blocks
//
// The browser environment is reached exclusively through the traits in `host`;
// `host::sim` is the in-memory implementation used by the tests and the demo
// binary. A real embedding only has to implement those traits.

pub mod bridge;
pub mod chat;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod events;
pub mod export;
pub mod host;
pub mod monitors;
pub mod picker;
pub mod registry;
pub mod serialize;

pub use error::{Error, Result};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the inner value if a previous holder panicked.
///
/// Instrumentation state must stay usable even after a panic somewhere in an
/// intercepted call path; a poisoned registry or ring log is still valid data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
