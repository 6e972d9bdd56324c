//! Error taxonomy for the instrumentation core.
//!
//! Everything that can go wrong on an instrumentation path is caught at the
//! boundary closest to the host page and logged; these types exist for the
//! public API surface, where callers need to distinguish "no runtime found"
//! from "hook registration keeps failing" from "this value cannot be
//! captured". Lookup misses are `None`, never errors.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No compatible render-tree runtime was found within the retry budget.
    /// Non-fatal: selection features degrade to no-ops.
    #[error("detection failed: {0}")]
    Detection(String),

    /// Hook registration or commit processing failed past the backoff budget.
    /// The session continues with selection permanently unavailable.
    #[error("instrumentation failure: {0}")]
    Instrumentation(String),

    /// A captured value could not be cloned or stringified at the requested
    /// fidelity. Callers fall through to a less faithful representation.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// An intercepted network call or the chat transport failed. Recorded as
    /// a failed telemetry entry or surfaced as a turn-level error; never
    /// crashes a monitor or the widget.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A caller-supplied deadline elapsed before a result arrived. Distinct
    /// from the internal detection polling budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Whether the condition leaves the widget functional (everything except
    /// a caller timeout is survivable by design).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Timeout(_))
    }
}
