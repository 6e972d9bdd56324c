// Host abstraction layer - the crate's only seam to the browser
//
// Everything the instrumentation core needs from the page is expressed as an
// object-safe trait here: the render-tree runtime and its fiber nodes, the
// DOM, the interceptable globals (console, fetch, XHR, performance), the
// frame scheduler, and the tool's own overlay. The shapes mirror what a real
// injected build reads off the page, but every accessor that the runtime may
// not populate returns Option - missing fields degrade to None, never panic.
//
// Interception is modeled as install-a-tap-get-a-guard: `install` captures
// the prior state and returns an owned `PatchGuard` whose `restore` puts the
// exact captured references back. Monitors never touch ambient global state
// directly.

pub mod sim;
pub mod value;

pub use value::HostValue;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Shared handle to a DOM element.
pub type DomHandle = Arc<dyn DomNode>;

/// Shared handle to a render-tree node.
pub type FiberHandle = Arc<dyn FiberNode>;

/// Shared handle to one slot in a component's hook list.
pub type HookHandle = Arc<dyn HookSlot>;

/// Callback fired by the runtime after each committed render.
pub type CommitObserver = Arc<dyn Fn(FiberHandle) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

/// Viewport-relative bounding box, CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Debug source annotation attached by development builds of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Render-tree runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Raw node classification as reported by the host runtime.
///
/// This is the runtime's vocabulary, not ours; `registry::ComponentKind` is
/// the closed classification the rest of the crate matches on. Unknown codes
/// survive as `Unknown` so a newer runtime degrades instead of breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberTag {
    FunctionComponent,
    ClassComponent,
    IndeterminateComponent,
    HostRoot,
    HostPortal,
    HostComponent,
    HostText,
    Fragment,
    Mode,
    ContextConsumer,
    ContextProvider,
    ForwardRef,
    Profiler,
    SuspenseComponent,
    MemoComponent,
    SimpleMemoComponent,
    LazyComponent,
    Unknown(u8),
}

/// One node of the host runtime's internal render tree.
///
/// The underlying shape is undocumented and versioned; implementations must
/// tolerate absent fields. Nothing here is owned - handles borrow into the
/// live tree and become stale after later commits.
pub trait FiberNode: Send + Sync {
    /// Runtime-internal identity for this node object (pointer-stable while
    /// the node is alive). Used for cycle guards, not for component identity.
    fn node_id(&self) -> u64;

    fn tag(&self) -> FiberTag;

    /// The DOM tag string, for host components only.
    fn host_tag(&self) -> Option<String>;

    /// Function or class name of the component's type.
    fn type_name(&self) -> Option<String>;

    /// Explicit displayName, when the component set one.
    fn display_name(&self) -> Option<String>;

    /// Name carried by the element-type reference (forwardRef/memo wrappers).
    fn element_type_name(&self) -> Option<String>;

    /// Reconciliation key, when the application supplied one.
    fn key(&self) -> Option<String>;

    fn props(&self) -> Option<HostValue>;
    fn state(&self) -> Option<HostValue>;

    /// Head of the singly-linked hook-state list, for function components.
    fn hook_head(&self) -> Option<HookHandle>;

    fn parent(&self) -> Option<FiberHandle>;
    fn child(&self) -> Option<FiberHandle>;
    fn sibling(&self) -> Option<FiberHandle>;

    /// The element this node committed to the DOM, for host nodes.
    fn dom_element(&self) -> Option<DomHandle>;

    fn source_location(&self) -> Option<SourceLocation>;

    /// Whether this node performed render work in the commit being observed.
    fn rendered_in_commit(&self) -> bool;
}

/// One slot in the hook-state linked structure.
pub trait HookSlot: Send + Sync {
    fn memoized(&self) -> HostValue;
    fn next(&self) -> Option<HookHandle>;
}

/// What the devtools-style global hook reports, when present.
#[derive(Debug, Clone, Default)]
pub struct DevtoolsProbe {
    pub renderer_count: usize,
    pub version: Option<String>,
}

/// The host's render runtime: commit notifications plus detection probes.
pub trait RenderRuntime: Send + Sync {
    /// Probe the devtools global hook. `None` when no hook is installed.
    fn devtools_hook(&self) -> Option<DevtoolsProbe>;

    /// Probe well-known global runtime objects (e.g. a version export).
    fn global_marker(&self) -> Option<String>;

    /// Register a commit observer. May fail; callers retry with backoff.
    /// The returned guard unregisters the exact observer on restore.
    fn on_commit(&self, observer: CommitObserver) -> Result<Box<dyn PatchGuard>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// DOM
// ─────────────────────────────────────────────────────────────────────────────

/// A DOM element, addressed by handle.
pub trait DomNode: Send + Sync {
    /// Stable per-element identity for index keys. Survives re-parenting;
    /// does not survive element removal/recreation.
    fn element_id(&self) -> u64;

    fn tag_name(&self) -> String;

    fn attribute(&self, name: &str) -> Option<String>;
    fn set_attribute(&self, name: &str, value: &str);
    fn remove_attribute(&self, name: &str);

    fn classes(&self) -> Vec<String>;

    fn parent(&self) -> Option<DomHandle>;
    fn children(&self) -> Vec<DomHandle>;

    /// Viewport-relative bounding box.
    fn bounds(&self) -> Rect;

    /// Character data, for text-bearing elements.
    fn text(&self) -> Option<String>;

    /// Internal render-tree linkage, when the runtime tagged this element.
    fn fiber(&self) -> Option<FiberHandle>;
}

/// Handle equality by element identity.
pub fn same_element(a: &DomHandle, b: &DomHandle) -> bool {
    a.element_id() == b.element_id()
}

/// Mutation categories, matching the platform observer's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    ChildList,
    Attributes,
    CharacterData,
}

/// One raw mutation delivered by the document.
#[derive(Clone)]
pub struct RawMutation {
    pub kind: MutationKind,
    pub target: DomHandle,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub added: Vec<DomHandle>,
    pub removed: Vec<DomHandle>,
}

/// Which mutation streams to observe.
#[derive(Debug, Clone, Copy)]
pub struct MutationOptions {
    pub subtree: bool,
    pub child_list: bool,
    pub attributes: bool,
    pub attribute_old_value: bool,
    pub character_data: bool,
    pub character_data_old_value: bool,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            subtree: true,
            child_list: true,
            attributes: true,
            attribute_old_value: true,
            character_data: true,
            character_data_old_value: true,
        }
    }
}

/// Document-level listener kinds the picker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    PointerMove,
    /// Capture-phase click, so the picker pre-empts the page's own handlers.
    ClickCapture,
    KeyDown,
    Resize,
}

/// Payload delivered to document-level listeners.
#[derive(Debug, Clone)]
pub enum DomEvent {
    PointerMove { x: f64, y: f64 },
    Click { x: f64, y: f64 },
    KeyDown { key: String },
    Resize { width: f64, height: f64 },
}

/// The document: point lookup, traversal roots, mutations, listeners.
pub trait DomDocument: Send + Sync {
    /// The document element.
    fn root(&self) -> DomHandle;

    fn body(&self) -> Option<DomHandle>;

    /// Topmost element at a viewport point.
    fn element_from_point(&self, x: f64, y: f64) -> Option<DomHandle>;

    fn element_by_id(&self, id: &str) -> Option<DomHandle>;

    /// Containers a React app is conventionally mounted under
    /// (#root, #app and friends). Used by the detection probe chain.
    fn likely_root_containers(&self) -> Vec<DomHandle>;

    /// Observe mutations under `target`. The guard disconnects on restore.
    fn observe_mutations(
        &self,
        target: DomHandle,
        options: MutationOptions,
        sink: Arc<dyn Fn(Vec<RawMutation>) + Send + Sync>,
    ) -> Result<Box<dyn PatchGuard>>;

    /// Attach a document-level listener. The guard detaches on restore.
    fn add_listener(
        &self,
        kind: ListenerKind,
        handler: Arc<dyn Fn(&DomEvent) + Send + Sync>,
    ) -> Box<dyn PatchGuard>;

    /// Current viewport size (width, height).
    fn viewport(&self) -> (f64, f64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Interceptable globals
// ─────────────────────────────────────────────────────────────────────────────

/// Restores an intercepted global (or detaches a listener/observer) to the
/// exact state captured at install time. Restore is idempotent; dropping an
/// un-restored guard restores as well.
pub trait PatchGuard: Send {
    fn restore(&mut self);
}

/// Console severity levels, matching the methods that get wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
    Trace,
}

impl ConsoleLevel {
    pub const ALL: [ConsoleLevel; 6] = [
        ConsoleLevel::Log,
        ConsoleLevel::Warn,
        ConsoleLevel::Error,
        ConsoleLevel::Info,
        ConsoleLevel::Debug,
        ConsoleLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Trace => "trace",
        }
    }
}

/// Observer invoked on every console call, after the original method ran.
/// `stack` is the raw stack string captured at the call site, when available.
pub trait ConsoleTap: Send + Sync {
    fn on_call(&self, level: ConsoleLevel, args: &[HostValue], stack: Option<&str>);
}

/// The console patch point.
pub trait ConsoleHook: Send + Sync {
    fn install(&self, tap: Arc<dyn ConsoleTap>) -> Result<Box<dyn PatchGuard>>;
}

/// A request as observed at the fetch/XHR boundary.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<HostValue>,
}

/// A completed response as observed at the fetch/XHR boundary.
#[derive(Debug, Clone)]
pub struct HostResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: HostValue,
}

impl HostResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Observer for promise-shaped fetch traffic. The host generates one token
/// per request and carries it to the terminal callback; taps observe only and
/// must never alter timing, ordering, or results.
pub trait FetchTap: Send + Sync {
    fn on_request(&self, token: u64, request: &HostRequest);
    fn on_response(&self, token: u64, response: &HostResponse);
    fn on_failure(&self, token: u64, error: &str);
}

pub trait FetchHook: Send + Sync {
    fn install(&self, tap: Arc<dyn FetchTap>) -> Result<Box<dyn PatchGuard>>;
}

/// Observer for callback-shaped XHR traffic. Same token contract as fetch;
/// completion taps fire after the host's own callbacks.
pub trait XhrTap: Send + Sync {
    fn on_send(&self, token: u64, request: &HostRequest);
    fn on_load(&self, token: u64, response: &HostResponse);
    fn on_error(&self, token: u64, error: &str);
}

pub trait XhrHook: Send + Sync {
    fn install(&self, tap: Arc<dyn XhrTap>) -> Result<Box<dyn PatchGuard>>;
}

/// Performance entry streams the platform can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerfEntryType {
    Navigation,
    Resource,
    Paint,
    LargestContentfulPaint,
    FirstInput,
    LayoutShift,
    Mark,
    Measure,
}

impl PerfEntryType {
    pub const ALL: [PerfEntryType; 8] = [
        PerfEntryType::Navigation,
        PerfEntryType::Resource,
        PerfEntryType::Paint,
        PerfEntryType::LargestContentfulPaint,
        PerfEntryType::FirstInput,
        PerfEntryType::LayoutShift,
        PerfEntryType::Mark,
        PerfEntryType::Measure,
    ];
}

/// One performance timeline entry. `detail` carries the type-specific fields
/// (layout-shift value and input attribution, navigation timings, input
/// processing start) as loose JSON, the way the platform exposes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfEntry {
    pub entry_type: PerfEntryType,
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// The performance-observation facility.
pub trait PerformanceHook: Send + Sync {
    /// Subscribe to the given entry streams. The guard disconnects on restore.
    fn observe(
        &self,
        types: &[PerfEntryType],
        sink: Arc<dyn Fn(PerfEntry) + Send + Sync>,
    ) -> Result<Box<dyn PatchGuard>>;

    /// Milliseconds since the page's time origin.
    fn now(&self) -> f64;
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame scheduling and overlay
// ─────────────────────────────────────────────────────────────────────────────

/// Animation-frame scheduling with cancellation.
pub trait FrameScheduler: Send + Sync {
    /// Schedule `callback` for the next frame. Restoring the guard cancels
    /// the callback if it has not run yet.
    fn request_frame(&self, callback: Box<dyn FnOnce() + Send>) -> Box<dyn PatchGuard>;
}

/// The tool's own highlight surface.
pub trait HighlightOverlay: Send + Sync {
    fn resize(&self, width: f64, height: f64);
    fn draw(&self, rect: &Rect, label: &str);
    fn clear(&self);

    /// Whether `element` belongs to the tool's own UI. Checked before any
    /// registry lookup so the widget never selects itself.
    fn owns(&self, element: &DomHandle) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// The page
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the core reaches on the host page.
pub trait HostPage: Send + Sync {
    fn document(&self) -> Arc<dyn DomDocument>;

    /// `None` when no render runtime is present at all (plain pages).
    fn runtime(&self) -> Option<Arc<dyn RenderRuntime>>;

    fn console(&self) -> Arc<dyn ConsoleHook>;
    fn fetch(&self) -> Arc<dyn FetchHook>;
    fn xhr(&self) -> Arc<dyn XhrHook>;
    fn performance(&self) -> Arc<dyn PerformanceHook>;
    fn scheduler(&self) -> Arc<dyn FrameScheduler>;
    fn overlay(&self) -> Arc<dyn HighlightOverlay>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_contains_edges() {
        let r = Rect::new(10.0, 10.0, 100.0, 50.0);
        assert!(r.contains(10.0, 10.0));
        assert!(r.contains(109.9, 59.9));
        assert!(!r.contains(110.0, 30.0));
        assert!(!r.contains(50.0, 60.0));
        assert!(!r.contains(9.9, 30.0));
    }

    #[test]
    fn test_console_level_serde_names() {
        let json = serde_json::to_string(&ConsoleLevel::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
    }

    #[test]
    fn test_perf_entry_type_kebab_case() {
        let json = serde_json::to_string(&PerfEntryType::LargestContentfulPaint).unwrap();
        assert_eq!(json, "\"largest-contentful-paint\"");
    }

    #[test]
    fn test_host_response_header_lookup_is_case_insensitive() {
        let resp = HostResponse {
            status: 200,
            status_text: "OK".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: HostValue::Null,
        };
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.header("x-missing"), None);
    }
}
