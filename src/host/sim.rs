// Simulated host page - in-memory implementation of the host traits
//
// Drives the test suite and the demo binary. The simulation is deliberately
// small but honest about the contracts the core depends on: console calls go
// through a swappable writer slot (so patch restoration is observable),
// fetch is promise-shaped and async, XHR is callback-shaped and synchronous,
// mutations are delivered to subtree observers with old-value stripping, and
// commits re-notify every registered observer with the committed root.
//
// Host-side driver methods (console_call, page_fetch, emit_perf, dispatch,
// mount, commit_subtree) play the role of the page's own code.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::{
    CommitObserver, ConsoleHook, ConsoleLevel, ConsoleTap, DevtoolsProbe, DomDocument, DomEvent,
    DomHandle, DomNode, FetchHook, FetchTap, FiberHandle, FiberNode, FiberTag, FrameScheduler,
    HighlightOverlay, HookHandle, HookSlot, HostPage, HostRequest, HostResponse, HostValue,
    ListenerKind, MutationKind, MutationOptions, PatchGuard, PerfEntry, PerfEntryType,
    PerformanceHook, RawMutation, Rect, RenderRuntime, SourceLocation, XhrHook, XhrTap,
};

/// Marker attribute carried by every element of the tool's own UI.
pub const OVERLAY_ATTR: &str = "data-rspy-overlay";

// ─────────────────────────────────────────────────────────────────────────────
// Guards
// ─────────────────────────────────────────────────────────────────────────────

/// Runs its closure exactly once, on restore or on drop.
struct CallbackGuard {
    undo: Option<Box<dyn FnOnce() + Send>>,
}

impl CallbackGuard {
    fn new(undo: impl FnOnce() + Send + 'static) -> Box<dyn PatchGuard> {
        Box::new(Self {
            undo: Some(Box::new(undo)),
        })
    }
}

impl PatchGuard for CallbackGuard {
    fn restore(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DOM
// ─────────────────────────────────────────────────────────────────────────────

struct ElementInner {
    tag: String,
    attributes: BTreeMap<String, String>,
    parent: Weak<SimElement>,
    children: Vec<Arc<SimElement>>,
    bounds: Rect,
    text: Option<String>,
    fiber: Weak<SimFiber>,
}

/// A simulated DOM element.
pub struct SimElement {
    id: u64,
    self_weak: Weak<SimElement>,
    doc: Weak<SimDocument>,
    inner: Mutex<ElementInner>,
}

impl SimElement {
    fn deliver(&self, record: RawMutation) {
        if let Some(doc) = self.doc.upgrade() {
            doc.deliver(record);
        }
    }

    /// Set layout bounds (the simulation has no layout engine).
    pub fn set_bounds(&self, bounds: Rect) {
        crate::lock(&self.inner).bounds = bounds;
    }

    /// Handle to this element, while it is still alive.
    fn handle(&self) -> Option<DomHandle> {
        self.self_weak.upgrade().map(|e| e as DomHandle)
    }

    /// Replace character data, emitting a character-data mutation.
    pub fn set_text(&self, text: &str) {
        let old = {
            let mut inner = crate::lock(&self.inner);
            let old = inner.text.clone();
            inner.text = Some(text.to_string());
            old
        };
        if let Some(target) = self.handle() {
            self.deliver(RawMutation {
                kind: MutationKind::CharacterData,
                target,
                attribute_name: None,
                old_value: old,
                new_value: Some(text.to_string()),
                added: Vec::new(),
                removed: Vec::new(),
            });
        }
    }

    /// Append a child, emitting a child-list mutation.
    pub fn append_child(&self, child: &Arc<SimElement>) {
        crate::lock(&child.inner).parent = self.self_weak.clone();
        crate::lock(&self.inner).children.push(child.clone());
        if let Some(target) = self.handle() {
            self.deliver(RawMutation {
                kind: MutationKind::ChildList,
                target,
                attribute_name: None,
                old_value: None,
                new_value: None,
                added: vec![child.clone() as DomHandle],
                removed: Vec::new(),
            });
        }
    }

    /// Remove a child, emitting a child-list mutation.
    pub fn remove_child(&self, child: &Arc<SimElement>) {
        let removed = {
            let mut inner = crate::lock(&self.inner);
            let before = inner.children.len();
            inner.children.retain(|c| c.id != child.id);
            before != inner.children.len()
        };
        if !removed {
            return;
        }
        crate::lock(&child.inner).parent = Weak::new();
        if let Some(target) = self.handle() {
            self.deliver(RawMutation {
                kind: MutationKind::ChildList,
                target,
                attribute_name: None,
                old_value: None,
                new_value: None,
                added: Vec::new(),
                removed: vec![child.clone() as DomHandle],
            });
        }
    }

    /// Tag this element with internal render-tree linkage, the way the
    /// runtime does on commit.
    pub fn link_fiber(&self, fiber: &Arc<SimFiber>) {
        crate::lock(&self.inner).fiber = Arc::downgrade(fiber);
    }
}

impl DomNode for SimElement {
    fn element_id(&self) -> u64 {
        self.id
    }

    fn tag_name(&self) -> String {
        crate::lock(&self.inner).tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        crate::lock(&self.inner).attributes.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        let old = crate::lock(&self.inner)
            .attributes
            .insert(name.to_string(), value.to_string());
        if let Some(target) = self.handle() {
            self.deliver(RawMutation {
                kind: MutationKind::Attributes,
                target,
                attribute_name: Some(name.to_string()),
                old_value: old,
                new_value: Some(value.to_string()),
                added: Vec::new(),
                removed: Vec::new(),
            });
        }
    }

    fn remove_attribute(&self, name: &str) {
        let old = crate::lock(&self.inner).attributes.remove(name);
        if old.is_none() {
            return;
        }
        if let Some(target) = self.handle() {
            self.deliver(RawMutation {
                kind: MutationKind::Attributes,
                target,
                attribute_name: Some(name.to_string()),
                old_value: old,
                new_value: None,
                added: Vec::new(),
                removed: Vec::new(),
            });
        }
    }

    fn classes(&self) -> Vec<String> {
        self.attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn parent(&self) -> Option<DomHandle> {
        crate::lock(&self.inner).parent.upgrade().map(|p| p as DomHandle)
    }

    fn children(&self) -> Vec<DomHandle> {
        crate::lock(&self.inner)
            .children
            .iter()
            .map(|c| c.clone() as DomHandle)
            .collect()
    }

    fn bounds(&self) -> Rect {
        crate::lock(&self.inner).bounds
    }

    fn text(&self) -> Option<String> {
        crate::lock(&self.inner).text.clone()
    }

    fn fiber(&self) -> Option<FiberHandle> {
        crate::lock(&self.inner).fiber.upgrade().map(|f| f as FiberHandle)
    }
}

struct ObserverEntry {
    id: u64,
    target: DomHandle,
    options: MutationOptions,
    sink: Arc<dyn Fn(Vec<RawMutation>) + Send + Sync>,
}

struct ListenerEntry {
    id: u64,
    kind: ListenerKind,
    handler: Arc<dyn Fn(&DomEvent) + Send + Sync>,
}

/// A simulated document: element tree, mutation observers, listeners.
pub struct SimDocument {
    self_weak: Weak<SimDocument>,
    next_element_id: AtomicU64,
    next_sub_id: AtomicU64,
    root: Mutex<Option<Arc<SimElement>>>,
    body: Mutex<Option<Arc<SimElement>>>,
    observers: Mutex<Vec<ObserverEntry>>,
    listeners: Mutex<Vec<ListenerEntry>>,
    viewport: Mutex<(f64, f64)>,
}

impl SimDocument {
    fn new(viewport: (f64, f64)) -> Arc<Self> {
        let doc = Arc::new_cyclic(|weak| SimDocument {
            self_weak: weak.clone(),
            next_element_id: AtomicU64::new(1),
            next_sub_id: AtomicU64::new(1),
            root: Mutex::new(None),
            body: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            viewport: Mutex::new(viewport),
        });
        let html = doc.create_element("html");
        let body = doc.create_element("body");
        html.append_child(&body);
        *crate::lock(&doc.root) = Some(html);
        *crate::lock(&doc.body) = Some(body);
        doc
    }

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> Arc<SimElement> {
        let id = self.next_element_id.fetch_add(1, Ordering::SeqCst);
        Arc::new_cyclic(|weak| SimElement {
            id,
            self_weak: weak.clone(),
            doc: self.self_weak.clone(),
            inner: Mutex::new(ElementInner {
                tag: tag.to_string(),
                attributes: BTreeMap::new(),
                parent: Weak::new(),
                children: Vec::new(),
                bounds: Rect::default(),
                text: None,
                fiber: Weak::new(),
            }),
        })
    }

    /// Concrete body element, for host-side tree building.
    pub fn body_sim(&self) -> Arc<SimElement> {
        crate::lock(&self.body)
            .clone()
            .unwrap_or_else(|| self.create_element("body"))
    }

    fn root_sim(&self) -> Option<Arc<SimElement>> {
        crate::lock(&self.root).clone()
    }

    fn walk<F: FnMut(&Arc<SimElement>, usize)>(&self, mut visit: F) {
        let Some(root) = self.root_sim() else { return };
        let mut stack = vec![(root, 0usize)];
        while let Some((el, depth)) = stack.pop() {
            visit(&el, depth);
            let children = crate::lock(&el.inner).children.clone();
            // Reverse so document order is preserved by the LIFO stack.
            for child in children.into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    fn deliver(&self, record: RawMutation) {
        let observers: Vec<(MutationOptions, Arc<dyn Fn(Vec<RawMutation>) + Send + Sync>)> = {
            crate::lock(&self.observers)
                .iter()
                .filter(|entry| {
                    entry_kind_enabled(&entry.options, record.kind)
                        && target_in_scope(&entry.target, &record.target, entry.options.subtree)
                })
                .map(|entry| (entry.options, entry.sink.clone()))
                .collect()
        };
        for (options, sink) in observers {
            let mut delivered = record.clone();
            match delivered.kind {
                MutationKind::Attributes if !options.attribute_old_value => {
                    delivered.old_value = None;
                }
                MutationKind::CharacterData if !options.character_data_old_value => {
                    delivered.old_value = None;
                }
                _ => {}
            }
            sink(vec![delivered]);
        }
    }

    fn dispatch(&self, event: &DomEvent) {
        let kind = match event {
            DomEvent::PointerMove { .. } => ListenerKind::PointerMove,
            DomEvent::Click { .. } => ListenerKind::ClickCapture,
            DomEvent::KeyDown { .. } => ListenerKind::KeyDown,
            DomEvent::Resize { .. } => ListenerKind::Resize,
        };
        let handlers: Vec<_> = crate::lock(&self.listeners)
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| l.handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

fn entry_kind_enabled(options: &MutationOptions, kind: MutationKind) -> bool {
    match kind {
        MutationKind::ChildList => options.child_list,
        MutationKind::Attributes => options.attributes,
        MutationKind::CharacterData => options.character_data,
    }
}

fn target_in_scope(scope: &DomHandle, target: &DomHandle, subtree: bool) -> bool {
    if super::same_element(scope, target) {
        return true;
    }
    if !subtree {
        return false;
    }
    let mut cursor = target.parent();
    while let Some(el) = cursor {
        if super::same_element(scope, &el) {
            return true;
        }
        cursor = el.parent();
    }
    false
}

impl DomDocument for SimDocument {
    fn root(&self) -> DomHandle {
        self.root_sim()
            .map(|r| r as DomHandle)
            .unwrap_or_else(|| self.create_element("html") as DomHandle)
    }

    fn body(&self) -> Option<DomHandle> {
        crate::lock(&self.body).clone().map(|b| b as DomHandle)
    }

    fn element_from_point(&self, x: f64, y: f64) -> Option<DomHandle> {
        // Later in document order paints above: the last pre-order match is
        // the topmost element (the walk visits in pre-order).
        let mut best: Option<Arc<SimElement>> = None;
        self.walk(|el, _| {
            if el.bounds().contains(x, y) {
                best = Some(el.clone());
            }
        });
        best.map(|el| el as DomHandle)
    }

    fn element_by_id(&self, id: &str) -> Option<DomHandle> {
        let mut found = None;
        self.walk(|el, _| {
            if found.is_none() && el.attribute("id").as_deref() == Some(id) {
                found = Some(el.clone() as DomHandle);
            }
        });
        found
    }

    fn likely_root_containers(&self) -> Vec<DomHandle> {
        ["root", "app", "__next", "app-root", "main"]
            .iter()
            .filter_map(|id| self.element_by_id(id))
            .collect()
    }

    fn observe_mutations(
        &self,
        target: DomHandle,
        options: MutationOptions,
        sink: Arc<dyn Fn(Vec<RawMutation>) + Send + Sync>,
    ) -> Result<Box<dyn PatchGuard>> {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.observers).push(ObserverEntry {
            id,
            target,
            options,
            sink,
        });
        let doc = self.self_weak.clone();
        Ok(CallbackGuard::new(move || {
            if let Some(doc) = doc.upgrade() {
                crate::lock(&doc.observers).retain(|o| o.id != id);
            }
        }))
    }

    fn add_listener(
        &self,
        kind: ListenerKind,
        handler: Arc<dyn Fn(&DomEvent) + Send + Sync>,
    ) -> Box<dyn PatchGuard> {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.listeners).push(ListenerEntry { id, kind, handler });
        let doc = self.self_weak.clone();
        CallbackGuard::new(move || {
            if let Some(doc) = doc.upgrade() {
                crate::lock(&doc.listeners).retain(|l| l.id != id);
            }
        })
    }

    fn viewport(&self) -> (f64, f64) {
        *crate::lock(&self.viewport)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

type ConsoleWriter = Arc<dyn Fn(ConsoleLevel, &[HostValue]) + Send + Sync>;

/// Simulated console: one swappable writer slot per page (the "globals"),
/// plus a record of what the baseline writer actually printed so tests can
/// assert that interception never hides output.
pub struct SimConsole {
    self_weak: Weak<SimConsole>,
    writer: Mutex<ConsoleWriter>,
    printed: Mutex<Vec<(ConsoleLevel, String)>>,
    calls: AtomicU64,
}

impl SimConsole {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SimConsole>| {
            let baseline = weak.clone();
            SimConsole {
                self_weak: weak.clone(),
                writer: Mutex::new(Arc::new(move |level, args: &[HostValue]| {
                    if let Some(console) = baseline.upgrade() {
                        console.print(level, args);
                    }
                })),
                printed: Mutex::new(Vec::new()),
                calls: AtomicU64::new(0),
            }
        })
    }

    fn print(&self, level: ConsoleLevel, args: &[HostValue]) {
        let line = args
            .iter()
            .map(|a| format!("{a:?}"))
            .collect::<Vec<_>>()
            .join(" ");
        crate::lock(&self.printed).push((level, line));
    }

    /// Host-side console call; goes through whatever writer is installed.
    pub fn call(&self, level: ConsoleLevel, args: &[HostValue]) {
        let writer = crate::lock(&self.writer).clone();
        writer(level, args);
    }

    /// Everything the baseline writer has printed so far.
    pub fn printed(&self) -> Vec<(ConsoleLevel, String)> {
        crate::lock(&self.printed).clone()
    }

    /// Pointer identity of the installed writer, for restoration assertions.
    pub fn writer_ptr(&self) -> usize {
        Arc::as_ptr(&crate::lock(&self.writer).clone()) as *const () as usize
    }

    fn synth_stack(&self) -> String {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        format!(
            "Error\n    at appHandler (https://host.example/assets/app.js:{}:13)\n    \
             at dispatchEvent (https://host.example/assets/vendor.js:91:7)",
            100 + (n % 400)
        )
    }
}

impl ConsoleHook for SimConsole {
    fn install(&self, tap: Arc<dyn ConsoleTap>) -> Result<Box<dyn PatchGuard>> {
        let prior = crate::lock(&self.writer).clone();
        let prior_for_restore = prior.clone();
        let console = self.self_weak.clone();
        let wrapped: ConsoleWriter = Arc::new(move |level, args: &[HostValue]| {
            // The page's own developer must still see the output.
            prior(level, args);
            let stack = console.upgrade().map(|c| c.synth_stack());
            tap.on_call(level, args, stack.as_deref());
        });
        *crate::lock(&self.writer) = wrapped;
        let console = self.self_weak.clone();
        Ok(CallbackGuard::new(move || {
            if let Some(console) = console.upgrade() {
                *crate::lock(&console.writer) = prior_for_restore.clone();
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Network
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum RouteBehavior {
    Respond {
        response: HostResponse,
        delay: Option<Duration>,
    },
    Fail {
        error: String,
    },
}

/// Canned responses shared by the fetch and XHR backends.
pub struct SimRoutes {
    routes: Mutex<BTreeMap<String, RouteBehavior>>,
}

impl SimRoutes {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(BTreeMap::new()),
        })
    }

    fn key(method: &str, url: &str) -> String {
        format!("{} {}", method.to_uppercase(), url)
    }

    pub fn respond_json(&self, method: &str, url: &str, status: u16, body: serde_json::Value) {
        self.respond_with(
            method,
            url,
            HostResponse {
                status,
                status_text: status_text(status).to_string(),
                headers: vec![("content-type".into(), "application/json".into())],
                body: HostValue::String(body.to_string()),
            },
            None,
        );
    }

    pub fn respond_text(&self, method: &str, url: &str, status: u16, body: &str) {
        self.respond_with(
            method,
            url,
            HostResponse {
                status,
                status_text: status_text(status).to_string(),
                headers: vec![("content-type".into(), "text/plain".into())],
                body: HostValue::string(body),
            },
            None,
        );
    }

    pub fn respond_with(
        &self,
        method: &str,
        url: &str,
        response: HostResponse,
        delay: Option<Duration>,
    ) {
        crate::lock(&self.routes).insert(
            Self::key(method, url),
            RouteBehavior::Respond { response, delay },
        );
    }

    pub fn fail(&self, method: &str, url: &str, error: &str) {
        crate::lock(&self.routes).insert(
            Self::key(method, url),
            RouteBehavior::Fail {
                error: error.to_string(),
            },
        );
    }

    fn lookup(&self, method: &str, url: &str) -> RouteBehavior {
        crate::lock(&self.routes)
            .get(&Self::key(method, url))
            .cloned()
            .unwrap_or(RouteBehavior::Respond {
                response: HostResponse {
                    status: 404,
                    status_text: "Not Found".into(),
                    headers: vec![("content-type".into(), "text/plain".into())],
                    body: HostValue::string("not found"),
                },
                delay: None,
            })
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Promise-shaped fetch with observer taps.
pub struct SimFetch {
    self_weak: Weak<SimFetch>,
    taps: Mutex<Vec<(u64, Arc<dyn FetchTap>)>>,
    routes: Arc<SimRoutes>,
    next_token: AtomicU64,
    next_tap_id: AtomicU64,
}

impl SimFetch {
    fn new(routes: Arc<SimRoutes>) -> Arc<Self> {
        Arc::new_cyclic(|weak| SimFetch {
            self_weak: weak.clone(),
            taps: Mutex::new(Vec::new()),
            routes,
            next_token: AtomicU64::new(1),
            next_tap_id: AtomicU64::new(1),
        })
    }

    /// The page's own fetch. Taps observe; the caller gets the exact
    /// response or error the backend produced.
    pub async fn perform(&self, request: &HostRequest) -> Result<HostResponse> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let taps: Vec<_> = crate::lock(&self.taps).iter().map(|(_, t)| t.clone()).collect();
        for tap in &taps {
            tap.on_request(token, request);
        }
        match self.routes.lookup(&request.method, &request.url) {
            RouteBehavior::Respond { response, delay } => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                for tap in &taps {
                    tap.on_response(token, &response);
                }
                Ok(response)
            }
            RouteBehavior::Fail { error } => {
                for tap in &taps {
                    tap.on_failure(token, &error);
                }
                Err(Error::Transport(error))
            }
        }
    }
}

impl FetchHook for SimFetch {
    fn install(&self, tap: Arc<dyn FetchTap>) -> Result<Box<dyn PatchGuard>> {
        let id = self.next_tap_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.taps).push((id, tap));
        let fetch = self.self_weak.clone();
        Ok(CallbackGuard::new(move || {
            if let Some(fetch) = fetch.upgrade() {
                crate::lock(&fetch.taps).retain(|(tid, _)| *tid != id);
            }
        }))
    }
}

/// Callback-shaped XHR with observer taps. Completion taps fire after the
/// host's own callback, preserving the original delivery order.
pub struct SimXhr {
    self_weak: Weak<SimXhr>,
    taps: Mutex<Vec<(u64, Arc<dyn XhrTap>)>>,
    routes: Arc<SimRoutes>,
    next_token: AtomicU64,
    next_tap_id: AtomicU64,
}

impl SimXhr {
    fn new(routes: Arc<SimRoutes>) -> Arc<Self> {
        Arc::new_cyclic(|weak| SimXhr {
            self_weak: weak.clone(),
            taps: Mutex::new(Vec::new()),
            routes,
            next_token: AtomicU64::new(1),
            next_tap_id: AtomicU64::new(1),
        })
    }

    /// The page's own XHR send.
    pub fn send(
        &self,
        request: HostRequest,
        on_done: Box<dyn FnOnce(std::result::Result<HostResponse, String>) + Send>,
    ) {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let taps: Vec<_> = crate::lock(&self.taps).iter().map(|(_, t)| t.clone()).collect();
        for tap in &taps {
            tap.on_send(token, &request);
        }
        match self.routes.lookup(&request.method, &request.url) {
            RouteBehavior::Respond { response, .. } => {
                on_done(Ok(response.clone()));
                for tap in &taps {
                    tap.on_load(token, &response);
                }
            }
            RouteBehavior::Fail { error } => {
                on_done(Err(error.clone()));
                for tap in &taps {
                    tap.on_error(token, &error);
                }
            }
        }
    }
}

impl XhrHook for SimXhr {
    fn install(&self, tap: Arc<dyn XhrTap>) -> Result<Box<dyn PatchGuard>> {
        let id = self.next_tap_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.taps).push((id, tap));
        let xhr = self.self_weak.clone();
        Ok(CallbackGuard::new(move || {
            if let Some(xhr) = xhr.upgrade() {
                crate::lock(&xhr.taps).retain(|(tid, _)| *tid != id);
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Performance
// ─────────────────────────────────────────────────────────────────────────────

struct PerfSink {
    id: u64,
    types: Vec<PerfEntryType>,
    sink: Arc<dyn Fn(PerfEntry) + Send + Sync>,
}

/// Simulated performance timeline.
pub struct SimPerformance {
    self_weak: Weak<SimPerformance>,
    origin: Instant,
    sinks: Mutex<Vec<PerfSink>>,
    next_id: AtomicU64,
}

impl SimPerformance {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| SimPerformance {
            self_weak: weak.clone(),
            origin: Instant::now(),
            sinks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Host-side: push an entry into the timeline.
    pub fn emit(&self, entry: PerfEntry) {
        let sinks: Vec<_> = crate::lock(&self.sinks)
            .iter()
            .filter(|s| s.types.contains(&entry.entry_type))
            .map(|s| s.sink.clone())
            .collect();
        for sink in sinks {
            sink(entry.clone());
        }
    }
}

impl PerformanceHook for SimPerformance {
    fn observe(
        &self,
        types: &[PerfEntryType],
        sink: Arc<dyn Fn(PerfEntry) + Send + Sync>,
    ) -> Result<Box<dyn PatchGuard>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.sinks).push(PerfSink {
            id,
            types: types.to_vec(),
            sink,
        });
        let perf = self.self_weak.clone();
        Ok(CallbackGuard::new(move || {
            if let Some(perf) = perf.upgrade() {
                crate::lock(&perf.sinks).retain(|s| s.id != id);
            }
        }))
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Frame queue pumped manually by the test/demo driver.
pub struct SimScheduler {
    self_weak: Weak<SimScheduler>,
    queue: Mutex<Vec<(u64, Box<dyn FnOnce() + Send>)>>,
    next_id: AtomicU64,
}

impl SimScheduler {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| SimScheduler {
            self_weak: weak.clone(),
            queue: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Run one frame: everything scheduled so far, in order. Callbacks
    /// scheduled during the frame land in the next one.
    pub fn run_frame(&self) -> usize {
        let batch = std::mem::take(&mut *crate::lock(&self.queue));
        let count = batch.len();
        for (_, callback) in batch {
            callback();
        }
        count
    }

    pub fn pending(&self) -> usize {
        crate::lock(&self.queue).len()
    }
}

impl FrameScheduler for SimScheduler {
    fn request_frame(&self, callback: Box<dyn FnOnce() + Send>) -> Box<dyn PatchGuard> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.queue).push((id, callback));
        let sched = self.self_weak.clone();
        CallbackGuard::new(move || {
            if let Some(sched) = sched.upgrade() {
                crate::lock(&sched.queue).retain(|(qid, _)| *qid != id);
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Overlay
// ─────────────────────────────────────────────────────────────────────────────

/// Records highlight activity; ownership is carried by `OVERLAY_ATTR` on the
/// widget's own elements.
pub struct SimOverlay {
    size: Mutex<(f64, f64)>,
    draws: Mutex<Vec<(Rect, String)>>,
    cleared: AtomicU64,
}

impl SimOverlay {
    fn new(viewport: (f64, f64)) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new(viewport),
            draws: Mutex::new(Vec::new()),
            cleared: AtomicU64::new(0),
        })
    }

    pub fn size(&self) -> (f64, f64) {
        *crate::lock(&self.size)
    }

    pub fn draw_count(&self) -> usize {
        crate::lock(&self.draws).len()
    }

    pub fn last_draw(&self) -> Option<(Rect, String)> {
        crate::lock(&self.draws).last().cloned()
    }

    pub fn cleared_count(&self) -> u64 {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl HighlightOverlay for SimOverlay {
    fn resize(&self, width: f64, height: f64) {
        *crate::lock(&self.size) = (width, height);
    }

    fn draw(&self, rect: &Rect, label: &str) {
        crate::lock(&self.draws).push((*rect, label.to_string()));
    }

    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn owns(&self, element: &DomHandle) -> bool {
        let mut cursor = Some(element.clone());
        while let Some(el) = cursor {
            if el.attribute(OVERLAY_ATTR).is_some() {
                return true;
            }
            cursor = el.parent();
        }
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Render runtime + fibers
// ─────────────────────────────────────────────────────────────────────────────

/// A simulated fiber node.
pub struct SimFiber {
    id: u64,
    self_weak: Weak<SimFiber>,
    tag: FiberTag,
    type_name: Option<String>,
    display_name: Option<String>,
    element_type_name: Option<String>,
    key: Option<String>,
    host_tag: Option<String>,
    props: Mutex<Option<HostValue>>,
    state: Mutex<Option<HostValue>>,
    hooks: Mutex<Vec<HostValue>>,
    parent: Mutex<Weak<SimFiber>>,
    child: Mutex<Option<Arc<SimFiber>>>,
    sibling: Mutex<Option<Arc<SimFiber>>>,
    dom: Mutex<Weak<SimElement>>,
    source: Option<SourceLocation>,
    rendered: AtomicBool,
}

impl SimFiber {
    pub fn set_props(&self, props: HostValue) {
        *crate::lock(&self.props) = Some(props);
    }

    pub fn set_state(&self, state: HostValue) {
        *crate::lock(&self.state) = Some(state);
    }

    pub fn set_hooks(&self, hooks: Vec<HostValue>) {
        *crate::lock(&self.hooks) = hooks;
    }

    fn set_rendered_deep(&self, rendered: bool) {
        self.rendered.store(rendered, Ordering::SeqCst);
        let mut child = crate::lock(&self.child).clone();
        while let Some(c) = child {
            c.set_rendered_deep(rendered);
            child = crate::lock(&c.sibling).clone();
        }
    }

    fn find(&self, name: &str) -> Option<Arc<SimFiber>> {
        let matched = self.type_name.as_deref() == Some(name)
            || self.host_tag.as_deref() == Some(name)
            || self.display_name.as_deref() == Some(name);
        if matched {
            return self.self_weak.upgrade();
        }
        let mut child = crate::lock(&self.child).clone();
        while let Some(c) = child {
            if let Some(found) = c.find(name) {
                return Some(found);
            }
            child = crate::lock(&c.sibling).clone();
        }
        None
    }

    /// Concrete DOM element, for test drivers.
    pub fn dom_sim(&self) -> Option<Arc<SimElement>> {
        crate::lock(&self.dom).upgrade()
    }
}

impl FiberNode for SimFiber {
    fn node_id(&self) -> u64 {
        self.id
    }

    fn tag(&self) -> FiberTag {
        self.tag
    }

    fn host_tag(&self) -> Option<String> {
        self.host_tag.clone()
    }

    fn type_name(&self) -> Option<String> {
        self.type_name.clone()
    }

    fn display_name(&self) -> Option<String> {
        self.display_name.clone()
    }

    fn element_type_name(&self) -> Option<String> {
        self.element_type_name.clone()
    }

    fn key(&self) -> Option<String> {
        self.key.clone()
    }

    fn props(&self) -> Option<HostValue> {
        crate::lock(&self.props).clone()
    }

    fn state(&self) -> Option<HostValue> {
        crate::lock(&self.state).clone()
    }

    fn hook_head(&self) -> Option<HookHandle> {
        let hooks = crate::lock(&self.hooks).clone();
        if hooks.is_empty() {
            None
        } else {
            Some(Arc::new(SimHook {
                values: Arc::new(hooks),
                index: 0,
            }) as HookHandle)
        }
    }

    fn parent(&self) -> Option<FiberHandle> {
        crate::lock(&self.parent).upgrade().map(|p| p as FiberHandle)
    }

    fn child(&self) -> Option<FiberHandle> {
        crate::lock(&self.child).clone().map(|c| c as FiberHandle)
    }

    fn sibling(&self) -> Option<FiberHandle> {
        crate::lock(&self.sibling).clone().map(|s| s as FiberHandle)
    }

    fn dom_element(&self) -> Option<DomHandle> {
        crate::lock(&self.dom).upgrade().map(|e| e as DomHandle)
    }

    fn source_location(&self) -> Option<SourceLocation> {
        self.source.clone()
    }

    fn rendered_in_commit(&self) -> bool {
        self.rendered.load(Ordering::SeqCst)
    }
}

/// One slot of the simulated hook list, linked by index.
struct SimHook {
    values: Arc<Vec<HostValue>>,
    index: usize,
}

impl HookSlot for SimHook {
    fn memoized(&self) -> HostValue {
        self.values
            .get(self.index)
            .cloned()
            .unwrap_or(HostValue::Undefined)
    }

    fn next(&self) -> Option<HookHandle> {
        if self.index + 1 < self.values.len() {
            Some(Arc::new(SimHook {
                values: self.values.clone(),
                index: self.index + 1,
            }) as HookHandle)
        } else {
            None
        }
    }
}

/// Simulated render runtime: commit observers plus the detection probes.
pub struct SimRuntime {
    self_weak: Weak<SimRuntime>,
    expose_devtools: bool,
    expose_global_marker: bool,
    version: Option<String>,
    next_node_id: AtomicU64,
    next_obs_id: AtomicU64,
    observers: Mutex<Vec<(u64, CommitObserver)>>,
    root: Mutex<Option<Arc<SimFiber>>>,
    remaining_install_failures: AtomicU32,
}

impl SimRuntime {
    fn new(options: &SimOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| SimRuntime {
            self_weak: weak.clone(),
            expose_devtools: options.expose_devtools,
            expose_global_marker: options.expose_global_marker,
            version: options.react_version.clone(),
            next_node_id: AtomicU64::new(1),
            next_obs_id: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
            root: Mutex::new(None),
            remaining_install_failures: AtomicU32::new(options.fail_commit_hook_installs),
        })
    }

    fn new_fiber(&self, spec: &FiberSpec) -> Arc<SimFiber> {
        let id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
        Arc::new_cyclic(|weak| SimFiber {
            id,
            self_weak: weak.clone(),
            tag: spec.tag,
            type_name: spec.name.clone(),
            display_name: spec.display_name.clone(),
            element_type_name: spec.element_type_name.clone(),
            key: spec.key.clone(),
            host_tag: spec.host_tag.clone(),
            props: Mutex::new(spec.props.clone()),
            state: Mutex::new(spec.state.clone()),
            hooks: Mutex::new(spec.hooks.clone()),
            parent: Mutex::new(Weak::new()),
            child: Mutex::new(None),
            sibling: Mutex::new(None),
            dom: Mutex::new(Weak::new()),
            source: spec.source.clone(),
            rendered: AtomicBool::new(true),
        })
    }

    fn fire_commit(&self) {
        let root = crate::lock(&self.root).clone();
        let Some(root) = root else { return };
        let observers: Vec<_> = crate::lock(&self.observers)
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(root.clone() as FiberHandle);
        }
    }

    pub fn root_fiber(&self) -> Option<Arc<SimFiber>> {
        crate::lock(&self.root).clone()
    }

    /// How many install attempts are still configured to fail.
    pub fn pending_install_failures(&self) -> u32 {
        self.remaining_install_failures.load(Ordering::SeqCst)
    }
}

impl RenderRuntime for SimRuntime {
    fn devtools_hook(&self) -> Option<DevtoolsProbe> {
        if !self.expose_devtools {
            return None;
        }
        Some(DevtoolsProbe {
            renderer_count: 1,
            version: self.version.clone(),
        })
    }

    fn global_marker(&self) -> Option<String> {
        if !self.expose_global_marker {
            return None;
        }
        self.version.clone().or_else(|| Some("unknown".into()))
    }

    fn on_commit(&self, observer: CommitObserver) -> Result<Box<dyn PatchGuard>> {
        if self.remaining_install_failures.load(Ordering::SeqCst) > 0 {
            self.remaining_install_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Instrumentation(
                "commit hook registration rejected".into(),
            ));
        }
        let id = self.next_obs_id.fetch_add(1, Ordering::SeqCst);
        crate::lock(&self.observers).push((id, observer));
        let runtime = self.self_weak.clone();
        Ok(CallbackGuard::new(move || {
            if let Some(runtime) = runtime.upgrade() {
                crate::lock(&runtime.observers).retain(|(oid, _)| *oid != id);
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fiber spec builder
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative description of a fiber subtree, for mounting into a SimPage.
#[derive(Clone)]
pub struct FiberSpec {
    tag: FiberTag,
    name: Option<String>,
    display_name: Option<String>,
    element_type_name: Option<String>,
    key: Option<String>,
    host_tag: Option<String>,
    props: Option<HostValue>,
    state: Option<HostValue>,
    hooks: Vec<HostValue>,
    source: Option<SourceLocation>,
    bounds: Option<Rect>,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<FiberSpec>,
}

impl FiberSpec {
    fn base(tag: FiberTag) -> Self {
        Self {
            tag,
            name: None,
            display_name: None,
            element_type_name: None,
            key: None,
            host_tag: None,
            props: None,
            state: None,
            hooks: Vec::new(),
            source: None,
            bounds: None,
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn component(name: &str) -> Self {
        let mut spec = Self::base(FiberTag::FunctionComponent);
        spec.name = Some(name.to_string());
        spec
    }

    pub fn class_component(name: &str) -> Self {
        let mut spec = Self::base(FiberTag::ClassComponent);
        spec.name = Some(name.to_string());
        spec
    }

    pub fn memo(name: &str) -> Self {
        let mut spec = Self::base(FiberTag::MemoComponent);
        spec.element_type_name = Some(name.to_string());
        spec
    }

    pub fn forward_ref(name: &str) -> Self {
        let mut spec = Self::base(FiberTag::ForwardRef);
        spec.element_type_name = Some(name.to_string());
        spec
    }

    pub fn fragment() -> Self {
        Self::base(FiberTag::Fragment)
    }

    pub fn provider(name: &str) -> Self {
        let mut spec = Self::base(FiberTag::ContextProvider);
        spec.element_type_name = Some(name.to_string());
        spec
    }

    pub fn suspense() -> Self {
        let mut spec = Self::base(FiberTag::SuspenseComponent);
        spec.element_type_name = Some("Suspense".to_string());
        spec
    }

    pub fn host(tag: &str, bounds: Rect) -> Self {
        let mut spec = Self::base(FiberTag::HostComponent);
        spec.host_tag = Some(tag.to_string());
        spec.bounds = Some(bounds);
        spec
    }

    pub fn text(content: &str) -> Self {
        let mut spec = Self::base(FiberTag::HostText);
        spec.text = Some(content.to_string());
        spec
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn props(mut self, props: HostValue) -> Self {
        self.props = Some(props);
        self
    }

    pub fn state(mut self, state: HostValue) -> Self {
        self.state = Some(state);
        self
    }

    pub fn hooks(mut self, hooks: Vec<HostValue>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn source(mut self, file: &str, line: u32, column: u32) -> Self {
        self.source = Some(SourceLocation {
            file: file.to_string(),
            line,
            column,
        });
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    pub fn child(mut self, child: FiberSpec) -> Self {
        self.children.push(child);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The page
// ─────────────────────────────────────────────────────────────────────────────

/// Construction options for a simulated page.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Whether the page carries a render runtime at all.
    pub runtime: bool,
    /// Probe (a): devtools-style global hook present.
    pub expose_devtools: bool,
    /// Probe (b): well-known global runtime object present.
    pub expose_global_marker: bool,
    pub react_version: Option<String>,
    pub viewport: (f64, f64),
    /// Make the first N commit-hook registrations fail (bridge retry tests).
    pub fail_commit_hook_installs: u32,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            runtime: true,
            expose_devtools: true,
            expose_global_marker: true,
            react_version: Some("18.2.0".to_string()),
            viewport: (1280.0, 800.0),
            fail_commit_hook_installs: 0,
        }
    }
}

/// The simulated page.
pub struct SimPage {
    document: Arc<SimDocument>,
    runtime: Option<Arc<SimRuntime>>,
    console: Arc<SimConsole>,
    fetch: Arc<SimFetch>,
    xhr: Arc<SimXhr>,
    performance: Arc<SimPerformance>,
    scheduler: Arc<SimScheduler>,
    overlay: Arc<SimOverlay>,
    routes: Arc<SimRoutes>,
    container: Mutex<Option<Arc<SimElement>>>,
}

impl SimPage {
    pub fn new() -> Arc<Self> {
        Self::with_options(SimOptions::default())
    }

    pub fn with_options(options: SimOptions) -> Arc<Self> {
        let routes = SimRoutes::new();
        Arc::new(Self {
            document: SimDocument::new(options.viewport),
            runtime: options.runtime.then(|| SimRuntime::new(&options)),
            console: SimConsole::new(),
            fetch: SimFetch::new(routes.clone()),
            xhr: SimXhr::new(routes.clone()),
            performance: SimPerformance::new(),
            scheduler: SimScheduler::new(),
            overlay: SimOverlay::new(options.viewport),
            routes,
            container: Mutex::new(None),
        })
    }

    // ── Host-side drivers ────────────────────────────────────────────────

    /// Mount a fiber tree into the page and fire the first commit.
    pub fn mount(&self, spec: FiberSpec) -> Result<Arc<SimFiber>> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Instrumentation("page has no render runtime".into()))?;

        let container = self.ensure_container();
        let mut root_spec = FiberSpec::base(FiberTag::HostRoot);
        root_spec.children.push(spec);
        let root = self.build_fiber(runtime, &root_spec, &container);
        // The runtime tags the mount container with root linkage, which is
        // what the detection probes scan for.
        container.link_fiber(&root);
        *crate::lock(&runtime.root) = Some(root.clone());
        runtime.fire_commit();
        Ok(root)
    }

    fn ensure_container(&self) -> Arc<SimElement> {
        let mut slot = crate::lock(&self.container);
        if let Some(container) = slot.as_ref() {
            return container.clone();
        }
        let container = self.document.create_element("div");
        drop(slot);
        container.set_attribute("id", "root");
        let (w, h) = self.document.viewport();
        container.set_bounds(Rect::new(0.0, 0.0, w, h));
        self.document.body_sim().append_child(&container);
        let mut slot = crate::lock(&self.container);
        *slot = Some(container.clone());
        container
    }

    fn build_fiber(
        &self,
        runtime: &Arc<SimRuntime>,
        spec: &FiberSpec,
        host_parent: &Arc<SimElement>,
    ) -> Arc<SimFiber> {
        let fiber = runtime.new_fiber(spec);

        let child_host_parent = if let Some(tag) = &spec.host_tag {
            let element = self.document.create_element(tag);
            for (name, value) in &spec.attributes {
                element.set_attribute(name, value);
            }
            if let Some(bounds) = spec.bounds {
                element.set_bounds(bounds);
            }
            host_parent.append_child(&element);
            element.link_fiber(&fiber);
            *crate::lock(&fiber.dom) = Arc::downgrade(&element);
            element
        } else {
            if let Some(text) = &spec.text {
                host_parent.set_text(text);
            }
            host_parent.clone()
        };

        let mut previous: Option<Arc<SimFiber>> = None;
        for child_spec in &spec.children {
            let child = self.build_fiber(runtime, child_spec, &child_host_parent);
            *crate::lock(&child.parent) = Arc::downgrade(&fiber);
            match previous {
                None => *crate::lock(&fiber.child) = Some(child.clone()),
                Some(prev) => *crate::lock(&prev.sibling) = Some(child.clone()),
            }
            previous = Some(child);
        }
        fiber
    }

    /// Re-fire a commit with every node marked rendered.
    pub fn commit(&self) {
        if let Some(runtime) = &self.runtime {
            if let Some(root) = runtime.root_fiber() {
                root.set_rendered_deep(true);
            }
            runtime.fire_commit();
        }
    }

    /// Fire a commit in which only `fiber`'s subtree performed work.
    pub fn commit_subtree(&self, fiber: &Arc<SimFiber>) {
        if let Some(runtime) = &self.runtime {
            if let Some(root) = runtime.root_fiber() {
                root.set_rendered_deep(false);
            }
            fiber.set_rendered_deep(true);
            runtime.fire_commit();
        }
    }

    /// Look up a mounted fiber by component name or host tag.
    pub fn find_fiber(&self, name: &str) -> Option<Arc<SimFiber>> {
        self.runtime
            .as_ref()
            .and_then(|r| r.root_fiber())
            .and_then(|root| root.find(name))
    }

    pub fn console_call(&self, level: ConsoleLevel, args: &[HostValue]) {
        self.console.call(level, args);
    }

    pub fn console_log(&self, args: &[HostValue]) {
        self.console_call(ConsoleLevel::Log, args);
    }

    pub fn console_error(&self, args: &[HostValue]) {
        self.console_call(ConsoleLevel::Error, args);
    }

    /// The page's own fetch call.
    pub async fn page_fetch(&self, request: HostRequest) -> Result<HostResponse> {
        self.fetch.perform(&request).await
    }

    /// The page's own XHR call.
    pub fn page_xhr(
        &self,
        request: HostRequest,
        on_done: Box<dyn FnOnce(std::result::Result<HostResponse, String>) + Send>,
    ) {
        self.xhr.send(request, on_done);
    }

    pub fn emit_perf(&self, entry: PerfEntry) {
        self.performance.emit(entry);
    }

    pub fn dispatch(&self, event: DomEvent) {
        self.document.dispatch(&event);
    }

    /// Resize the viewport and fire the resize listeners.
    pub fn set_viewport(&self, width: f64, height: f64) {
        *crate::lock(&self.document.viewport) = (width, height);
        self.dispatch(DomEvent::Resize { width, height });
    }

    /// Place a widget-owned panel element (part of the tool's own UI).
    pub fn install_widget_panel(&self, bounds: Rect) -> DomHandle {
        let panel = self.document.create_element("div");
        panel.set_attribute(OVERLAY_ATTR, "1");
        panel.set_attribute("id", "rspy-widget");
        panel.set_bounds(bounds);
        self.document.body_sim().append_child(&panel);
        panel as DomHandle
    }

    // ── Test accessors ───────────────────────────────────────────────────

    pub fn routes(&self) -> &SimRoutes {
        &self.routes
    }

    pub fn console_sim(&self) -> Arc<SimConsole> {
        self.console.clone()
    }

    pub fn overlay_sim(&self) -> Arc<SimOverlay> {
        self.overlay.clone()
    }

    pub fn scheduler_sim(&self) -> Arc<SimScheduler> {
        self.scheduler.clone()
    }

    pub fn document_sim(&self) -> Arc<SimDocument> {
        self.document.clone()
    }

    pub fn runtime_sim(&self) -> Option<Arc<SimRuntime>> {
        self.runtime.clone()
    }

    pub fn performance_sim(&self) -> Arc<SimPerformance> {
        self.performance.clone()
    }
}

impl HostPage for SimPage {
    fn document(&self) -> Arc<dyn DomDocument> {
        self.document.clone()
    }

    fn runtime(&self) -> Option<Arc<dyn RenderRuntime>> {
        self.runtime
            .clone()
            .map(|r| r as Arc<dyn RenderRuntime>)
    }

    fn console(&self) -> Arc<dyn ConsoleHook> {
        self.console.clone()
    }

    fn fetch(&self) -> Arc<dyn FetchHook> {
        self.fetch.clone()
    }

    fn xhr(&self) -> Arc<dyn XhrHook> {
        self.xhr.clone()
    }

    fn performance(&self) -> Arc<dyn PerformanceHook> {
        self.performance.clone()
    }

    fn scheduler(&self) -> Arc<dyn FrameScheduler> {
        self.scheduler.clone()
    }

    fn overlay(&self) -> Arc<dyn HighlightOverlay> {
        self.overlay.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn two_box_page() -> (Arc<SimPage>, Arc<SimFiber>) {
        let page = SimPage::new();
        let root = page
            .mount(
                FiberSpec::component("App").child(
                    FiberSpec::host("div", Rect::new(0.0, 0.0, 200.0, 200.0))
                        .child(FiberSpec::host("span", Rect::new(50.0, 50.0, 20.0, 20.0))),
                ),
            )
            .expect("mount");
        (page, root)
    }

    #[test]
    fn test_element_from_point_returns_topmost() {
        let (page, _) = two_box_page();
        let doc = page.document_sim();
        let hit = doc.element_from_point(55.0, 55.0).expect("hit");
        assert_eq!(hit.tag_name(), "span");
        let hit = doc.element_from_point(150.0, 150.0).expect("hit");
        assert_eq!(hit.tag_name(), "div");
    }

    #[test]
    fn test_mount_links_fiber_to_dom_and_back() {
        let (page, _) = two_box_page();
        let span = page.find_fiber("span").expect("span fiber");
        let element = span.dom_element().expect("span element");
        assert_eq!(element.tag_name(), "span");
        let linked = element.fiber().expect("linkage");
        assert_eq!(linked.node_id(), span.node_id());
    }

    #[test]
    fn test_mutation_observer_scope_and_old_value() {
        let (page, _) = two_box_page();
        let doc = page.document_sim();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let body = doc.body().expect("body");
        let _guard = doc
            .observe_mutations(
                body,
                MutationOptions::default(),
                Arc::new(move |records| {
                    crate::lock(&sink_seen).extend(records);
                }),
            )
            .expect("observe");

        let span = page.find_fiber("span").and_then(|f| f.dom_sim()).expect("span");
        span.set_attribute("class", "active");
        span.set_attribute("class", "inactive");

        let records = crate::lock(&seen);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].old_value, None);
        assert_eq!(records[1].old_value.as_deref(), Some("active"));
        assert_eq!(records[1].new_value.as_deref(), Some("inactive"));
    }

    #[test]
    fn test_console_install_and_exact_restore() {
        let page = SimPage::new();
        let console = page.console_sim();
        let before = console.writer_ptr();

        struct CountingTap(AtomicUsize);
        impl ConsoleTap for CountingTap {
            fn on_call(&self, _: ConsoleLevel, _: &[HostValue], _: Option<&str>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let tap = Arc::new(CountingTap(AtomicUsize::new(0)));
        let mut guard = console.install(tap.clone()).expect("install");
        assert_ne!(console.writer_ptr(), before);

        page.console_log(&[HostValue::string("hello")]);
        assert_eq!(tap.0.load(Ordering::SeqCst), 1);
        // Original output still printed.
        assert_eq!(console.printed().len(), 1);

        guard.restore();
        assert_eq!(console.writer_ptr(), before);
        page.console_log(&[HostValue::string("after")]);
        assert_eq!(tap.0.load(Ordering::SeqCst), 1);
        assert_eq!(console.printed().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_result_unaltered_by_taps() {
        let page = SimPage::new();
        page.routes()
            .respond_json("GET", "/api/x", 200, serde_json::json!({"ok": true}));

        struct NoopTap;
        impl FetchTap for NoopTap {
            fn on_request(&self, _: u64, _: &HostRequest) {}
            fn on_response(&self, _: u64, _: &HostResponse) {}
            fn on_failure(&self, _: u64, _: &str) {}
        }
        let _guard = page.fetch.install(Arc::new(NoopTap)).expect("install");

        let response = page
            .page_fetch(HostRequest {
                method: "GET".into(),
                url: "/api/x".into(),
                headers: Vec::new(),
                body: None,
            })
            .await
            .expect("fetch");
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_str(), Some("{\"ok\":true}"));
    }

    #[test]
    fn test_frame_guard_cancels_pending_callback() {
        let page = SimPage::new();
        let sched = page.scheduler_sim();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let mut guard = sched.request_frame(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(sched.pending(), 1);
        guard.restore();
        assert_eq!(sched.run_frame(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_commit_subtree_marks_only_subtree_rendered() {
        let (page, root) = two_box_page();
        let span = page.find_fiber("span").expect("span");
        page.commit_subtree(&span);
        assert!(span.rendered_in_commit());
        let app = page.find_fiber("App").expect("app");
        assert!(!app.rendered_in_commit());
        assert!(!root.rendered_in_commit());
    }

    #[test]
    fn test_overlay_owns_widget_panel() {
        let page = SimPage::new();
        let panel = page.install_widget_panel(Rect::new(1000.0, 600.0, 200.0, 150.0));
        assert!(page.overlay_sim().owns(&panel));
        let doc = page.document_sim();
        let hit = doc.element_from_point(1100.0, 700.0).expect("panel hit");
        assert!(page.overlay_sim().owns(&hit));
    }
}
