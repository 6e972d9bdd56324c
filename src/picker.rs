// Hit-tester and picking session
//
// pick(x, y) maps a screen point to the most specific selectable component:
// topmost element at the point, then up the DOM ancestor chain, resolving
// each element through the registry index, then the marker attribute, then
// raw render-tree linkage. A selectable match anywhere up the chain beats a
// host-node match closer to the point; a host-node match is returned only
// when nothing selectable exists above it. The tool's own overlay elements
// are excluded before any lookup.
//
// An interactive picking session is a small state machine:
//
//   [Idle] --begin_picking--> [Picking] --click--> Selected --> [Idle]
//                                 |
//                                 +--Escape--> Cancelled --> [Idle]
//
// Picking attaches pointer-move, capture-phase click, keydown, and resize
// listeners at the document level. Pointer movement drives the highlight
// through its own two-state redraw machine (Idle/ScheduledRedraw) so at most
// one redraw runs per animation frame. Teardown of all listeners and any
// scheduled frame happens before the selection callback fires.

use std::sync::{Arc, Mutex, Weak};

use crate::host::{DomEvent, DomHandle, FiberHandle, HostPage, ListenerKind, PatchGuard};
use crate::registry::{ComponentRecord, Registry, MARKER_ATTR};

/// Outcome of a picking session, delivered to the session callback.
#[derive(Clone)]
pub enum SelectionEvent {
    Selected(Arc<ComponentRecord>),
    Cancelled,
}

pub type SelectionCallback = Arc<dyn Fn(&SelectionEvent) + Send + Sync>;

/// Observable session state, for the widget chrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerState {
    Idle,
    Picking,
}

enum RedrawState {
    Idle,
    /// A redraw is queued; the guard cancels it on session teardown.
    Scheduled(Box<dyn PatchGuard>),
}

struct PickingSession {
    callback: SelectionCallback,
    /// Listener guards: pointer-move, click (capture), keydown, resize.
    guards: Vec<Box<dyn PatchGuard>>,
    redraw: RedrawState,
    last_point: Option<(f64, f64)>,
}

enum Session {
    Idle,
    Picking(PickingSession),
}

pub struct Picker {
    self_weak: Weak<Picker>,
    page: Arc<dyn HostPage>,
    registry: Arc<Registry>,
    session: Mutex<Session>,
    /// Components the user has picked, in selection order; read by the
    /// context assembler.
    selection: Mutex<Vec<Arc<ComponentRecord>>>,
}

impl Picker {
    pub fn new(page: Arc<dyn HostPage>, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            page,
            registry,
            session: Mutex::new(Session::Idle),
            selection: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> PickerState {
        match &*crate::lock(&self.session) {
            Session::Idle => PickerState::Idle,
            Session::Picking(_) => PickerState::Picking,
        }
    }

    // ── Hit-testing ──────────────────────────────────────────────────────

    /// Resolve a screen point to a component record.
    pub fn pick(&self, x: f64, y: f64) -> Option<Arc<ComponentRecord>> {
        let document = self.page.document();
        let overlay = self.page.overlay();

        let start = document.element_from_point(x, y)?;
        // The tool's own UI is never a pick target; owns() checks the
        // ancestor chain, so the topmost element decides.
        if overlay.owns(&start) {
            return None;
        }

        let mut fallback: Option<Arc<ComponentRecord>> = None;
        let mut cursor = Some(start);
        while let Some(element) = cursor {
            if let Some(record) = self.resolve(&element) {
                if record.is_selectable {
                    return Some(record);
                }
                // A host match still names its owning component; prefer
                // that over returning the host node itself.
                if let Some(owner) = self.selectable_ancestor(&record) {
                    return Some(owner);
                }
                fallback.get_or_insert(record);
            }
            cursor = element.parent();
        }
        fallback
    }

    /// Per-element resolution: registry index, then marker attribute, then
    /// raw internal linkage.
    fn resolve(&self, element: &DomHandle) -> Option<Arc<ComponentRecord>> {
        if let Some(record) = self.registry.record_for(element) {
            return Some(record);
        }
        if let Some(id) = element.attribute(MARKER_ATTR) {
            if let Some(record) = self.registry.by_id(&id) {
                return Some(record);
            }
        }
        // Last resort: follow the element's fiber linkage up until some
        // ancestor's committed element is registered.
        let mut fiber: Option<FiberHandle> = element.fiber();
        let mut hops = 0;
        while let Some(node) = fiber {
            if hops > 64 {
                break;
            }
            if let Some(owned) = node.dom_element() {
                if let Some(record) = self.registry.record_for(&owned) {
                    return Some(record);
                }
            }
            fiber = node.parent();
            hops += 1;
        }
        None
    }

    fn selectable_ancestor(&self, record: &ComponentRecord) -> Option<Arc<ComponentRecord>> {
        let mut parent_id = record.parent.clone();
        let mut hops = 0;
        while let Some(id) = parent_id {
            if hops > 64 {
                break;
            }
            let parent = self.registry.by_id(&id)?;
            if parent.is_selectable {
                return Some(parent);
            }
            parent_id = parent.parent.clone();
            hops += 1;
        }
        None
    }

    // ── Selection set ────────────────────────────────────────────────────

    pub fn selected(&self) -> Vec<Arc<ComponentRecord>> {
        crate::lock(&self.selection).clone()
    }

    pub fn clear_selection(&self) {
        crate::lock(&self.selection).clear();
    }

    pub fn deselect(&self, id: &str) {
        crate::lock(&self.selection).retain(|r| r.id != id);
    }

    // ── Picking session ──────────────────────────────────────────────────

    /// Enter `Picking`. No-op if a session is already active.
    pub fn begin_picking(&self, callback: SelectionCallback) {
        let mut session = crate::lock(&self.session);
        if matches!(&*session, Session::Picking(_)) {
            return;
        }

        let document = self.page.document();
        let overlay = self.page.overlay();
        let (width, height) = document.viewport();
        overlay.resize(width, height);

        let weak = self.self_weak.clone();
        let move_guard = document.add_listener(
            ListenerKind::PointerMove,
            Arc::new(move |event| {
                if let (Some(picker), DomEvent::PointerMove { x, y }) = (weak.upgrade(), event) {
                    picker.on_pointer_move(*x, *y);
                }
            }),
        );
        let weak = self.self_weak.clone();
        let click_guard = document.add_listener(
            ListenerKind::ClickCapture,
            Arc::new(move |event| {
                if let (Some(picker), DomEvent::Click { x, y }) = (weak.upgrade(), event) {
                    picker.on_click(*x, *y);
                }
            }),
        );
        let weak = self.self_weak.clone();
        let key_guard = document.add_listener(
            ListenerKind::KeyDown,
            Arc::new(move |event| {
                if let (Some(picker), DomEvent::KeyDown { key }) = (weak.upgrade(), event) {
                    if key == "Escape" {
                        picker.cancel();
                    }
                }
            }),
        );
        let weak = self.self_weak.clone();
        let resize_guard = document.add_listener(
            ListenerKind::Resize,
            Arc::new(move |event| {
                if let (Some(picker), DomEvent::Resize { width, height }) = (weak.upgrade(), event)
                {
                    picker.on_resize(*width, *height);
                }
            }),
        );

        *session = Session::Picking(PickingSession {
            callback,
            guards: vec![move_guard, click_guard, key_guard, resize_guard],
            redraw: RedrawState::Idle,
            last_point: None,
        });
        tracing::debug!("picking session started");
    }

    /// Cancel the active session (Escape path). Synchronous: teardown
    /// completes before the callback observes `Cancelled`.
    pub fn cancel(&self) {
        if let Some(callback) = self.finish_session() {
            callback(&SelectionEvent::Cancelled);
        }
    }

    fn on_pointer_move(&self, x: f64, y: f64) {
        let mut session = crate::lock(&self.session);
        let Session::Picking(picking) = &mut *session else {
            return;
        };
        picking.last_point = Some((x, y));
        // One redraw per frame: scheduling only from the Idle state.
        if matches!(picking.redraw, RedrawState::Idle) {
            let weak = self.self_weak.clone();
            let guard = self.page.scheduler().request_frame(Box::new(move || {
                if let Some(picker) = weak.upgrade() {
                    picker.redraw_frame();
                }
            }));
            picking.redraw = RedrawState::Scheduled(guard);
        }
    }

    fn redraw_frame(&self) {
        let point = {
            let mut session = crate::lock(&self.session);
            let Session::Picking(picking) = &mut *session else {
                return;
            };
            picking.redraw = RedrawState::Idle;
            picking.last_point
        };
        if let Some((x, y)) = point {
            self.draw_highlight(x, y);
        }
    }

    fn draw_highlight(&self, x: f64, y: f64) {
        let overlay = self.page.overlay();
        match self.pick(x, y).and_then(|record| {
            record
                .dom_element
                .as_ref()
                .map(|el| (el.bounds(), record.name.clone()))
        }) {
            Some((bounds, name)) => overlay.draw(&bounds, &name),
            None => overlay.clear(),
        }
    }

    fn on_click(&self, x: f64, y: f64) {
        // Resolve before teardown so the highlight state is still coherent,
        // but deliver only after listeners are gone.
        let record = self.pick(x, y);
        let Some(callback) = self.finish_session() else {
            return;
        };
        match record {
            Some(record) => {
                crate::lock(&self.selection).push(record.clone());
                tracing::debug!(component = %record.name, "component selected");
                callback(&SelectionEvent::Selected(record));
            }
            None => callback(&SelectionEvent::Cancelled),
        }
    }

    fn on_resize(&self, width: f64, height: f64) {
        let point = {
            let session = crate::lock(&self.session);
            let Session::Picking(picking) = &*session else {
                return;
            };
            picking.last_point
        };
        self.page.overlay().resize(width, height);
        // Redraw the current highlight immediately; state is unchanged.
        if let Some((x, y)) = point {
            self.draw_highlight(x, y);
        }
    }

    /// Tear down the active session: restore all listeners, cancel any
    /// scheduled redraw, clear the highlight. Returns the callback to fire.
    fn finish_session(&self) -> Option<SelectionCallback> {
        let picking = {
            let mut session = crate::lock(&self.session);
            match std::mem::replace(&mut *session, Session::Idle) {
                Session::Picking(picking) => picking,
                Session::Idle => return None,
            }
        };
        let PickingSession {
            callback,
            guards,
            redraw,
            ..
        } = picking;
        for mut guard in guards {
            guard.restore();
        }
        if let RedrawState::Scheduled(mut guard) = redraw {
            guard.restore();
        }
        self.page.overlay().clear();
        tracing::debug!("picking session finished");
        Some(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RenderTreeBridge;
    use crate::config::{BridgeConfig, DetectionConfig};
    use crate::detect::DetectionBootstrap;
    use crate::host::sim::{FiberSpec, SimPage};
    use crate::host::{DomNode, FiberNode, HostValue, Rect};

    async fn picker_page() -> (Arc<SimPage>, Arc<Registry>, Arc<Picker>, Arc<RenderTreeBridge>) {
        let page = SimPage::new();
        let registry = Arc::new(Registry::new());
        let detection = Arc::new(DetectionBootstrap::new(
            page.clone(),
            DetectionConfig {
                poll_interval_ms: 5,
                max_attempts: 5,
            },
        ));
        detection.start();
        let bridge = RenderTreeBridge::attach(
            page.clone(),
            registry.clone(),
            &detection,
            BridgeConfig::default(),
        )
        .await;
        assert!(!bridge.is_degraded());

        page.mount(
            FiberSpec::component("Greeting")
                .props(HostValue::object([("name", HostValue::string("Ada"))]))
                .child(FiberSpec::host("h1", Rect::new(10.0, 10.0, 300.0, 40.0))),
        )
        .unwrap();

        let picker = Picker::new(page.clone(), registry.clone());
        (page, registry, picker, bridge)
    }

    #[tokio::test]
    async fn test_pick_prefers_selectable_over_host() {
        let (_page, _registry, picker, _bridge) = picker_page().await;
        let record = picker.pick(20.0, 20.0).expect("hit");
        assert_eq!(record.name, "Greeting");
        assert!(record.is_selectable);
    }

    #[tokio::test]
    async fn test_pick_misses_empty_space() {
        let (_page, _registry, picker, _bridge) = picker_page().await;
        assert!(picker.pick(900.0, 700.0).is_none());
    }

    #[tokio::test]
    async fn test_pick_excludes_tool_overlay() {
        let (page, _registry, picker, _bridge) = picker_page().await;
        // Widget panel covering the h1.
        page.install_widget_panel(Rect::new(0.0, 0.0, 400.0, 100.0));
        assert!(picker.pick(20.0, 20.0).is_none());
    }

    #[tokio::test]
    async fn test_pick_resolves_through_marker_attribute() {
        let (page, registry, picker, _bridge) = picker_page().await;
        let h1 = page.find_fiber("h1").unwrap();
        let h1_record = registry.record_for(&h1.dom_element().unwrap()).unwrap();

        // An element the registry has never indexed, carrying the marker.
        let doc = page.document_sim();
        let floater = doc.create_element("div");
        floater.set_attribute(MARKER_ATTR, &h1_record.id);
        floater.set_bounds(Rect::new(500.0, 500.0, 50.0, 50.0));
        doc.body_sim().append_child(&floater);

        let picked = picker.pick(510.0, 510.0).expect("marker hit");
        assert_eq!(picked.name, "Greeting", "marker match resolves to the owner");
    }

    #[tokio::test]
    async fn test_pick_resolves_through_raw_linkage() {
        let (page, registry, picker, _bridge) = picker_page().await;
        let h1 = page.find_fiber("h1").unwrap();

        // Strip the indexes the cheaper tiers rely on: an element the
        // registry never saw, carrying only fiber linkage into the tree.
        let doc = page.document_sim();
        let clone_target = doc.create_element("section");
        clone_target.set_bounds(Rect::new(600.0, 600.0, 50.0, 50.0));
        clone_target.link_fiber(&h1);
        doc.body_sim().append_child(&clone_target);
        let handle: DomHandle = clone_target.clone();
        assert!(registry.record_for(&handle).is_none());

        let picked = picker.pick(610.0, 610.0).expect("linkage hit");
        assert_eq!(picked.name, "Greeting", "linkage resolves, then prefers the owner");
    }

    #[tokio::test]
    async fn test_session_click_selects_after_teardown() {
        let (page, _registry, picker, _bridge) = picker_page().await;
        let events: Arc<Mutex<Vec<SelectionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        picker.begin_picking(Arc::new(move |event| {
            crate::lock(&sink).push(event.clone());
        }));
        assert_eq!(picker.state(), PickerState::Picking);

        page.dispatch(DomEvent::Click { x: 20.0, y: 20.0 });
        assert_eq!(picker.state(), PickerState::Idle);

        let events = crate::lock(&events);
        assert_eq!(events.len(), 1);
        match &events[0] {
            SelectionEvent::Selected(record) => assert_eq!(record.name, "Greeting"),
            SelectionEvent::Cancelled => panic!("expected selection"),
        }
        drop(events);
        assert_eq!(picker.selected().len(), 1);

        // Listeners are gone: further clicks do nothing.
        page.dispatch(DomEvent::Click { x: 20.0, y: 20.0 });
        assert_eq!(picker.selected().len(), 1);
    }

    #[tokio::test]
    async fn test_escape_cancels_and_cancels_scheduled_redraw() {
        let (page, _registry, picker, _bridge) = picker_page().await;
        let events: Arc<Mutex<Vec<SelectionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        picker.begin_picking(Arc::new(move |event| {
            crate::lock(&sink).push(event.clone());
        }));

        page.dispatch(DomEvent::PointerMove { x: 20.0, y: 20.0 });
        assert_eq!(page.scheduler_sim().pending(), 1);

        page.dispatch(DomEvent::KeyDown {
            key: "Escape".into(),
        });
        assert_eq!(picker.state(), PickerState::Idle);
        {
            let events = crate::lock(&events);
            assert_eq!(events.len(), 1);
            assert!(matches!(events[0], SelectionEvent::Cancelled));
        }
        assert!(picker.selected().is_empty());
        // The queued frame was cancelled with the session.
        assert_eq!(page.scheduler_sim().run_frame(), 0);
    }

    #[tokio::test]
    async fn test_pointer_moves_coalesce_to_one_frame() {
        let (page, _registry, picker, _bridge) = picker_page().await;
        picker.begin_picking(Arc::new(|_| {}));

        page.dispatch(DomEvent::PointerMove { x: 15.0, y: 15.0 });
        page.dispatch(DomEvent::PointerMove { x: 20.0, y: 20.0 });
        page.dispatch(DomEvent::PointerMove { x: 25.0, y: 25.0 });
        let sched = page.scheduler_sim();
        assert_eq!(sched.pending(), 1, "moves coalesce into one scheduled redraw");

        sched.run_frame();
        let overlay = page.overlay_sim();
        assert_eq!(overlay.draw_count(), 1);
        let (bounds, label) = overlay.last_draw().unwrap();
        assert_eq!(label, "Greeting");
        assert_eq!(bounds, Rect::new(10.0, 10.0, 300.0, 40.0));

        // Next move schedules again.
        page.dispatch(DomEvent::PointerMove { x: 30.0, y: 30.0 });
        assert_eq!(sched.pending(), 1);
        picker.cancel();
    }

    #[tokio::test]
    async fn test_resize_during_picking_redraws_without_state_change() {
        let (page, _registry, picker, _bridge) = picker_page().await;
        picker.begin_picking(Arc::new(|_| {}));

        page.dispatch(DomEvent::PointerMove { x: 20.0, y: 20.0 });
        page.scheduler_sim().run_frame();
        let draws_before = page.overlay_sim().draw_count();

        page.set_viewport(1920.0, 1080.0);
        assert_eq!(picker.state(), PickerState::Picking);
        assert_eq!(page.overlay_sim().size(), (1920.0, 1080.0));
        assert_eq!(page.overlay_sim().draw_count(), draws_before + 1);
        picker.cancel();
    }

    #[tokio::test]
    async fn test_begin_picking_twice_is_noop() {
        let (_page, _registry, picker, _bridge) = picker_page().await;
        picker.begin_picking(Arc::new(|_| {}));
        picker.begin_picking(Arc::new(|_| {}));
        assert_eq!(picker.state(), PickerState::Picking);
        picker.cancel();
        assert_eq!(picker.state(), PickerState::Idle);
    }
}
