// Render-tree bridge - turns host commits into registry generations
//
// Attaches once detection reports a compatible runtime, registers a commit
// observer (with bounded retry - some runtimes reject hooks installed
// mid-render), and on every commit walks the committed tree into a fresh
// generation of component records. Nodes that did not render in this commit
// reuse their previous record's captured data; the structural fields
// (parent, children, depth, DOM linkage) are recomputed every time.
//
// Nothing in here may unwind into the host: the observer catches and logs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::BridgeConfig;
use crate::detect::DetectionBootstrap;
use crate::error::{Error, Result};
use crate::host::{DomHandle, FiberHandle, FiberTag, HostPage, PatchGuard};
use crate::registry::{
    stable_id, ComponentKind, ComponentRecord, Generation, HookCapture, Registry, MARKER_ATTR,
};

/// Cap on hook-list traversal; the structure is a linked list the host owns
/// and a corrupted next pointer must not hang the commit path.
const MAX_HOOKS: usize = 256;

pub struct RenderTreeBridge {
    page: Arc<dyn HostPage>,
    registry: Arc<Registry>,
    config: BridgeConfig,
    hook_guard: Mutex<Option<Box<dyn PatchGuard>>>,
    degraded: AtomicBool,
}

impl RenderTreeBridge {
    /// Wait for detection, then hook the runtime. Always returns a bridge;
    /// on detection failure or hook-registration exhaustion it is degraded
    /// (a no-op) rather than an error - the host page is not ours to break.
    pub async fn attach(
        page: Arc<dyn HostPage>,
        registry: Arc<Registry>,
        detection: &DetectionBootstrap,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            page,
            registry,
            config,
            hook_guard: Mutex::new(None),
            degraded: AtomicBool::new(false),
        });

        let (tx, rx) = oneshot::channel();
        detection.on_ready(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        let detected = match rx.await {
            Ok(result) => result,
            Err(_) => {
                bridge.mark_degraded("detection never resolved");
                return bridge;
            }
        };
        if !detected.is_react {
            bridge.mark_degraded("no compatible render runtime on this page");
            return bridge;
        }

        Self::install_hook(&bridge).await;
        bridge
    }

    /// Whether selection features are unavailable for this session.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Unhook from the runtime.
    pub fn detach(&self) {
        if let Some(mut guard) = crate::lock(&self.hook_guard).take() {
            guard.restore();
        }
    }

    fn mark_degraded(&self, reason: &str) {
        self.degraded.store(true, Ordering::SeqCst);
        tracing::warn!("render-tree bridge degraded: {reason}; selection disabled");
    }

    async fn install_hook(this: &Arc<Self>) {
        let Some(runtime) = this.page.runtime() else {
            this.mark_degraded("runtime probe succeeded but no runtime handle");
            return;
        };

        let weak = Arc::downgrade(this);
        let observer: crate::host::CommitObserver = Arc::new(move |root: FiberHandle| {
            let Some(bridge) = weak.upgrade() else { return };
            // Errors stop here; the commit path belongs to the host.
            if let Err(e) = bridge.process_commit(&root) {
                tracing::error!("commit processing failed: {e}");
            }
        });

        let delay = Duration::from_millis(this.config.hook_retry_delay_ms);
        for attempt in 1..=this.config.hook_retry_attempts {
            match runtime.on_commit(observer.clone()) {
                Ok(guard) => {
                    *crate::lock(&this.hook_guard) = Some(guard);
                    tracing::debug!(attempt, "commit hook registered");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, "commit hook registration failed: {e}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        this.mark_degraded("commit hook registration exhausted its retry budget");
    }

    /// Walk one committed tree into a fresh registry generation.
    pub fn process_commit(&self, root: &FiberHandle) -> Result<()> {
        let mut walk = CommitWalk {
            max_depth: self.config.max_walk_depth,
            seen: HashSet::new(),
            nodes: Vec::new(),
        };

        // The committed root itself is structural (HostRoot); its children
        // are where the application starts.
        walk.visit(root.clone(), None, None, &mut 0, 0)?;

        // Selectable children grouped by nearest selectable ancestor.
        let mut child_map: HashMap<String, Vec<String>> = HashMap::new();
        for node in &walk.nodes {
            if node.kind.is_selectable() {
                if let Some(parent) = &node.selectable_parent {
                    child_map.entry(parent.clone()).or_default().push(node.id.clone());
                }
            }
        }

        let mut generation = Generation::default();
        for node in walk.nodes {
            let record = self.build_record(node, &child_map);
            if record.kind == ComponentKind::HostComponent {
                if let Some(element) = &record.dom_element {
                    // Tag the element so hit-testing can resolve without a walk.
                    element.set_attribute(MARKER_ATTR, &record.id);
                }
            }
            generation.push(record);
        }

        tracing::trace!(records = generation.len(), "commit walked");
        self.registry.replace(generation);
        Ok(())
    }

    fn build_record(&self, node: NodeInfo, child_map: &HashMap<String, Vec<String>>) -> ComponentRecord {
        let children = child_map.get(&node.id).cloned().unwrap_or_default();
        let dom_element = resolve_dom(&node.fiber, self.config.max_walk_depth);

        // Unchanged nodes keep their previously captured data; only the
        // derived structure is refreshed.
        if !node.fiber.rendered_in_commit() {
            if let Some(prior) = self.registry.by_id(&node.id) {
                let mut record = (*prior).clone();
                record.parent = node.selectable_parent;
                record.children = children;
                record.depth = node.depth;
                record.dom_element = dom_element;
                return record;
            }
        }

        ComponentRecord {
            id: node.id,
            name: node.name,
            kind: node.kind,
            is_selectable: node.kind.is_selectable(),
            props: node.fiber.props(),
            state: node.fiber.state(),
            hooks: capture_hooks(&node.fiber),
            parent: node.selectable_parent,
            children,
            dom_element,
            source_location: node.fiber.source_location(),
            depth: node.depth,
        }
    }
}

impl Drop for RenderTreeBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

/// One relevant node discovered during the walk.
struct NodeInfo {
    fiber: FiberHandle,
    id: String,
    name: String,
    kind: ComponentKind,
    depth: usize,
    selectable_parent: Option<String>,
}

struct CommitWalk {
    max_depth: usize,
    seen: HashSet<u64>,
    nodes: Vec<NodeInfo>,
}

impl CommitWalk {
    /// Depth-first visit. `counter` indexes relevant nodes among the current
    /// relevant parent's descendants, which makes sibling instances of the
    /// same type distinguishable in the stable id.
    fn visit(
        &mut self,
        fiber: FiberHandle,
        relevant_parent: Option<(String, usize)>,
        selectable_parent: Option<String>,
        counter: &mut usize,
        walk_depth: usize,
    ) -> Result<()> {
        if walk_depth > self.max_depth {
            return Err(Error::Instrumentation(format!(
                "render tree deeper than {} nodes; aborting walk",
                self.max_depth
            )));
        }
        if !self.seen.insert(fiber.node_id()) {
            // Cycle in the host tree; stop quietly rather than spin.
            return Ok(());
        }

        if is_relevant(fiber.as_ref()) {
            let index = *counter;
            *counter += 1;

            let name = resolve_name(fiber.as_ref());
            let parent_id = relevant_parent.as_ref().map(|(id, _)| id.as_str());
            let id = stable_id(parent_id, &name, fiber.key().as_deref(), index);
            let depth = relevant_parent.as_ref().map(|(_, d)| d + 1).unwrap_or(0);
            let kind = ComponentKind::from_tag(fiber.tag());

            let next_selectable = if kind.is_selectable() {
                Some(id.clone())
            } else {
                selectable_parent.clone()
            };

            self.nodes.push(NodeInfo {
                fiber: fiber.clone(),
                id: id.clone(),
                name,
                kind,
                depth,
                selectable_parent,
            });

            let mut child_counter = 0;
            let mut child = fiber.child();
            while let Some(c) = child {
                let sibling = c.sibling();
                self.visit(
                    c,
                    Some((id.clone(), depth)),
                    next_selectable.clone(),
                    &mut child_counter,
                    walk_depth + 1,
                )?;
                child = sibling;
            }
        } else {
            // Structural node: descend transparently, keeping the caller's
            // counter so indices stay stable across wrappers.
            let mut child = fiber.child();
            while let Some(c) = child {
                let sibling = c.sibling();
                self.visit(
                    c,
                    relevant_parent.clone(),
                    selectable_parent.clone(),
                    counter,
                    walk_depth + 1,
                )?;
                child = sibling;
            }
        }
        Ok(())
    }
}

/// A node is relevant when it represents a DOM tag, a function/class
/// component, or carries an element-type reference. Structural nodes
/// (roots, modes, fragments, text) are walked through, not recorded.
fn is_relevant(fiber: &dyn crate::host::FiberNode) -> bool {
    if fiber.host_tag().is_some() {
        return true;
    }
    if matches!(
        fiber.tag(),
        FiberTag::FunctionComponent | FiberTag::ClassComponent | FiberTag::IndeterminateComponent
    ) {
        return true;
    }
    fiber.element_type_name().is_some()
}

/// Name resolution order: explicit displayName, then the function/class
/// name, then the element-type's name, then a synthesized fallback.
fn resolve_name(fiber: &dyn crate::host::FiberNode) -> String {
    if let Some(tag) = fiber.host_tag() {
        return tag;
    }
    fiber
        .display_name()
        .or_else(|| fiber.type_name())
        .or_else(|| fiber.element_type_name())
        .unwrap_or_else(|| format!("Unknown({:?})", fiber.tag()))
}

/// Host nodes use their own element; composites borrow the nearest host
/// descendant's.
fn resolve_dom(fiber: &FiberHandle, max_depth: usize) -> Option<DomHandle> {
    if let Some(element) = fiber.dom_element() {
        return Some(element);
    }
    let mut stack: Vec<(FiberHandle, usize)> = vec![(fiber.clone(), 0)];
    let mut seen = HashSet::new();
    while let Some((node, depth)) = stack.pop() {
        if depth > max_depth || !seen.insert(node.node_id()) {
            continue;
        }
        if node.node_id() != fiber.node_id() {
            if let Some(element) = node.dom_element() {
                return Some(element);
            }
        }
        // Children first (depth), then siblings only below the start node.
        if let Some(child) = node.child() {
            stack.push((child, depth + 1));
        }
        if depth > 0 {
            if let Some(sibling) = node.sibling() {
                stack.push((sibling, depth));
            }
        }
    }
    None
}

/// Walk the hook linked structure into an ordered capture list.
fn capture_hooks(fiber: &FiberHandle) -> Vec<HookCapture> {
    let mut hooks = Vec::new();
    let mut slot = fiber.hook_head();
    while let Some(hook) = slot {
        if hooks.len() >= MAX_HOOKS {
            tracing::trace!("hook list truncated at {MAX_HOOKS} entries");
            break;
        }
        hooks.push(HookCapture {
            index: hooks.len(),
            value: hook.memoized(),
        });
        slot = hook.next();
    }
    hooks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::host::sim::{FiberSpec, SimOptions, SimPage};
    use crate::host::{FiberNode, HostValue, Rect};

    async fn attach_bridge(page: &Arc<SimPage>) -> (Arc<Registry>, Arc<RenderTreeBridge>) {
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
            BridgeConfig {
                hook_retry_delay_ms: 5,
                ..BridgeConfig::default()
            },
        )
        .await;
        (registry, bridge)
    }

    #[tokio::test]
    async fn test_greeting_walk_produces_component_and_host_records() {
        let page = SimPage::new();
        let (registry, bridge) = attach_bridge(&page).await;
        assert!(!bridge.is_degraded());

        page.mount(
            FiberSpec::component("Greeting")
                .props(HostValue::object([("name", HostValue::string("Ada"))]))
                .child(FiberSpec::host("h1", Rect::new(0.0, 0.0, 300.0, 40.0))),
        )
        .unwrap();

        let all = registry.all();
        assert_eq!(all.len(), 1, "only the component is selectable");
        let greeting = &all[0];
        assert_eq!(greeting.name, "Greeting");
        assert_eq!(greeting.kind, ComponentKind::FunctionComponent);
        assert_eq!(greeting.depth, 0);
        assert_eq!(greeting.parent, None);
        assert!(greeting.dom_element.is_some(), "borrows the h1's element");

        // The host record exists and points back at the component.
        let h1_fiber = page.find_fiber("h1").unwrap();
        let element = h1_fiber.dom_element().unwrap();
        let h1 = registry.record_for(&element).expect("h1 record");
        assert_eq!(h1.kind, ComponentKind::HostComponent);
        assert_eq!(h1.depth, 1);
        assert_eq!(h1.parent.as_deref(), Some(greeting.id.as_str()));
        assert!(!h1.is_selectable);

        // Marker attribute was written for hit-testing.
        assert_eq!(element.attribute(MARKER_ATTR).as_deref(), Some(h1.id.as_str()));
    }

    #[tokio::test]
    async fn test_stable_ids_survive_recommits() {
        let page = SimPage::new();
        let (registry, _bridge) = attach_bridge(&page).await;

        page.mount(
            FiberSpec::component("App")
                .child(FiberSpec::component("Row").key("a"))
                .child(FiberSpec::component("Row").key("b")),
        )
        .unwrap();

        let first: Vec<_> = registry.all().iter().map(|r| r.id.clone()).collect();
        assert_eq!(first.len(), 3);

        page.commit();
        let second: Vec<_> = registry.all().iter().map(|r| r.id.clone()).collect();
        assert_eq!(first, second, "same logical instances keep their ids");
        assert_eq!(registry.commit_count(), 2);
        assert_eq!(registry.len(), 3, "no growth across commits");
    }

    #[tokio::test]
    async fn test_partial_commit_reuses_unrendered_records() {
        let page = SimPage::new();
        let (registry, _bridge) = attach_bridge(&page).await;

        page.mount(
            FiberSpec::component("App")
                .props(HostValue::object([("version", HostValue::number(1.0))]))
                .child(FiberSpec::component("Leaf").hooks(vec![HostValue::number(1.0)])),
        )
        .unwrap();

        let leaf = page.find_fiber("Leaf").unwrap();
        leaf.set_hooks(vec![HostValue::number(2.0)]);
        page.commit_subtree(&leaf);

        let all = registry.all();
        assert_eq!(all.len(), 2, "app record survives the partial commit");
        let leaf_record = all.iter().find(|r| r.name == "Leaf").unwrap();
        assert_eq!(leaf_record.hooks.len(), 1);
        // The re-rendered leaf was re-extracted.
        match &leaf_record.hooks[0].value {
            HostValue::Number(n) => assert_eq!(*n, 2.0),
            other => panic!("unexpected hook value {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_structural_nodes_are_walked_through() {
        let page = SimPage::new();
        let (registry, _bridge) = attach_bridge(&page).await;

        page.mount(
            FiberSpec::component("App").child(
                FiberSpec::fragment()
                    .child(FiberSpec::component("A"))
                    .child(FiberSpec::component("B")),
            ),
        )
        .unwrap();

        let names: Vec<_> = registry.all().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["App", "A", "B"]);
        // Fragment contributed no record but A/B still hang off App.
        let app = registry.roots()[0].clone();
        assert_eq!(app.children.len(), 2);
    }

    #[tokio::test]
    async fn test_name_resolution_prefers_display_name() {
        let page = SimPage::new();
        let (registry, _bridge) = attach_bridge(&page).await;
        page.mount(FiberSpec::component("Inner").display_name("FancyList")).unwrap();
        assert_eq!(registry.all()[0].name, "FancyList");
    }

    #[tokio::test]
    async fn test_hook_registration_retries_then_succeeds() {
        let page = SimPage::with_options(SimOptions {
            fail_commit_hook_installs: 3,
            ..SimOptions::default()
        });
        let (registry, bridge) = attach_bridge(&page).await;
        assert!(!bridge.is_degraded(), "3 failures fit inside 10 attempts");
        page.mount(FiberSpec::component("App")).unwrap();
        assert_eq!(registry.all().len(), 1);
    }

    #[tokio::test]
    async fn test_hook_registration_exhaustion_degrades() {
        let page = SimPage::with_options(SimOptions {
            fail_commit_hook_installs: 50,
            ..SimOptions::default()
        });
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
            BridgeConfig {
                hook_retry_attempts: 4,
                hook_retry_delay_ms: 1,
                ..BridgeConfig::default()
            },
        )
        .await;
        assert!(bridge.is_degraded());
        // Commits after degradation do nothing; nothing panics.
        page.mount(FiberSpec::component("App")).unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_without_runtime() {
        let page = SimPage::with_options(SimOptions {
            runtime: false,
            ..SimOptions::default()
        });
        let (_registry, bridge) = attach_bridge(&page).await;
        assert!(bridge.is_degraded());
    }
}
