// Component registry - the current-generation index of observed components
//
// One writer (the render-tree bridge), many readers (picker, assembler).
// Every processed commit produces a complete new generation that replaces the
// previous one, so records from earlier commits never satisfy a lookup unless
// they were re-observed. Identity is stable across re-renders: the id is a
// hash of the (parent-path, type, key, index) tuple, so the same logical
// instance keeps the same id and the map cannot grow without bound.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::host::{DomHandle, FiberTag, HostValue, SourceLocation};

/// Marker attribute the bridge writes onto owned DOM elements so hit-testing
/// can resolve without re-walking the tree.
pub const MARKER_ATTR: &str = "data-rspy-id";

/// Closed classification of observed nodes. `Other` absorbs structural and
/// future runtime node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComponentKind {
    FunctionComponent,
    ClassComponent,
    HostComponent,
    HostText,
    Fragment,
    ContextProvider,
    ContextConsumer,
    ForwardRef,
    MemoComponent,
    SuspenseComponent,
    Other,
}

impl ComponentKind {
    /// Map the runtime's raw tag into our classification.
    pub fn from_tag(tag: FiberTag) -> Self {
        match tag {
            FiberTag::FunctionComponent | FiberTag::IndeterminateComponent => {
                ComponentKind::FunctionComponent
            }
            FiberTag::ClassComponent => ComponentKind::ClassComponent,
            FiberTag::HostComponent => ComponentKind::HostComponent,
            FiberTag::HostText => ComponentKind::HostText,
            FiberTag::Fragment => ComponentKind::Fragment,
            FiberTag::ContextProvider => ComponentKind::ContextProvider,
            FiberTag::ContextConsumer => ComponentKind::ContextConsumer,
            FiberTag::ForwardRef => ComponentKind::ForwardRef,
            FiberTag::MemoComponent | FiberTag::SimpleMemoComponent => ComponentKind::MemoComponent,
            FiberTag::SuspenseComponent => ComponentKind::SuspenseComponent,
            FiberTag::HostRoot
            | FiberTag::HostPortal
            | FiberTag::Mode
            | FiberTag::Profiler
            | FiberTag::LazyComponent
            | FiberTag::Unknown(_) => ComponentKind::Other,
        }
    }

    /// Application-defined units are selectable; host and structural nodes
    /// are not.
    pub fn is_selectable(&self) -> bool {
        matches!(
            self,
            ComponentKind::FunctionComponent
                | ComponentKind::ClassComponent
                | ComponentKind::ForwardRef
                | ComponentKind::MemoComponent
        )
    }
}

/// One captured hook slot, in list order.
#[derive(Clone)]
pub struct HookCapture {
    pub index: usize,
    pub value: HostValue,
}

/// One observed component or host node.
#[derive(Clone)]
pub struct ComponentRecord {
    /// Stable id: hash of (parent-path, type, key, index).
    pub id: String,
    pub name: String,
    pub kind: ComponentKind,
    pub is_selectable: bool,
    /// Shallow handles into the host runtime's live data; never mutated here.
    pub props: Option<HostValue>,
    pub state: Option<HostValue>,
    pub hooks: Vec<HookCapture>,
    /// Nearest selectable ancestor.
    pub parent: Option<String>,
    /// Nearest selectable descendants.
    pub children: Vec<String>,
    /// Host nodes own one; composites borrow the nearest host descendant's.
    pub dom_element: Option<DomHandle>,
    pub source_location: Option<SourceLocation>,
    /// Count of relevant ancestors up to the render root.
    pub depth: usize,
}

impl ComponentRecord {
    pub fn is_root(&self) -> bool {
        self.depth == 0 || self.parent.is_none()
    }
}

/// Stable component identity: hash of the parent id plus this node's
/// (name, key, index) tuple, truncated hex.
pub fn stable_id(parent_id: Option<&str>, name: &str, key: Option<&str>, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_id.unwrap_or("").as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(key.unwrap_or("").as_bytes());
    hasher.update(b"@");
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// A complete set of records from one processed commit.
#[derive(Default)]
pub struct Generation {
    records: Vec<Arc<ComponentRecord>>,
}

impl Generation {
    pub fn push(&mut self, record: ComponentRecord) -> Arc<ComponentRecord> {
        let record = Arc::new(record);
        self.records.push(record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ComponentRecord>> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct RegistryInner {
    commit_count: u64,
    by_id: HashMap<String, Arc<ComponentRecord>>,
    /// DOM element id -> component id. Only records with a DOM element.
    by_dom: HashMap<u64, String>,
    /// Selectable ids in ascending-depth order.
    ordered: Vec<String>,
}

/// The registry proper. Mutated only by the bridge; read everywhere.
pub struct Registry {
    inner: std::sync::Mutex<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(RegistryInner {
                commit_count: 0,
                by_id: HashMap::new(),
                by_dom: HashMap::new(),
                ordered: Vec::new(),
            }),
        }
    }

    /// Swap in a fresh generation. Called by the bridge once per processed
    /// commit; everything not re-observed is evicted.
    pub fn replace(&self, generation: Generation) {
        let mut by_id = HashMap::with_capacity(generation.records.len());
        let mut by_dom = HashMap::new();
        let mut selectable: Vec<(usize, String)> = Vec::new();

        for record in &generation.records {
            if let Some(element) = &record.dom_element {
                by_dom.insert(element.element_id(), record.id.clone());
            }
            if record.is_selectable {
                selectable.push((record.depth, record.id.clone()));
            }
            by_id.insert(record.id.clone(), record.clone());
        }
        selectable.sort_by(|a, b| a.0.cmp(&b.0));

        let mut inner = crate::lock(&self.inner);
        inner.commit_count += 1;
        inner.by_id = by_id;
        inner.by_dom = by_dom;
        inner.ordered = selectable.into_iter().map(|(_, id)| id).collect();
    }

    /// Record owning this DOM element, if any.
    pub fn record_for(&self, element: &DomHandle) -> Option<Arc<ComponentRecord>> {
        self.record_for_element_id(element.element_id())
    }

    pub fn record_for_element_id(&self, element_id: u64) -> Option<Arc<ComponentRecord>> {
        let inner = crate::lock(&self.inner);
        let id = inner.by_dom.get(&element_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<ComponentRecord>> {
        crate::lock(&self.inner).by_id.get(id).cloned()
    }

    /// All selectable records, ascending depth.
    pub fn all(&self) -> Vec<Arc<ComponentRecord>> {
        let inner = crate::lock(&self.inner);
        inner
            .ordered
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Selectable records with no resolvable parent.
    pub fn roots(&self) -> Vec<Arc<ComponentRecord>> {
        self.all().into_iter().filter(|r| r.is_root()).collect()
    }

    /// How many commits have been processed into this registry.
    pub fn commit_count(&self) -> u64 {
        crate::lock(&self.inner).commit_count
    }

    /// Total records in the current generation (selectable or not).
    pub fn len(&self) -> usize {
        crate::lock(&self.inner).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        crate::lock(&self.inner).by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, depth: usize, selectable: bool, parent: Option<&str>) -> ComponentRecord {
        ComponentRecord {
            id: id.to_string(),
            name: id.to_string(),
            kind: if selectable {
                ComponentKind::FunctionComponent
            } else {
                ComponentKind::HostComponent
            },
            is_selectable: selectable,
            props: None,
            state: None,
            hooks: Vec::new(),
            parent: parent.map(str::to_string),
            children: Vec::new(),
            dom_element: None,
            source_location: None,
            depth,
        }
    }

    #[test]
    fn test_empty_registry_answers_everything() {
        let registry = Registry::new();
        assert!(registry.all().is_empty());
        assert!(registry.roots().is_empty());
        assert!(registry.by_id("nope").is_none());
        assert!(registry.record_for_element_id(1).is_none());
    }

    #[test]
    fn test_replace_evicts_previous_generation() {
        let registry = Registry::new();

        let mut first = Generation::default();
        first.push(record("a", 0, true, None));
        first.push(record("b", 1, true, Some("a")));
        registry.replace(first);
        assert_eq!(registry.len(), 2);

        let mut second = Generation::default();
        second.push(record("a", 0, true, None));
        registry.replace(second);
        assert_eq!(registry.len(), 1);
        assert!(registry.by_id("b").is_none(), "stale record must be evicted");
        assert_eq!(registry.commit_count(), 2);
    }

    #[test]
    fn test_all_orders_by_ascending_depth_and_filters_selectable() {
        let registry = Registry::new();
        let mut generation = Generation::default();
        generation.push(record("deep", 3, true, Some("mid")));
        generation.push(record("host", 1, false, Some("top")));
        generation.push(record("top", 0, true, None));
        generation.push(record("mid", 2, true, Some("top")));
        registry.replace(generation);

        let all: Vec<_> = registry.all().iter().map(|r| r.id.clone()).collect();
        assert_eq!(all, vec!["top", "mid", "deep"]);

        let roots: Vec<_> = registry.roots().iter().map(|r| r.id.clone()).collect();
        assert_eq!(roots, vec!["top"]);
    }

    #[test]
    fn test_stable_id_is_deterministic_and_index_sensitive() {
        let parent = stable_id(None, "App", None, 0);
        let a = stable_id(Some(&parent), "Row", Some("x"), 0);
        let b = stable_id(Some(&parent), "Row", Some("x"), 0);
        let c = stable_id(Some(&parent), "Row", Some("x"), 1);
        assert_eq!(a, b, "same tuple, same id");
        assert_ne!(a, c, "sibling index distinguishes instances");
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_kind_selectability() {
        assert!(ComponentKind::FunctionComponent.is_selectable());
        assert!(ComponentKind::MemoComponent.is_selectable());
        assert!(!ComponentKind::HostComponent.is_selectable());
        assert!(!ComponentKind::Fragment.is_selectable());
        assert!(!ComponentKind::SuspenseComponent.is_selectable());
    }

    #[test]
    fn test_kind_from_tag_mapping() {
        assert_eq!(
            ComponentKind::from_tag(FiberTag::SimpleMemoComponent),
            ComponentKind::MemoComponent
        );
        assert_eq!(
            ComponentKind::from_tag(FiberTag::HostComponent),
            ComponentKind::HostComponent
        );
        assert_eq!(ComponentKind::from_tag(FiberTag::Unknown(99)), ComponentKind::Other);
    }
}
