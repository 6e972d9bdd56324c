// DOM monitor - subtree mutations with structural locators
//
// Observes child-list, attribute (with old value), and character-data (with
// old value) mutations under a configurable root. Each record carries a
// CSS-path-like locator for the affected element - id when present, else
// first class, else an nth-child index - so the log stays readable after
// the elements themselves are gone. Mutations caused by the tool's own
// marker attributes are filtered out.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::events::{generate_id, DomChange, TelemetryEvent};
use crate::host::{DomHandle, HostPage, MutationKind, MutationOptions, RawMutation};

use super::{GuardSlot, RingLog, Tee};

/// Attribute namespace the tool itself writes; never recorded.
const TOOL_ATTR_PREFIX: &str = "data-rspy";

/// How many ancestors a locator includes at most.
const MAX_PATH_SEGMENTS: usize = 12;

pub struct DomMonitor {
    page: Arc<dyn HostPage>,
    /// Element id to observe under; None means document body.
    root_id: Option<String>,
    state: Arc<DomState>,
    guard: GuardSlot,
}

struct DomState {
    log: Mutex<RingLog<DomChange>>,
    tee: Mutex<Tee>,
}

impl DomMonitor {
    pub fn new(page: Arc<dyn HostPage>, capacity: usize, root_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            page,
            root_id,
            state: Arc::new(DomState {
                log: Mutex::new(RingLog::new(capacity)),
                tee: Mutex::new(Tee::default()),
            }),
            guard: GuardSlot::new(),
        })
    }

    pub fn with_tee(&self, sender: tokio::sync::mpsc::Sender<TelemetryEvent>) {
        crate::lock(&self.state.tee).set(sender);
    }

    /// Start observing. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.guard.is_active() {
            return Ok(());
        }
        let document = self.page.document();
        let target = match &self.root_id {
            Some(id) => document
                .element_by_id(id)
                .ok_or_else(|| Error::Instrumentation(format!("no element with id '{id}'")))?,
            None => document
                .body()
                .ok_or_else(|| Error::Instrumentation("document has no body".into()))?,
        };
        let state = self.state.clone();
        let guard = document.observe_mutations(
            target,
            MutationOptions::default(),
            Arc::new(move |records| {
                for record in records {
                    state.ingest(&record);
                }
            }),
        )?;
        if self.guard.install(guard) {
            tracing::debug!("dom monitor started");
        }
        Ok(())
    }

    /// Disconnect the observer. Always succeeds.
    pub fn stop(&self) {
        self.guard.release();
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Captured mutations, optionally restricted to one kind.
    pub fn entries(&self, kind: Option<MutationKind>) -> Vec<DomChange> {
        crate::lock(&self.state.log)
            .iter()
            .filter(|change| kind.map_or(true, |k| change.kind == k))
            .cloned()
            .collect()
    }

    /// The newest `count` mutations.
    pub fn recent(&self, count: usize) -> Vec<DomChange> {
        crate::lock(&self.state.log).tail(count)
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.state.log).len()
    }

    pub fn is_empty(&self) -> bool {
        crate::lock(&self.state.log).is_empty()
    }
}

impl DomState {
    fn ingest(&self, record: &RawMutation) {
        // The tool's own marker writes are not page activity.
        if record.kind == MutationKind::Attributes {
            if let Some(name) = &record.attribute_name {
                if name.starts_with(TOOL_ATTR_PREFIX) {
                    return;
                }
            }
        }
        let change = DomChange {
            id: generate_id(),
            timestamp: Utc::now(),
            kind: record.kind,
            target_path: css_path(&record.target),
            attribute: record.attribute_name.clone(),
            old_value: record.old_value.clone(),
            new_value: record.new_value.clone(),
            added: record.added.iter().map(describe).collect(),
            removed: record.removed.iter().map(describe).collect(),
        };
        crate::lock(&self.tee).forward(TelemetryEvent::Dom(change.clone()));
        crate::lock(&self.log).push(change);
    }
}

/// Short description of an added/removed node: tag plus id or first class.
fn describe(element: &DomHandle) -> String {
    segment(element)
}

/// One locator segment: #id, tag.class, or tag:nth-child(i).
fn segment(element: &DomHandle) -> String {
    if let Some(id) = element.attribute("id") {
        return format!("#{id}");
    }
    let tag = element.tag_name();
    if let Some(class) = element.classes().first() {
        return format!("{tag}.{class}");
    }
    match nth_child_index(element) {
        Some(index) => format!("{tag}:nth-child({index})"),
        None => tag,
    }
}

/// 1-based position among the parent's children.
fn nth_child_index(element: &DomHandle) -> Option<usize> {
    let parent = element.parent()?;
    parent
        .children()
        .iter()
        .position(|sibling| crate::host::same_element(sibling, element))
        .map(|i| i + 1)
}

/// CSS-path-like locator from the root down to the element.
fn css_path(element: &DomHandle) -> String {
    let mut segments = Vec::new();
    let mut cursor = Some(element.clone());
    while let Some(el) = cursor {
        if segments.len() >= MAX_PATH_SEGMENTS {
            segments.push("…".to_string());
            break;
        }
        let seg = segment(&el);
        let is_anchor = seg.starts_with('#');
        segments.push(seg);
        if is_anchor {
            // An id uniquely anchors the path; no need to go higher.
            break;
        }
        cursor = el.parent();
    }
    segments.reverse();
    segments.join(" > ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::{FiberSpec, SimPage};
    use crate::host::{DomNode, Rect};

    fn page_with_list() -> Arc<SimPage> {
        let page = SimPage::new();
        page.mount(
            FiberSpec::component("App").child(
                FiberSpec::host("ul", Rect::new(0.0, 0.0, 200.0, 100.0))
                    .attr("class", "items")
                    .child(FiberSpec::host("li", Rect::new(0.0, 0.0, 200.0, 20.0)))
                    .child(FiberSpec::host("li", Rect::new(0.0, 20.0, 200.0, 20.0))),
            ),
        )
        .unwrap();
        page
    }

    fn started_monitor(page: &Arc<SimPage>) -> Arc<DomMonitor> {
        let monitor = DomMonitor::new(page.clone(), 5, None);
        monitor.start().unwrap();
        monitor
    }

    #[test]
    fn test_attribute_mutation_with_old_value_and_path() {
        let page = page_with_list();
        let monitor = started_monitor(&page);

        let ul = page.find_fiber("ul").and_then(|f| f.dom_sim()).unwrap();
        ul.set_attribute("class", "items collapsed");

        let entries = monitor.entries(Some(MutationKind::Attributes));
        assert_eq!(entries.len(), 1);
        let change = &entries[0];
        assert_eq!(change.attribute.as_deref(), Some("class"));
        assert_eq!(change.old_value.as_deref(), Some("items"));
        assert_eq!(change.new_value.as_deref(), Some("items collapsed"));
        assert!(change.target_path.contains("ul.items"));
    }

    #[test]
    fn test_path_prefers_id_then_class_then_nth_child() {
        let page = page_with_list();
        let monitor = started_monitor(&page);

        let li = page.find_fiber("li").and_then(|f| f.dom_sim()).unwrap();
        li.set_attribute("data-active", "1");

        let change = &monitor.entries(Some(MutationKind::Attributes))[0];
        // li has no id and no class: nth-child segment, anchored at the
        // container id above it.
        assert!(change.target_path.contains("li:nth-child(1)"));
        assert!(change.target_path.starts_with("#root"));
    }

    #[test]
    fn test_child_list_mutation_describes_nodes() {
        let page = page_with_list();
        let monitor = started_monitor(&page);

        let ul = page.find_fiber("ul").and_then(|f| f.dom_sim()).unwrap();
        let li = page.document_sim().create_element("li");
        li.set_attribute("class", "new-item");
        ul.append_child(&li);
        ul.remove_child(&li);

        let entries = monitor.entries(Some(MutationKind::ChildList));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].added, vec!["li.new-item"]);
        assert_eq!(entries[1].removed, vec!["li.new-item"]);
    }

    #[test]
    fn test_character_data_mutation() {
        let page = page_with_list();
        let monitor = started_monitor(&page);

        let li = page.find_fiber("li").and_then(|f| f.dom_sim()).unwrap();
        li.set_text("first");
        li.set_text("second");

        let entries = monitor.entries(Some(MutationKind::CharacterData));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].old_value.as_deref(), Some("first"));
        assert_eq!(entries[1].new_value.as_deref(), Some("second"));
    }

    #[test]
    fn test_tool_marker_attributes_ignored() {
        let page = page_with_list();
        let monitor = started_monitor(&page);

        let ul = page.find_fiber("ul").and_then(|f| f.dom_sim()).unwrap();
        ul.set_attribute("data-rspy-id", "abc123");
        ul.set_attribute("title", "menu");

        let entries = monitor.entries(Some(MutationKind::Attributes));
        assert_eq!(entries.len(), 1, "marker write is invisible");
        assert_eq!(entries[0].attribute.as_deref(), Some("title"));
    }

    #[test]
    fn test_custom_root_scopes_observation() {
        let page = page_with_list();
        let monitor = DomMonitor::new(page.clone(), 5, Some("root".into()));
        monitor.start().unwrap();

        // A mutation outside the container is not observed.
        let outside = page.document_sim().create_element("aside");
        page.document_sim().body_sim().append_child(&outside);
        // But the append itself targets body, which is outside #root.
        assert!(monitor.is_empty());

        let ul = page.find_fiber("ul").and_then(|f| f.dom_sim()).unwrap();
        ul.set_attribute("title", "inside");
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_missing_root_fails_start_but_stop_is_safe() {
        let page = SimPage::new();
        let monitor = DomMonitor::new(page, 5, Some("missing".into()));
        assert!(monitor.start().is_err());
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_capacity_eviction() {
        let page = page_with_list();
        let monitor = started_monitor(&page);
        let ul = page.find_fiber("ul").and_then(|f| f.dom_sim()).unwrap();
        for i in 0..8 {
            ul.set_attribute("data-tick", &i.to_string());
        }
        let entries = monitor.entries(None);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].new_value.as_deref(), Some("3"));
    }
}
