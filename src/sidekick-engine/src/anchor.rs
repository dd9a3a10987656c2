//! Anchor registry.
//!
//! Tracks the two nodes the engine owns in the host document: an invisible
//! anchor inserted as the first child of the results root, and the visible
//! container right after it. The anchor outlives the container; a container
//! whose anchor is gone is discarded, an anchor without a container is the
//! signal to rebuild the container in place.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SidekickError};
use crate::host::{ANCHOR_ID, CONTENT_ID, ContainerBuilder, HostDocument, NodeId};

/// Nodes currently owned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorRecord {
    /// Results root the anchor was inserted into.
    pub root: NodeId,
    pub anchor: NodeId,
    pub container: Option<NodeId>,
    /// Element inside the container that receives answer markup.
    pub content: Option<NodeId>,
}

/// What is left of the mounted UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Nothing was mounted (or it was torn down).
    Unmounted,
    Mounted,
    /// Anchor in place, container gone.
    ContainerMissing,
    /// Anchor gone or no longer under the results root.
    AnchorMissing,
}

#[derive(Debug, Default)]
struct RegistryState {
    record: Option<AnchorRecord>,
    /// Last markup written to the content element, replayed into a rebuilt
    /// container.
    last_markup: Option<String>,
}

pub struct AnchorRegistry {
    doc: Arc<dyn HostDocument>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for AnchorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorRegistry")
            .field("record", &self.state.lock().record)
            .finish_non_exhaustive()
    }
}

impl AnchorRegistry {
    pub fn new(doc: Arc<dyn HostDocument>) -> Self {
        Self {
            doc,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn document(&self) -> &Arc<dyn HostDocument> {
        &self.doc
    }

    pub fn record(&self) -> Option<AnchorRecord> {
        self.state.lock().record
    }

    /// Return the anchor under `root`, creating it as the first child of
    /// `root` when missing. Idempotent.
    pub fn ensure_anchor(&self, root: NodeId) -> Result<NodeId> {
        let mut state = self.state.lock();

        if let Some(record) = state.record
            && record.root == root
            && self.doc.parent(record.anchor) == Some(root)
            && self.doc.is_attached(record.anchor)
        {
            return Ok(record.anchor);
        }

        // The previous anchor is gone; its container goes with it.
        if let Some(old) = state.record.take() {
            tracing::debug!(anchor = old.anchor.0, "Discarding stale anchor");
            if let Some(container) = old.container {
                self.doc.remove(container);
            }
            self.doc.remove(old.anchor);
        }

        let anchor = match self.doc.find_by_id(ANCHOR_ID) {
            Some(existing) if self.doc.parent(existing) == Some(root) => existing,
            _ => {
                let anchor = self.doc.create(&ContainerBuilder::anchor_spec());
                self.doc.insert_first_child(root, anchor)?;
                anchor
            }
        };

        state.record = Some(AnchorRecord {
            root,
            anchor,
            container: None,
            content: None,
        });
        tracing::debug!(anchor = anchor.0, root = root.0, "Anchor mounted");
        Ok(anchor)
    }

    /// Return the container right after `anchor`, building it with `builder`
    /// when missing. The check and the insert happen under one lock with no
    /// suspension in between, so there is never more than one container.
    pub fn ensure_container(&self, anchor: NodeId, builder: &ContainerBuilder) -> Result<NodeId> {
        let mut state = self.state.lock();
        let Some(record) = state.record.as_mut().filter(|r| r.anchor == anchor) else {
            return Err(SidekickError::host("container requested for an unknown anchor"));
        };

        if let Some(container) = record.container {
            if self.doc.next_sibling(anchor) == Some(container) && self.doc.is_attached(container) {
                return Ok(container);
            }
            // Moved or detached by the host page.
            self.doc.remove(container);
        }

        let container = builder.build(self.doc.as_ref());
        self.doc.insert_after(anchor, container)?;
        let content = self
            .doc
            .find_by_id(CONTENT_ID)
            .filter(|c| self.doc.contains(container, *c));

        record.container = Some(container);
        record.content = content;

        if let (Some(content), Some(markup)) = (content, state.last_markup.as_deref()) {
            self.doc.set_markup(content, markup)?;
        }
        tracing::debug!(container = container.0, "Container mounted");
        Ok(container)
    }

    /// Inspect the mounted nodes against the current results root.
    pub fn mount_state(&self, root: Option<NodeId>) -> MountState {
        let state = self.state.lock();
        let Some(record) = state.record else {
            return MountState::Unmounted;
        };
        let anchor_ok = root == Some(record.root)
            && self.doc.parent(record.anchor) == Some(record.root)
            && self.doc.is_attached(record.anchor);
        if !anchor_ok {
            return MountState::AnchorMissing;
        }
        match record.container {
            Some(container)
                if self.doc.next_sibling(record.anchor) == Some(container)
                    && self.doc.is_attached(container) =>
            {
                MountState::Mounted
            }
            _ => MountState::ContainerMissing,
        }
    }

    /// Whether `node` is the anchor or lies inside the container.
    pub fn owns(&self, node: NodeId) -> bool {
        let state = self.state.lock();
        state.record.is_some_and(|r| {
            r.anchor == node || r.container.is_some_and(|c| self.doc.contains(c, node))
        })
    }

    /// Write `markup` into the content element and remember it for replay.
    /// Returns whether it reached the document. Ignored once torn down.
    pub fn render(&self, markup: &str) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.record else {
            return false;
        };
        state.last_markup = Some(markup.to_string());

        let Some(content) = record.content else {
            return false;
        };
        if !self.doc.is_attached(content) {
            return false;
        }
        match self.doc.set_markup(content, markup) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write answer markup");
                false
            }
        }
    }

    /// Markup that would be replayed into a rebuilt container.
    pub fn last_markup(&self) -> Option<String> {
        self.state.lock().last_markup.clone()
    }

    /// Forget the replay markup, e.g. before a new request.
    pub fn clear_markup(&self) {
        self.state.lock().last_markup = None;
    }

    /// Remove anchor and container and forget everything.
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        if let Some(record) = state.record.take() {
            if let Some(container) = record.container {
                self.doc.remove(container);
            }
            self.doc.remove(record.anchor);
            tracing::debug!(anchor = record.anchor.0, "Anchor torn down");
        }
        state.last_markup = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CONTAINER_ID, MemoryDocument};

    fn page() -> (Arc<MemoryDocument>, NodeId, AnchorRegistry) {
        let doc = Arc::new(MemoryDocument::new("https://www.baidu.com/s?wd=rust"));
        let root = doc.append(doc.body(), "div", Some("content_left"));
        doc.append(root, "div", Some("result-1"));
        let registry = AnchorRegistry::new(doc.clone());
        (doc, root, registry)
    }

    fn mount(registry: &AnchorRegistry, root: NodeId) -> (NodeId, NodeId) {
        let anchor = registry.ensure_anchor(root).expect("anchor");
        let container = registry
            .ensure_container(anchor, &ContainerBuilder::new("Helper"))
            .expect("container");
        (anchor, container)
    }

    #[test]
    fn test_mount_order() {
        let (doc, root, registry) = page();
        let (anchor, container) = mount(&registry, root);
        let children = doc.children(root);
        assert_eq!(children[0], anchor);
        assert_eq!(children[1], container);
        assert_eq!(registry.mount_state(Some(root)), MountState::Mounted);
    }

    #[test]
    fn test_idempotent_mounting() {
        let (doc, root, registry) = page();
        let first = mount(&registry, root);
        let writes = doc.write_count();

        let second = mount(&registry, root);
        assert_eq!(first, second);
        assert_eq!(doc.write_count(), writes);
        assert_eq!(doc.count(&format!("#{CONTAINER_ID}")), 1);
        assert_eq!(doc.count(&format!("#{ANCHOR_ID}")), 1);
    }

    #[test]
    fn test_container_rebuilt_in_place_with_replay() {
        let (doc, root, registry) = page();
        let (anchor, container) = mount(&registry, root);
        assert!(registry.render("<p>answer</p>"));

        doc.remove(container);
        assert_eq!(registry.mount_state(Some(root)), MountState::ContainerMissing);
        assert!(!registry.render("<p>answer, more</p>"));

        let rebuilt = registry
            .ensure_container(anchor, &ContainerBuilder::new("Helper"))
            .expect("container");
        assert_ne!(rebuilt, container);
        assert_eq!(doc.next_sibling(anchor), Some(rebuilt));
        let content = doc.find_by_id(CONTENT_ID).expect("content");
        assert_eq!(doc.markup(content), "<p>answer, more</p>");
    }

    #[test]
    fn test_repeated_rebuilds_do_not_grow_the_document() {
        let (doc, root, registry) = page();
        let (anchor, _) = mount(&registry, root);
        let mounted = doc.node_count();

        for _ in 0..5 {
            let container = doc.next_sibling(anchor).expect("container");
            doc.remove(container);
            registry
                .ensure_container(anchor, &ContainerBuilder::new("Helper"))
                .expect("container");
        }
        assert_eq!(doc.node_count(), mounted);

        registry.teardown();
        mount(&registry, root);
        assert_eq!(doc.node_count(), mounted);
    }

    #[test]
    fn test_anchor_loss_discards_container() {
        let (doc, root, registry) = page();
        let (anchor, container) = mount(&registry, root);

        doc.remove(anchor);
        assert_eq!(registry.mount_state(Some(root)), MountState::AnchorMissing);

        let (new_anchor, new_container) = mount(&registry, root);
        assert_ne!(new_anchor, anchor);
        assert!(!doc.is_attached(container));
        assert_ne!(new_container, container);
        assert_eq!(doc.count(&format!("#{CONTAINER_ID}")), 1);
    }

    #[test]
    fn test_root_replaced() {
        let (doc, root, registry) = page();
        mount(&registry, root);

        doc.remove(root);
        let new_root = doc.append(doc.body(), "div", Some("content_left"));
        assert_eq!(registry.mount_state(Some(new_root)), MountState::AnchorMissing);
        assert_eq!(registry.mount_state(None), MountState::AnchorMissing);
    }

    #[test]
    fn test_teardown() {
        let (doc, root, registry) = page();
        let (anchor, container) = mount(&registry, root);
        registry.render("<p>x</p>");

        registry.teardown();
        assert!(!doc.is_attached(anchor));
        assert!(!doc.is_attached(container));
        assert_eq!(registry.record(), None);
        assert_eq!(registry.last_markup(), None);
        assert_eq!(registry.mount_state(Some(root)), MountState::Unmounted);

        assert!(!registry.render("<p>late</p>"));
        assert_eq!(registry.last_markup(), None);
    }

    #[test]
    fn test_owns() {
        let (doc, root, registry) = page();
        let (anchor, container) = mount(&registry, root);
        let content = doc.find_by_id(CONTENT_ID).expect("content");
        let foreign = doc.find_by_id("result-1").expect("result");

        assert!(registry.owns(anchor));
        assert!(registry.owns(container));
        assert!(registry.owns(content));
        assert!(!registry.owns(foreign));
        assert!(!registry.owns(root));
    }

    #[test]
    fn test_container_for_unknown_anchor() {
        let (_doc, _root, registry) = page();
        let err = registry
            .ensure_container(NodeId(999), &ContainerBuilder::new("Helper"))
            .expect_err("unknown anchor");
        assert!(matches!(err, SidekickError::Host(_)));
    }
}
