//! Host document abstraction.
//!
//! The page being enhanced is owned and rewritten by someone else. The engine
//! reads it to find the results root and to check what is still attached, and
//! writes to it only through the narrow insert/remove/markup operations of
//! [`HostDocument`].

mod container;
mod memory;

pub use container::{
    ANCHOR_ID, CLOSE_ID, CONTAINER_ID, CONTENT_ID, ContainerBuilder, TITLE_ID,
};
pub use memory::MemoryDocument;

use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque handle of a node in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// One observed change, shaped like a DOM `MutationRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// Node whose children or content changed.
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl MutationRecord {
    pub fn children_changed(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            target,
            added,
            removed,
        }
    }

    pub fn content_changed(target: NodeId) -> Self {
        Self::children_changed(target, Vec::new(), Vec::new())
    }
}

/// Batches of mutation records, delivered in order.
pub type MutationReceiver = mpsc::UnboundedReceiver<Vec<MutationRecord>>;

/// Description of an element subtree to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSpec {
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
    pub hidden: bool,
    /// Inner markup; ignored when `children` is non-empty.
    pub markup: String,
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = markup.into();
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// The document the engine injects into.
///
/// All operations are synchronous; nothing suspends between a check and the
/// write that depends on it.
pub trait HostDocument: Send + Sync {
    /// Current page URL.
    fn url(&self) -> String;

    /// First element matching `selector` (`#id`, `.class` or a tag name).
    fn query(&self, selector: &str) -> Option<NodeId>;

    /// Attached element with the given id.
    fn find_by_id(&self, id: &str) -> Option<NodeId>;

    /// Build a detached subtree and return its root.
    fn create(&self, spec: &ElementSpec) -> NodeId;

    /// Insert `node` as the first child of `parent`.
    fn insert_first_child(&self, parent: NodeId, node: NodeId) -> Result<()>;

    /// Insert `node` right after `reference`.
    fn insert_after(&self, reference: NodeId, node: NodeId) -> Result<()>;

    /// Detach `node` from its parent. No-op when already detached.
    fn remove(&self, node: NodeId);

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    /// Whether `node` is connected to the document.
    fn is_attached(&self, node: NodeId) -> bool;

    /// Whether `node` is `ancestor` or lies below it.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool;

    /// Replace the inner markup of `node`.
    fn set_markup(&self, node: NodeId, markup: &str) -> Result<()>;

    /// Subscribe to changes of the whole document.
    fn observe(&self) -> MutationReceiver;
}
