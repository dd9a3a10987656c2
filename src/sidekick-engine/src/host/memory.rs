//! In-memory [`HostDocument`].
//!
//! A small element tree with just enough behaviour to stand in for a browser
//! page: ids, a single class, inner markup, and mutation notifications for
//! every structural or content write, whoever makes it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ElementSpec, HostDocument, MutationReceiver, MutationRecord, NodeId};
use crate::error::{Result, SidekickError};

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: Option<String>,
    class: Option<String>,
    markup: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    body: NodeId,
    url: String,
    writes: usize,
}

impl Tree {
    fn alloc(&mut self, tag: &str, id: Option<String>, class: Option<String>) -> NodeId {
        self.next_id += 1;
        let node = NodeId(self.next_id);
        self.nodes.insert(
            node,
            Node {
                tag: tag.to_string(),
                id,
                class,
                markup: String::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        node
    }

    fn build(&mut self, spec: &ElementSpec) -> NodeId {
        let class = match (&spec.class, spec.hidden) {
            (Some(c), true) => Some(format!("{c} hidden")),
            (None, true) => Some("hidden".to_string()),
            (c, false) => c.clone(),
        };
        let node = self.alloc(&spec.tag, spec.id.clone(), class);
        if spec.children.is_empty() {
            if let Some(n) = self.nodes.get_mut(&node) {
                n.markup = spec.markup.clone();
            }
        } else {
            for child_spec in &spec.children {
                let child = self.build(child_spec);
                self.link(node, child, None);
            }
        }
        node
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| SidekickError::host(format!("unknown node {}", id.0)))
    }

    /// Attach `child` under `parent` at `index` (end when `None`).
    fn link(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            match index {
                Some(i) => p.children.insert(i.min(p.children.len()), child),
                None => p.children.push(child),
            }
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    fn unlink(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get_mut(&child)?.parent.take()?;
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        Some(parent)
    }

    /// Forget `node` and everything below it.
    fn drop_subtree(&mut self, node: NodeId) {
        let mut pending = vec![node];
        while let Some(next) = pending.pop() {
            if let Some(removed) = self.nodes.remove(&next) {
                pending.extend(removed.children);
            }
        }
    }

    fn is_attached(&self, mut node: NodeId) -> bool {
        loop {
            if node == self.body {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn contains(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn matches(&self, node: &Node, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            node.id.as_deref() == Some(id)
        } else if let Some(class) = selector.strip_prefix('.') {
            node.class
                .as_deref()
                .is_some_and(|c| c.split_whitespace().any(|c| c == class))
        } else {
            node.tag.eq_ignore_ascii_case(selector)
        }
    }

    /// Depth-first search below `from`, document order.
    fn find(&self, from: NodeId, selector: &str) -> Option<NodeId> {
        let node = self.nodes.get(&from)?;
        for child in &node.children {
            if let Some(n) = self.nodes.get(child)
                && self.matches(n, selector)
            {
                return Some(*child);
            }
            if let Some(found) = self.find(*child, selector) {
                return Some(found);
            }
        }
        None
    }

    fn count(&self, from: NodeId, selector: &str) -> usize {
        let Some(node) = self.nodes.get(&from) else {
            return 0;
        };
        node.children
            .iter()
            .map(|child| {
                let own = self
                    .nodes
                    .get(child)
                    .is_some_and(|n| self.matches(n, selector));
                usize::from(own) + self.count(*child, selector)
            })
            .sum()
    }
}

/// In-memory page.
#[derive(Debug)]
pub struct MemoryDocument {
    tree: Mutex<Tree>,
    observers: Mutex<Vec<mpsc::UnboundedSender<Vec<MutationRecord>>>>,
}

impl MemoryDocument {
    /// Empty page with only a `body`.
    pub fn new(url: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        let body = NodeId(1);
        nodes.insert(
            body,
            Node {
                tag: "body".to_string(),
                id: None,
                class: None,
                markup: String::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            tree: Mutex::new(Tree {
                nodes,
                next_id: 1,
                body,
                url: url.into(),
                writes: 0,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn body(&self) -> NodeId {
        self.tree.lock().body
    }

    /// Simulate in-page navigation.
    pub fn set_url(&self, url: impl Into<String>) {
        self.tree.lock().url = url.into();
    }

    /// Host-side convenience: create `<tag id=..>` and append it to `parent`.
    pub fn append(&self, parent: NodeId, tag: &str, id: Option<&str>) -> NodeId {
        let mut spec = ElementSpec::new(tag);
        if let Some(id) = id {
            spec = spec.id(id);
        }
        let node = self.create(&spec);
        let record = {
            let mut tree = self.tree.lock();
            tree.link(parent, node, None);
            tree.writes += 1;
            MutationRecord::children_changed(parent, vec![node], Vec::new())
        };
        self.notify(vec![record]);
        node
    }

    /// Remove every child of `parent` in one batch, like a re-render.
    pub fn clear_children(&self, parent: NodeId) {
        let record = {
            let mut tree = self.tree.lock();
            let children = tree
                .nodes
                .get(&parent)
                .map(|n| n.children.clone())
                .unwrap_or_default();
            for child in &children {
                tree.unlink(*child);
                tree.drop_subtree(*child);
            }
            tree.writes += 1;
            MutationRecord::children_changed(parent, Vec::new(), children)
        };
        self.notify(vec![record]);
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Inner markup of `node`.
    pub fn markup(&self, node: NodeId) -> String {
        self.tree
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.markup.clone())
            .unwrap_or_default()
    }

    /// Number of attached elements matching `selector`.
    pub fn count(&self, selector: &str) -> usize {
        let tree = self.tree.lock();
        tree.count(tree.body, selector)
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// Number of writes made so far, by anyone.
    pub fn write_count(&self) -> usize {
        self.tree.lock().writes
    }

    fn notify(&self, batch: Vec<MutationRecord>) {
        self.observers
            .lock()
            .retain(|tx| tx.send(batch.clone()).is_ok());
    }
}

impl HostDocument for MemoryDocument {
    fn url(&self) -> String {
        self.tree.lock().url.clone()
    }

    fn query(&self, selector: &str) -> Option<NodeId> {
        let tree = self.tree.lock();
        tree.find(tree.body, selector)
    }

    fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.query(&format!("#{id}"))
    }

    fn create(&self, spec: &ElementSpec) -> NodeId {
        self.tree.lock().build(spec)
    }

    fn insert_first_child(&self, parent: NodeId, node: NodeId) -> Result<()> {
        let mut batch = Vec::new();
        {
            let mut tree = self.tree.lock();
            tree.node(parent)?;
            tree.node(node)?;
            if let Some(old) = tree.unlink(node) {
                batch.push(MutationRecord::children_changed(old, Vec::new(), vec![node]));
            }
            tree.link(parent, node, Some(0));
            tree.writes += 1;
            batch.push(MutationRecord::children_changed(parent, vec![node], Vec::new()));
        }
        self.notify(batch);
        Ok(())
    }

    fn insert_after(&self, reference: NodeId, node: NodeId) -> Result<()> {
        let mut batch = Vec::new();
        {
            let mut tree = self.tree.lock();
            tree.node(node)?;
            let parent = tree
                .node(reference)?
                .parent
                .ok_or_else(|| SidekickError::host("reference node is detached"))?;
            if let Some(old) = tree.unlink(node) {
                batch.push(MutationRecord::children_changed(old, Vec::new(), vec![node]));
            }
            let index = tree
                .node(parent)?
                .children
                .iter()
                .position(|c| *c == reference)
                .map(|i| i + 1);
            tree.link(parent, node, index);
            tree.writes += 1;
            batch.push(MutationRecord::children_changed(parent, vec![node], Vec::new()));
        }
        self.notify(batch);
        Ok(())
    }

    fn remove(&self, node: NodeId) {
        let record = {
            let mut tree = self.tree.lock();
            match tree.unlink(node) {
                Some(parent) => {
                    tree.drop_subtree(node);
                    tree.writes += 1;
                    MutationRecord::children_changed(parent, Vec::new(), vec![node])
                }
                None => return,
            }
        };
        self.notify(vec![record]);
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.lock().nodes.get(&node).and_then(|n| n.parent)
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let tree = self.tree.lock();
        let parent = tree.nodes.get(&node)?.parent?;
        let siblings = &tree.nodes.get(&parent)?.children;
        let index = siblings.iter().position(|c| *c == node)?;
        siblings.get(index + 1).copied()
    }

    fn is_attached(&self, node: NodeId) -> bool {
        self.tree.lock().is_attached(node)
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.tree.lock().contains(ancestor, node)
    }

    fn set_markup(&self, node: NodeId, markup: &str) -> Result<()> {
        {
            let mut tree = self.tree.lock();
            let removed = {
                let n = tree
                    .nodes
                    .get_mut(&node)
                    .ok_or_else(|| SidekickError::host(format!("unknown node {}", node.0)))?;
                n.markup = markup.to_string();
                std::mem::take(&mut n.children)
            };
            for child in removed {
                if let Some(c) = tree.nodes.get_mut(&child) {
                    c.parent = None;
                }
            }
            tree.writes += 1;
        }
        self.notify(vec![MutationRecord::content_changed(node)]);
        Ok(())
    }

    fn observe(&self) -> MutationReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> (MemoryDocument, NodeId) {
        let doc = MemoryDocument::new("https://www.baidu.com/s?wd=rust");
        let wrapper = doc.append(doc.body(), "div", Some("wrapper"));
        let root = doc.append(wrapper, "div", Some("content_left"));
        (doc, root)
    }

    #[test]
    fn test_query_and_containment() {
        let (doc, root) = page();
        let result = doc.append(root, "div", Some("result-1"));
        assert_eq!(doc.query("#content_left"), Some(root));
        assert_eq!(doc.find_by_id("result-1"), Some(result));
        assert!(doc.contains(root, result));
        assert!(!doc.contains(result, root));
        assert_eq!(doc.count("div"), 3);
    }

    #[test]
    fn test_insert_order() {
        let (doc, root) = page();
        let first = doc.append(root, "div", Some("a"));
        let marker = doc.create(&ElementSpec::new("div").id("marker"));
        doc.insert_first_child(root, marker).expect("insert");
        let after = doc.create(&ElementSpec::new("div").id("after"));
        doc.insert_after(marker, after).expect("insert");

        assert_eq!(doc.children(root), vec![marker, after, first]);
        assert_eq!(doc.next_sibling(marker), Some(after));
    }

    #[test]
    fn test_removal_detaches_subtree() {
        let (doc, root) = page();
        let inner = doc.append(root, "span", None);
        let wrapper = doc.parent(root).expect("parent");
        doc.remove(root);
        assert!(!doc.is_attached(root));
        assert!(!doc.is_attached(inner));
        assert!(doc.is_attached(wrapper));
        assert_eq!(doc.query("#content_left"), None);

        let writes = doc.write_count();
        doc.remove(root);
        assert_eq!(doc.write_count(), writes);
    }

    #[test]
    fn test_removed_subtrees_are_dropped() {
        let (doc, root) = page();
        let baseline = doc.node_count();

        let list = doc.append(root, "ul", Some("results"));
        doc.append(list, "li", None);
        doc.append(list, "li", None);
        assert_eq!(doc.node_count(), baseline + 3);

        doc.remove(list);
        assert_eq!(doc.node_count(), baseline);

        doc.append(root, "div", Some("result-1"));
        doc.append(root, "div", Some("result-2"));
        doc.clear_children(root);
        assert_eq!(doc.node_count(), baseline);
        assert!(doc.children(root).is_empty());
    }

    #[test]
    fn test_insert_after_detached_reference_fails() {
        let (doc, _) = page();
        let loose = doc.create(&ElementSpec::new("div"));
        let other = doc.create(&ElementSpec::new("div"));
        assert!(doc.insert_after(loose, other).is_err());
    }

    #[tokio::test]
    async fn test_observers_see_every_write() {
        let (doc, root) = page();
        let mut mutations = doc.observe();

        let child = doc.append(root, "div", None);
        doc.set_markup(child, "<p>x</p>").expect("markup");
        doc.remove(child);

        let batches: Vec<Vec<MutationRecord>> = vec![
            mutations.recv().await.expect("append"),
            mutations.recv().await.expect("markup"),
            mutations.recv().await.expect("remove"),
        ];
        assert_eq!(batches[0][0].added, vec![child]);
        assert_eq!(batches[1][0].target, child);
        assert_eq!(batches[2][0].removed, vec![child]);
        assert_eq!(doc.markup(child), "<p>x</p>");
    }
}
