//! In-process model of the host document: an element tree that can be
//! mutated from anywhere and observed for changes.

mod mutation;
mod selector;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

pub use mutation::{MutationKind, MutationObserver, MutationRecord, ObserveOptions};
pub use selector::Selector;

use crate::types::{AnnotatorError, Result};
use mutation::Registration;
use selector::ElementTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attribute("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

pub(crate) struct DocumentInner {
    nodes: Vec<NodeData>,
    observers: Vec<Registration>,
    next_observer_id: u64,
}

impl DocumentInner {
    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            parent: None,
            children: Vec::new(),
            kind,
        });
        NodeId(self.nodes.len() - 1)
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element(element)) => Ok(element),
            _ => Err(AnnotatorError::NotAnElement(id)),
        }
    }

    fn can_have_children(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).map(|n| &n.kind),
            Some(NodeKind::Document | NodeKind::Element(_))
        )
    }

    /// `id` followed by all of its ancestors.
    fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut cursor = self.node(id).and_then(|n| n.parent);
        while let Some(node) = cursor {
            out.push(node);
            cursor = self.node(node).and_then(|n| n.parent);
        }
        out
    }

    fn notify(&mut self, record: MutationRecord) {
        if self.observers.is_empty() {
            return;
        }
        let lineage = self.lineage(record.target);
        self.observers.retain(|reg| {
            if !reg.wants(&record, &lineage) {
                return !reg.tx.is_closed();
            }
            reg.deliver(&record)
        });
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.node(child).and_then(|n| n.parent) else {
            return;
        };
        self.nodes[parent.0].children.retain(|c| *c != child);
        self.nodes[child.0].parent = None;
        self.notify(MutationRecord::child_list(parent, Vec::new(), vec![child]));
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(AnnotatorError::NotAnElement(parent));
        }
        if self.node(child).is_none() || self.lineage(parent).contains(&child) {
            return Err(AnnotatorError::HierarchyRequest { parent, child });
        }
        self.detach(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        self.notify(MutationRecord::child_list(parent, vec![child], Vec::new()));
        Ok(())
    }

    fn build(&mut self, spec: &ElementSpec) -> NodeId {
        let mut element = Element::new(&spec.tag);
        for (key, value) in &spec.attrs {
            element.attrs.insert(key.clone(), value.clone());
        }
        let id = self.push(NodeKind::Element(element));
        for child in &spec.children {
            let child_id = match child {
                ChildSpec::Element(spec) => self.build(spec),
                ChildSpec::Text(text) => self.push(NodeKind::Text(text.clone())),
            };
            self.nodes[child_id.0].parent = Some(id);
            self.nodes[id.0].children.push(child_id);
        }
        id
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        if let NodeKind::Text(text) = &node.kind {
            out.push_str(text);
        }
        for child in &node.children {
            self.collect_text(*child, out);
        }
    }

    fn descendants(&self, root: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.node(root) else {
            return;
        };
        for child in &node.children {
            if matches!(self.nodes[child.0].kind, NodeKind::Element(_)) {
                out.push(*child);
            }
            self.descendants(*child, out);
        }
    }
}

impl ElementTree for DocumentInner {
    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent)
    }

    fn element_of(&self, node: NodeId) -> Option<&Element> {
        match self.node(node).map(|n| &n.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }
}

/// Shared handle to a document. Clones refer to the same tree.
#[derive(Clone)]
pub struct Document {
    inner: Arc<RwLock<DocumentInner>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Document")
            .field("nodes", &inner.nodes.len())
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut inner = DocumentInner {
            nodes: Vec::new(),
            observers: Vec::new(),
            next_observer_id: 0,
        };
        inner.push(NodeKind::Document);
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.write().push(NodeKind::Element(Element::new(tag)))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.inner.write().push(NodeKind::Text(text.to_string()))
    }

    /// Builds `spec` as a detached subtree.
    pub fn create(&self, spec: &ElementSpec) -> NodeId {
        self.inner.write().build(spec)
    }

    /// Builds `spec` as a detached subtree and attaches it under `parent`,
    /// producing a single child-list change.
    pub fn insert(&self, parent: NodeId, spec: &ElementSpec) -> Result<NodeId> {
        let mut inner = self.inner.write();
        let id = inner.build(spec);
        inner.attach(parent, id)?;
        Ok(id)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.inner.write().attach(parent, child)
    }

    /// Removes `child` from `parent`. Returns false if it was not a child of `parent`.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> bool {
        let mut inner = self.inner.write();
        if inner.node(child).and_then(|n| n.parent) != Some(parent) {
            return false;
        }
        inner.detach(child);
        true
    }

    /// Detaches `node` from wherever it is.
    pub fn remove(&self, node: NodeId) {
        self.inner.write().detach(node);
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let element = inner.element_mut(node)?;
        let old_value = element.attrs.insert(name.to_string(), value.to_string());
        if old_value.as_deref() != Some(value) {
            inner.notify(MutationRecord::attribute(node, name, old_value));
        }
        Ok(())
    }

    pub fn add_class(&self, node: NodeId, class: &str) -> Result<()> {
        let current = self
            .element(node)
            .ok_or(AnnotatorError::NotAnElement(node))?;
        if current.has_class(class) {
            return Ok(());
        }
        let mut classes: Vec<&str> = current.classes().collect();
        classes.push(class);
        self.set_attribute(node, "class", &classes.join(" "))
    }

    /// Replaces every child of `node` with a single text node.
    pub fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.can_have_children(node) {
            return Err(AnnotatorError::NotAnElement(node));
        }
        let removed = std::mem::take(&mut inner.nodes[node.0].children);
        for child in &removed {
            inner.nodes[child.0].parent = None;
        }
        let text_node = inner.push(NodeKind::Text(text.to_string()));
        inner.nodes[text_node.0].parent = Some(node);
        inner.nodes[node.0].children.push(text_node);
        inner.notify(MutationRecord::child_list(node, vec![text_node], removed));
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.read().parent_of(node)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .read()
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// A snapshot of the element data, or `None` for text and document nodes.
    pub fn element(&self, node: NodeId) -> Option<Element> {
        self.inner.read().element_of(node).cloned()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.inner.read().element_of(node).map(|el| el.tag.clone())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner
            .read()
            .element_of(node)
            .and_then(|el| el.attribute(name).map(str::to_string))
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.inner
            .read()
            .element_of(node)
            .is_some_and(|el| el.has_class(class))
    }

    pub fn classes(&self, node: NodeId) -> Vec<String> {
        self.inner
            .read()
            .element_of(node)
            .map(|el| el.classes().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.inner.read().collect_text(node, &mut out);
        out
    }

    /// True when `node` is `ancestor` or sits anywhere below it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.read().lineage(node).contains(&ancestor)
    }

    pub fn matches(&self, node: NodeId, selector: &str) -> Result<bool> {
        let selector = Selector::parse(selector)?;
        Ok(selector.matches(&*self.inner.read(), node))
    }

    /// First descendant of `root`, in document order, matching `selector`.
    pub fn query_selector(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        let inner = self.inner.read();
        let mut candidates = Vec::new();
        inner.descendants(root, &mut candidates);
        Ok(candidates
            .into_iter()
            .find(|candidate| selector.matches(&*inner, *candidate)))
    }

    pub fn query_selector_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        let inner = self.inner.read();
        let mut candidates = Vec::new();
        inner.descendants(root, &mut candidates);
        candidates.retain(|candidate| selector.matches(&*inner, *candidate));
        Ok(candidates)
    }

    /// Registers an observer on `target`. The observer starts armed.
    pub fn observe(&self, target: NodeId, options: ObserveOptions) -> MutationObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        let armed = Arc::new(AtomicBool::new(true));
        let mut inner = self.inner.write();
        let id = inner.next_observer_id;
        inner.next_observer_id += 1;
        inner.observers.push(Registration {
            id,
            target,
            options,
            armed: armed.clone(),
            tx,
        });
        MutationObserver::new(id, Arc::downgrade(&self.inner), rx, armed)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.read().observers.len()
    }

    /// Tears down every observation, as when the page goes away.
    pub fn unload(&self) {
        let dropped = std::mem::take(&mut self.inner.write().observers);
        debug!("Document unloaded, dropped {} observers", dropped.len());
    }
}

#[derive(Debug, Clone)]
enum ChildSpec {
    Element(ElementSpec),
    Text(String),
}

/// Builder for a detached element subtree, attached with [`Document::insert`].
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<ChildSpec>,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: &str) -> Self {
        let classes = match self.attrs.iter().find(|(key, _)| key == "class") {
            Some((_, existing)) => format!("{existing} {class}"),
            None => class.to_string(),
        };
        self.attr("class", &classes)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.children.push(ChildSpec::Text(text.to_string()));
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(ChildSpec::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = ElementSpec>) -> Self {
        self.children
            .extend(children.into_iter().map(ChildSpec::Element));
        self
    }
}
