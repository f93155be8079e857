use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::{DocumentInner, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
}

/// One structural or attribute change, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    pub(crate) fn child_list(target: NodeId, added_nodes: Vec<NodeId>, removed_nodes: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added_nodes,
            removed_nodes,
            attribute_name: None,
            old_value: None,
        }
    }

    pub(crate) fn attribute(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }
}

/// Which changes an observer is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub attributes: bool,
    /// Also report changes anywhere below the target, not only on it.
    pub subtree: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            child_list: true,
            attributes: false,
            subtree: false,
            attribute_filter: None,
        }
    }
}

impl ObserveOptions {
    pub fn child_list() -> Self {
        Self::default()
    }

    pub fn with_subtree(mut self) -> Self {
        self.subtree = true;
        self
    }

    pub fn with_attributes(mut self, filter: Option<Vec<String>>) -> Self {
        self.attributes = true;
        self.attribute_filter = filter;
        self
    }

    fn accepts(&self, record: &MutationRecord) -> bool {
        match record.kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::Attributes => {
                self.attributes
                    && match (&self.attribute_filter, &record.attribute_name) {
                        (Some(filter), Some(name)) => filter.iter().any(|f| f == name),
                        _ => true,
                    }
            }
        }
    }
}

pub(crate) struct Registration {
    pub(crate) id: u64,
    pub(crate) target: NodeId,
    pub(crate) options: ObserveOptions,
    pub(crate) armed: Arc<AtomicBool>,
    pub(crate) tx: mpsc::UnboundedSender<MutationRecord>,
}

impl Registration {
    /// `lineage` is the record target followed by its ancestors.
    pub(crate) fn wants(&self, record: &MutationRecord, lineage: &[NodeId]) -> bool {
        let in_scope = record.target == self.target
            || (self.options.subtree && lineage.contains(&self.target));
        in_scope && self.options.accepts(record)
    }

    /// Returns false once the receiving side is gone.
    pub(crate) fn deliver(&self, record: &MutationRecord) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            // Unarmed: the notification is dropped, not queued.
            return !self.tx.is_closed();
        }
        self.tx.send(record.clone()).is_ok()
    }
}

/// Receiving end of an observation registered with [`Document::observe`](super::Document::observe).
///
/// Dropping it disconnects the registration.
pub struct MutationObserver {
    id: u64,
    document: Weak<RwLock<DocumentInner>>,
    rx: mpsc::UnboundedReceiver<MutationRecord>,
    armed: Arc<AtomicBool>,
}

impl MutationObserver {
    pub(crate) fn new(
        id: u64,
        document: Weak<RwLock<DocumentInner>>,
        rx: mpsc::UnboundedReceiver<MutationRecord>,
        armed: Arc<AtomicBool>,
    ) -> Self {
        Self { id, document, rx, armed }
    }

    /// Waits for the next record, then takes every record already delivered
    /// alongside it. Returns `None` once the registration is gone.
    pub async fn next_batch(&mut self) -> Option<Vec<MutationRecord>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(record) = self.rx.try_recv() {
            batch.push(record);
        }
        Some(batch)
    }

    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub(crate) fn armed_flag(&self) -> Arc<AtomicBool> {
        self.armed.clone()
    }

    /// Discards records that were delivered but never consumed.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub fn disconnect(&mut self) {
        self.set_armed(false);
        if let Some(inner) = self.document.upgrade() {
            inner.write().observers.retain(|reg| reg.id != self.id);
        }
        self.rx.close();
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserver")
            .field("id", &self.id)
            .field("armed", &self.is_armed())
            .finish()
    }
}
