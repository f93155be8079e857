use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dom::{Document, MutationKind, MutationObserver, MutationRecord, NodeId, ObserveOptions};

/// One coalesced delivery of change records for an observed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    records: Vec<MutationRecord>,
}

impl ChangeBatch {
    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Added nodes across all records, in delivery order.
    pub fn added_nodes(&self) -> Vec<NodeId> {
        self.records
            .iter()
            .flat_map(|record| record.added_nodes.iter().copied())
            .collect()
    }

    pub fn removed_nodes(&self) -> Vec<NodeId> {
        self.records
            .iter()
            .flat_map(|record| record.removed_nodes.iter().copied())
            .collect()
    }

    pub fn changed_attributes(&self) -> Vec<(NodeId, String)> {
        self.records
            .iter()
            .filter(|record| record.kind == MutationKind::Attributes)
            .filter_map(|record| {
                record
                    .attribute_name
                    .as_ref()
                    .map(|name| (record.target, name.clone()))
            })
            .collect()
    }
}

/// Arms on creation, disarms when the awaiting future completes or is dropped.
struct ArmGuard(Arc<AtomicBool>);

impl ArmGuard {
    fn arm(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ArmGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// "Await the next batch of changes" on one node.
///
/// The observation keeps running for the signal's lifetime, but changes are
/// only collected while a [`next_change`](Self::next_change) call is pending.
/// Anything that happens in between is dropped, so a consumer that wants to
/// keep reacting has to call `next_change` again after each batch.
#[derive(Debug)]
pub struct ChangeSignal {
    node: NodeId,
    observer: MutationObserver,
}

impl ChangeSignal {
    pub fn observe(document: &Document, node: NodeId, options: ObserveOptions) -> Self {
        let observer = document.observe(node, options);
        observer.set_armed(false);
        Self { node, observer }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_armed(&self) -> bool {
        self.observer.is_armed()
    }

    /// Resolves with the next batch, or `None` once the observation was torn down.
    pub async fn next_change(&mut self) -> Option<ChangeBatch> {
        self.observer.discard_pending();
        let _armed = ArmGuard::arm(self.observer.armed_flag());
        let records = self.observer.next_batch().await?;
        Some(ChangeBatch { records })
    }
}
