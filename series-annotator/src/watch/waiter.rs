use tracing::debug;

use crate::dom::{Document, NodeId, ObserveOptions};
use crate::types::{AnnotatorError, Result};

/// Resolves once an element matching a selector exists under a root.
#[derive(Debug, Clone)]
pub struct ElementWaiter {
    document: Document,
}

impl ElementWaiter {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    /// Returns the first descendant of `root` matching `selector`, waiting
    /// for it to be inserted if it is not there yet.
    ///
    /// There is no timeout. Dropping the returned future cancels the wait and
    /// disconnects the observation.
    pub async fn wait(&self, selector: &str, root: NodeId) -> Result<NodeId> {
        // Register before the fast path so no insertion slips in between.
        let mut observer = self
            .document
            .observe(root, ObserveOptions::child_list().with_subtree());

        if let Some(element) = self.document.query_selector(root, selector)? {
            return Ok(element);
        }
        debug!("Waiting for {} under {}", selector, root);

        while observer.next_batch().await.is_some() {
            if let Some(element) = self.document.query_selector(root, selector)? {
                observer.disconnect();
                debug!("{} appeared as {}", selector, element);
                return Ok(element);
            }
        }

        Err(AnnotatorError::Detached {
            selector: selector.to_string(),
        })
    }
}
