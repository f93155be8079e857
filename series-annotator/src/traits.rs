use parking_lot::Mutex;
use tracing::info;

use crate::dom::{Document, ElementSpec, NodeId};
use crate::types::Result;

/// Teardown hook for a page module.
pub trait Disposable: Send {
    fn dispose(&mut self);
}

#[derive(Debug, Default)]
struct InjectedState {
    element: Option<NodeId>,
    disposed: bool,
}

/// The one element a page module puts on the page.
///
/// Insert and dispose share a lock, so an insert finishing after dispose
/// leaves nothing behind.
#[derive(Debug, Default)]
pub struct InjectedElement {
    state: Mutex<InjectedState>,
}

impl InjectedElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds `spec` under `parent`. Returns `None` once disposed.
    pub fn insert(&self, document: &Document, parent: NodeId, spec: &ElementSpec) -> Result<Option<NodeId>> {
        let mut state = self.state.lock();
        if state.disposed {
            return Ok(None);
        }
        if let Some(previous) = state.element.take() {
            document.remove(previous);
        }
        let element = document.insert(parent, spec)?;
        state.element = Some(element);
        Ok(Some(element))
    }

    pub fn element(&self) -> Option<NodeId> {
        self.state.lock().element
    }

    /// Removes the element and refuses any later insert.
    pub fn dispose(&self, document: &Document) {
        let mut state = self.state.lock();
        state.disposed = true;
        if let Some(element) = state.element.take() {
            document.remove(element);
        }
    }
}

/// Host navigation effects, used to force the page to reload its data.
pub trait PageNavigator: Send + Sync {
    /// Activates a link, as a click would.
    fn follow(&self, href: &str);

    fn back(&self);

    fn reload(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    Follow(String),
    Back,
    Reload,
}

/// Navigator that only records and logs what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    events: Mutex<Vec<NavigationEvent>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NavigationEvent> {
        self.events.lock().clone()
    }

    /// Number of refreshes performed, counting a follow-and-back pair as one.
    pub fn refreshes(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, NavigationEvent::Back | NavigationEvent::Reload))
            .count()
    }
}

impl PageNavigator for RecordingNavigator {
    fn follow(&self, href: &str) {
        info!("Navigating to {}", href);
        self.events.lock().push(NavigationEvent::Follow(href.to_string()));
    }

    fn back(&self) {
        info!("Navigating back");
        self.events.lock().push(NavigationEvent::Back);
    }

    fn reload(&self) {
        info!("Reloading page");
        self.events.lock().push(NavigationEvent::Reload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_element_is_replaced_and_removed() {
        let doc = Document::new();
        let parent = doc.insert(doc.root(), &ElementSpec::new("div")).unwrap();
        let injected = InjectedElement::new();

        let first = injected.insert(&doc, parent, &ElementSpec::new("p")).unwrap().unwrap();
        let second = injected.insert(&doc, parent, &ElementSpec::new("p")).unwrap().unwrap();
        assert_eq!(doc.children(parent), vec![second]);
        assert_eq!(doc.parent(first), None);

        injected.dispose(&doc);
        assert!(doc.children(parent).is_empty());
        assert_eq!(injected.insert(&doc, parent, &ElementSpec::new("p")).unwrap(), None);
        assert_eq!(injected.element(), None);
    }
}
