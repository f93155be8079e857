use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::dom::{Document, ElementSpec, NodeId};
use crate::types::Result;

pub const MARK_AS_WATCHED: &str = "markAsWatched";
pub const MARK_AS_NOT_WATCHED: &str = "markAsNotWatched";
pub const MARK_ONLY_THIS_ONE: &str = "markOnlyThisOne";
pub const MARK_ALL_PREVIOUS: &str = "markAllPrevious";
pub const MARK_ALL_NEXT: &str = "markAllNext";

pub type ActionFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type VisibleFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// One node of an action menu handed to the menu renderer.
///
/// Names are message keys, translated by the renderer.
#[derive(Clone)]
pub enum MenuEntry {
    Menu {
        name: &'static str,
        entries: Vec<MenuEntry>,
    },
    Action {
        name: &'static str,
        run: ActionFn,
        visible: Option<VisibleFn>,
    },
}

impl MenuEntry {
    pub fn menu(name: &'static str, entries: Vec<MenuEntry>) -> Self {
        MenuEntry::Menu { name, entries }
    }

    pub fn action<F>(name: &'static str, run: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        MenuEntry::Action {
            name,
            run: Arc::new(run),
            visible: None,
        }
    }

    /// Attaches a visibility predicate to an action; menus are left as they are.
    pub fn visible_if<P>(self, predicate: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        match self {
            MenuEntry::Action { name, run, .. } => MenuEntry::Action {
                name,
                run,
                visible: Some(Arc::new(predicate)),
            },
            menu => menu,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MenuEntry::Menu { name, .. } | MenuEntry::Action { name, .. } => *name,
        }
    }

    pub fn is_visible(&self) -> bool {
        match self {
            MenuEntry::Menu { .. } => true,
            MenuEntry::Action { visible, .. } => visible.as_ref().map_or(true, |predicate| predicate()),
        }
    }

    /// Runs an action. Running a menu does nothing.
    pub async fn run(&self) -> Result<()> {
        match self {
            MenuEntry::Menu { .. } => Ok(()),
            MenuEntry::Action { run, .. } => run().await,
        }
    }

    /// Follows `path` by name through nested menus.
    pub fn find<'a>(entries: &'a [MenuEntry], path: &[&str]) -> Option<&'a MenuEntry> {
        let (first, rest) = path.split_first()?;
        let entry = entries.iter().find(|entry| entry.name() == *first)?;
        if rest.is_empty() {
            return Some(entry);
        }
        match entry {
            MenuEntry::Menu { entries, .. } => Self::find(entries, rest),
            MenuEntry::Action { .. } => None,
        }
    }

    /// Paths of every action a renderer would currently show.
    pub fn visible_leaves(entries: &[MenuEntry]) -> Vec<Vec<&'static str>> {
        let mut out = Vec::new();
        for entry in entries.iter().filter(|entry| entry.is_visible()) {
            match entry {
                MenuEntry::Menu { name, entries } => {
                    for mut path in Self::visible_leaves(entries) {
                        path.insert(0, *name);
                        out.push(path);
                    }
                }
                MenuEntry::Action { name, .. } => out.push(vec![*name]),
            }
        }
        out
    }
}

impl fmt::Debug for MenuEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MenuEntry::Menu { name, entries } => f
                .debug_struct("Menu")
                .field("name", name)
                .field("entries", entries)
                .finish(),
            MenuEntry::Action { name, visible, .. } => f
                .debug_struct("Action")
                .field("name", name)
                .field("conditional", &visible.is_some())
                .finish(),
        }
    }
}

/// UI collaborator that turns a menu into a detached document fragment.
pub trait MenuRenderer: Send + Sync {
    fn render(&self, document: &Document, entries: &[MenuEntry]) -> Result<NodeId>;
}

/// Renders menus as nested groups of buttons, skipping hidden actions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ButtonMenuRenderer;

impl ButtonMenuRenderer {
    fn spec(entries: &[MenuEntry]) -> Vec<ElementSpec> {
        entries
            .iter()
            .filter(|entry| entry.is_visible())
            .map(|entry| match entry {
                MenuEntry::Menu { name, entries } => ElementSpec::new("div")
                    .class("action-menu__group")
                    .attr("data-menu", name)
                    .children(Self::spec(entries)),
                MenuEntry::Action { name, .. } => ElementSpec::new("button")
                    .class("action-menu__action")
                    .attr("data-action", name)
                    .text(name),
            })
            .collect()
    }
}

impl MenuRenderer for ButtonMenuRenderer {
    fn render(&self, document: &Document, entries: &[MenuEntry]) -> Result<NodeId> {
        let spec = ElementSpec::new("div")
            .class("action-menu")
            .child(ElementSpec::new("button").class("action-menu__toggle").text("⋮"))
            .children(Self::spec(entries));
        Ok(document.create(&spec))
    }
}
