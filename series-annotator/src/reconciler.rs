//! Keeps watched/not-watched menus attached to the episode cards of a series
//! page while the host streams the page in and the user switches seasons.
//!
//! Three nested watches drive the work. The season watch observes the season
//! navigation for a new episode list (a season switch). The collection watch
//! observes the card collection for newly streamed cards. Each card gets its
//! own watch that re-annotates it once its nested content fills in.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actions::ActionDispatcher;
use crate::cache::SeriesCatalog;
use crate::dom::{Document, NodeId, ObserveOptions};
use crate::menu::{MenuEntry, MenuRenderer};
use crate::traits::Disposable;
use crate::types::{format_time, AnnotatorConfig, Episode, Result};
use crate::watch::{ChangeSignal, ElementWaiter};

/// What a single annotation attempt did. None of these is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationOutcome {
    Annotated,
    AlreadyAnnotated,
    /// The card has not rendered its body or release line yet.
    NotReady,
    NoLink,
    /// The card links to nothing in the active season.
    Unmatched,
}

#[derive(Clone)]
struct AnnotationRecord {
    episode_id: String,
    menu: Arc<Vec<MenuEntry>>,
}

/// What a spawned task is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Watch {
    Bootstrap,
    Season(NodeId),
    Collection(NodeId),
    Item(NodeId),
}

struct ReconcilerInner {
    document: Document,
    config: AnnotatorConfig,
    catalog: Arc<SeriesCatalog>,
    dispatcher: ActionDispatcher,
    renderer: Arc<dyn MenuRenderer>,
    /// Also serialises `annotate`, so the marker check and the insert are atomic.
    annotations: Mutex<HashMap<NodeId, AnnotationRecord>>,
    /// `None` once disposed.
    tasks: Mutex<Option<HashMap<Watch, JoinHandle<()>>>>,
}

impl ReconcilerInner {
    /// Spawns `task` unless a live task already holds `watch`.
    fn spawn<F>(&self, watch: Watch, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        let Some(tasks) = tasks.as_mut() else {
            return false;
        };
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&watch) {
            return false;
        }
        tasks.insert(watch, tokio::spawn(task));
        true
    }

    fn abort(&self, watch: Watch) {
        if let Some(handle) = self.tasks.lock().as_mut().and_then(|tasks| tasks.remove(&watch)) {
            handle.abort();
        }
    }

    /// Forgets cards that left `navigation` and stops the watches on them.
    fn prune_detached(&self, navigation: NodeId) {
        let attached = |node: NodeId| self.document.contains(navigation, node);

        let mut annotations = self.annotations.lock();
        let before = annotations.len();
        annotations.retain(|card, _| attached(*card));
        let forgotten = before - annotations.len();
        drop(annotations);

        let mut stopped = 0;
        if let Some(tasks) = self.tasks.lock().as_mut() {
            tasks.retain(|watch, handle| match watch {
                Watch::Collection(node) | Watch::Item(node) if !attached(*node) => {
                    handle.abort();
                    stopped += 1;
                    false
                }
                _ => !handle.is_finished(),
            });
        }
        debug!(
            "Pruned {} annotation(s) and {} watch(es) detached from {}",
            forgotten, stopped, navigation
        );
    }

    fn card_selector(&self) -> String {
        format!(".{}", self.config.selectors.card_class)
    }

    async fn bootstrap(self: Arc<Self>) -> Result<()> {
        let selectors = &self.config.selectors;
        let Some(layout) = self
            .document
            .query_selector(self.document.root(), &selectors.layout_root)?
        else {
            debug!("No {} on this page, nothing to annotate", selectors.layout_root);
            return Ok(());
        };

        let navigation = ElementWaiter::new(self.document.clone())
            .wait(&selectors.season_navigation, layout)
            .await?;
        info!(
            "Season navigation ready for series {} at {}",
            self.catalog.series_id(),
            navigation
        );

        // Season switches are followed even when the visible season fails to load.
        let signal = ChangeSignal::observe(&self.document, navigation, ObserveOptions::child_list());
        self.spawn(Watch::Season(navigation), self.clone().watch_season(navigation, signal));

        match self.current_season_episodes().await {
            Ok(episodes) => {
                self.watch_collection(navigation, episodes.clone())?;
                self.watch_cards(navigation, &episodes)?;
            }
            Err(e) => warn!(
                "Episodes of the visible season of {} unavailable, leaving its cards alone: {}",
                self.catalog.series_id(),
                e
            ),
        }
        Ok(())
    }

    /// The episodes of whichever season the page shows right now.
    ///
    /// Read from the visible season label when there is one, otherwise from
    /// the series' up-next pointer. A label matching no season yields an
    /// empty list.
    async fn current_season_episodes(&self) -> Result<Arc<Vec<Episode>>> {
        let label = self
            .document
            .query_selector(self.document.root(), &self.config.selectors.season_label)?
            .map(|node| self.document.text_content(node));

        match label {
            Some(label) => {
                let label = label.trim();
                let seasons = self.catalog.seasons().await?;
                match seasons.iter().find(|season| label.ends_with(&season.title)) {
                    Some(season) => Ok(self.catalog.episodes(&season.id).await?),
                    None => {
                        debug!("Season label {:?} matches no season", label);
                        Ok(Arc::new(Vec::new()))
                    }
                }
            }
            None => {
                let up_next = self.catalog.up_next().await?;
                Ok(self.catalog.episodes(&up_next.season_id).await?)
            }
        }
    }

    async fn watch_season(self: Arc<Self>, navigation: NodeId, mut signal: ChangeSignal) {
        while let Some(batch) = signal.next_change().await {
            let list_class = &self.config.selectors.season_episode_list_class;
            let switched = batch
                .added_nodes()
                .into_iter()
                .any(|node| self.document.has_class(node, list_class));

            if switched {
                info!("Season switched under {}", navigation);
                self.prune_detached(navigation);
                if let Err(e) = self.on_season_switch(navigation).await {
                    warn!("Failed to re-annotate after season switch: {}", e);
                }
            }
            if !self.config.rearm_watches {
                break;
            }
        }
        debug!("Season watch on {} finished", navigation);
    }

    async fn on_season_switch(self: &Arc<Self>, navigation: NodeId) -> Result<()> {
        let episodes = self.current_season_episodes().await?;
        self.watch_collection(navigation, episodes.clone())?;
        self.watch_cards(navigation, &episodes)
    }

    fn watch_collection(self: &Arc<Self>, navigation: NodeId, episodes: Arc<Vec<Episode>>) -> Result<()> {
        let Some(collection) = self
            .document
            .query_selector(navigation, &self.config.selectors.playable_collection)?
        else {
            debug!("No card collection under {} yet", navigation);
            return Ok(());
        };

        // A running watch on the same collection matches against stale episodes.
        self.abort(Watch::Collection(collection));
        let this = self.clone();
        self.spawn(Watch::Collection(collection), async move {
            let mut signal =
                ChangeSignal::observe(&this.document, collection, ObserveOptions::child_list());
            while let Some(batch) = signal.next_change().await {
                let cards: Vec<NodeId> = batch
                    .added_nodes()
                    .into_iter()
                    .filter(|node| this.document.has_class(*node, &this.config.selectors.card_class))
                    .collect();
                if !cards.is_empty() {
                    debug!("{} card(s) streamed into {}", cards.len(), collection);
                }
                for card in cards {
                    this.watch_item(card, episodes.clone());
                }
                if !this.config.rearm_watches {
                    break;
                }
            }
        });
        Ok(())
    }

    fn watch_cards(self: &Arc<Self>, navigation: NodeId, episodes: &Arc<Vec<Episode>>) -> Result<()> {
        for card in self
            .document
            .query_selector_all(navigation, &self.card_selector())?
        {
            self.watch_item(card, episodes.clone());
        }
        Ok(())
    }

    /// Annotates `card` now and again once its nested content is added.
    fn watch_item(self: &Arc<Self>, card: NodeId, episodes: Arc<Vec<Episode>>) {
        let this = self.clone();
        let item_episodes = episodes.clone();
        let spawned = self.spawn(Watch::Item(card), async move {
            let mut signal = ChangeSignal::observe(&this.document, card, ObserveOptions::child_list());
            // No await between annotating and arming, so a fill-in cannot slip through.
            this.apply(card, &item_episodes);

            while let Some(batch) = signal.next_change().await {
                let prefix = &this.config.selectors.card_populated_prefix;
                let populated = batch.added_nodes().into_iter().any(|node| {
                    this.document
                        .classes(node)
                        .iter()
                        .any(|class| class.starts_with(prefix.as_str()))
                });
                if populated {
                    match this.current_season_episodes().await {
                        Ok(episodes) => this.apply(card, &episodes),
                        Err(e) => warn!("Failed to load episodes for {}: {}", card, e),
                    }
                }
                if !this.config.rearm_watches {
                    break;
                }
            }
        });
        if !spawned {
            self.apply(card, &episodes);
        }
    }

    fn apply(&self, card: NodeId, episodes: &Arc<Vec<Episode>>) {
        match self.annotate(card, episodes) {
            Ok(outcome) => debug!("Annotating {}: {:?}", card, outcome),
            Err(e) => warn!("Failed to annotate {}: {}", card, e),
        }
    }

    fn annotate(&self, card: NodeId, episodes: &Arc<Vec<Episode>>) -> Result<AnnotationOutcome> {
        let doc = &self.document;
        let selectors = &self.config.selectors;
        let marker = &self.config.annotation_marker_class;
        let mut annotations = self.annotations.lock();

        let Some(body) = doc.query_selector(card, &selectors.card_body)? else {
            return Ok(AnnotationOutcome::NotReady);
        };
        if doc.query_selector(body, &format!(".{marker}"))?.is_some() {
            return Ok(AnnotationOutcome::AlreadyAnnotated);
        }
        let Some(href) = doc
            .query_selector(card, &selectors.card_link)?
            .and_then(|link| doc.attribute(link, "href"))
        else {
            return Ok(AnnotationOutcome::NoLink);
        };
        let Some(episode) = episodes.iter().find(|episode| episode.is_referenced_by(&href)) else {
            return Ok(AnnotationOutcome::Unmatched);
        };
        let Some(release) = doc.query_selector(card, &selectors.card_release)? else {
            return Ok(AnnotationOutcome::NotReady);
        };

        let release_time = format_time(
            &episode.availability_starts.with_timezone(&Local),
            &self.config.release_time_format,
        )?;
        let span = doc.query_selector(release, "span")?;

        let menu = Arc::new(self.dispatcher.build_menu(episode, episodes.clone()));
        let fragment = self.renderer.render(doc, &menu)?;
        doc.add_class(fragment, marker)?;
        doc.append_child(release, fragment)?;
        if let Some(span) = span {
            let text = format!("{} - {}", doc.text_content(span), release_time);
            doc.set_text_content(span, &text)?;
        }

        annotations.insert(
            card,
            AnnotationRecord {
                episode_id: episode.id.clone(),
                menu,
            },
        );
        Ok(AnnotationOutcome::Annotated)
    }

    /// The record of `card` while the card is still part of the page.
    fn live_record(&self, card: NodeId) -> Option<AnnotationRecord> {
        if !self.document.contains(self.document.root(), card) {
            return None;
        }
        self.annotations.lock().get(&card).cloned()
    }
}

/// Per-series annotation orchestrator. Watches run as tokio tasks until the
/// reconciler is disposed or dropped.
pub struct AnnotationReconciler {
    inner: Arc<ReconcilerInner>,
}

impl AnnotationReconciler {
    /// Starts watching `document`. Must be called within a tokio runtime.
    pub fn start(
        document: Document,
        config: AnnotatorConfig,
        catalog: Arc<SeriesCatalog>,
        dispatcher: ActionDispatcher,
        renderer: Arc<dyn MenuRenderer>,
    ) -> Self {
        let inner = Arc::new(ReconcilerInner {
            document,
            config,
            catalog,
            dispatcher,
            renderer,
            annotations: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Some(HashMap::new())),
        });

        let bootstrap = inner.clone();
        inner.spawn(Watch::Bootstrap, async move {
            let series_id = bootstrap.catalog.series_id().to_string();
            if let Err(e) = bootstrap.bootstrap().await {
                warn!("Annotations for series {} unavailable: {}", series_id, e);
            }
        });

        Self { inner }
    }

    /// Annotates one card against `episodes`, skipping cards that already
    /// carry an annotation.
    pub fn annotate(&self, card: NodeId, episodes: &Arc<Vec<Episode>>) -> Result<AnnotationOutcome> {
        self.inner.annotate(card, episodes)
    }

    /// The menu bound to the live annotation of `card`. Cards removed from
    /// the page have none.
    pub fn menu_for(&self, card: NodeId) -> Option<Arc<Vec<MenuEntry>>> {
        self.inner.live_record(card).map(|record| record.menu)
    }

    pub fn annotated_episode(&self, card: NodeId) -> Option<String> {
        self.inner.live_record(card).map(|record| record.episode_id)
    }

    /// Annotated cards still on the page, with the episode each was matched to.
    pub fn annotations(&self) -> Vec<(NodeId, String)> {
        let doc = &self.inner.document;
        let mut out: Vec<(NodeId, String)> = self
            .inner
            .annotations
            .lock()
            .iter()
            .filter(|(card, _)| doc.contains(doc.root(), **card))
            .map(|(card, record)| (*card, record.episode_id.clone()))
            .collect();
        out.sort();
        out
    }

    pub fn active_watches(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .as_ref()
            .map_or(0, |tasks| tasks.values().filter(|handle| !handle.is_finished()).count())
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.inner.dispatcher
    }
}

impl Disposable for AnnotationReconciler {
    fn dispose(&mut self) {
        if let Some(tasks) = self.inner.tasks.lock().take() {
            debug!(
                "Disposing reconciler for series {}, aborting {} task(s)",
                self.inner.catalog.series_id(),
                tasks.len()
            );
            for task in tasks.into_values() {
                task.abort();
            }
        }
        self.inner.dispatcher.refresh().cancel();
    }
}

impl Drop for AnnotationReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for AnnotationReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationReconciler")
            .field("series_id", &self.inner.catalog.series_id())
            .field("annotations", &self.inner.annotations.lock().len())
            .finish()
    }
}
