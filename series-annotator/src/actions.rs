use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use series_interfaces::defs::MetadataService;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dom::Document;
use crate::menu::{
    MenuEntry, MARK_ALL_NEXT, MARK_ALL_PREVIOUS, MARK_AS_NOT_WATCHED, MARK_AS_WATCHED,
    MARK_ONLY_THIS_ONE,
};
use crate::traits::PageNavigator;
use crate::types::{AnnotatorConfig, Episode, PlayheadUpdate, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Watched,
    NotWatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkScope {
    OnlyThis,
    /// The episode and every episode before it.
    AllPrevious,
    /// The episode and every episode after it.
    AllNext,
}

/// The playhead writes for marking `episode` (and, depending on `scope`, its
/// neighbours in `episodes`) as watched or not watched.
pub fn playhead_updates(
    episode: &Episode,
    episodes: &[Episode],
    state: WatchState,
    scope: MarkScope,
) -> Vec<PlayheadUpdate> {
    let affected: Vec<&Episode> = match scope {
        MarkScope::OnlyThis => vec![episode],
        MarkScope::AllPrevious => episodes
            .iter()
            .filter(|other| other.sequence_number <= episode.sequence_number)
            .collect(),
        MarkScope::AllNext => episodes
            .iter()
            .filter(|other| other.sequence_number >= episode.sequence_number)
            .collect(),
    };

    affected
        .into_iter()
        .map(|other| PlayheadUpdate {
            id: other.id.clone(),
            playhead_ms: match state {
                WatchState::Watched => other.duration_ms,
                WatchState::NotWatched => 0,
            },
        })
        .collect()
}

struct RefreshInner {
    window: Duration,
    document: Document,
    search_link: String,
    navigator: Arc<dyn PageNavigator>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshInner {
    /// The host keeps its in-memory state across remote writes, so the only
    /// way to show them is to make it load its data again.
    fn perform(&self) {
        match self
            .document
            .query_selector(self.document.root(), &self.search_link)
        {
            Ok(Some(link)) => {
                let href = self.document.attribute(link, "href").unwrap_or_default();
                info!("Refreshing page data via {}", href);
                self.navigator.follow(&href);
                self.navigator.back();
            }
            Ok(None) => {
                info!("Refreshing page with a full reload");
                self.navigator.reload();
            }
            Err(e) => {
                warn!("Search link selector unusable ({}), falling back to reload", e);
                self.navigator.reload();
            }
        }
    }
}

/// Debounced page refresh: requests within the window collapse into one.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<RefreshInner>,
}

impl RefreshScheduler {
    pub fn new(document: Document, config: &AnnotatorConfig, navigator: Arc<dyn PageNavigator>) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                window: config.refresh_window(),
                document,
                search_link: config.selectors.search_link.clone(),
                navigator,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Restarts the debounce window. Must be called within a tokio runtime.
    pub fn request(&self) {
        let mut pending = self.inner.pending.lock();
        if let Some(previous) = pending.take() {
            if !previous.is_finished() {
                debug!("Coalescing refresh request");
            }
            previous.abort();
        }
        let inner = self.inner.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.window).await;
            inner.perform();
        }));
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.inner.pending.lock().take() {
            pending.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("window", &self.inner.window)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Builds the watched/not-watched menu for an episode and carries out its actions.
#[derive(Clone)]
pub struct ActionDispatcher {
    service: Arc<dyn MetadataService>,
    refresh: RefreshScheduler,
}

impl ActionDispatcher {
    pub fn new(service: Arc<dyn MetadataService>, refresh: RefreshScheduler) -> Self {
        Self { service, refresh }
    }

    pub fn refresh(&self) -> &RefreshScheduler {
        &self.refresh
    }

    /// Writes all `updates` in one request, then schedules a refresh.
    pub async fn mark(&self, updates: Vec<PlayheadUpdate>) -> Result<()> {
        info!("Writing {} playhead(s)", updates.len());
        self.service.playheads(&updates).await?;
        self.refresh.request();
        Ok(())
    }

    /// `episodes` is the active season, ascending by sequence number.
    pub fn build_menu(&self, episode: &Episode, episodes: Arc<Vec<Episode>>) -> Vec<MenuEntry> {
        let sequence_number = episode.sequence_number;
        let first = episodes.first().map(|e| e.sequence_number);
        let last = episodes.last().map(|e| e.sequence_number);

        let leaf = |name: &'static str, state: WatchState, scope: MarkScope| {
            let dispatcher = self.clone();
            let episode = episode.clone();
            let episodes = episodes.clone();
            MenuEntry::action(name, move || {
                let dispatcher = dispatcher.clone();
                let updates = playhead_updates(&episode, &episodes, state, scope);
                async move { dispatcher.mark(updates).await }.boxed()
            })
        };

        vec![
            MenuEntry::menu(
                MARK_AS_WATCHED,
                vec![
                    leaf(MARK_ONLY_THIS_ONE, WatchState::Watched, MarkScope::OnlyThis),
                    leaf(MARK_ALL_PREVIOUS, WatchState::Watched, MarkScope::AllPrevious)
                        .visible_if(move || first.is_some_and(|first| sequence_number > first)),
                ],
            ),
            MenuEntry::menu(
                MARK_AS_NOT_WATCHED,
                vec![
                    leaf(MARK_ONLY_THIS_ONE, WatchState::NotWatched, MarkScope::OnlyThis),
                    leaf(MARK_ALL_NEXT, WatchState::NotWatched, MarkScope::AllNext)
                        .visible_if(move || last.is_some_and(|last| sequence_number < last)),
                ],
            ),
        ]
    }
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("refresh", &self.refresh)
            .finish()
    }
}
