//! Links from the season selector to the same season on anime trackers.

use std::sync::Arc;

use series_interfaces::defs::{AnimeListLink, AnimeListLinker};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dom::{Document, ElementSpec, NodeId};
use crate::traits::{Disposable, InjectedElement};
use crate::types::{AnimeListSettings, AnnotatorConfig, Result};
use crate::watch::ElementWaiter;

/// The links `settings` allows, in site order.
pub fn enabled_links(mut links: Vec<AnimeListLink>, settings: AnimeListSettings) -> Vec<AnimeListLink> {
    links.retain(|link| settings.allows(link.site));
    links.sort_by_key(|link| link.site);
    links
}

fn link_container(class: &str, links: &[AnimeListLink]) -> ElementSpec {
    ElementSpec::new("div").class(class).children(links.iter().map(|link| {
        ElementSpec::new("a")
            .class("anime-list-link")
            .attr("href", &link.url)
            .attr("target", "_blank")
            .text(link.site.name())
    }))
}

struct LinksInner {
    document: Document,
    config: AnnotatorConfig,
    settings: AnimeListSettings,
    linker: Arc<dyn AnimeListLinker>,
    injected: InjectedElement,
}

impl LinksInner {
    async fn run(&self) -> Result<()> {
        let selectors = &self.config.selectors;
        let Some(content) = self
            .document
            .query_selector(self.document.root(), &selectors.content_root)?
        else {
            debug!("No {} on this page", selectors.content_root);
            return Ok(());
        };

        let waiter = ElementWaiter::new(self.document.clone());
        let select = waiter.wait(&selectors.seasons_select, content).await?;
        let title_node = waiter.wait(&selectors.season_title, select).await?;
        let title = self.document.text_content(title_node).trim().to_string();

        let links = enabled_links(self.linker.links(&title).await?, self.settings);
        if links.is_empty() {
            debug!("No tracker links for {:?}", title);
            return Ok(());
        }

        let spec = link_container(&self.config.anime_list_container_class, &links);
        if self.injected.insert(&self.document, select, &spec)?.is_some() {
            info!("Linked {:?} to {} tracker(s)", title, links.len());
        }
        Ok(())
    }
}

/// Injects tracker links for the visible season into the season selector.
pub struct AnimeListLinks {
    inner: Arc<LinksInner>,
    task: Option<JoinHandle<()>>,
}

impl AnimeListLinks {
    /// Must be called within a tokio runtime.
    pub fn start(
        document: Document,
        config: AnnotatorConfig,
        settings: AnimeListSettings,
        linker: Arc<dyn AnimeListLinker>,
    ) -> Self {
        let inner = Arc::new(LinksInner {
            document,
            config,
            settings,
            linker,
            injected: InjectedElement::new(),
        });

        let runner = inner.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                warn!("Tracker links unavailable: {}", e);
            }
        });

        Self {
            inner,
            task: Some(task),
        }
    }

    pub fn settings(&self) -> AnimeListSettings {
        self.inner.settings
    }

    pub fn element(&self) -> Option<NodeId> {
        self.inner.injected.element()
    }
}

impl Disposable for AnimeListLinks {
    fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.inner.injected.dispose(&self.inner.document);
    }
}

impl Drop for AnimeListLinks {
    fn drop(&mut self) {
        self.dispose();
    }
}
