use std::sync::Arc;

use series_interfaces::defs::{AiringSchedule, AnimeListLinker, MetadataService};
use series_interfaces::EmptyMetadataService;
use tracing::{debug, info};
use url::Url;

use crate::actions::{ActionDispatcher, RefreshScheduler};
use crate::air_date::{AirDateCache, NextAirDate};
use crate::anime_links::AnimeListLinks;
use crate::cache::SeriesCatalog;
use crate::dom::Document;
use crate::menu::{ButtonMenuRenderer, MenuRenderer};
use crate::reconciler::AnnotationReconciler;
use crate::traits::{Disposable, PageNavigator};
use crate::types::{AnimeListSettings, AnnotatorConfig, Result};

/// The id following `/series/` in `url`, e.g. `GRDV0019R` in
/// `https://host/en/series/GRDV0019R/some-show`.
pub fn series_id_from_url(url: &str) -> Result<Option<String>> {
    let url = Url::parse(url)?;
    let mut segments = url
        .path_segments()
        .into_iter()
        .flatten()
        .skip_while(|segment| *segment != "series");
    Ok(segments
        .nth(1)
        .filter(|id| !id.is_empty())
        .map(str::to_string))
}

/// The last non-empty path segment, which the host uses as a readable series name.
pub fn series_slug_from_url(url: &str) -> Result<Option<String>> {
    let url = Url::parse(url)?;
    Ok(url
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string))
}

/// Everything a page needs from its surroundings.
#[derive(Clone)]
pub struct PageContext {
    pub document: Document,
    pub config: AnnotatorConfig,
    pub service: Arc<dyn MetadataService>,
    pub schedule: Arc<dyn AiringSchedule>,
    pub navigator: Arc<dyn PageNavigator>,
    pub renderer: Arc<dyn MenuRenderer>,
    /// Knows no links unless replaced with [`PageContext::with_linker`].
    pub linker: Arc<dyn AnimeListLinker>,
    pub air_dates: Arc<AirDateCache>,
}

impl PageContext {
    pub fn new(
        document: Document,
        config: AnnotatorConfig,
        service: Arc<dyn MetadataService>,
        schedule: Arc<dyn AiringSchedule>,
        navigator: Arc<dyn PageNavigator>,
    ) -> Self {
        Self {
            document,
            config,
            service,
            schedule,
            navigator,
            renderer: Arc::new(ButtonMenuRenderer),
            linker: Arc::new(EmptyMetadataService),
            air_dates: Arc::new(AirDateCache::new()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn MenuRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_linker(mut self, linker: Arc<dyn AnimeListLinker>) -> Self {
        self.linker = linker;
        self
    }
}

/// A series page and the modules running on it.
pub struct SeriesPage {
    context: PageContext,
    slug: String,
    catalog: Arc<SeriesCatalog>,
    reconciler: AnnotationReconciler,
    air_date: Option<NextAirDate>,
    anime_links: Option<AnimeListLinks>,
}

impl SeriesPage {
    /// Starts the page modules for `url`, or returns `None` when `url` is not
    /// a series page. Must be called within a tokio runtime.
    pub fn open(context: &PageContext, url: &str) -> Result<Option<Self>> {
        let Some(series_id) = series_id_from_url(url)? else {
            debug!("{} is not a series page", url);
            return Ok(None);
        };
        let slug = series_slug_from_url(url)?.unwrap_or_else(|| series_id.clone());
        info!("Opening series page {} ({})", series_id, slug);

        let catalog = Arc::new(SeriesCatalog::new(&series_id, context.service.clone()));
        let refresh = RefreshScheduler::new(
            context.document.clone(),
            &context.config,
            context.navigator.clone(),
        );
        let reconciler = AnnotationReconciler::start(
            context.document.clone(),
            context.config.clone(),
            catalog.clone(),
            ActionDispatcher::new(context.service.clone(), refresh),
            context.renderer.clone(),
        );

        let mut page = Self {
            context: context.clone(),
            slug,
            catalog,
            reconciler,
            air_date: None,
            anime_links: None,
        };
        page.set_anime_list_links(context.config.anime_list_links);
        page.set_episode_air_date(context.config.episode_air_date);
        Ok(Some(page))
    }

    /// Applies a change of the air-date setting, replacing any running module.
    pub fn set_episode_air_date(&mut self, enabled: bool) {
        if let Some(mut air_date) = self.air_date.take() {
            air_date.dispose();
        }
        if enabled {
            self.air_date = Some(NextAirDate::start(
                self.context.document.clone(),
                self.context.config.clone(),
                &self.slug,
                self.catalog.clone(),
                self.context.schedule.clone(),
                self.context.air_dates.clone(),
            ));
        }
    }

    /// Applies a change of the tracker-link settings. The running module is
    /// always rebuilt, since either site may have been toggled.
    pub fn set_anime_list_links(&mut self, settings: AnimeListSettings) {
        if let Some(mut links) = self.anime_links.take() {
            links.dispose();
        }
        if settings.any() {
            self.anime_links = Some(AnimeListLinks::start(
                self.context.document.clone(),
                self.context.config.clone(),
                settings,
                self.context.linker.clone(),
            ));
        }
    }

    pub fn series_id(&self) -> &str {
        self.catalog.series_id()
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn catalog(&self) -> &Arc<SeriesCatalog> {
        &self.catalog
    }

    pub fn reconciler(&self) -> &AnnotationReconciler {
        &self.reconciler
    }

    pub fn air_date(&self) -> Option<&NextAirDate> {
        self.air_date.as_ref()
    }

    pub fn anime_links(&self) -> Option<&AnimeListLinks> {
        self.anime_links.as_ref()
    }
}

impl Disposable for SeriesPage {
    fn dispose(&mut self) {
        debug!("Disposing series page {}", self.catalog.series_id());
        self.reconciler.dispose();
        if let Some(air_date) = self.air_date.as_mut() {
            air_date.dispose();
        }
        if let Some(links) = self.anime_links.as_mut() {
            links.dispose();
        }
    }
}
