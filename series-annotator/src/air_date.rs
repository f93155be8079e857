//! "Next episode airs ..." line on the series hero.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use parking_lot::Mutex;
use series_interfaces::defs::AiringSchedule;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::SeriesCatalog;
use crate::dom::{Document, ElementSpec, NodeId};
use crate::traits::{Disposable, InjectedElement};
use crate::types::{format_time, AnnotatorConfig, Episode, Result};
use crate::watch::ElementWaiter;

/// Next air dates by series id, shared across page visits.
#[derive(Debug, Default)]
pub struct AirDateCache {
    entries: Mutex<HashMap<String, Option<DateTime<Local>>>>,
}

impl AirDateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored date for `series_id` if it is still after `now`.
    pub fn fresh(&self, series_id: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
        self.entries
            .lock()
            .get(series_id)
            .copied()
            .flatten()
            .filter(|date| *date > now)
    }

    /// `None` records that the series has no upcoming episode.
    pub fn store(&self, series_id: &str, date: Option<DateTime<Local>>) {
        self.entries.lock().insert(series_id.to_string(), date);
    }

    pub fn entry(&self, series_id: &str) -> Option<Option<DateTime<Local>>> {
        self.entries.lock().get(series_id).copied()
    }
}

/// When an episode actually goes out. Unscheduled episodes carry a
/// placeholder availability in year 9xxx; their air date is used instead.
fn release_instant(episode: &Episode) -> DateTime<Utc> {
    if episode.availability_starts.year() >= 9000 {
        episode
            .episode_air_date
            .unwrap_or(episode.availability_starts)
    } else {
        episode.availability_starts
    }
}

/// Calendar day of `airing_at` combined with the time of day `last_episode`
/// was released, both read in `tz`.
pub fn next_air_date<Tz: TimeZone>(
    airing_at: DateTime<Utc>,
    last_episode: &Episode,
    tz: &Tz,
) -> Option<DateTime<Tz>> {
    let day = airing_at.with_timezone(tz).date_naive();
    let time_of_day = release_instant(last_episode).with_timezone(tz).time();
    tz.from_local_datetime(&day.and_time(time_of_day)).earliest()
}

struct AirDateInner {
    document: Document,
    config: AnnotatorConfig,
    slug: String,
    catalog: Arc<SeriesCatalog>,
    schedule: Arc<dyn AiringSchedule>,
    cache: Arc<AirDateCache>,
    injected: InjectedElement,
}

impl AirDateInner {
    async fn run(&self) -> Result<()> {
        let selectors = &self.config.selectors;
        let Some(content) = self
            .document
            .query_selector(self.document.root(), &selectors.content_root)?
        else {
            debug!("No {} on this page", selectors.content_root);
            return Ok(());
        };
        let actions = ElementWaiter::new(self.document.clone())
            .wait(&selectors.hero_actions, content)
            .await?;

        let Some(date) = self.air_date().await? else {
            debug!("No upcoming episode for {}", self.slug);
            return Ok(());
        };
        let text = format_time(&date, &self.config.air_date_format)?;

        let spec = ElementSpec::new("p").class(&self.config.air_date_class).text(&text);
        if self.injected.insert(&self.document, actions, &spec)?.is_some() {
            info!("Next air date for {}: {}", self.slug, text);
        }
        Ok(())
    }

    async fn air_date(&self) -> Result<Option<DateTime<Local>>> {
        let series_id = self.catalog.series_id();
        if let Some(date) = self.cache.fresh(series_id, Local::now()) {
            debug!("Air date for {} served from cache", series_id);
            return Ok(Some(date));
        }

        let Some(airing_at) = self.schedule.next_airing_at(&self.slug).await? else {
            self.cache.store(series_id, None);
            return Ok(None);
        };
        let Some(season) = self.catalog.latest_season().await? else {
            return Ok(None);
        };
        let episodes = self.catalog.episodes(&season.id).await?;
        let Some(last_episode) = episodes.last() else {
            return Ok(None);
        };

        let date = next_air_date(airing_at, last_episode, &Local);
        self.cache.store(series_id, date);
        Ok(date)
    }
}

/// Injects the next air date of the series under the hero actions.
pub struct NextAirDate {
    inner: Arc<AirDateInner>,
    task: Option<JoinHandle<()>>,
}

impl NextAirDate {
    /// Must be called within a tokio runtime.
    pub fn start(
        document: Document,
        config: AnnotatorConfig,
        slug: &str,
        catalog: Arc<SeriesCatalog>,
        schedule: Arc<dyn AiringSchedule>,
        cache: Arc<AirDateCache>,
    ) -> Self {
        let inner = Arc::new(AirDateInner {
            document,
            config,
            slug: slug.to_string(),
            catalog,
            schedule,
            cache,
            injected: InjectedElement::new(),
        });

        let runner = inner.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                warn!("Next air date for {} unavailable: {}", runner.slug, e);
            }
        });

        Self {
            inner,
            task: Some(task),
        }
    }

    pub fn element(&self) -> Option<NodeId> {
        self.inner.injected.element()
    }
}

impl Disposable for NextAirDate {
    fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.inner.injected.dispose(&self.inner.document);
    }
}

impl Drop for NextAirDate {
    fn drop(&mut self) {
        self.dispose();
    }
}
