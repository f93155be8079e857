use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::defs::{
    AiringSchedule, AnimeListLink, AnimeListLinker, Episode, MetadataService, PlayheadUpdate,
    Season, ServiceError, ServiceResult, UpNextSeries,
};

/// Everything the baseline service knows, as loaded from a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub series: HashMap<String, SeriesEntry>,
    /// Episodes keyed by season id.
    #[serde(default)]
    pub episodes: HashMap<String, Vec<Episode>>,
    /// Next airing instant keyed by series slug.
    #[serde(default)]
    pub airing: HashMap<String, DateTime<Utc>>,
    /// Tracker links keyed by season title.
    #[serde(default)]
    pub anime_lists: HashMap<String, Vec<AnimeListLink>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesEntry {
    #[serde(default)]
    pub seasons: Vec<Season>,
    #[serde(default)]
    pub up_next: Option<UpNextSeries>,
}

/// Requests observed by a [`BaselineMetadataService`], in arrival order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub seasons: Vec<String>,
    pub episodes: Vec<String>,
    pub up_next: Vec<String>,
    pub playheads: Vec<Vec<PlayheadUpdate>>,
    pub airing: Vec<String>,
    pub anime_lists: Vec<String>,
}

/// In-process metadata service answering from a [`Catalog`].
///
/// Every request is recorded, and can be slowed down or made to fail per
/// season, which makes it the default collaborator for the demo binary and
/// the test suites.
pub struct BaselineMetadataService {
    catalog: Catalog,
    delay: Duration,
    failing_seasons: Mutex<HashSet<String>>,
    calls: Mutex<CallLog>,
}

impl BaselineMetadataService {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            delay: Duration::ZERO,
            failing_seasons: Mutex::new(HashSet::new()),
            calls: Mutex::new(CallLog::default()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(json).context("failed to parse catalog JSON")?;
        Ok(Self::new(catalog))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Simulated round-trip latency applied to every request.
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Duration::from_millis(delay_ms);
        self
    }

    /// Makes every episode request for `season_id` fail from now on.
    pub fn fail_episodes_for(&self, season_id: &str) {
        self.failing_seasons.lock().insert(season_id.to_string());
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn calls(&self) -> CallLog {
        self.calls.lock().clone()
    }

    pub fn episode_fetches(&self, season_id: &str) -> usize {
        self.calls
            .lock()
            .episodes
            .iter()
            .filter(|id| id.as_str() == season_id)
            .count()
    }

    async fn simulate_latency(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl MetadataService for BaselineMetadataService {
    async fn seasons(&self, series_id: &str) -> ServiceResult<Vec<Season>> {
        self.calls.lock().seasons.push(series_id.to_string());
        self.simulate_latency().await;

        self.catalog
            .series
            .get(series_id)
            .map(|entry| entry.seasons.clone())
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("series {series_id}"),
            })
    }

    async fn episodes(&self, season_id: &str) -> ServiceResult<Vec<Episode>> {
        self.calls.lock().episodes.push(season_id.to_string());
        self.simulate_latency().await;

        if self.failing_seasons.lock().contains(season_id) {
            return Err(ServiceError::Request(format!(
                "episodes for season {season_id} unavailable"
            )));
        }
        Ok(self.catalog.episodes.get(season_id).cloned().unwrap_or_default())
    }

    async fn up_next_series(&self, series_id: &str) -> ServiceResult<UpNextSeries> {
        self.calls.lock().up_next.push(series_id.to_string());
        self.simulate_latency().await;

        self.catalog
            .series
            .get(series_id)
            .and_then(|entry| entry.up_next.clone())
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("up next for series {series_id}"),
            })
    }

    async fn playheads(&self, updates: &[PlayheadUpdate]) -> ServiceResult<()> {
        self.calls.lock().playheads.push(updates.to_vec());
        self.simulate_latency().await;
        Ok(())
    }
}

#[async_trait]
impl AiringSchedule for BaselineMetadataService {
    async fn next_airing_at(&self, slug: &str) -> ServiceResult<Option<DateTime<Utc>>> {
        self.calls.lock().airing.push(slug.to_string());
        self.simulate_latency().await;
        Ok(self.catalog.airing.get(slug).copied())
    }
}

#[async_trait]
impl AnimeListLinker for BaselineMetadataService {
    async fn links(&self, season_title: &str) -> ServiceResult<Vec<AnimeListLink>> {
        self.calls.lock().anime_lists.push(season_title.to_string());
        self.simulate_latency().await;
        Ok(self
            .catalog
            .anime_lists
            .get(season_title)
            .cloned()
            .unwrap_or_default())
    }
}
