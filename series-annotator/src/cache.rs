//! Memoized reference data for one series.
//!
//! Every fetch is stored as a shared future the moment it is first requested,
//! so concurrent requesters await the same completion and a key is never
//! fetched twice, whether the first fetch is still running, succeeded or
//! failed.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use series_interfaces::defs::{
    Episode, MetadataService, Season, ServiceError, ServiceResult, UpNextSeries,
};
use tracing::{debug, warn};

pub type SharedFetch<V> = Shared<BoxFuture<'static, ServiceResult<Arc<V>>>>;

type Fetcher<V> = dyn Fn(String) -> BoxFuture<'static, ServiceResult<V>> + Send + Sync;

fn share<V, F>(label: String, fetch: F) -> SharedFetch<V>
where
    V: Send + Sync + 'static,
    F: std::future::Future<Output = ServiceResult<V>> + Send + 'static,
{
    async move {
        match fetch.await {
            Ok(value) => Ok(Arc::new(value)),
            Err(err) => {
                warn!("Fetch of {} failed: {}", label, err);
                Err(err)
            }
        }
    }
    .boxed()
    .shared()
}

/// Lazy map from key to a single shared fetch.
pub struct ReferenceCache<V> {
    name: &'static str,
    entries: Mutex<HashMap<String, SharedFetch<V>>>,
    fetch: Arc<Fetcher<V>>,
}

impl<V: Send + Sync + 'static> ReferenceCache<V> {
    pub fn new<F>(name: &'static str, fetch: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, ServiceResult<V>> + Send + Sync + 'static,
    {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            fetch: Arc::new(fetch),
        }
    }

    /// Returns the stored future for `key`, issuing the fetch on first access.
    pub fn get_or_fetch(&self, key: &str) -> SharedFetch<V> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            return existing.clone();
        }
        debug!("{} cache miss for {}", self.name, key);
        let fetch = share(format!("{} {}", self.name, key), (self.fetch)(key.to_string()));
        entries.insert(key.to_string(), fetch.clone());
        fetch
    }

    pub async fn get(&self, key: &str) -> ServiceResult<Arc<V>> {
        self.get_or_fetch(key).await
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V> fmt::Debug for ReferenceCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("name", &self.name)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

/// Reference data for one series, shared by every module on its page.
pub struct SeriesCatalog {
    series_id: String,
    service: Arc<dyn MetadataService>,
    seasons: SharedFetch<Vec<Season>>,
    episodes: ReferenceCache<Vec<Episode>>,
    up_next: OnceCell<SharedFetch<UpNextSeries>>,
}

impl SeriesCatalog {
    /// The season list is requested on first use; episodes and up-next are
    /// requested per key on first access.
    pub fn new(series_id: &str, service: Arc<dyn MetadataService>) -> Self {
        let seasons = {
            let service = service.clone();
            let series_id = series_id.to_string();
            share(format!("seasons {series_id}"), async move {
                service.seasons(&series_id).await
            })
        };

        let episodes = {
            let service = service.clone();
            ReferenceCache::new("episodes", move |season_id: String| {
                let service = service.clone();
                async move {
                    let mut episodes = service.episodes(&season_id).await?;
                    episodes.sort_by(|a, b| a.sequence_number.total_cmp(&b.sequence_number));
                    Ok::<_, ServiceError>(episodes)
                }
                .boxed()
            })
        };

        Self {
            series_id: series_id.to_string(),
            service,
            seasons,
            episodes,
            up_next: OnceCell::new(),
        }
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub async fn seasons(&self) -> ServiceResult<Arc<Vec<Season>>> {
        self.seasons.clone().await
    }

    /// Episodes of `season_id`, ascending by sequence number.
    pub async fn episodes(&self, season_id: &str) -> ServiceResult<Arc<Vec<Episode>>> {
        self.episodes.get(season_id).await
    }

    pub fn episode_cache(&self) -> &ReferenceCache<Vec<Episode>> {
        &self.episodes
    }

    pub async fn up_next(&self) -> ServiceResult<Arc<UpNextSeries>> {
        self.up_next
            .get_or_init(|| {
                let service = self.service.clone();
                let series_id = self.series_id.clone();
                share(format!("up next {series_id}"), async move {
                    service.up_next_series(&series_id).await
                })
            })
            .clone()
            .await
    }

    /// The season with the highest season number, if any. Ties go to the
    /// season listed first.
    pub async fn latest_season(&self) -> ServiceResult<Option<Season>> {
        let seasons = self.seasons().await?;
        Ok(seasons
            .iter()
            .min_by_key(|season| Reverse(season.season_sequence_number))
            .cloned())
    }

    pub fn service(&self) -> Arc<dyn MetadataService> {
        self.service.clone()
    }
}

impl fmt::Debug for SeriesCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesCatalog")
            .field("series_id", &self.series_id)
            .field("episodes", &self.episodes)
            .finish()
    }
}
