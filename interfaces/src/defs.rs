use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub season_sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeVersion {
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub sequence_number: f64,
    pub duration_ms: u64,
    pub availability_starts: DateTime<Utc>,
    #[serde(default)]
    pub episode_air_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub versions: Vec<EpisodeVersion>,
}

impl Episode {
    /// True when `haystack` embeds this episode's id or any of its version guids.
    pub fn is_referenced_by(&self, haystack: &str) -> bool {
        (!self.id.is_empty() && haystack.contains(&self.id))
            || self
                .versions
                .iter()
                .any(|version| !version.guid.is_empty() && haystack.contains(&version.guid))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpNextSeries {
    pub season_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayheadUpdate {
    pub id: String,
    #[serde(rename = "playheadMs")]
    pub playhead_ms: u64,
}

/// External anime trackers a season can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimeListSite {
    Anilist,
    MyAnimeList,
}

impl AnimeListSite {
    pub fn name(self) -> &'static str {
        match self {
            AnimeListSite::Anilist => "AniList",
            AnimeListSite::MyAnimeList => "MyAnimeList",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeListLink {
    pub site: AnimeListSite,
    pub url: String,
}

/// Failures reported by the remote collaborators.
///
/// Cloneable so a single failed fetch can be handed to every task awaiting it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Decode(err.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

// Object style note:
// Implementations of these traits stand in for a remote service. They are
// shared behind `Arc<dyn ...>` by every module of a page and must not assume
// they are called in any particular order, nor only once per key. Callers are
// responsible for memoization.

/// Series metadata and playback-state service.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn seasons(&self, series_id: &str) -> ServiceResult<Vec<Season>>;

    async fn episodes(&self, season_id: &str) -> ServiceResult<Vec<Episode>>;

    async fn up_next_series(&self, series_id: &str) -> ServiceResult<UpNextSeries>;

    /// Writes one or many playheads in a single request.
    async fn playheads(&self, updates: &[PlayheadUpdate]) -> ServiceResult<()>;
}

/// Third-party airing calendar, looked up by the series slug.
#[async_trait]
pub trait AiringSchedule: Send + Sync {
    async fn next_airing_at(&self, slug: &str) -> ServiceResult<Option<DateTime<Utc>>>;
}

/// Looks a season up on external anime trackers.
#[async_trait]
pub trait AnimeListLinker: Send + Sync {
    /// Links for the season titled `season_title`. Sites that do not know the
    /// title are left out.
    async fn links(&self, season_title: &str) -> ServiceResult<Vec<AnimeListLink>>;
}
