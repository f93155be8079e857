use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dom::NodeId;
pub use series_interfaces::defs::{
    AnimeListLink, AnimeListSite, Episode, EpisodeVersion, PlayheadUpdate, Season, ServiceError,
    UpNextSeries,
};

pub const REFRESH_WINDOW_ENV: &str = "SERIES_ANNOTATOR_REFRESH_MS";
pub const REARM_ENV: &str = "SERIES_ANNOTATOR_REARM";

/// Selectors and class names used to recognise the host page's markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSelectors {
    pub content_root: String,
    pub layout_root: String,
    pub season_navigation: String,
    /// Class of the node inserted into the season navigation on a season switch.
    pub season_episode_list_class: String,
    pub playable_collection: String,
    pub card_class: String,
    /// Class-name prefix of nested card content, present once a card is populated.
    pub card_populated_prefix: String,
    pub card_body: String,
    pub card_release: String,
    pub card_link: String,
    pub season_label: String,
    pub search_link: String,
    pub hero_actions: String,
    pub seasons_select: String,
    /// Season title inside the season selector.
    pub season_title: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            content_root: "#content".to_string(),
            layout_root: ".erc-root-layout".to_string(),
            season_navigation: ".erc-season-with-navigation".to_string(),
            season_episode_list_class: "erc-season-episode-list".to_string(),
            playable_collection: ".erc-playable-collection".to_string(),
            card_class: "card".to_string(),
            card_populated_prefix: "playable-card".to_string(),
            card_body: "[class^='playable-card-hover__body']".to_string(),
            card_release: "[class^='playable-card-hover__release']".to_string(),
            card_link: "a".to_string(),
            season_label: "div.seasons-select h4".to_string(),
            search_link: "a[href$=\"/search\"]".to_string(),
            hero_actions: ".erc-series-hero-actions".to_string(),
            seasons_select: ".seasons-select".to_string(),
            season_title: "h4".to_string(),
        }
    }
}

/// Trackers linked from the season selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimeListSettings {
    pub anilist: bool,
    pub myanimelist: bool,
}

impl AnimeListSettings {
    pub fn allows(&self, site: AnimeListSite) -> bool {
        match site {
            AnimeListSite::Anilist => self.anilist,
            AnimeListSite::MyAnimeList => self.myanimelist,
        }
    }

    pub fn any(&self) -> bool {
        self.anilist || self.myanimelist
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub selectors: PageSelectors,
    pub refresh_window_ms: u64,
    /// Class carried by every injected annotation; its presence makes re-annotation a no-op.
    pub annotation_marker_class: String,
    pub air_date_class: String,
    /// `chrono` format for the local release time appended to a card.
    pub release_time_format: String,
    pub air_date_format: String,
    /// Re-arm each change watch after it handled a batch instead of stopping.
    pub rearm_watches: bool,
    pub episode_air_date: bool,
    pub anime_list_links: AnimeListSettings,
    pub anime_list_container_class: String,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            selectors: PageSelectors::default(),
            refresh_window_ms: 2500,
            annotation_marker_class: "ic_action".to_string(),
            air_date_class: "next-air-date".to_string(),
            release_time_format: "%H:%M:%S".to_string(),
            air_date_format: "Next episode airs %A %d/%m at %H:%M".to_string(),
            rearm_watches: false,
            episode_air_date: false,
            anime_list_links: AnimeListSettings::default(),
            anime_list_container_class: "anime-list-link-container".to_string(),
        }
    }
}

impl AnnotatorConfig {
    pub fn refresh_window(&self) -> Duration {
        Duration::from_millis(self.refresh_window_ms)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Applies `SERIES_ANNOTATOR_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(REFRESH_WINDOW_ENV) {
            self.refresh_window_ms = value.trim().parse().map_err(|_| {
                AnnotatorError::Config(format!("{REFRESH_WINDOW_ENV} must be milliseconds, got {value:?}"))
            })?;
            debug!("Refresh window overridden to {}ms", self.refresh_window_ms);
        }
        if let Some(value) = lookup(REARM_ENV) {
            self.rearm_watches = matches!(value.trim(), "1" | "true" | "yes");
            debug!("Watch re-arm overridden to {}", self.rearm_watches);
        }
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotatorError {
    #[error("Unsupported selector: {0}")]
    Selector(String),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Cannot insert {child} into {parent}: it would create a cycle")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("Document went away while waiting for {selector}")]
    Detached { selector: String },

    #[error("Metadata service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnnotatorError>;

/// Formats `time` with a configured `chrono` pattern, rejecting unusable patterns
/// instead of panicking on them.
pub fn format_time<Tz>(time: &DateTime<Tz>, pattern: &str) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    write!(out, "{}", time.format(pattern))
        .map_err(|_| AnnotatorError::Config(format!("invalid time format {pattern:?}")))?;
    Ok(out)
}
