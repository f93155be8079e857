use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::defs::{
    AiringSchedule, AnimeListLink, AnimeListLinker, Episode, MetadataService, PlayheadUpdate,
    Season, ServiceError, ServiceResult, UpNextSeries,
};

/// A service that knows about nothing.
pub struct EmptyMetadataService;

#[async_trait]
impl MetadataService for EmptyMetadataService {
    async fn seasons(&self, _series_id: &str) -> ServiceResult<Vec<Season>> {
        Ok(Vec::new())
    }

    async fn episodes(&self, _season_id: &str) -> ServiceResult<Vec<Episode>> {
        Ok(Vec::new())
    }

    async fn up_next_series(&self, series_id: &str) -> ServiceResult<UpNextSeries> {
        Err(ServiceError::NotFound {
            what: format!("up next for series {series_id}"),
        })
    }

    async fn playheads(&self, _updates: &[PlayheadUpdate]) -> ServiceResult<()> {
        // Nothing to write to, the ideal write is a no-op.
        Ok(())
    }
}

#[async_trait]
impl AiringSchedule for EmptyMetadataService {
    async fn next_airing_at(&self, _slug: &str) -> ServiceResult<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

#[async_trait]
impl AnimeListLinker for EmptyMetadataService {
    async fn links(&self, _season_title: &str) -> ServiceResult<Vec<AnimeListLink>> {
        Ok(Vec::new())
    }
}
