use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::schedule::model::{Schedule, ScheduleId};
use crate::schedule::request::NewSchedule;

/// Source of record for schedules.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Schedules whose date range covers `today` with both ad set and creative ON.
    async fn find_eligible(&self, today: NaiveDate) -> Result<Vec<Schedule>>;

    async fn find_by_id(&self, id: ScheduleId) -> Result<Option<Schedule>>;

    async fn find_by_campaign_id(&self, campaign_id: i64) -> Result<Vec<Schedule>>;

    async fn find_by_ad_set_id(&self, ad_set_id: i64) -> Result<Vec<Schedule>>;

    async fn find_by_creative_id(&self, creative_id: i64) -> Result<Vec<Schedule>>;

    /// Inserts every schedule in one transaction and returns them with their assigned ids.
    async fn insert_all(&self, schedules: &[NewSchedule]) -> Result<Vec<Schedule>>;

    /// Persists every schedule in one transaction.
    ///
    /// Each row is written only if its stored version still equals
    /// `schedule.version`; the returned schedules carry the bumped version.
    /// A mismatch aborts the whole transaction with [`VersionConflict`].
    async fn update_all(&self, schedules: &[Schedule]) -> Result<Vec<Schedule>>;
}

#[derive(Debug, Error)]
#[error("schedule {id} was modified concurrently (expected version {expected})")]
pub struct VersionConflict {
    pub id: ScheduleId,
    pub expected: i64,
}
