//! Inbound payloads for the schedule operations.
//!
//! One update schema per sub-object; every field except the addressing id is
//! optional and left untouched when absent. Versioning of these shapes belongs
//! to the transport, not to the domain.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::schedule::model::{
    AdSet, Campaign, Creative, Look, PaymentType, Schedule, ScheduleId, Status,
};

/// A schedule as propagated by the ad platform, before it has an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub campaign_id: i64,
    pub ad_set_id: i64,
    pub creative_id: i64,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,

    pub total_budget: i64,
    #[serde(default)]
    pub spent_total_budget: Option<i64>,
    pub daily_budget: i64,
    #[serde(default)]
    pub spent_daily_budget: Option<i64>,
    pub payment_type: PaymentType,
    pub unit_cost: i64,

    pub ad_set_status: Status,
    pub creative_status: Status,
    pub landing_url: String,
    #[serde(default)]
    pub look: Look,
}

impl NewSchedule {
    /// Builds the aggregate this request describes, as it will look once stored under `id`.
    pub fn to_schedule(&self, id: ScheduleId) -> Schedule {
        Schedule {
            id,
            version: 1,
            campaign: Campaign {
                campaign_id: self.campaign_id,
                total_budget: self.total_budget,
                spent_total_budget: self.spent_total_budget.unwrap_or(0),
            },
            ad_set: AdSet {
                ad_set_id: self.ad_set_id,
                start_date: self.start_date,
                end_date: self.end_date,
                start_time: self.start_time,
                end_time: self.end_time,
                status: self.ad_set_status,
                daily_budget: self.daily_budget,
                spent_daily_budget: self.spent_daily_budget.unwrap_or(0),
                payment_type: self.payment_type,
                unit_cost: self.unit_cost,
            },
            creative: Creative {
                creative_id: self.creative_id,
                status: self.creative_status,
                landing_url: self.landing_url.clone(),
                look: self.look.clone(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.total_budget < 0 || self.daily_budget < 0 {
            return Err(AppError::Validation(format!(
                "negative budget for campaign {} / ad set {}",
                self.campaign_id, self.ad_set_id
            )));
        }
        self.to_schedule(0).check_invariants()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignUpdate {
    pub campaign_id: i64,
    #[serde(default)]
    pub total_budget: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSetUpdate {
    pub ad_set_id: i64,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub daily_budget: Option<i64>,
    #[serde(default)]
    pub payment_type: Option<PaymentType>,
    #[serde(default)]
    pub unit_cost: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeUpdate {
    pub creative_id: i64,
    #[serde(default)]
    pub landing_url: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub movie_url: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpdateRequest {
    #[serde(default)]
    pub campaign: Option<CampaignUpdate>,
    #[serde(default)]
    pub ad_set: Option<AdSetUpdate>,
    #[serde(default)]
    pub creative: Option<CreativeUpdate>,
}

impl ScheduleUpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.campaign.is_none() && self.ad_set.is_none() && self.creative.is_none()
    }
}
