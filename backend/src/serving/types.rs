use serde::{Deserialize, Serialize};

use crate::schedule::model::{Look, Schedule, ScheduleId};

/// Where the served schedule was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServePath {
    Cache,
    Fallback,
}

impl ServePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServePath::Cache => "cache",
            ServePath::Fallback => "fallback",
        }
    }
}

/// Public payload returned for one served ad.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingAd {
    pub schedule_id: ScheduleId,
    pub campaign_id: i64,
    pub ad_set_id: i64,
    pub creative_id: i64,
    pub landing_url: String,
    pub look: Look,
    pub spent_total_budget: i64,
    pub spent_daily_budget: i64,
    pub path: ServePath,
}

impl ServingAd {
    pub fn from_schedule(s: &Schedule, path: ServePath) -> Self {
        Self {
            schedule_id: s.id,
            campaign_id: s.campaign.campaign_id,
            ad_set_id: s.ad_set.ad_set_id,
            creative_id: s.creative.creative_id,
            landing_url: s.creative.landing_url.clone(),
            look: s.creative.look.clone(),
            spent_total_budget: s.campaign.spent_total_budget,
            spent_daily_budget: s.ad_set.spent_daily_budget,
            path,
        }
    }
}
