use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::schedule::request::{AdSetUpdate, CampaignUpdate, CreativeUpdate};

pub type ScheduleId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    On,
    Off,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::On => "ON",
            Status::Off => "OFF",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "ON" => Ok(Status::On),
            "OFF" => Ok(Status::Off),
            other => anyhow::bail!("unknown status: {other}"),
        }
    }
}

/// Which serving event makes a schedule billable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentType {
    /// Billed per impression.
    Cpm,
    /// Billed per click.
    Cpc,
    /// Billed per completed action (conversion).
    Cpa,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Cpm => "CPM",
            PaymentType::Cpc => "CPC",
            PaymentType::Cpa => "CPA",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "CPM" => Ok(PaymentType::Cpm),
            "CPC" => Ok(PaymentType::Cpc),
            "CPA" => Ok(PaymentType::Cpa),
            other => anyhow::bail!("unknown payment type: {other}"),
        }
    }

    /// The serving event that triggers a charge for this payment type.
    pub fn trigger(&self) -> ServeEvent {
        match self {
            PaymentType::Cpm => ServeEvent::Impression,
            PaymentType::Cpc => ServeEvent::Click,
            PaymentType::Cpa => ServeEvent::Action,
        }
    }
}

/// What happened on the request being served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeEvent {
    Impression,
    Click,
    Action,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: i64,
    pub total_budget: i64,
    pub spent_total_budget: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSet {
    pub ad_set_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Serving window, inclusive on both ends.
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: Status,
    pub daily_budget: i64,
    pub spent_daily_budget: i64,
    pub payment_type: PaymentType,
    /// Amount charged per chargeable event.
    pub unit_cost: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Look {
    pub image_url: Option<String>,
    pub movie_url: Option<String>,
    pub logo_url: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creative {
    pub creative_id: i64,
    pub status: Status,
    pub landing_url: String,
    pub look: Look,
}

/// One campaign + ad set + creative bound together; the unit of serving and caching.
///
/// Updates consume the value and hand back the updated aggregate, so no caller
/// ever observes a half-applied change through a shared reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    /// Persisted row version, bumped on every update.
    pub version: i64,
    pub campaign: Campaign,
    pub ad_set: AdSet,
    pub creative: Creative,
}

impl Schedule {
    /// True iff `now` falls inside the ad set's daily serving window.
    pub fn is_active_by_time(&self, now: NaiveTime) -> bool {
        self.ad_set.start_time <= now && now <= self.ad_set.end_time
    }

    /// True iff the ad set's date range covers `today`.
    pub fn covers_date(&self, today: NaiveDate) -> bool {
        self.ad_set.start_date <= today && today <= self.ad_set.end_date
    }

    /// Both the ad set and the creative are switched on.
    pub fn is_switched_on(&self) -> bool {
        self.ad_set.status == Status::On && self.creative.status == Status::On
    }

    pub fn has_chargeable_event(&self, event: ServeEvent) -> bool {
        self.ad_set.payment_type.trigger() == event
    }

    /// A charging serve needs room for one more unit on both caps; a
    /// non-charging serve only needs neither cap to be exhausted.
    pub fn has_rest_budget(&self, event: ServeEvent) -> bool {
        let c = &self.campaign;
        let a = &self.ad_set;

        if self.has_chargeable_event(event) {
            c.total_budget >= c.spent_total_budget.saturating_add(a.unit_cost)
                && a.daily_budget >= a.spent_daily_budget.saturating_add(a.unit_cost)
        } else {
            c.total_budget > c.spent_total_budget && a.daily_budget > a.spent_daily_budget
        }
    }

    /// Real-time serving eligibility (budget + time window).
    pub fn is_servable(&self, now: NaiveTime, event: ServeEvent) -> bool {
        self.has_rest_budget(event) && self.is_active_by_time(now)
    }

    /// Siblings share a campaign or an ad set and are charged in lockstep.
    pub fn shares_budget_with(&self, other: &Schedule) -> bool {
        self.campaign.campaign_id == other.campaign.campaign_id
            || self.ad_set.ad_set_id == other.ad_set.ad_set_id
    }

    pub fn with_spend(mut self, spent_total: i64, spent_daily: i64) -> Self {
        self.campaign.spent_total_budget = spent_total;
        self.ad_set.spent_daily_budget = spent_daily;
        self
    }

    pub fn update_campaign_budget(mut self, new_total: i64) -> Result<Self, AppError> {
        if new_total < self.campaign.spent_total_budget {
            return Err(AppError::Validation(format!(
                "total budget {new_total} is below spent total {} (schedule {})",
                self.campaign.spent_total_budget, self.id
            )));
        }
        self.campaign.total_budget = new_total;
        Ok(self)
    }

    pub fn update_ad_set_daily_budget(mut self, new_daily: i64) -> Result<Self, AppError> {
        if new_daily < self.ad_set.spent_daily_budget {
            return Err(AppError::Validation(format!(
                "daily budget {new_daily} is below spent daily {} (schedule {})",
                self.ad_set.spent_daily_budget, self.id
            )));
        }
        self.ad_set.daily_budget = new_daily;
        Ok(self)
    }

    pub fn apply_campaign_update(self, update: &CampaignUpdate) -> Result<Self, AppError> {
        match update.total_budget {
            Some(total) => self.update_campaign_budget(total),
            None => Ok(self),
        }
    }

    pub fn apply_ad_set_update(self, update: &AdSetUpdate) -> Result<Self, AppError> {
        let mut s = match update.daily_budget {
            Some(daily) => self.update_ad_set_daily_budget(daily)?,
            None => self,
        };

        let a = &mut s.ad_set;
        if let Some(v) = update.start_date {
            a.start_date = v;
        }
        if let Some(v) = update.end_date {
            a.end_date = v;
        }
        if let Some(v) = update.start_time {
            a.start_time = v;
        }
        if let Some(v) = update.end_time {
            a.end_time = v;
        }
        if let Some(v) = update.status {
            a.status = v;
        }
        if let Some(v) = update.payment_type {
            a.payment_type = v;
        }
        if let Some(v) = update.unit_cost {
            a.unit_cost = v;
        }

        s.check_invariants()?;
        Ok(s)
    }

    pub fn apply_creative_update(mut self, update: &CreativeUpdate) -> Self {
        let c = &mut self.creative;
        if let Some(v) = &update.landing_url {
            c.landing_url = v.clone();
        }
        if let Some(v) = update.status {
            c.status = v;
        }
        let look = &mut c.look;
        if let Some(v) = &update.image_url {
            look.image_url = Some(v.clone());
        }
        if let Some(v) = &update.movie_url {
            look.movie_url = Some(v.clone());
        }
        if let Some(v) = &update.logo_url {
            look.logo_url = Some(v.clone());
        }
        if let Some(v) = &update.title {
            look.title = Some(v.clone());
        }
        if let Some(v) = &update.subtitle {
            look.subtitle = Some(v.clone());
        }
        self
    }

    /// Structural rules every persisted schedule satisfies.
    pub fn check_invariants(&self) -> Result<(), AppError> {
        let c = &self.campaign;
        let a = &self.ad_set;

        if c.spent_total_budget < 0 || a.spent_daily_budget < 0 || a.unit_cost < 0 {
            return Err(AppError::Validation(format!(
                "negative money value on schedule {}",
                self.id
            )));
        }
        if c.total_budget < c.spent_total_budget {
            return Err(AppError::Validation(format!(
                "total budget {} is below spent total {}",
                c.total_budget, c.spent_total_budget
            )));
        }
        if a.daily_budget < a.spent_daily_budget {
            return Err(AppError::Validation(format!(
                "daily budget {} is below spent daily {}",
                a.daily_budget, a.spent_daily_budget
            )));
        }
        if a.start_date > a.end_date {
            return Err(AppError::Validation(format!(
                "start date {} is after end date {}",
                a.start_date, a.end_date
            )));
        }
        if a.start_time > a.end_time {
            return Err(AppError::Validation(format!(
                "start time {} is after end time {}",
                a.start_time, a.end_time
            )));
        }
        Ok(())
    }
}
