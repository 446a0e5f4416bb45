//! Fixtures and hand-written test doubles shared by the unit tests.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use parking_lot::Mutex;

use crate::schedule::model::{
    AdSet, Campaign, Creative, Look, PaymentType, Schedule, ScheduleId, Status,
};
use crate::schedule::repository::{ScheduleRepository, VersionConflict};
use crate::schedule::request::NewSchedule;
use crate::serving::history::HistorySink;
use crate::store::KvStore;

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A day inside every fixture's date range.
pub fn today() -> NaiveDate {
    ymd(2025, 6, 15)
}

/// CPM schedule: total 1000, daily 500, serving 09:00 to 18:00, nothing spent.
pub fn mk_schedule(id: ScheduleId, campaign_id: i64, ad_set_id: i64, unit_cost: i64) -> Schedule {
    Schedule {
        id,
        version: 1,
        campaign: Campaign {
            campaign_id,
            total_budget: 1000,
            spent_total_budget: 0,
        },
        ad_set: AdSet {
            ad_set_id,
            start_date: ymd(2025, 1, 1),
            end_date: ymd(2025, 12, 31),
            start_time: hm(9, 0),
            end_time: hm(18, 0),
            status: Status::On,
            daily_budget: 500,
            spent_daily_budget: 0,
            payment_type: PaymentType::Cpm,
            unit_cost,
        },
        creative: Creative {
            creative_id: id,
            status: Status::On,
            landing_url: format!("https://example.com/landing/{id}"),
            look: Look {
                image_url: Some(format!("https://cdn.example.com/{id}.png")),
                title: Some(format!("ad {id}")),
                ..Default::default()
            },
        },
    }
}

pub fn mk_new_schedule(campaign_id: i64, ad_set_id: i64, creative_id: i64) -> NewSchedule {
    NewSchedule {
        campaign_id,
        ad_set_id,
        creative_id,
        start_date: ymd(2025, 1, 1),
        end_date: ymd(2025, 12, 31),
        start_time: hm(9, 0),
        end_time: hm(18, 0),
        total_budget: 1000,
        spent_total_budget: None,
        daily_budget: 500,
        spent_daily_budget: None,
        payment_type: PaymentType::Cpm,
        unit_cost: 100,
        ad_set_status: Status::On,
        creative_status: Status::On,
        landing_url: format!("https://example.com/landing/{creative_id}"),
        look: Look::default(),
    }
}

/// In-memory source of record with the same eligibility and version rules as the SQL one.
#[derive(Default)]
pub struct MockScheduleRepository {
    rows: Mutex<Vec<Schedule>>,
}

impl MockScheduleRepository {
    pub fn new(rows: Vec<Schedule>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub fn all(&self) -> Vec<Schedule> {
        self.rows.lock().clone()
    }

    fn filtered(&self, f: impl Fn(&Schedule) -> bool) -> Vec<Schedule> {
        self.rows.lock().iter().filter(|s| f(s)).cloned().collect()
    }
}

#[async_trait]
impl ScheduleRepository for MockScheduleRepository {
    async fn find_eligible(&self, today: NaiveDate) -> Result<Vec<Schedule>> {
        Ok(self.filtered(|s| s.covers_date(today) && s.is_switched_on()))
    }

    async fn find_by_id(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        Ok(self.filtered(|s| s.id == id).into_iter().next())
    }

    async fn find_by_campaign_id(&self, campaign_id: i64) -> Result<Vec<Schedule>> {
        Ok(self.filtered(|s| s.campaign.campaign_id == campaign_id))
    }

    async fn find_by_ad_set_id(&self, ad_set_id: i64) -> Result<Vec<Schedule>> {
        Ok(self.filtered(|s| s.ad_set.ad_set_id == ad_set_id))
    }

    async fn find_by_creative_id(&self, creative_id: i64) -> Result<Vec<Schedule>> {
        Ok(self.filtered(|s| s.creative.creative_id == creative_id))
    }

    async fn insert_all(&self, schedules: &[NewSchedule]) -> Result<Vec<Schedule>> {
        let mut rows = self.rows.lock();
        let mut next = rows.iter().map(|s| s.id).max().unwrap_or(0);

        let created: Vec<Schedule> = schedules
            .iter()
            .map(|n| {
                next += 1;
                n.to_schedule(next)
            })
            .collect();
        rows.extend(created.iter().cloned());
        Ok(created)
    }

    async fn update_all(&self, schedules: &[Schedule]) -> Result<Vec<Schedule>> {
        let mut rows = self.rows.lock();

        for s in schedules {
            let stored = rows.iter().find(|r| r.id == s.id);
            if stored.is_none_or(|r| r.version != s.version) {
                return Err(VersionConflict {
                    id: s.id,
                    expected: s.version,
                }
                .into());
            }
        }

        let mut out = Vec::with_capacity(schedules.len());
        for s in schedules {
            let mut updated = s.clone();
            updated.version += 1;
            if let Some(r) = rows.iter_mut().find(|r| r.id == s.id) {
                *r = updated.clone();
            }
            out.push(updated);
        }
        Ok(out)
    }
}

/// Every call stays pending forever, as if the database stopped answering.
pub struct HangingScheduleRepository;

#[async_trait]
impl ScheduleRepository for HangingScheduleRepository {
    async fn find_eligible(&self, _today: NaiveDate) -> Result<Vec<Schedule>> {
        std::future::pending().await
    }

    async fn find_by_id(&self, _id: ScheduleId) -> Result<Option<Schedule>> {
        std::future::pending().await
    }

    async fn find_by_campaign_id(&self, _campaign_id: i64) -> Result<Vec<Schedule>> {
        std::future::pending().await
    }

    async fn find_by_ad_set_id(&self, _ad_set_id: i64) -> Result<Vec<Schedule>> {
        std::future::pending().await
    }

    async fn find_by_creative_id(&self, _creative_id: i64) -> Result<Vec<Schedule>> {
        std::future::pending().await
    }

    async fn insert_all(&self, _schedules: &[NewSchedule]) -> Result<Vec<Schedule>> {
        std::future::pending().await
    }

    async fn update_all(&self, _schedules: &[Schedule]) -> Result<Vec<Schedule>> {
        std::future::pending().await
    }
}

/// Every call fails, as if the store were unreachable.
pub struct FailingKvStore;

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("store unreachable"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(anyhow!("store unreachable"))
    }

    async fn set_nx(&self, _key: &str, _value: String) -> Result<bool> {
        Err(anyhow!("store unreachable"))
    }

    async fn incr_by(&self, _key: &str, _delta: i64) -> Result<i64> {
        Err(anyhow!("store unreachable"))
    }

    async fn replace_keep_ttl(&self, _key: &str, _value: String) -> Result<bool> {
        Err(anyhow!("store unreachable"))
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64> {
        Err(anyhow!("store unreachable"))
    }

    async fn scan_prefix(
        &self,
        _prefix: &str,
        _after: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<String>> {
        Err(anyhow!("store unreachable"))
    }
}

#[derive(Default)]
pub struct RecordingHistorySink {
    records: Mutex<Vec<Schedule>>,
}

impl RecordingHistorySink {
    pub fn ids(&self) -> Vec<ScheduleId> {
        self.records.lock().iter().map(|s| s.id).collect()
    }
}

impl HistorySink for RecordingHistorySink {
    fn record(&self, schedule: &Schedule) -> Result<()> {
        self.records.lock().push(schedule.clone());
        Ok(())
    }
}

pub struct FailingHistorySink;

impl HistorySink for FailingHistorySink {
    fn record(&self, _schedule: &Schedule) -> Result<()> {
        Err(anyhow!("history sink down"))
    }
}
