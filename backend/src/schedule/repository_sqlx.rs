use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::{AnyPool, Row};

use crate::schedule::model::{
    AdSet, Campaign, Creative, Look, PaymentType, Schedule, ScheduleId, Status,
};
use crate::schedule::repository::{ScheduleRepository, VersionConflict};
use crate::schedule::request::NewSchedule;

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

const SCHEDULE_COLUMNS: &str = r#"
  schedule_id, version,
  campaign_id, total_budget, spent_total_budget,
  ad_set_id, start_date, end_date, start_time, end_time, ad_set_status,
  daily_budget, spent_daily_budget, payment_type, unit_cost,
  creative_id, creative_status, landing_url,
  image_url, movie_url, logo_url, title, subtitle
"#;

/// SQLx-backed implementation of ScheduleRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxScheduleRepository {
    pool: AnyPool,
}

impl SqlxScheduleRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, clause: &str, id: i64) -> anyhow::Result<Vec<Schedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE {clause} ORDER BY schedule_id;");
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;

        Ok(map_rows(&rows))
    }
}

#[async_trait]
impl ScheduleRepository for SqlxScheduleRepository {
    async fn find_eligible(&self, today: NaiveDate) -> anyhow::Result<Vec<Schedule>> {
        let today = today.format(DATE_FMT).to_string();
        let sql = format!(
            r#"
SELECT {SCHEDULE_COLUMNS}
FROM schedules
WHERE start_date <= ? AND end_date >= ?
  AND ad_set_status = 'ON' AND creative_status = 'ON'
ORDER BY schedule_id;
"#
        );

        let rows = sqlx::query(&sql)
            .bind(today.clone())
            .bind(today)
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(&rows))
    }

    async fn find_by_id(&self, id: ScheduleId) -> anyhow::Result<Option<Schedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE schedule_id = ?;");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_schedule(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_campaign_id(&self, campaign_id: i64) -> anyhow::Result<Vec<Schedule>> {
        self.fetch_where("campaign_id = ?", campaign_id).await
    }

    async fn find_by_ad_set_id(&self, ad_set_id: i64) -> anyhow::Result<Vec<Schedule>> {
        self.fetch_where("ad_set_id = ?", ad_set_id).await
    }

    async fn find_by_creative_id(&self, creative_id: i64) -> anyhow::Result<Vec<Schedule>> {
        self.fetch_where("creative_id = ?", creative_id).await
    }

    async fn insert_all(&self, schedules: &[NewSchedule]) -> anyhow::Result<Vec<Schedule>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(schedules.len());

        for new in schedules {
            let draft = new.to_schedule(0);
            let row = sqlx::query(
                r#"
INSERT INTO schedules (
  version,
  campaign_id, total_budget, spent_total_budget,
  ad_set_id, start_date, end_date, start_time, end_time, ad_set_status,
  daily_budget, spent_daily_budget, payment_type, unit_cost,
  creative_id, creative_status, landing_url,
  image_url, movie_url, logo_url, title, subtitle
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
RETURNING schedule_id;
"#,
            )
            .bind(draft.version)
            .bind(draft.campaign.campaign_id)
            .bind(draft.campaign.total_budget)
            .bind(draft.campaign.spent_total_budget)
            .bind(draft.ad_set.ad_set_id)
            .bind(draft.ad_set.start_date.format(DATE_FMT).to_string())
            .bind(draft.ad_set.end_date.format(DATE_FMT).to_string())
            .bind(draft.ad_set.start_time.format(TIME_FMT).to_string())
            .bind(draft.ad_set.end_time.format(TIME_FMT).to_string())
            .bind(draft.ad_set.status.as_str())
            .bind(draft.ad_set.daily_budget)
            .bind(draft.ad_set.spent_daily_budget)
            .bind(draft.ad_set.payment_type.as_str())
            .bind(draft.ad_set.unit_cost)
            .bind(draft.creative.creative_id)
            .bind(draft.creative.status.as_str())
            .bind(draft.creative.landing_url.clone())
            .bind(draft.creative.look.image_url.clone())
            .bind(draft.creative.look.movie_url.clone())
            .bind(draft.creative.look.logo_url.clone())
            .bind(draft.creative.look.title.clone())
            .bind(draft.creative.look.subtitle.clone())
            .fetch_one(&mut *tx)
            .await
            .context("insert schedule")?;

            let id: i64 = row.try_get("schedule_id")?;
            out.push(new.to_schedule(id));
        }

        tx.commit().await?;
        Ok(out)
    }

    async fn update_all(&self, schedules: &[Schedule]) -> anyhow::Result<Vec<Schedule>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(schedules.len());

        for s in schedules {
            let next_version = s.version + 1;
            let result = sqlx::query(
                r#"
UPDATE schedules SET
  version = ?,
  campaign_id = ?, total_budget = ?, spent_total_budget = ?,
  ad_set_id = ?, start_date = ?, end_date = ?, start_time = ?, end_time = ?, ad_set_status = ?,
  daily_budget = ?, spent_daily_budget = ?, payment_type = ?, unit_cost = ?,
  creative_id = ?, creative_status = ?, landing_url = ?,
  image_url = ?, movie_url = ?, logo_url = ?, title = ?, subtitle = ?
WHERE schedule_id = ? AND version = ?;
"#,
            )
            .bind(next_version)
            .bind(s.campaign.campaign_id)
            .bind(s.campaign.total_budget)
            .bind(s.campaign.spent_total_budget)
            .bind(s.ad_set.ad_set_id)
            .bind(s.ad_set.start_date.format(DATE_FMT).to_string())
            .bind(s.ad_set.end_date.format(DATE_FMT).to_string())
            .bind(s.ad_set.start_time.format(TIME_FMT).to_string())
            .bind(s.ad_set.end_time.format(TIME_FMT).to_string())
            .bind(s.ad_set.status.as_str())
            .bind(s.ad_set.daily_budget)
            .bind(s.ad_set.spent_daily_budget)
            .bind(s.ad_set.payment_type.as_str())
            .bind(s.ad_set.unit_cost)
            .bind(s.creative.creative_id)
            .bind(s.creative.status.as_str())
            .bind(s.creative.landing_url.clone())
            .bind(s.creative.look.image_url.clone())
            .bind(s.creative.look.movie_url.clone())
            .bind(s.creative.look.logo_url.clone())
            .bind(s.creative.look.title.clone())
            .bind(s.creative.look.subtitle.clone())
            .bind(s.id)
            .bind(s.version)
            .execute(&mut *tx)
            .await
            .context("update schedule")?;

            if result.rows_affected() == 0 {
                // dropping tx rolls back the rows already written
                return Err(VersionConflict {
                    id: s.id,
                    expected: s.version,
                }
                .into());
            }

            let mut updated = s.clone();
            updated.version = next_version;
            out.push(updated);
        }

        tx.commit().await?;
        Ok(out)
    }
}

/* =========================
Row mapping + conversions
========================= */

fn map_rows(rows: &[sqlx::any::AnyRow]) -> Vec<Schedule> {
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        match row_to_schedule(r) {
            Ok(s) => out.push(s),
            Err(e) => {
                // poison-row resilience: skip but don't fail the batch
                tracing::warn!(error = %e, "skipping malformed schedule row");
            }
        }
    }
    out
}

fn row_to_schedule(r: &sqlx::any::AnyRow) -> anyhow::Result<Schedule> {
    let id: i64 = r.try_get("schedule_id")?;
    build_schedule(id, r).with_context(|| format!("invalid schedule row {id}"))
}

fn build_schedule(id: ScheduleId, r: &sqlx::any::AnyRow) -> anyhow::Result<Schedule> {
    Ok(Schedule {
        id,
        version: r.try_get("version")?,
        campaign: Campaign {
            campaign_id: r.try_get("campaign_id")?,
            total_budget: non_negative(r.try_get("total_budget")?)?,
            spent_total_budget: non_negative(r.try_get("spent_total_budget")?)?,
        },
        ad_set: AdSet {
            ad_set_id: r.try_get("ad_set_id")?,
            start_date: parse_date(&r.try_get::<String, _>("start_date")?)?,
            end_date: parse_date(&r.try_get::<String, _>("end_date")?)?,
            start_time: parse_time(&r.try_get::<String, _>("start_time")?)?,
            end_time: parse_time(&r.try_get::<String, _>("end_time")?)?,
            status: Status::parse(&r.try_get::<String, _>("ad_set_status")?)?,
            daily_budget: non_negative(r.try_get("daily_budget")?)?,
            spent_daily_budget: non_negative(r.try_get("spent_daily_budget")?)?,
            payment_type: PaymentType::parse(&r.try_get::<String, _>("payment_type")?)?,
            unit_cost: non_negative(r.try_get("unit_cost")?)?,
        },
        creative: Creative {
            creative_id: r.try_get("creative_id")?,
            status: Status::parse(&r.try_get::<String, _>("creative_status")?)?,
            landing_url: r.try_get("landing_url")?,
            look: Look {
                image_url: r.try_get("image_url")?,
                movie_url: r.try_get("movie_url")?,
                logo_url: r.try_get("logo_url")?,
                title: r.try_get("title")?,
                subtitle: r.try_get("subtitle")?,
            },
        },
    })
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).with_context(|| format!("invalid date: {s}"))
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FMT).with_context(|| format!("invalid time: {s}"))
}

fn non_negative(v: i64) -> anyhow::Result<i64> {
    if v < 0 {
        return Err(anyhow!("negative money value: {v}"));
    }
    Ok(v)
}
