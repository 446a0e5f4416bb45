use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Schedules (source of record)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS schedules (
  schedule_id INTEGER PRIMARY KEY AUTOINCREMENT,
  version BIGINT NOT NULL DEFAULT 1,

  campaign_id BIGINT NOT NULL,
  total_budget BIGINT NOT NULL CHECK (total_budget >= 0),
  spent_total_budget BIGINT NOT NULL DEFAULT 0,

  ad_set_id BIGINT NOT NULL,
  start_date TEXT NOT NULL,
  end_date TEXT NOT NULL,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL,
  ad_set_status TEXT NOT NULL CHECK (ad_set_status IN ('ON','OFF')),
  daily_budget BIGINT NOT NULL CHECK (daily_budget >= 0),
  spent_daily_budget BIGINT NOT NULL DEFAULT 0,
  payment_type TEXT NOT NULL,
  unit_cost BIGINT NOT NULL,

  creative_id BIGINT NOT NULL,
  creative_status TEXT NOT NULL CHECK (creative_status IN ('ON','OFF')),
  landing_url TEXT NOT NULL,
  image_url TEXT,
  movie_url TEXT,
  logo_url TEXT,
  title TEXT,
  subtitle TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    // Shared key-value entries (ledger counters, candidate cache)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS kv_entries (
  entry_key TEXT PRIMARY KEY,
  entry_value TEXT NOT NULL,
  expires_at_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_schedules_campaign ON schedules(campaign_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_schedules_ad_set ON schedules(ad_set_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_schedules_creative ON schedules(creative_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_schedules_window ON schedules(start_date, end_date);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
