use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::store::{KvStore, parse_counter};
use crate::time::now_ms;

/// KvStore over the `kv_entries` table, shared by every replica pointed at the same database.
///
/// Expired rows are treated as absent by every read and overwritten in place by writers.
pub struct SqlxKvStore {
    pool: AnyPool,
}

impl SqlxKvStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn now_i64() -> i64 {
    i64::try_from(now_ms()).unwrap_or(i64::MAX)
}

fn expiry_ms(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| {
        let ttl_ms = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        now_i64().saturating_add(ttl_ms)
    })
}

#[async_trait]
impl KvStore for SqlxKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            r#"
SELECT entry_value FROM kv_entries
WHERE entry_key = ? AND (expires_at_ms IS NULL OR expires_at_ms > ?);
"#,
        )
        .bind(key)
        .bind(now_i64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_get("entry_value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO kv_entries (entry_key, entry_value, expires_at_ms)
VALUES (?, ?, ?)
ON CONFLICT(entry_key) DO UPDATE SET
  entry_value = excluded.entry_value,
  expires_at_ms = excluded.expires_at_ms;
"#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_ms(ttl))
        .execute(&self.pool)
        .await
        .with_context(|| format!("set {key}"))?;

        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> anyhow::Result<bool> {
        // the conflict branch only fires over an expired row
        let result = sqlx::query(
            r#"
INSERT INTO kv_entries (entry_key, entry_value, expires_at_ms)
VALUES (?, ?, NULL)
ON CONFLICT(entry_key) DO UPDATE SET
  entry_value = excluded.entry_value,
  expires_at_ms = NULL
WHERE kv_entries.expires_at_ms IS NOT NULL AND kv_entries.expires_at_ms <= ?;
"#,
        )
        .bind(key)
        .bind(value)
        .bind(now_i64())
        .execute(&self.pool)
        .await
        .with_context(|| format!("set_nx {key}"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
        let now = now_i64();
        let row = sqlx::query(
            r#"
INSERT INTO kv_entries (entry_key, entry_value, expires_at_ms)
VALUES (?, ?, NULL)
ON CONFLICT(entry_key) DO UPDATE SET
  entry_value = CASE
    WHEN kv_entries.expires_at_ms IS NOT NULL AND kv_entries.expires_at_ms <= ? THEN excluded.entry_value
    ELSE CAST(CAST(kv_entries.entry_value AS BIGINT) + ? AS TEXT)
  END,
  expires_at_ms = CASE
    WHEN kv_entries.expires_at_ms IS NOT NULL AND kv_entries.expires_at_ms <= ? THEN NULL
    ELSE kv_entries.expires_at_ms
  END
RETURNING entry_value;
"#,
        )
        .bind(key)
        .bind(delta.to_string())
        .bind(now)
        .bind(delta)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("incr_by {key}"))?;

        let raw: String = row.try_get("entry_value")?;
        parse_counter(key, &raw)
    }

    async fn replace_keep_ttl(&self, key: &str, value: String) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
UPDATE kv_entries SET entry_value = ?
WHERE entry_key = ? AND (expires_at_ms IS NULL OR expires_at_ms > ?);
"#,
        )
        .bind(value)
        .bind(key)
        .bind(now_i64())
        .execute(&self.pool)
        .await
        .with_context(|| format!("replace {key}"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let now = now_i64();
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for key in keys {
            let live = sqlx::query(
                "DELETE FROM kv_entries WHERE entry_key = ? AND (expires_at_ms IS NULL OR expires_at_ms > ?);",
            )
            .bind(key.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            removed += live.rows_affected();

            // expired leftovers
            sqlx::query("DELETE FROM kv_entries WHERE entry_key = ?;")
                .bind(key.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
SELECT entry_key FROM kv_entries
WHERE substr(entry_key, 1, ?) = ?
  AND entry_key > ?
  AND (expires_at_ms IS NULL OR expires_at_ms > ?)
ORDER BY entry_key
LIMIT ?;
"#,
        )
        .bind(i64::try_from(prefix.len())?)
        .bind(prefix)
        .bind(after.unwrap_or(""))
        .bind(now_i64())
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("entry_key").map_err(Into::into))
            .collect()
    }
}
