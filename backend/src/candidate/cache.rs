use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::budget::BudgetLedger;
use crate::logger::{warn_if_slow, with_timeout};
use crate::schedule::model::{Schedule, ScheduleId, ServeEvent};
use crate::schedule::repository::ScheduleRepository;
use crate::store::{KeyNamespace, KvStore};

pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Stored shape of one candidate entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCandidate {
    pub schema_version: u32,
    pub schedule: Schedule,
}

impl CachedCandidate {
    fn encode(schedule: &Schedule) -> Result<String> {
        let envelope = CachedCandidate {
            schema_version: CACHE_SCHEMA_VERSION,
            schedule: schedule.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Keeps schedules that can take this serve right now.
pub fn filter_candidates(schedules: Vec<Schedule>, now: NaiveTime, event: ServeEvent) -> Vec<Schedule> {
    schedules
        .into_iter()
        .filter(|s| s.is_servable(now, event))
        .collect()
}

/// Short-lived snapshot of servable schedules in the shared store.
///
/// Entries carry the ledger spend as of the last refresh or push and may lag
/// the ledger in between. The ledger stays the authority for charging.
pub struct CandidateCache {
    store: Arc<dyn KvStore>,
    repo: Arc<dyn ScheduleRepository>,
    ledger: Arc<BudgetLedger>,
    ttl: Duration,
    timeout: Duration,
}

impl CandidateCache {
    pub fn new(
        store: Arc<dyn KvStore>,
        repo: Arc<dyn ScheduleRepository>,
        ledger: Arc<BudgetLedger>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            repo,
            ledger,
            ttl,
            timeout,
        }
    }

    /// Rebuilds the cache from the source of record and returns the published ids.
    #[instrument(skip(self), target = "cache")]
    pub async fn refresh(&self, today: NaiveDate, now: NaiveTime) -> Result<Vec<ScheduleId>> {
        let eligible = warn_if_slow(
            "repo_find_eligible",
            Duration::from_millis(200),
            with_timeout("repo_find_eligible", self.timeout, self.repo.find_eligible(today)),
        )
        .await
        .context("load eligible schedules")?;

        let fetched = eligible.len();
        let live = self.ledger.overlay_spend(eligible).await?;
        let candidates = filter_candidates(live, now, ServeEvent::Impression);

        self.publish(&candidates).await?;

        let keep: HashSet<ScheduleId> = candidates.iter().map(|s| s.id).collect();
        let stale: Vec<String> = self
            .cached_keys()
            .await?
            .into_iter()
            .filter(|k| {
                KeyNamespace::CandidateV1
                    .parse_id(k)
                    .is_none_or(|id| !keep.contains(&id))
            })
            .collect();

        let removed = if stale.is_empty() {
            0
        } else {
            with_timeout("cache_delete", self.timeout, self.store.delete(&stale)).await?
        };

        info!(
            fetched,
            published = candidates.len(),
            removed,
            "candidate cache refreshed"
        );
        Ok(candidates.iter().map(|s| s.id).collect())
    }

    /// Every live cached schedule.
    #[instrument(skip(self), target = "cache")]
    pub async fn read(&self) -> Result<Vec<Schedule>> {
        let keys = self.cached_keys().await?;

        let reads = keys.iter().map(|k| async move {
            let raw = with_timeout("cache_get", self.timeout, self.store.get(k)).await?;
            Ok::<_, anyhow::Error>((k, raw))
        });
        let entries = futures::future::try_join_all(reads).await?;

        let mut out = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            // expired between scan and get
            let Some(raw) = raw else { continue };

            match serde_json::from_str::<CachedCandidate>(&raw) {
                Ok(c) if c.schema_version == CACHE_SCHEMA_VERSION => out.push(c.schedule),
                Ok(c) => {
                    warn!(key = %key, schema_version = c.schema_version, "ignoring cache entry with foreign schema");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring malformed cache entry");
                }
            }
        }

        debug!(count = out.len(), "cache read");
        Ok(out)
    }

    /// Overwrites the entries for exactly these schedules with a fresh TTL.
    pub async fn push_update(&self, schedules: &[Schedule]) -> Result<()> {
        self.publish(schedules).await
    }

    /// Zeroes daily spend on every live entry. Expired entries stay expired.
    #[instrument(skip(self), target = "cache")]
    pub async fn reset_daily_spend_in_cache(&self) -> Result<usize> {
        let cached = self.read().await?;
        let mut rewritten = 0;

        for s in cached {
            let id = s.id;
            let total = s.campaign.spent_total_budget;
            let value = CachedCandidate::encode(&s.with_spend(total, 0))?;

            let replaced = with_timeout(
                "cache_replace",
                self.timeout,
                self.store.replace_keep_ttl(&KeyNamespace::CandidateV1.key(id), value),
            )
            .await?;
            if replaced {
                rewritten += 1;
            }
        }

        info!(rewritten, "cached daily spend reset");
        Ok(rewritten)
    }

    /// Drops the entries for these schedules.
    pub async fn evict(&self, ids: &[ScheduleId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = ids.iter().map(|id| KeyNamespace::CandidateV1.key(*id)).collect();
        with_timeout("cache_delete", self.timeout, self.store.delete(&keys)).await
    }

    /// Ids of every live cached entry.
    pub async fn cached_ids(&self) -> Result<HashSet<ScheduleId>> {
        Ok(self
            .cached_keys()
            .await?
            .iter()
            .filter_map(|k| KeyNamespace::CandidateV1.parse_id(k))
            .collect())
    }

    async fn cached_keys(&self) -> Result<Vec<String>> {
        with_timeout(
            "cache_scan",
            self.timeout,
            self.store.keys(KeyNamespace::CandidateV1.prefix()),
        )
        .await
    }

    async fn publish(&self, schedules: &[Schedule]) -> Result<()> {
        let writes = schedules.iter().map(|s| async move {
            let value = CachedCandidate::encode(s)?;
            with_timeout(
                "cache_set",
                self.timeout,
                self.store
                    .set(&KeyNamespace::CandidateV1.key(s.id), value, Some(self.ttl)),
            )
            .await
        });
        futures::future::try_join_all(writes).await?;
        Ok(())
    }
}
