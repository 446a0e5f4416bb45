use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::logger::with_timeout;
use crate::metrics::Counters;
use crate::schedule::model::{Schedule, ScheduleId};
use crate::store::{KeyNamespace, KvStore, parse_counter};

/// Pre-migration record that held both counters of a schedule in one JSON value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySpentBudgets {
    pub schedule_id: ScheduleId,
    #[serde(default)]
    pub spent_total_budget: i64,
    #[serde(default)]
    pub spent_daily_budget: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpentCounters {
    pub spent_total: i64,
    pub spent_daily: i64,
}

/// Authoritative spend counters, one total and one daily per schedule.
///
/// Each counter is charged with a single atomic increment in the shared store,
/// so concurrent charges from any number of replicas never lose an update.
/// The two counters are independent: a charge that lands on the total but
/// fails on the daily counter is reported, not rolled back.
pub struct BudgetLedger {
    store: Arc<dyn KvStore>,
    timeout: Duration,
    counters: Counters,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            counters: Counters::default(),
        }
    }

    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    /// Adds the schedule's unit cost to both counters exactly once.
    #[instrument(
        skip(self, schedule),
        target = "ledger",
        fields(schedule_id = schedule.id, unit_cost = schedule.ad_set.unit_cost)
    )]
    pub async fn charge_once(&self, schedule: &Schedule) -> Result<SpentCounters> {
        let id = schedule.id;
        let unit = schedule.ad_set.unit_cost;

        let spent_total = self
            .charge_counter(KeyNamespace::SpentTotalV1, id, unit, |l| l.spent_total_budget)
            .await?;

        let spent_daily = match self
            .charge_counter(KeyNamespace::SpentDailyV1, id, unit, |l| l.spent_daily_budget)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                error!(
                    schedule_id = id,
                    spent_total,
                    error = %e,
                    "daily counter charge failed after total was charged"
                );
                return Err(e);
            }
        };

        debug!(spent_total, spent_daily, "charged");
        Ok(SpentCounters {
            spent_total,
            spent_daily,
        })
    }

    async fn charge_counter(
        &self,
        ns: KeyNamespace,
        id: ScheduleId,
        unit: i64,
        from_legacy: fn(&LegacySpentBudgets) -> i64,
    ) -> Result<i64> {
        let key = ns.key(id);

        let existing = with_timeout("ledger_get", self.timeout, self.store.get(&key)).await?;
        if existing.is_none() {
            let initial = self
                .read_legacy(id)
                .await?
                .map(|l| from_legacy(&l))
                .unwrap_or(0);

            // losing the race just means another charger initialized first
            let won = with_timeout(
                "ledger_init",
                self.timeout,
                self.store.set_nx(&key, initial.to_string()),
            )
            .await?;
            if won {
                debug!(key = %key, initial, "initialized counter");
            }
        }

        with_timeout("ledger_incr", self.timeout, self.store.incr_by(&key, unit))
            .await
            .with_context(|| format!("charge {key}"))
    }

    /// Current spend without writing anything: versioned counter, else legacy record, else 0.
    pub async fn read_counters(&self, id: ScheduleId) -> Result<SpentCounters> {
        let total = self.read_versioned(KeyNamespace::SpentTotalV1, id).await?;
        let daily = self.read_versioned(KeyNamespace::SpentDailyV1, id).await?;

        let legacy = if total.is_none() || daily.is_none() {
            self.read_legacy(id).await?
        } else {
            None
        };
        let legacy = legacy.unwrap_or_default();

        Ok(SpentCounters {
            spent_total: total.unwrap_or(legacy.spent_total_budget),
            spent_daily: daily.unwrap_or(legacy.spent_daily_budget),
        })
    }

    /// Replaces the spend snapshot on each schedule with the ledger's current counters.
    pub async fn overlay_spend(&self, schedules: Vec<Schedule>) -> Result<Vec<Schedule>> {
        let reads = schedules.iter().map(|s| self.read_counters(s.id));
        let counters = futures::future::try_join_all(reads).await?;

        Ok(schedules
            .into_iter()
            .zip(counters)
            .map(|(s, c)| s.with_spend(c.spent_total, c.spent_daily))
            .collect())
    }

    async fn read_versioned(&self, ns: KeyNamespace, id: ScheduleId) -> Result<Option<i64>> {
        let key = ns.key(id);
        let raw = with_timeout("ledger_get", self.timeout, self.store.get(&key)).await?;

        raw.map(|r| parse_counter(&key, &r)).transpose()
    }

    /// An unparsable record counts as absent, the same way the migration skips it.
    async fn read_legacy(&self, id: ScheduleId) -> Result<Option<LegacySpentBudgets>> {
        let key = KeyNamespace::LegacySpentBudgets.key(id);
        let raw = with_timeout("ledger_legacy_get", self.timeout, self.store.get(&key)).await?;

        let Some(json) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                self.counters.legacy_malformed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "ignoring malformed legacy record");
                Ok(None)
            }
        }
    }

    /// Sets both counters unconditionally, e.g. when a schedule is created.
    #[instrument(skip(self), target = "ledger")]
    pub async fn seed(&self, id: ScheduleId, spent_total: i64, spent_daily: i64) -> Result<()> {
        let total_key = KeyNamespace::SpentTotalV1.key(id);
        let daily_key = KeyNamespace::SpentDailyV1.key(id);

        with_timeout(
            "ledger_seed",
            self.timeout,
            self.store.set(&total_key, spent_total.to_string(), None),
        )
        .await?;
        with_timeout(
            "ledger_seed",
            self.timeout,
            self.store.set(&daily_key, spent_daily.to_string(), None),
        )
        .await?;

        Ok(())
    }

    /// Zeroes the daily counter of every schedule the ledger knows about,
    /// including schedules that so far only have a legacy record.
    #[instrument(skip(self), target = "ledger")]
    pub async fn reset_daily(&self) -> Result<usize> {
        let mut ids = BTreeSet::new();

        for ns in [KeyNamespace::SpentDailyV1, KeyNamespace::LegacySpentBudgets] {
            let keys = with_timeout("ledger_scan", self.timeout, self.store.keys(ns.prefix())).await?;
            ids.extend(keys.iter().filter_map(|k| ns.parse_id(k)));
        }

        for id in &ids {
            let key = KeyNamespace::SpentDailyV1.key(*id);
            with_timeout(
                "ledger_reset",
                self.timeout,
                self.store.set(&key, "0".to_string(), None),
            )
            .await?;
        }

        info!(schedules = ids.len(), "daily spend reset");
        Ok(ids.len())
    }
}
