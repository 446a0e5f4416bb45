use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::budget::ledger::LegacySpentBudgets;
use crate::logger::with_timeout;
use crate::store::{KeyNamespace, KvStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub scanned: usize,
    /// Versioned counters written by this run; counters that already existed are left alone.
    pub initialized: usize,
    pub malformed: usize,
}

/// Copies every legacy spend record into the versioned counters.
///
/// Counters are only created where absent, so running this again, or
/// concurrently with live charges, never overwrites newer spend. Each store
/// call is bounded by `timeout`.
#[instrument(skip(store), target = "migration")]
pub async fn migrate_legacy_budgets(
    store: &dyn KvStore,
    batch_size: usize,
    timeout: Duration,
) -> Result<MigrationReport> {
    let ns = KeyNamespace::LegacySpentBudgets;
    let mut report = MigrationReport::default();
    let mut cursor: Option<String> = None;

    loop {
        let page = with_timeout(
            "migration_scan",
            timeout,
            store.scan_prefix(ns.prefix(), cursor.as_deref(), batch_size),
        )
        .await?;

        for key in &page {
            report.scanned += 1;

            let Some(id) = ns.parse_id(key) else {
                warn!(key = %key, "legacy key without a schedule id");
                report.malformed += 1;
                continue;
            };

            // the record may have been removed since the scan
            let Some(raw) = with_timeout("migration_get", timeout, store.get(key)).await? else {
                continue;
            };

            let legacy: LegacySpentBudgets = match serde_json::from_str(&raw) {
                Ok(l) => l,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping malformed legacy record");
                    report.malformed += 1;
                    continue;
                }
            };

            let pairs = [
                (KeyNamespace::SpentTotalV1, legacy.spent_total_budget),
                (KeyNamespace::SpentDailyV1, legacy.spent_daily_budget),
            ];
            for (target, value) in pairs {
                let target_key = target.key(id);
                let init = store.set_nx(&target_key, value.to_string());
                if with_timeout("migration_init", timeout, init).await? {
                    report.initialized += 1;
                }
            }
        }

        if page.len() < batch_size {
            break;
        }
        cursor = page.last().cloned();
    }

    info!(
        scanned = report.scanned,
        initialized = report.initialized,
        malformed = report.malformed,
        "legacy budget migration finished"
    );
    Ok(report)
}
