//! Background timers: candidate refresh and the nightly budget reset.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::budget::BudgetLedger;
use crate::candidate::CandidateCache;
use crate::time::{local_today_and_now, until_next_midnight};

/// Rebuilds the candidate cache at a fixed rate, starting one interval from now.
pub fn spawn_candidate_refresh(cache: Arc<CandidateCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let (today, now) = local_today_and_now();
            if let Err(e) = cache.refresh(today, now).await {
                // previous generation stays live until its TTL runs out
                error!(error = ?e, "candidate refresh failed");
            }
        }
    })
}

/// Zeroes daily spend at every local midnight.
pub fn spawn_daily_reset(ledger: Arc<BudgetLedger>, cache: Arc<CandidateCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_midnight(Local::now().naive_local());
            info!(wait_secs = wait.as_secs(), "next daily budget reset scheduled");
            tokio::time::sleep(wait).await;

            if let Err(e) = reset_daily_budgets(&ledger, &cache).await {
                error!(error = ?e, "daily budget reset failed");
            }

            // step past midnight before computing the next wait
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

/// Ledger first: the cache only mirrors it, and a failed cache rewrite heals on the next refresh.
pub async fn reset_daily_budgets(ledger: &BudgetLedger, cache: &CandidateCache) -> anyhow::Result<()> {
    let counters = ledger.reset_daily().await?;
    let entries = cache.reset_daily_spend_in_cache().await?;

    info!(counters, entries, "daily budgets reset");
    Ok(())
}
