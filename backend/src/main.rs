use std::sync::Arc;
use std::sync::atomic::Ordering;

use adserve::{
    budget::{BudgetLedger, migrate_legacy_budgets},
    candidate::CandidateCache,
    config::AppConfig,
    db::Db,
    jobs::{spawn_candidate_refresh, spawn_daily_reset},
    logger::init_tracing,
    metrics::counters::Counters,
    schedule::{ScheduleRepository, ScheduleService, SqlxScheduleRepository},
    serving::{AdSelector, ChannelHistorySink, HistoryClient, spawn_history_forwarder},
    store::{KvStore, SqlxKvStore},
    time::local_today_and_now,
};

/// Connects, migrates the schema and copies legacy spend records into the versioned counters.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let store = SqlxKvStore::new(db.pool.clone());
    migrate_legacy_budgets(&store, cfg.migration_batch_size, cfg.store_timeout).await?;

    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_tracing(cfg.json_logs);
    cfg.validate()?;

    tracing::info!("Starting adserve backend...");

    let db = init_store(&cfg).await?;

    let store: Arc<dyn KvStore> = Arc::new(SqlxKvStore::new(db.pool.clone()));
    let repo: Arc<dyn ScheduleRepository> = Arc::new(SqlxScheduleRepository::new(db.pool.clone()));
    let counters = Counters::default();
    let ledger = Arc::new(
        BudgetLedger::new(store.clone(), cfg.store_timeout).with_counters(counters.clone()),
    );
    let cache = Arc::new(CandidateCache::new(
        store,
        repo.clone(),
        ledger.clone(),
        cfg.candidate_ttl,
        cfg.store_timeout,
    ));

    let (history, history_rx) =
        ChannelHistorySink::channel(cfg.history_queue_capacity, counters.clone());
    let history_client = match &cfg.history_endpoint {
        Some(url) => Some(HistoryClient::new(url.clone(), cfg.store_timeout)?),
        None => None,
    };
    spawn_history_forwarder(history_rx, history_client);

    // serve from a warm cache as soon as the process is up
    let (today, now) = local_today_and_now();
    if let Err(e) = cache.refresh(today, now).await {
        tracing::warn!(error = ?e, "initial candidate refresh failed; serving via fallback");
    }

    spawn_candidate_refresh(cache.clone(), cfg.candidate_refresh_interval);
    spawn_daily_reset(ledger.clone(), cache.clone());

    // held for the transport layer, which lives outside this crate
    let _selector = AdSelector::new(
        cache.clone(),
        repo.clone(),
        ledger.clone(),
        Arc::new(history),
        counters.clone(),
        cfg.store_timeout,
    );
    let _schedules = ScheduleService::new(repo, ledger, cache, cfg.store_timeout);

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        served = counters.serve_served.load(Ordering::Relaxed),
        not_found = counters.serve_not_found.load(Ordering::Relaxed),
        "Shutdown signal received"
    );

    Ok(())
}
