use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use adserve::budget::{BudgetLedger, migrate_legacy_budgets};
use adserve::candidate::CandidateCache;
use adserve::db::Db;
use adserve::jobs::reset_daily_budgets;
use adserve::metrics::Counters;
use adserve::schedule::model::{Look, PaymentType, Schedule, Status};
use adserve::schedule::request::{AdSetUpdate, NewSchedule, ScheduleUpdateRequest};
use adserve::schedule::{ScheduleRepository, ScheduleService, SqlxScheduleRepository};
use adserve::serving::{AdSelector, ChannelHistorySink, ServePath};
use adserve::store::{KeyNamespace, KvStore, SqlxKvStore};

struct App {
    store: Arc<dyn KvStore>,
    ledger: Arc<BudgetLedger>,
    cache: Arc<CandidateCache>,
    service: ScheduleService,
    selector: AdSelector,
    counters: Counters,
    history_rx: tokio::sync::mpsc::Receiver<adserve::serving::HistoryRecord>,
}

async fn setup_app() -> App {
    let db_name = Uuid::new_v4().to_string();
    let db = Db::connect(&format!("sqlite:file:{}?mode=memory&cache=shared", db_name))
        .await
        .unwrap();
    db.migrate().await.unwrap();

    let timeout = Duration::from_secs(2);
    let store: Arc<dyn KvStore> = Arc::new(SqlxKvStore::new(db.pool.clone()));
    let repo: Arc<dyn ScheduleRepository> = Arc::new(SqlxScheduleRepository::new(db.pool.clone()));
    let ledger = Arc::new(BudgetLedger::new(store.clone(), timeout));
    let cache = Arc::new(CandidateCache::new(
        store.clone(),
        repo.clone(),
        ledger.clone(),
        Duration::from_secs(360),
        timeout,
    ));

    let counters = Counters::default();
    let (history, history_rx) = ChannelHistorySink::channel(64, counters.clone());

    let selector = AdSelector::new(
        cache.clone(),
        repo.clone(),
        ledger.clone(),
        Arc::new(history),
        counters.clone(),
        timeout,
    );
    let service = ScheduleService::new(repo, ledger.clone(), cache.clone(), timeout);

    App {
        store,
        ledger,
        cache,
        service,
        selector,
        counters,
        history_rx,
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
}

fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn new_schedule(campaign_id: i64, ad_set_id: i64, creative_id: i64, unit_cost: i64) -> NewSchedule {
    NewSchedule {
        campaign_id,
        ad_set_id,
        creative_id,
        start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        start_time: at(9, 0),
        end_time: at(18, 0),
        total_budget: 1000,
        spent_total_budget: None,
        daily_budget: 500,
        spent_daily_budget: None,
        payment_type: PaymentType::Cpm,
        unit_cost,
        ad_set_status: Status::On,
        creative_status: Status::On,
        landing_url: format!("https://example.com/{creative_id}"),
        look: Look {
            title: Some(format!("creative {creative_id}")),
            ..Default::default()
        },
    }
}

fn by_id(mut v: Vec<Schedule>) -> Vec<Schedule> {
    v.sort_by_key(|s| s.id);
    v
}

#[tokio::test]
async fn serve_until_daily_cap_then_reset() {
    let mut app = setup_app().await;
    let ids = app
        .service
        .create_schedules(vec![new_schedule(1, 1, 1, 100)])
        .await
        .unwrap();
    let id = ids[0];

    app.cache.refresh(today(), at(10, 0)).await.unwrap();

    let first = app.selector.serve(today(), at(10, 0)).await.unwrap().unwrap();
    assert_eq!(first.schedule_id, id);
    assert_eq!(first.path, ServePath::Cache);
    assert_eq!((first.spent_total_budget, first.spent_daily_budget), (100, 100));
    assert_eq!(first.look.title.as_deref(), Some("creative 1"));

    for _ in 0..4 {
        app.selector.serve(today(), at(10, 0)).await.unwrap().unwrap();
    }
    assert!(app.selector.serve(today(), at(10, 0)).await.unwrap().is_none());

    let c = app.ledger.read_counters(id).await.unwrap();
    assert_eq!((c.spent_total, c.spent_daily), (500, 500));
    assert_eq!(app.counters.serve_served.load(Ordering::Relaxed), 5);
    assert_eq!(app.counters.serve_not_found.load(Ordering::Relaxed), 1);

    let mut recorded = 0;
    while app.history_rx.try_recv().is_ok() {
        recorded += 1;
    }
    assert_eq!(recorded, 5);

    reset_daily_budgets(&app.ledger, &app.cache).await.unwrap();

    let c = app.ledger.read_counters(id).await.unwrap();
    assert_eq!((c.spent_total, c.spent_daily), (500, 0));

    let again = app.selector.serve(today(), at(10, 0)).await.unwrap().unwrap();
    assert_eq!((again.spent_total_budget, again.spent_daily_budget), (600, 100));
}

#[tokio::test]
async fn sibling_in_same_ad_set_is_charged_and_cached() {
    let app = setup_app().await;
    app.service
        .create_schedules(vec![new_schedule(1, 7, 1, 100), new_schedule(2, 7, 2, 40)])
        .await
        .unwrap();
    app.cache.refresh(today(), at(12, 0)).await.unwrap();

    app.selector.serve(today(), at(12, 0)).await.unwrap().unwrap();

    let cached = by_id(app.cache.read().await.unwrap());
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].ad_set.spent_daily_budget, 100);
    assert_eq!(cached[1].ad_set.spent_daily_budget, 40);
}

#[tokio::test]
async fn out_of_window_source_yields_nothing() {
    let app = setup_app().await;
    app.service
        .create_schedules(vec![new_schedule(1, 1, 1, 100)])
        .await
        .unwrap();

    assert!(app.selector.serve(today(), at(8, 59)).await.unwrap().is_none());
    assert!(app.selector.serve(today(), at(18, 1)).await.unwrap().is_none());

    let ad = app.selector.serve(today(), at(18, 0)).await.unwrap().unwrap();
    assert_eq!(ad.path, ServePath::Fallback);
}

#[tokio::test]
async fn legacy_spend_carries_into_first_charge() {
    let app = setup_app().await;
    let ids = app
        .service
        .create_schedules(vec![new_schedule(1, 1, 1, 100)])
        .await
        .unwrap();
    let id = ids[0];

    // simulate a schedule whose counters predate the versioned keys
    app.store
        .delete(&[
            KeyNamespace::SpentTotalV1.key(id),
            KeyNamespace::SpentDailyV1.key(id),
        ])
        .await
        .unwrap();
    app.store
        .set(
            &KeyNamespace::LegacySpentBudgets.key(id),
            format!(r#"{{"scheduleId":{id},"spentTotalBudget":300,"spentDailyBudget":200}}"#),
            None,
        )
        .await
        .unwrap();

    let c = app.ledger.read_counters(id).await.unwrap();
    assert_eq!((c.spent_total, c.spent_daily), (300, 200));

    let report = migrate_legacy_budgets(app.store.as_ref(), 10, Duration::from_secs(2)).await.unwrap();
    assert_eq!(report.initialized, 2);

    let ad = app.selector.serve(today(), at(10, 0)).await.unwrap().unwrap();
    assert_eq!((ad.spent_total_budget, ad.spent_daily_budget), (400, 300));
}

#[tokio::test]
async fn update_below_spent_is_rejected_with_live_spend() {
    let app = setup_app().await;
    app.service
        .create_schedules(vec![new_schedule(1, 9, 1, 100)])
        .await
        .unwrap();

    for _ in 0..3 {
        app.selector.serve(today(), at(10, 0)).await.unwrap().unwrap();
    }

    let rejected = app
        .service
        .update_schedules(ScheduleUpdateRequest {
            ad_set: Some(AdSetUpdate {
                ad_set_id: 9,
                daily_budget: Some(250),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await;
    assert!(rejected.is_err());

    let ids = app
        .service
        .update_schedules(ScheduleUpdateRequest {
            ad_set: Some(AdSetUpdate {
                ad_set_id: 9,
                daily_budget: Some(300),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    // 300 spent of 300 left nothing for another charge
    assert!(app.selector.serve(today(), at(10, 0)).await.unwrap().is_none());
}
