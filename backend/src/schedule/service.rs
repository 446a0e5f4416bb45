use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::budget::BudgetLedger;
use crate::candidate::CandidateCache;
use crate::error::{AppError, Entity};
use crate::logger::with_timeout;
use crate::schedule::model::{Schedule, ScheduleId};
use crate::schedule::repository::{ScheduleRepository, VersionConflict};
use crate::schedule::request::{NewSchedule, ScheduleUpdateRequest};

/// Create and partial-update operations exposed to the ad platform.
///
/// Loading, validating and cache upkeep happen here; each write to the source
/// of record is a single repository call that runs in its own transaction.
pub struct ScheduleService {
    repo: Arc<dyn ScheduleRepository>,
    ledger: Arc<BudgetLedger>,
    cache: Arc<CandidateCache>,
    timeout: Duration,
}

impl ScheduleService {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        ledger: Arc<BudgetLedger>,
        cache: Arc<CandidateCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            ledger,
            cache,
            timeout,
        }
    }

    /// Stores every schedule or none, then seeds their ledger counters.
    #[instrument(skip(self, requests), target = "schedule", fields(count = requests.len()))]
    pub async fn create_schedules(&self, requests: Vec<NewSchedule>) -> Result<Vec<ScheduleId>, AppError> {
        for r in &requests {
            r.validate()?;
        }
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let created = with_timeout("repo_insert_all", self.timeout, self.repo.insert_all(&requests)).await?;

        for (s, r) in created.iter().zip(&requests) {
            self.ledger
                .seed(
                    s.id,
                    r.spent_total_budget.unwrap_or(0),
                    r.spent_daily_budget.unwrap_or(0),
                )
                .await?;
        }

        let ids: Vec<ScheduleId> = created.iter().map(|s| s.id).collect();
        info!(?ids, "schedules created");
        Ok(ids)
    }

    /// Applies each present part of `req` to every schedule sharing its id.
    #[instrument(skip(self, req), target = "schedule")]
    pub async fn update_schedules(&self, req: ScheduleUpdateRequest) -> Result<Vec<ScheduleId>, AppError> {
        if req.is_empty() {
            return Err(AppError::Validation("update request carries no changes".into()));
        }

        let updated = self.apply_updates(&req).await?;
        let saved = self.persist(&updated).await?;
        self.write_through(&saved).await;

        let ids: Vec<ScheduleId> = saved.iter().map(|s| s.id).collect();
        info!(?ids, "schedules updated");
        Ok(ids)
    }

    async fn apply_updates(&self, req: &ScheduleUpdateRequest) -> Result<Vec<Schedule>, AppError> {
        let mut targets: BTreeMap<ScheduleId, Schedule> = BTreeMap::new();

        if let Some(u) = &req.campaign {
            let found = with_timeout(
                "repo_find_by_campaign",
                self.timeout,
                self.repo.find_by_campaign_id(u.campaign_id),
            )
            .await?;
            collect_targets(&mut targets, found, Entity::Campaign, u.campaign_id)?;
        }
        if let Some(u) = &req.ad_set {
            let found = with_timeout(
                "repo_find_by_ad_set",
                self.timeout,
                self.repo.find_by_ad_set_id(u.ad_set_id),
            )
            .await?;
            collect_targets(&mut targets, found, Entity::AdSet, u.ad_set_id)?;
        }
        if let Some(u) = &req.creative {
            let found = with_timeout(
                "repo_find_by_creative",
                self.timeout,
                self.repo.find_by_creative_id(u.creative_id),
            )
            .await?;
            collect_targets(&mut targets, found, Entity::Creative, u.creative_id)?;
        }

        // budgets are validated against what has actually been spent
        let live = self
            .ledger
            .overlay_spend(targets.into_values().collect())
            .await?;

        let mut out = Vec::with_capacity(live.len());
        for mut s in live {
            if let Some(u) = req.campaign.as_ref().filter(|u| u.campaign_id == s.campaign.campaign_id) {
                s = s.apply_campaign_update(u)?;
            }
            if let Some(u) = req.ad_set.as_ref().filter(|u| u.ad_set_id == s.ad_set.ad_set_id) {
                s = s.apply_ad_set_update(u)?;
            }
            if let Some(u) = req.creative.as_ref().filter(|u| u.creative_id == s.creative.creative_id) {
                s = s.apply_creative_update(u);
            }
            out.push(s);
        }
        Ok(out)
    }

    async fn persist(&self, schedules: &[Schedule]) -> Result<Vec<Schedule>, AppError> {
        let saved = with_timeout("repo_update_all", self.timeout, self.repo.update_all(schedules)).await;
        saved.map_err(|e| {
            match e.downcast_ref::<VersionConflict>() {
                Some(conflict) => AppError::Conflict(conflict.to_string()),
                None => AppError::Unavailable(e),
            }
        })
    }

    /// Keeps cached copies in step with the saved rows. Failures only delay
    /// visibility until the next refresh.
    async fn write_through(&self, saved: &[Schedule]) {
        let cached = match self.cache.cached_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "cache unreadable; updates visible after next refresh");
                return;
            }
        };

        let (on, off): (Vec<Schedule>, Vec<Schedule>) = saved
            .iter()
            .filter(|s| cached.contains(&s.id))
            .cloned()
            .partition(|s| s.is_switched_on());

        if let Err(e) = self.cache.push_update(&on).await {
            warn!(error = %e, "failed to push updated schedules to cache");
        }
        let off_ids: Vec<ScheduleId> = off.iter().map(|s| s.id).collect();
        if let Err(e) = self.cache.evict(&off_ids).await {
            warn!(error = %e, "failed to evict switched-off schedules from cache");
        }
    }
}

fn collect_targets(
    targets: &mut BTreeMap<ScheduleId, Schedule>,
    found: Vec<Schedule>,
    entity: Entity,
    id: i64,
) -> Result<(), AppError> {
    if found.is_empty() {
        return Err(AppError::NotFound { entity, id });
    }
    for s in found {
        targets.entry(s.id).or_insert(s);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::model::Status;
    use crate::schedule::request::{AdSetUpdate, CampaignUpdate, CreativeUpdate};
    use crate::store::MemoryKvStore;
    use crate::testing::{
        HangingScheduleRepository, MockScheduleRepository, hm, mk_new_schedule, mk_schedule, today,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Harness {
        repo: Arc<MockScheduleRepository>,
        ledger: Arc<BudgetLedger>,
        cache: Arc<CandidateCache>,
        service: ScheduleService,
    }

    fn harness_with_repo(repo: Arc<MockScheduleRepository>, svc_repo: Arc<dyn ScheduleRepository>) -> Harness {
        let store = Arc::new(MemoryKvStore::new());
        let ledger = Arc::new(BudgetLedger::new(store.clone(), Duration::from_secs(1)));
        let cache = Arc::new(CandidateCache::new(
            store,
            repo.clone(),
            ledger.clone(),
            Duration::from_secs(360),
            Duration::from_secs(1),
        ));
        let service = ScheduleService::new(svc_repo, ledger.clone(), cache.clone(), Duration::from_secs(1));
        Harness {
            repo,
            ledger,
            cache,
            service,
        }
    }

    fn harness(rows: Vec<Schedule>) -> Harness {
        let repo = Arc::new(MockScheduleRepository::new(rows));
        harness_with_repo(repo.clone(), repo)
    }

    #[tokio::test]
    async fn create_stores_and_seeds_ledger() {
        let h = harness(vec![]);
        let mut req = mk_new_schedule(10, 20, 30);
        req.spent_total_budget = Some(300);
        req.spent_daily_budget = Some(100);

        let ids = h
            .service
            .create_schedules(vec![req, mk_new_schedule(10, 21, 31)])
            .await
            .unwrap();

        assert_eq!(ids, vec![1, 2]);
        let c = h.ledger.read_counters(1).await.unwrap();
        assert_eq!((c.spent_total, c.spent_daily), (300, 100));
        let c = h.ledger.read_counters(2).await.unwrap();
        assert_eq!((c.spent_total, c.spent_daily), (0, 0));
    }

    #[tokio::test]
    async fn invalid_batch_stores_nothing() {
        let h = harness(vec![]);
        let mut bad = mk_new_schedule(10, 21, 31);
        bad.start_time = hm(19, 0);

        let err = h
            .service
            .create_schedules(vec![mk_new_schedule(10, 20, 30), bad])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.repo.all().is_empty());
    }

    #[tokio::test]
    async fn ad_set_update_fans_out_to_every_sharing_schedule() {
        let h = harness(vec![
            mk_schedule(1, 10, 7, 100),
            mk_schedule(2, 11, 7, 100),
            mk_schedule(3, 12, 8, 100),
        ]);

        let ids = h
            .service
            .update_schedules(ScheduleUpdateRequest {
                ad_set: Some(AdSetUpdate {
                    ad_set_id: 7,
                    daily_budget: Some(800),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(ids, vec![1, 2]);
        let rows = h.repo.all();
        assert_eq!(rows[0].ad_set.daily_budget, 800);
        assert_eq!(rows[0].version, 2);
        assert_eq!(rows[1].ad_set.daily_budget, 800);
        assert_eq!(rows[2].ad_set.daily_budget, 500);
        assert_eq!(rows[2].version, 1);
    }

    #[tokio::test]
    async fn unknown_campaign_is_not_found() {
        let h = harness(vec![mk_schedule(1, 10, 20, 100)]);

        let err = h
            .service
            .update_schedules(ScheduleUpdateRequest {
                campaign: Some(CampaignUpdate {
                    campaign_id: 99,
                    total_budget: Some(5000),
                }),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::NotFound {
                entity: Entity::Campaign,
                id: 99
            }
        ));
    }

    #[tokio::test]
    async fn budget_below_live_spend_is_rejected() {
        let h = harness(vec![mk_schedule(1, 10, 20, 100)]);
        // the stored row still says 0 spent
        h.ledger.seed(1, 600, 300).await.unwrap();

        let err = h
            .service
            .update_schedules(ScheduleUpdateRequest {
                ad_set: Some(AdSetUpdate {
                    ad_set_id: 20,
                    daily_budget: Some(200),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.repo.all()[0].ad_set.daily_budget, 500);
        assert_eq!(h.repo.all()[0].version, 1);
    }

    #[tokio::test]
    async fn cached_schedules_see_updates_immediately() {
        let h = harness(vec![mk_schedule(1, 10, 20, 100), mk_schedule(2, 11, 21, 100)]);
        h.cache.refresh(today(), hm(10, 0)).await.unwrap();

        h.service
            .update_schedules(ScheduleUpdateRequest {
                creative: Some(CreativeUpdate {
                    creative_id: 1,
                    title: Some("summer sale".into()),
                    ..Default::default()
                }),
                ad_set: Some(AdSetUpdate {
                    ad_set_id: 21,
                    status: Some(Status::Off),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        let cached = h.cache.read().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, 1);
        assert_eq!(cached[0].creative.look.title.as_deref(), Some("summer sale"));
    }

    struct StaleRepository(Arc<MockScheduleRepository>);

    #[async_trait]
    impl ScheduleRepository for StaleRepository {
        async fn find_eligible(&self, today: NaiveDate) -> anyhow::Result<Vec<Schedule>> {
            self.0.find_eligible(today).await
        }
        async fn find_by_id(&self, id: ScheduleId) -> anyhow::Result<Option<Schedule>> {
            self.0.find_by_id(id).await
        }
        async fn find_by_campaign_id(&self, id: i64) -> anyhow::Result<Vec<Schedule>> {
            self.0.find_by_campaign_id(id).await
        }
        async fn find_by_ad_set_id(&self, id: i64) -> anyhow::Result<Vec<Schedule>> {
            self.0.find_by_ad_set_id(id).await
        }
        async fn find_by_creative_id(&self, id: i64) -> anyhow::Result<Vec<Schedule>> {
            // hand out a version someone else already bumped
            let mut rows = self.0.find_by_creative_id(id).await?;
            for r in &mut rows {
                r.version -= 1;
            }
            Ok(rows)
        }
        async fn insert_all(&self, s: &[NewSchedule]) -> anyhow::Result<Vec<Schedule>> {
            self.0.insert_all(s).await
        }
        async fn update_all(&self, s: &[Schedule]) -> anyhow::Result<Vec<Schedule>> {
            self.0.update_all(s).await
        }
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let repo = Arc::new(MockScheduleRepository::new(vec![mk_schedule(1, 10, 20, 100)]));
        let h = harness_with_repo(repo.clone(), Arc::new(StaleRepository(repo)));

        let err = h
            .service
            .update_schedules(ScheduleUpdateRequest {
                creative: Some(CreativeUpdate {
                    creative_id: 1,
                    landing_url: Some("https://example.com/new".into()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.repo.all()[0].creative.landing_url, "https://example.com/landing/1");
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let h = harness(vec![]);
        let err = h
            .service
            .update_schedules(ScheduleUpdateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_is_unavailable() {
        let repo = Arc::new(MockScheduleRepository::new(vec![mk_schedule(1, 10, 20, 100)]));
        let h = harness_with_repo(repo, Arc::new(HangingScheduleRepository));

        let err = h
            .service
            .update_schedules(ScheduleUpdateRequest {
                campaign: Some(CampaignUpdate {
                    campaign_id: 10,
                    total_budget: Some(5000),
                }),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));

        let err = h
            .service
            .create_schedules(vec![mk_new_schedule(10, 20, 30)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }
}
