use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use rand::seq::SliceRandom;
use tracing::{Instrument, debug, info, warn};

use crate::budget::BudgetLedger;
use crate::candidate::{CandidateCache, filter_candidates};
use crate::error::AppError;
use crate::logger::{TraceId, annotate_span, serve_span, with_timeout};
use crate::metrics::Counters;
use crate::schedule::model::{Schedule, ServeEvent};
use crate::schedule::repository::ScheduleRepository;
use crate::serving::history::HistorySink;
use crate::serving::types::{ServePath, ServingAd};

/// Picks one servable ad per request and charges it.
pub struct AdSelector {
    cache: Arc<CandidateCache>,
    repo: Arc<dyn ScheduleRepository>,
    ledger: Arc<BudgetLedger>,
    history: Arc<dyn HistorySink>,
    counters: Counters,
    timeout: Duration,
}

impl AdSelector {
    pub fn new(
        cache: Arc<CandidateCache>,
        repo: Arc<dyn ScheduleRepository>,
        ledger: Arc<BudgetLedger>,
        history: Arc<dyn HistorySink>,
        counters: Counters,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            repo,
            ledger,
            history,
            counters,
            timeout,
        }
    }

    /// Serves one impression. `None` means nothing is servable right now.
    pub async fn serve(&self, today: NaiveDate, now: NaiveTime) -> Result<Option<ServingAd>, AppError> {
        self.serve_for_event(today, now, ServeEvent::Impression).await
    }

    pub async fn serve_for_event(
        &self,
        today: NaiveDate,
        now: NaiveTime,
        event: ServeEvent,
    ) -> Result<Option<ServingAd>, AppError> {
        let span = serve_span(&TraceId::default());
        self.serve_inner(today, now, event).instrument(span).await
    }

    async fn serve_inner(
        &self,
        today: NaiveDate,
        now: NaiveTime,
        event: ServeEvent,
    ) -> Result<Option<ServingAd>, AppError> {
        self.counters.serve_requests.fetch_add(1, Ordering::Relaxed);

        let cached = match self.cache.read().await {
            Ok(v) => v,
            Err(e) => {
                self.counters
                    .cache_read_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "candidate cache unreadable; falling back to source of record");
                Vec::new()
            }
        };

        let (chosen, path) = match pick(&filter_candidates(cached.clone(), now, event)) {
            Some(s) => (s, ServePath::Cache),
            None => match self.pick_from_source(today, now, event).await? {
                Some(s) => (s, ServePath::Fallback),
                None => {
                    self.counters.serve_not_found.fetch_add(1, Ordering::Relaxed);
                    info!(cached = cached.len(), "no servable schedule");
                    return Ok(None);
                }
            },
        };

        annotate_span(chosen.id, path.as_str());
        let path_hits = match path {
            ServePath::Cache => &self.counters.serve_cache_hits,
            ServePath::Fallback => &self.counters.serve_fallbacks,
        };
        path_hits.fetch_add(1, Ordering::Relaxed);

        if !chosen.has_chargeable_event(event) {
            self.counters.serve_served.fetch_add(1, Ordering::Relaxed);
            debug!(?event, payment_type = ?chosen.ad_set.payment_type, "serve is not billable");
            return Ok(Some(ServingAd::from_schedule(&chosen, path)));
        }

        let spent = self.ledger.charge_once(&chosen).await?;
        let chosen = chosen.with_spend(spent.spent_total, spent.spent_daily);

        let siblings = self.charge_siblings(&chosen, &cached, event).await?;
        self.counters
            .charges
            .fetch_add(1 + siblings.len() as u64, Ordering::Relaxed);

        // a fallback pick may still have a cached copy with stale spend
        let mut to_push = siblings;
        if cached.iter().any(|s| s.id == chosen.id) {
            to_push.push(chosen.clone());
        }
        if let Err(e) = self.cache.push_update(&to_push).await {
            self.counters
                .cache_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, entries = to_push.len(), "cache write-through failed");
        }

        if let Err(e) = self.history.record(&chosen) {
            warn!(error = %e, "history emission failed");
        }

        self.counters.serve_served.fetch_add(1, Ordering::Relaxed);
        info!(
            spent_total = chosen.campaign.spent_total_budget,
            spent_daily = chosen.ad_set.spent_daily_budget,
            "ad served"
        );
        Ok(Some(ServingAd::from_schedule(&chosen, path)))
    }

    /// Source-of-record fallback with live ledger spend overlaid before filtering.
    async fn pick_from_source(
        &self,
        today: NaiveDate,
        now: NaiveTime,
        event: ServeEvent,
    ) -> Result<Option<Schedule>, AppError> {
        let eligible = with_timeout(
            "repo_find_eligible",
            self.timeout,
            self.repo.find_eligible(today),
        )
        .await?;
        let live = self.ledger.overlay_spend(eligible).await?;

        Ok(pick(&filter_candidates(live, now, event)))
    }

    /// Charges every cached schedule sharing a campaign or ad set with `chosen`
    /// and returns them with their new spend.
    async fn charge_siblings(
        &self,
        chosen: &Schedule,
        cached: &[Schedule],
        event: ServeEvent,
    ) -> Result<Vec<Schedule>, AppError> {
        let mut due = Vec::new();
        for s in cached {
            if s.id == chosen.id || !s.shares_budget_with(chosen) {
                continue;
            }
            if !s.has_chargeable_event(event) {
                continue;
            }
            if !s.has_rest_budget(event) {
                self.counters.sibling_skips.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sibling_id = s.id,
                    spent_total = s.campaign.spent_total_budget,
                    spent_daily = s.ad_set.spent_daily_budget,
                    "sibling has no budget left; not charged"
                );
                continue;
            }
            due.push(s.clone());
        }

        let charges = due.into_iter().map(|s| async move {
            let spent = self.ledger.charge_once(&s).await?;
            Ok::<_, anyhow::Error>(s.with_spend(spent.spent_total, spent.spent_daily))
        });

        Ok(futures::future::try_join_all(charges).await?)
    }
}

fn pick(candidates: &[Schedule]) -> Option<Schedule> {
    candidates.choose(&mut rand::thread_rng()).cloned()
}
