use std::time::Duration;

use anyhow::anyhow;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::metrics::Counters;
use crate::schedule::model::{PaymentType, Schedule, ScheduleId};
use crate::time::now_ms;

/// Receives one record per served ad. Must not block the serving path.
pub trait HistorySink: Send + Sync {
    fn record(&self, schedule: &Schedule) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub schedule_id: ScheduleId,
    pub campaign_id: i64,
    pub ad_set_id: i64,
    pub creative_id: i64,
    pub payment_type: PaymentType,
    pub unit_cost: i64,
    pub spent_total_budget: i64,
    pub spent_daily_budget: i64,
    pub served_at_ms: u64,
}

impl HistoryRecord {
    pub fn new(s: &Schedule, served_at_ms: u64) -> Self {
        Self {
            schedule_id: s.id,
            campaign_id: s.campaign.campaign_id,
            ad_set_id: s.ad_set.ad_set_id,
            creative_id: s.creative.creative_id,
            payment_type: s.ad_set.payment_type,
            unit_cost: s.ad_set.unit_cost,
            spent_total_budget: s.campaign.spent_total_budget,
            spent_daily_budget: s.ad_set.spent_daily_budget,
            served_at_ms,
        }
    }
}

/// Bounded queue in front of the forwarder. Full queue drops the record.
pub struct ChannelHistorySink {
    tx: mpsc::Sender<HistoryRecord>,
    counters: Counters,
}

impl ChannelHistorySink {
    pub fn channel(capacity: usize, counters: Counters) -> (Self, mpsc::Receiver<HistoryRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, counters }, rx)
    }
}

impl HistorySink for ChannelHistorySink {
    fn record(&self, schedule: &Schedule) -> anyhow::Result<()> {
        match self.tx.try_send(HistoryRecord::new(schedule, now_ms())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(rec)) => {
                self.counters
                    .history_dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Err(anyhow!("history queue full; dropped schedule {}", rec.schedule_id))
            }
            Err(TrySendError::Closed(_)) => Err(anyhow!("history forwarder stopped")),
        }
    }
}

#[derive(Clone)]
pub struct HistoryClient {
    http: Client,
    url: String,
}

impl HistoryClient {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, url })
    }

    #[instrument(skip(self, record), fields(schedule_id = record.schedule_id), level = "debug")]
    pub async fn post(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        self.http
            .post(&self.url)
            .json(record)
            .send()
            .await?
            .error_for_status()?;

        debug!("history record forwarded");
        Ok(())
    }
}

/// Drains the history queue until every sender is gone.
///
/// Records are posted to `client` when one is configured and logged otherwise.
/// Delivery failures are logged and the record is dropped.
pub fn spawn_history_forwarder(
    mut rx: mpsc::Receiver<HistoryRecord>,
    client: Option<HistoryClient>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            match &client {
                Some(c) => {
                    if let Err(e) = c.post(&record).await {
                        warn!(
                            target: "history",
                            schedule_id = record.schedule_id,
                            error = %e,
                            "failed to forward history record"
                        );
                    }
                }
                None => {
                    info!(
                        target: "history",
                        schedule_id = record.schedule_id,
                        campaign_id = record.campaign_id,
                        ad_set_id = record.ad_set_id,
                        spent_total = record.spent_total_budget,
                        spent_daily = record.spent_daily_budget,
                        "ad served"
                    );
                }
            }
        }
        info!(target: "history", "history forwarder stopped");
    })
}
