use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string. Holds both the schedule rows and the
    /// shared key-value entries (ledger counters, candidate cache).
    pub database_url: String,

    /// Emit JSON logs instead of pretty output.
    pub json_logs: bool,

    // =========================
    // Candidate cache
    // =========================
    /// How often the candidate cache is rebuilt from the source of record.
    pub candidate_refresh_interval: Duration,

    /// Lifetime of a published candidate entry.
    ///
    /// Must exceed `candidate_refresh_interval` so that a new refresh lands
    /// before the previous generation expires.
    pub candidate_ttl: Duration,

    // =========================
    // Remote calls
    // =========================
    /// Upper bound for any single key-value or repository round trip.
    pub store_timeout: Duration,

    /// Keys scanned per page by the legacy budget migration.
    pub migration_batch_size: usize,

    // =========================
    // Serving history
    // =========================
    /// Capacity of the queue between serve requests and the history forwarder.
    /// Records are dropped, never awaited, once it is full.
    pub history_queue_capacity: usize,

    /// Platform endpoint receiving serving history. Logged locally when unset.
    pub history_endpoint: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://adserve_dev.db?mode=rwc".to_string());

        let json_logs = std::env::var("APP_ENV").unwrap_or_default() == "production";

        Self {
            database_url,
            json_logs,

            // refresh every 5 minutes, keep entries for 6
            candidate_refresh_interval: Duration::from_secs(env_u64("CANDIDATE_REFRESH_SECS", 300)),
            candidate_ttl: Duration::from_secs(env_u64("CANDIDATE_TTL_SECS", 360)),

            store_timeout: Duration::from_millis(env_u64("STORE_TIMEOUT_MS", 500)),
            migration_batch_size: env_u64("MIGRATION_BATCH_SIZE", 100) as usize,

            history_queue_capacity: env_u64("HISTORY_QUEUE_CAPACITY", 1024) as usize,
            history_endpoint: std::env::var("HISTORY_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.candidate_ttl <= self.candidate_refresh_interval {
            anyhow::bail!(
                "candidate ttl ({:?}) must exceed the refresh interval ({:?})",
                self.candidate_ttl,
                self.candidate_refresh_interval
            );
        }
        if self.migration_batch_size == 0 {
            anyhow::bail!("migration batch size must be positive");
        }
        if self.history_queue_capacity == 0 {
            anyhow::bail!("history queue capacity must be positive");
        }
        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, default, "unparsable config value; using default");
            default
        }),
        Err(_) => default,
    }
}
