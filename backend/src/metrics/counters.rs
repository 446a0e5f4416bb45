use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub serve_requests: Arc<AtomicU64>,
    pub serve_served: Arc<AtomicU64>,
    pub serve_not_found: Arc<AtomicU64>,

    // where the chosen ad came from
    pub serve_cache_hits: Arc<AtomicU64>,
    pub serve_fallbacks: Arc<AtomicU64>,

    pub charges: Arc<AtomicU64>,
    pub sibling_skips: Arc<AtomicU64>,
    pub legacy_malformed: Arc<AtomicU64>,

    // degraded paths
    pub cache_read_failures: Arc<AtomicU64>,
    pub cache_write_failures: Arc<AtomicU64>,
    pub history_dropped: Arc<AtomicU64>,
}
