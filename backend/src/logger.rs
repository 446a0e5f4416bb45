use std::future::Future;
use std::time::Duration;

use tracing::{Span, field};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

/// Correlation id attached to every serve request.
#[derive(Clone, Debug)]
pub struct TraceId(String);

impl TraceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        // Includes timing when the span closes
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .init();
    }
}

/// Root span of one serve request. `schedule_id` is recorded once an ad is chosen.
pub fn serve_span(trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "serve",
        trace_id = %trace_id.as_str(),
        schedule_id = field::Empty,
        path = field::Empty
    )
}

pub fn annotate_span(schedule_id: i64, path: &'static str) {
    let span = Span::current();
    span.record("schedule_id", schedule_id);
    span.record("path", path);
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

/// Bounds a remote call. A call still pending after `max` fails instead of blocking the caller.
pub async fn with_timeout<F, T>(label: &'static str, max: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(max, fut).await {
        Ok(out) => out,
        Err(_) => {
            tracing::warn!(
                target: "performance",
                label = label,
                timeout_ms = max.as_millis() as u64,
                "remote call timed out"
            );
            Err(anyhow::anyhow!(
                "{label} timed out after {}ms",
                max.as_millis()
            ))
        }
    }
}
