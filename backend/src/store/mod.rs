//! Shared key-value store holding the budget counters and the candidate cache.
//!
//! Every serving replica talks to the same store; the only atomic primitives
//! the rest of the crate relies on are [`KvStore::set_nx`] and
//! [`KvStore::incr_by`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub mod keys;
pub mod kv_memory;
pub mod kv_sqlx;

pub use keys::KeyNamespace;
pub use kv_memory::MemoryKvStore;
pub use kv_sqlx::SqlxKvStore;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value under `key`, or None if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write. `ttl: None` keeps the entry until overwritten or deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Writes only if no live entry exists. Returns true if this call wrote.
    async fn set_nx(&self, key: &str, value: String) -> Result<bool>;

    /// Atomically adds `delta` to the integer under `key` (missing counts as 0)
    /// and returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Overwrites a live entry keeping its expiry. Returns false if there was none.
    async fn replace_keep_ttl(&self, key: &str, value: String) -> Result<bool>;

    /// Removes the given keys and returns how many were present.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// One page of live keys starting with `prefix`, ordered, strictly after `after`.
    async fn scan_prefix(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Every live key starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        const PAGE: usize = 256;

        let mut out = Vec::new();
        loop {
            let page = self
                .scan_prefix(prefix, out.last().map(String::as_str), PAGE)
                .await?;
            let done = page.len() < PAGE;
            out.extend(page);
            if done {
                return Ok(out);
            }
        }
    }
}

/// Parses a stored counter. Counters are written as plain decimal integers.
pub fn parse_counter(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("counter {key} holds non-integer value {raw:?}: {e}"))
}
