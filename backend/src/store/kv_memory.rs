use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::store::{KvStore, parse_counter};

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| now < t)
    }
}

/// Process-local KvStore.
///
/// Every operation runs under one lock, so it is linearizable within the
/// process. Expiry follows the tokio clock, which paused-time tests can advance.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let map = self.entries.lock();
        Ok(map
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> Result<bool> {
        let now = Instant::now();
        let mut map = self.entries.lock();

        if map.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut map = self.entries.lock();

        let (current, expires_at) = match map.get(key).filter(|e| e.is_live(now)) {
            Some(e) => (parse_counter(key, &e.value)?, e.expires_at),
            None => (0, None),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| anyhow::anyhow!("counter {key} overflowed"))?;

        map.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn replace_keep_ttl(&self, key: &str, value: String) -> Result<bool> {
        let now = Instant::now();
        let mut map = self.entries.lock();

        match map.get_mut(key) {
            Some(e) if e.is_live(now) => {
                e.value = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let mut map = self.entries.lock();

        let mut removed = 0;
        for k in keys {
            if let Some(e) = map.remove(k) {
                if e.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let now = Instant::now();
        let map = self.entries.lock();

        let lower = match after {
            Some(a) if a >= prefix => Bound::Excluded(a.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        Ok(map
            .range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect())
    }
}
