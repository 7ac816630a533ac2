//! In-memory [`KvStore`] implementation.
//!
//! Uses `HashMap` behind `std::sync::RwLock`. Expired values are dropped
//! on read, sliding-window logs are pruned on every hit, and at most once
//! per [`SWEEP_INTERVAL`] a write or hit sweeps out every expired value and
//! every idle hit log.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Clock, KvStore, SystemClock};

/// Minimum time between full sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct StoredValue {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

struct HitLog {
    window: chrono::Duration,
    times: VecDeque<DateTime<Utc>>,
}

impl HitLog {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self.times.front().is_some_and(|t| *t <= cutoff) {
            self.times.pop_front();
        }
    }
}

/// In-process key-value store.
pub struct InMemoryKvStore {
    values: RwLock<HashMap<String, StoredValue>>,
    hits: RwLock<HashMap<String, HitLog>>,
    last_sweep: Mutex<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            hits: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(clock.now()),
            clock,
        }
    }

    /// Number of stored values, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a hit log.
    pub fn hit_keys(&self) -> usize {
        self.hits.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Drop expired values and hit logs with no events left in their
    /// window, unless a sweep ran within the last [`SWEEP_INTERVAL`].
    fn maybe_sweep(&self, now: DateTime<Utc>) -> Result<()> {
        {
            let mut last = self.last_sweep.lock().map_err(poisoned)?;
            if now - *last < to_chrono(SWEEP_INTERVAL) {
                return Ok(());
            }
            *last = now;
        }

        let mut values = self.values.write().map_err(poisoned)?;
        values.retain(|_, v| v.is_live(now));
        let live_values = values.len();
        drop(values);

        let mut hits = self.hits.write().map_err(poisoned)?;
        hits.retain(|_, log| {
            log.prune(now);
            !log.times.is_empty()
        });
        tracing::debug!(live_values, hit_keys = hits.len(), "swept in-memory store");
        Ok(())
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        {
            let values = self.values.read().map_err(poisoned)?;
            match values.get(key) {
                None => return Ok(None),
                Some(v) if v.is_live(now) => return Ok(Some(v.value.clone())),
                Some(_) => {}
            }
        }
        self.values.write().map_err(poisoned)?.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        self.maybe_sweep(now)?;
        let expires_at = ttl.map(|ttl| now + to_chrono(ttl));
        self.values
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    async fn hit(&self, key: &str, window: Duration) -> Result<usize> {
        let now = self.clock.now();
        self.maybe_sweep(now)?;
        let mut hits = self.hits.write().map_err(poisoned)?;
        let log = hits.entry(key.to_string()).or_insert_with(|| HitLog {
            window: to_chrono(window),
            times: VecDeque::new(),
        });
        log.window = to_chrono(window);
        log.prune(now);
        log.times.push_back(now);
        Ok(log.times.len())
    }
}

/// Settable [`Clock`] for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += to_chrono(by);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> (Arc<ManualClock>, InMemoryKvStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = InMemoryKvStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let (_, store) = store();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (clock, store) = store();
        store
            .set("k", "v".to_string(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3599));
        assert!(store.get("k").await.unwrap().is_some());
        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_sliding_window_hits() {
        let (clock, store) = store();
        let window = Duration::from_secs(60);
        assert_eq!(store.hit("ip", window).await.unwrap(), 1);
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.hit("ip", window).await.unwrap(), 2);
        assert_eq!(store.hit("other", window).await.unwrap(), 1);
        clock.advance(Duration::from_secs(31));
        // First hit is now outside the window.
        assert_eq!(store.hit("ip", window).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_values_and_idle_hit_logs() {
        let (clock, store) = store();
        let ttl = Some(Duration::from_secs(3600));
        let window = Duration::from_secs(60);
        for i in 0..100 {
            store
                .set(&format!("answer:{}", i), "v".to_string(), ttl)
                .await
                .unwrap();
            store.hit(&format!("rate:{}", i), window).await.unwrap();
        }
        store.set("forever", "v".to_string(), None).await.unwrap();
        assert_eq!(store.len(), 101);
        assert_eq!(store.hit_keys(), 100);

        clock.advance(Duration::from_secs(24 * 3600));
        store.set("fresh", "v".to_string(), ttl).await.unwrap();
        store.hit("rate:new", window).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.hit_keys(), 1);
        assert_eq!(store.get("forever").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_sweep_runs_at_most_once_per_interval() {
        let (clock, store) = store();
        store
            .set("a", "v".to_string(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(SWEEP_INTERVAL);
        store.set("b", "v".to_string(), None).await.unwrap();
        assert_eq!(store.len(), 1);

        store
            .set("c", "v".to_string(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));
        // Expired, but the last sweep was two seconds ago.
        store.set("d", "v".to_string(), None).await.unwrap();
        assert_eq!(store.len(), 3);
    }
}
