//! Key-value storage abstraction shared by the response cache and the rate
//! limiter.
//!
//! The [`KvStore`] trait is the single seam between request handling and
//! whatever holds short-lived state. The bundled [`memory::InMemoryKvStore`]
//! keeps everything in process; a networked backend only has to implement
//! the same four operations.
//!
//! Time is injected through [`Clock`] so TTL expiry and sliding windows can
//! be tested without sleeping.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](KvStore::get) | Read a live (unexpired) value |
//! | [`set`](KvStore::set) | Write a value with an optional TTL |
//! | [`delete`](KvStore::delete) | Remove a value |
//! | [`hit`](KvStore::hit) | Record an event and count events inside a sliding window |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Abstract short-lived key-value storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`. With a `ttl`, the entry expires that long
    /// after the write.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Record one event under `key` and return how many events (including
    /// this one) fall inside the trailing `window`.
    async fn hit(&self, key: &str, window: Duration) -> Result<usize>;
}
