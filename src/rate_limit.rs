//! Per-client rolling-window rate limiter.
//!
//! Each request records a hit under `rate:{client}` in the injected
//! [`KvStore`]; a client exceeding `max_requests` within `window_secs` is
//! refused until enough of its hits age out. Counts are per process.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use sales_insight_core::store::KvStore;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: usize },
    Limited { retry_after_secs: u64 },
}

pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    max_requests: usize,
    window: Duration,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            enabled: config.enabled,
        }
    }

    /// Record a request from `client` and decide whether to serve it.
    pub async fn check(&self, client: &str) -> Result<RateDecision> {
        if !self.enabled {
            return Ok(RateDecision::Allowed {
                remaining: usize::MAX,
            });
        }
        let count = self
            .store
            .hit(&format!("rate:{}", client), self.window)
            .await?;
        if count > self.max_requests {
            tracing::info!(client, count, "rate limit exceeded");
            Ok(RateDecision::Limited {
                retry_after_secs: self.window.as_secs().max(1),
            })
        } else {
            Ok(RateDecision::Allowed {
                remaining: self.max_requests - count,
            })
        }
    }
}
