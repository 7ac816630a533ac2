//! Time-bound response cache keyed by request signature.
//!
//! The signature is the SHA-256 of the normalized question plus the
//! conversation turns that can influence the answer, so the same question
//! asked in the same context hits the cache for `cache.ttl_secs`
//! (default one hour). Entries live in the injected [`KvStore`].

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use sales_insight_core::intent::{normalize, ConversationTurn, Role, FOLLOW_UP_LOOKBACK};
use sales_insight_core::store::KvStore;

use crate::config::CacheConfig;
use crate::narrative::Answer;

const KEY_PREFIX: &str = "answer:";

/// Cache key for a question in its conversational context.
///
/// Only the trailing turns that the resolver and the generator can see
/// take part in the signature.
pub fn request_signature(question: &str, history: &[ConversationTurn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(question).as_bytes());
    let start = history.len().saturating_sub(FOLLOW_UP_LOOKBACK);
    for turn in &history[start..] {
        hasher.update([0u8]);
        hasher.update(match turn.role {
            Role::User => b"u".as_slice(),
            Role::Assistant => b"a".as_slice(),
        });
        hasher.update(normalize(&turn.content).as_bytes());
    }
    format!("{}{}", KEY_PREFIX, hex::encode(hasher.finalize()))
}

pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled,
        }
    }

    pub async fn get(&self, signature: &str) -> Result<Option<Answer>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(raw) = self.store.get(signature).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(answer) => Ok(Some(answer)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping unreadable cache entry");
                self.store.delete(signature).await?;
                Ok(None)
            }
        }
    }

    pub async fn put(&self, signature: &str, answer: &Answer) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let raw = serde_json::to_string(answer)?;
        self.store.set(signature, raw, Some(self.ttl)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::AnswerSource;
    use chrono::{TimeZone, Utc};
    use sales_insight_core::store::memory::{InMemoryKvStore, ManualClock};

    fn answer() -> Answer {
        Answer {
            text: "Total sales were $70.00.".to_string(),
            source: AnswerSource::Deterministic,
            generation_attempts: 0,
        }
    }

    #[test]
    fn test_signature_normalizes_question() {
        let a = request_signature("Total sales for Latte?", &[]);
        let b = request_signature("  total SALES for latte ", &[]);
        assert_eq!(a, b);
        assert!(a.starts_with("answer:"));
        assert_eq!(a.len(), "answer:".len() + 64);
    }

    #[test]
    fn test_signature_depends_on_recent_history() {
        let q = "What about January 2025?";
        let latte = vec![ConversationTurn::user("Latte sales in December 2024")];
        let mocha = vec![ConversationTurn::user("Mocha sales in December 2024")];
        assert_ne!(request_signature(q, &latte), request_signature(q, &mocha));
        assert_ne!(request_signature(q, &latte), request_signature(q, &[]));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
        let cache = ResponseCache::new(store, &CacheConfig::default());
        let sig = request_signature("q", &[]);

        cache.put(&sig, &answer()).await.unwrap();
        assert_eq!(cache.get(&sig).await.unwrap(), Some(answer()));

        clock.advance(Duration::from_secs(3600));
        assert_eq!(cache.get(&sig).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let store = Arc::new(InMemoryKvStore::new());
        let config = CacheConfig {
            enabled: false,
            ttl_secs: 60,
        };
        let cache = ResponseCache::new(store.clone(), &config);
        cache.put("k", &answer()).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
