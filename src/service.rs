//! Request facade: one question in, one answer out.
//!
//! ```text
//! question ─▶ cache? ─▶ fetch + parse ─▶ metadata ─▶ intent ─▶ aggregate ─▶ narrate ─▶ cache
//! ```
//!
//! Every request rebuilds metadata and aggregates from a fresh fetch; only
//! the response cache (and the HTTP rate limiter) outlive a request.

use chrono::FixedOffset;
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

use sales_insight_core::aggregate;
use sales_insight_core::intent::{ConversationTurn, Intent, IntentResolver};
use sales_insight_core::metadata::DatasetMetadata;
use sales_insight_core::models::{ParseReport, ParsedDataset};
use sales_insight_core::recommend::{recommend, Recommendation};
use sales_insight_core::store::KvStore;

use crate::cache::{request_signature, ResponseCache};
use crate::config::{Config, Credentials};
use crate::error::{ConfigError, ServiceError};
use crate::generation::{create_generator, RetryPolicy, TextGenerator};
use crate::narrative::{AnswerSource, NarrativeInput, NarrativeOrchestrator};
use crate::source::{create_source, load_dataset, RecordSource};

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Answer plus how it was produced.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub source: AnswerSource,
    /// `None` when served from cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub cached: bool,
}

/// Dataset overview for `GET /api/metadata` and `insight metadata`.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataResponse {
    pub metadata: DatasetMetadata,
    pub parse_report: ParseReport,
}

pub struct InsightService {
    source: Arc<dyn RecordSource>,
    resolver: IntentResolver,
    narrator: NarrativeOrchestrator,
    cache: ResponseCache,
    business_offset: FixedOffset,
}

impl InsightService {
    /// Build from configuration, failing fast on missing keys.
    pub fn from_config(
        config: &Config,
        credentials: &Credentials,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, ConfigError> {
        config.validate(credentials)?;
        let source: Arc<dyn RecordSource> = Arc::from(create_source(config, credentials)?);
        let generator = create_generator(config, credentials)?;
        Self::new(config, source, generator, store)
    }

    /// Build with explicit collaborators.
    pub fn new(
        config: &Config,
        source: Arc<dyn RecordSource>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            source,
            resolver: IntentResolver::new(),
            narrator: NarrativeOrchestrator::new(
                generator,
                RetryPolicy::from_config(&config.generation),
                config.generation.history_turns,
            ),
            cache: ResponseCache::new(store, &config.cache),
            business_offset: config.analysis.business_offset()?,
        })
    }

    async fn dataset(&self) -> Result<ParsedDataset, ServiceError> {
        Ok(load_dataset(self.source.as_ref(), self.business_offset).await?)
    }

    /// Answer `question` in the context of `history` (oldest first).
    pub async fn ask(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse, ServiceError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ServiceError::BadRequest("question must not be empty".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(ServiceError::BadRequest(format!(
                "question must be at most {} characters",
                MAX_QUESTION_CHARS
            )));
        }

        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("ask", %request_id);
        self.ask_inner(question, history).instrument(span).await
    }

    async fn ask_inner(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse, ServiceError> {
        let signature = request_signature(question, history);
        if let Some(answer) = self.cache.get(&signature).await? {
            tracing::debug!("cache hit");
            return Ok(QueryResponse {
                answer: answer.text,
                source: answer.source,
                intent: None,
                cached: true,
            });
        }

        let dataset = self.dataset().await?;
        let records = &dataset.records;
        let metadata = DatasetMetadata::build(records);
        let intent = self.resolver.resolve(question, history, &metadata);
        let result = aggregate::execute(&intent, records);

        tracing::info!(
            kind = intent.kind.as_str(),
            confidence = intent.confidence,
            inherited = intent.inherited,
            no_data = result.is_no_data(),
            "question resolved"
        );

        let recommendations = if result.is_deterministic() || result.is_no_data() {
            Vec::new()
        } else {
            recommend(records)
        };

        let answer = self
            .narrator
            .answer(NarrativeInput {
                question,
                history,
                intent: &intent,
                result: &result,
                metadata: &metadata,
                records,
                recommendations: &recommendations,
            })
            .await;

        if answer.source != AnswerSource::Fallback {
            self.cache.put(&signature, &answer).await?;
        }

        Ok(QueryResponse {
            answer: answer.text,
            source: answer.source,
            intent: Some(intent),
            cached: false,
        })
    }

    /// Current trend recommendations over the whole dataset.
    pub async fn recommendations(&self) -> Result<Vec<Recommendation>, ServiceError> {
        let dataset = self.dataset().await?;
        Ok(recommend(&dataset.records))
    }

    pub async fn metadata(&self) -> Result<MetadataResponse, ServiceError> {
        let dataset = self.dataset().await?;
        Ok(MetadataResponse {
            metadata: DatasetMetadata::build(&dataset.records),
            parse_report: dataset.report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generation::ScriptedGenerator;
    use crate::source::StaticSource;
    use sales_insight_core::store::memory::InMemoryKvStore;

    const HEADER: &[&str] = &[
        "Transaction_ID",
        "Purchase_Date",
        "Customer_ID",
        "Store_Location",
        "Product_Name",
        "Unit_Price",
        "Quantity",
        "Discount_Code_Used",
        "Line_Total",
    ];

    fn source() -> Arc<dyn RecordSource> {
        Arc::new(StaticSource::from_rows(&[
            HEADER,
            &["T1", "2024-11-05 09:00:00", "C1", "X", "A", "50", "1", "", "$50.00"],
            &["T2", "2024-12-05 14:00:00", "C2", "X", "A", "70", "1", "", "$70.00"],
        ]))
    }

    fn service(generator: Arc<ScriptedGenerator>) -> InsightService {
        let mut config = Config::for_csv("unused.csv");
        config.generation.initial_backoff_ms = 1;
        InsightService::new(
            &config,
            source(),
            generator,
            Arc::new(InMemoryKvStore::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_scalar_question_is_deterministic() {
        let gen = Arc::new(ScriptedGenerator::always("unused"));
        let svc = service(gen.clone());
        let resp = svc
            .ask("What were total sales for A in December 2024?", &[])
            .await
            .unwrap();
        assert!(resp.answer.contains("$70.00"));
        assert_eq!(resp.source, AnswerSource::Deterministic);
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_ask_is_cached() {
        let gen = Arc::new(ScriptedGenerator::always("Things look good."));
        let svc = service(gen.clone());
        let first = svc.ask("Any advice to boost sales?", &[]).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.source, AnswerSource::Generated);
        let second = svc.ask("any advice to boost sales", &[]).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.answer, "Things look good.");
        assert_eq!(gen.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_is_not_cached() {
        let gen = Arc::new(ScriptedGenerator::new(vec![
            Err(GenerationError::Disabled),
            Ok("Recovered.".to_string()),
        ]));
        let svc = service(gen.clone());
        let first = svc.ask("How can we improve?", &[]).await.unwrap();
        assert_eq!(first.source, AnswerSource::Fallback);
        let second = svc.ask("How can we improve?", &[]).await.unwrap();
        assert_eq!(second.source, AnswerSource::Generated);
        assert!(!second.cached);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let svc = service(Arc::new(ScriptedGenerator::default()));
        assert!(matches!(
            svc.ask("   ", &[]).await,
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_and_recommendations() {
        let svc = service(Arc::new(ScriptedGenerator::default()));
        let meta = svc.metadata().await.unwrap();
        assert_eq!(meta.metadata.record_count, 2);
        assert_eq!(meta.metadata.month_labels, vec!["November 2024", "December 2024"]);
        let recs = svc.recommendations().await.unwrap();
        // A grew, so the only mandatory slot is the store.
        assert_eq!(recs[0].target, "X");
    }
}
