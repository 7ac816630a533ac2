//! Narrative orchestration: turns an aggregation into the final answer.
//!
//! | Result | Path |
//! |--------|------|
//! | `NoData` | Fixed "no data" message; generation is never called |
//! | `Total`, `Ranked`, `LowPerformers` | Templated sentence, exact figures |
//! | anything else | Context bundle + question + recent turns → generator |
//!
//! Generation failures never propagate. After the retry policy gives up the
//! answer degrades to [`FALLBACK_ANSWER`]; for period-revenue questions the
//! computed monthly figures are appended so the number still reaches the
//! user.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sales_insight_core::aggregate::{self, AggregationResult, Focus, RankedEntry};
use sales_insight_core::intent::{AggregationKind, ConversationTurn, Intent};
use sales_insight_core::metadata::DatasetMetadata;
use sales_insight_core::models::{format_currency, format_percent, TransactionRecord};
use sales_insight_core::recommend::Recommendation;

use crate::generation::{
    generate_with_retry, ChatMessage, GenerationRequest, RetryOutcome, RetryPolicy, TextGenerator,
};

/// Static answer used when generation is unavailable.
pub const FALLBACK_ANSWER: &str = "Sorry, I couldn't put together a detailed answer right now. \
Please try again in a moment, or ask for a specific figure such as total sales for a product in a given month.";

const SYSTEM_PROMPT: &str = "You are a retail sales analyst. Answer the user's question using only \
the figures in the context below. Do not invent numbers, products, stores, or dates. If the context \
does not contain what is needed, say so plainly. Keep the answer under 200 words.";

/// Recommendation lines included in a context bundle.
const RECOMMENDATION_EXCERPTS: usize = 5;

/// How an [`Answer`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Deterministic,
    NoData,
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
    /// Generator calls made for this answer.
    pub generation_attempts: u32,
}

impl Answer {
    fn local(text: String, source: AnswerSource) -> Self {
        Self {
            text,
            source,
            generation_attempts: 0,
        }
    }
}

pub fn no_data_message(selection: &str) -> String {
    format!("No data found for this selection ({}).", selection)
}

// ============ Deterministic templates ============

fn ranked_lines(entries: &[RankedEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| match &e.detail {
            Some(detail) => format!(
                "{}. {}: {} ({})",
                e.rank,
                e.name,
                format_currency(e.amount),
                detail
            ),
            None => format!("{}. {}: {}", e.rank, e.name, format_currency(e.amount)),
        })
        .collect()
}

/// Templated answer for scalar and ranked results, or `None` when the
/// result needs narration.
pub fn render_deterministic(result: &AggregationResult) -> Option<String> {
    match result {
        AggregationResult::Total {
            label,
            amount,
            line_items,
        } => Some(format!(
            "Total sales for {} were {} across {} line item{}.",
            label,
            format_currency(*amount),
            line_items,
            if *line_items == 1 { "" } else { "s" }
        )),
        AggregationResult::Ranked { title, entries } => {
            let mut out = format!("{}:", title);
            for line in ranked_lines(entries) {
                out.push('\n');
                out.push_str(&line);
            }
            Some(out)
        }
        AggregationResult::LowPerformers {
            entries,
            combined,
            total,
            share_pct,
            product_count,
            percent,
        } => {
            let scope = match percent {
                Some(p) => format!(
                    "bottom {}% ({} of {} products)",
                    trim_float(*p),
                    entries.len(),
                    product_count
                ),
                None => format!("bottom {} of {} products", entries.len(), product_count),
            };
            let mut out = format!(
                "The {} generated {}, {:.1}% of total revenue ({}):",
                scope,
                format_currency(*combined),
                share_pct,
                format_currency(*total)
            );
            for line in ranked_lines(entries) {
                out.push('\n');
                out.push_str(&line);
            }
            Some(out)
        }
        _ => None,
    }
}

fn trim_float(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{}", v)
    }
}

/// Plain-text lines describing any result, for context bundles.
pub fn describe_result(result: &AggregationResult) -> Vec<String> {
    match result {
        AggregationResult::Monthly { title, entries } => {
            let mut lines = vec![format!("{}:", title)];
            lines.extend(entries.iter().map(|e| {
                format!(
                    "- {}: {} ({} vs previous month)",
                    e.label,
                    format_currency(e.total),
                    format_percent(e.growth_pct)
                )
            }));
            lines
        }
        AggregationResult::Buckets { title, buckets, .. } => {
            let mut lines = vec![format!("{}:", title)];
            lines.extend(buckets.iter().map(|b| {
                format!(
                    "- {}: {} ({:.1}% of total, {} line items)",
                    b.name,
                    format_currency(b.amount),
                    b.share_pct,
                    b.count
                )
            }));
            lines
        }
        AggregationResult::NoData { selection } => vec![no_data_message(selection)],
        other => render_deterministic(other)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default(),
    }
}

// ============ Context bundle ============

/// Facts handed to the generator for a delegated question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBundle {
    pub metadata_summary: String,
    pub aggregation_excerpts: Vec<String>,
    pub recommendation_excerpts: Vec<String>,
}

impl ContextBundle {
    /// Gather the metadata summary, the primary result, supporting
    /// breakdowns for the intent's focus, and the top recommendations.
    pub fn build(
        intent: &Intent,
        primary: &AggregationResult,
        records: &[TransactionRecord],
        metadata: &DatasetMetadata,
        recommendations: &[Recommendation],
    ) -> Self {
        let focus = Focus::from_intent(intent);
        let mut excerpts = describe_result(primary);

        if !primary.is_no_data() {
            if let Some(line_avg) = aggregate::average_line_value(records, focus) {
                excerpts.push(String::new());
                excerpts.push(format!(
                    "Overall: {} total revenue; {} average per line item for {}",
                    format_currency(aggregate::total_revenue(records)),
                    format_currency(line_avg),
                    focus.describe()
                ));
            }

            for breakdown in [
                aggregate::time_of_day_breakdown(records, focus),
                aggregate::weekday_breakdown(records, focus),
                aggregate::discount_breakdown(records, focus),
            ] {
                excerpts.push(String::new());
                excerpts.extend(describe_result(&breakdown));
            }

            let stores = aggregate::store_performance(records);
            if !stores.is_empty() {
                excerpts.push(String::new());
                excerpts.push("Store performance (all time):".to_string());
                excerpts.extend(stores.iter().map(|s| {
                    format!(
                        "- {}: {} revenue, {} orders, {} average order value, {:.1} items per order",
                        s.store,
                        format_currency(s.revenue),
                        s.orders,
                        format_currency(s.avg_order_value),
                        s.items_per_order
                    )
                }));
            }
        }

        Self {
            metadata_summary: metadata.summary(),
            aggregation_excerpts: excerpts,
            recommendation_excerpts: recommendations
                .iter()
                .take(RECOMMENDATION_EXCERPTS)
                .map(Recommendation::headline)
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("## Dataset\n");
        out.push_str(&self.metadata_summary);
        out.push_str("\n\n## Figures\n");
        out.push_str(&self.aggregation_excerpts.join("\n"));
        out.push_str("\n\n## Recommendations\n");
        if self.recommendation_excerpts.is_empty() {
            out.push_str("None (not enough monthly history).");
        } else {
            for line in &self.recommendation_excerpts {
                out.push_str("- ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// Assemble `{systemPrompt, messages}`: the last `history_turns` turns,
/// then the question.
pub fn build_request(
    question: &str,
    history: &[ConversationTurn],
    bundle: &ContextBundle,
    history_turns: usize,
) -> GenerationRequest {
    let start = history.len().saturating_sub(history_turns);
    let mut messages: Vec<ChatMessage> = history[start..].iter().map(ChatMessage::from).collect();
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: question.to_string(),
    });
    GenerationRequest {
        system_prompt: format!("{}\n\n{}", SYSTEM_PROMPT, bundle.render()),
        messages,
    }
}

// ============ Orchestrator ============

/// Everything the orchestrator needs for one question.
pub struct NarrativeInput<'a> {
    pub question: &'a str,
    pub history: &'a [ConversationTurn],
    pub intent: &'a Intent,
    pub result: &'a AggregationResult,
    pub metadata: &'a DatasetMetadata,
    pub records: &'a [TransactionRecord],
    pub recommendations: &'a [Recommendation],
}

pub struct NarrativeOrchestrator {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
    history_turns: usize,
}

impl NarrativeOrchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: RetryPolicy, history_turns: usize) -> Self {
        Self {
            generator,
            policy,
            history_turns,
        }
    }

    pub async fn answer(&self, input: NarrativeInput<'_>) -> Answer {
        if let AggregationResult::NoData { selection } = input.result {
            return Answer::local(no_data_message(selection), AnswerSource::NoData);
        }
        if let Some(text) = render_deterministic(input.result) {
            return Answer::local(text, AnswerSource::Deterministic);
        }

        let bundle = ContextBundle::build(
            input.intent,
            input.result,
            input.records,
            input.metadata,
            input.recommendations,
        );
        let request = build_request(input.question, input.history, &bundle, self.history_turns);

        match generate_with_retry(self.generator.as_ref(), &request, self.policy).await {
            RetryOutcome::Success { text, attempts } => Answer {
                text,
                source: AnswerSource::Generated,
                generation_attempts: attempts,
            },
            RetryOutcome::Exhausted { attempts, .. } => Answer {
                text: fallback_answer(input.intent, input.result),
                source: AnswerSource::Fallback,
                generation_attempts: attempts,
            },
        }
    }
}

/// [`FALLBACK_ANSWER`], plus the computed monthly figures for
/// period-revenue questions.
pub fn fallback_answer(intent: &Intent, result: &AggregationResult) -> String {
    match (intent.kind, result) {
        (AggregationKind::PeriodRevenue, AggregationResult::Monthly { .. }) => {
            format!(
                "{}\n\nHere are the figures I computed:\n{}",
                FALLBACK_ANSWER,
                describe_result(result).join("\n")
            )
        }
        _ => FALLBACK_ANSWER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generation::ScriptedGenerator;
    use sales_insight_core::aggregate::MonthlyEntry;
    use sales_insight_core::models::MonthRef;
    use std::time::Duration;

    fn intent(kind: AggregationKind) -> Intent {
        Intent {
            kind,
            product: None,
            location: None,
            window: None,
            limit: None,
            percent: None,
            confidence: 0.6,
            inherited: false,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn monthly() -> AggregationResult {
        let nov = MonthRef::new(2024, 10).unwrap();
        let dec = MonthRef::new(2024, 11).unwrap();
        AggregationResult::Monthly {
            title: "Revenue for all sales".to_string(),
            entries: vec![
                MonthlyEntry {
                    month: nov,
                    label: nov.label(),
                    total: 100.0,
                    growth_pct: 0.0,
                },
                MonthlyEntry {
                    month: dec,
                    label: dec.label(),
                    total: 150.0,
                    growth_pct: 50.0,
                },
            ],
        }
    }

    fn input<'a>(
        intent: &'a Intent,
        result: &'a AggregationResult,
        metadata: &'a DatasetMetadata,
        history: &'a [ConversationTurn],
    ) -> NarrativeInput<'a> {
        NarrativeInput {
            question: "How did we do?",
            history,
            intent,
            result,
            metadata,
            records: &[],
            recommendations: &[],
        }
    }

    #[test]
    fn test_total_template() {
        let text = render_deterministic(&AggregationResult::Total {
            label: "A in December 2024".to_string(),
            amount: 70.0,
            line_items: 1,
        })
        .unwrap();
        assert_eq!(text, "Total sales for A in December 2024 were $70.00 across 1 line item.");
    }

    #[test]
    fn test_low_performer_template() {
        let result = aggregate::low_performers(
            &[
                ("A".to_string(), 10.0),
                ("B".to_string(), 20.0),
                ("C".to_string(), 30.0),
                ("D".to_string(), 40.0),
                ("E".to_string(), 100.0),
            ],
            200.0,
            Some(20.0),
            None,
        );
        let text = render_deterministic(&result).unwrap();
        assert!(text.starts_with("The bottom 20% (1 of 5 products) generated $10.00, 5.0%"));
        assert!(text.contains("1. A: $10.00"));
    }

    #[test]
    fn test_monthly_is_not_deterministic() {
        assert!(render_deterministic(&monthly()).is_none());
        let lines = describe_result(&monthly());
        assert!(lines[2].contains("$150.00 (+50.0% vs previous month)"));
    }

    fn line(id: &str, store: &str, product: &str, total: f64) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id.to_string(),
            purchased_at: chrono::NaiveDate::from_ymd_opt(2024, 12, 2)
                .and_then(|d| d.and_hms_opt(9, 0, 0)),
            customer_id: "C1".to_string(),
            store_location: store.to_string(),
            product_name: product.to_string(),
            unit_price: total,
            quantity: 1,
            discount_code: None,
            line_total: total,
        }
    }

    #[test]
    fn test_bundle_shows_line_and_order_averages() {
        // One two-line order and one single-line order at the same store.
        let records = vec![
            line("T1", "Downtown", "Latte", 4.0),
            line("T1", "Downtown", "Muffin", 2.0),
            line("T2", "Downtown", "Latte", 6.0),
        ];
        let metadata = DatasetMetadata::build(&records);
        let i = intent(AggregationKind::Advice);
        let primary = aggregate::execute(&i, &records);
        let bundle = ContextBundle::build(&i, &primary, &records, &metadata, &[]);
        let text = bundle.aggregation_excerpts.join("\n");
        assert!(
            text.contains("Overall: $12.00 total revenue; $4.00 average per line item for all sales"),
            "{}",
            text
        );
        assert!(text.contains("2 orders, $6.00 average order value"), "{}", text);
    }

    #[test]
    fn test_request_keeps_last_four_turns() {
        let history: Vec<ConversationTurn> = (0..6)
            .map(|i| ConversationTurn::user(format!("turn {}", i)))
            .collect();
        let bundle = ContextBundle {
            metadata_summary: "summary".to_string(),
            aggregation_excerpts: vec!["- December 2024: $150.00".to_string()],
            recommendation_excerpts: vec![],
        };
        let request = build_request("latest?", &history, &bundle, 4);
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[0].content, "turn 2");
        assert_eq!(request.messages[4].content, "latest?");
        assert!(request.system_prompt.contains("only the figures"));
        assert!(request.system_prompt.contains("$150.00"));
    }

    #[tokio::test]
    async fn test_no_data_bypasses_generation() {
        let gen = Arc::new(ScriptedGenerator::always("should not be used"));
        let orchestrator = NarrativeOrchestrator::new(gen.clone(), policy(), 4);
        let i = intent(AggregationKind::General);
        let result = AggregationResult::NoData {
            selection: "Latte in March 2030".to_string(),
        };
        let metadata = DatasetMetadata::default();
        let answer = orchestrator.answer(input(&i, &result, &metadata, &[])).await;
        assert_eq!(answer.source, AnswerSource::NoData);
        assert!(answer.text.contains("No data found"));
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_delegated_answer_uses_generator() {
        let gen = Arc::new(ScriptedGenerator::always("Revenue grew 50% in December."));
        let orchestrator = NarrativeOrchestrator::new(gen.clone(), policy(), 4);
        let i = intent(AggregationKind::Advice);
        let result = monthly();
        let metadata = DatasetMetadata::default();
        let history = vec![ConversationTurn::user("hi"), ConversationTurn::assistant("hello")];
        let answer = orchestrator
            .answer(input(&i, &result, &metadata, &history))
            .await;
        assert_eq!(answer.source, AnswerSource::Generated);
        assert_eq!(answer.generation_attempts, 1);
        let sent = gen.requests();
        assert_eq!(sent[0].messages.len(), 3);
        assert_eq!(sent[0].messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn test_fallback_after_exhaustion() {
        let busy = || GenerationError::Server {
            status: 500,
            body: String::new(),
        };
        let gen = Arc::new(ScriptedGenerator::new(vec![Err(busy()), Err(busy()), Err(busy())]));
        let orchestrator = NarrativeOrchestrator::new(gen.clone(), policy(), 4);
        let metadata = DatasetMetadata::default();

        let advice = intent(AggregationKind::Advice);
        let result = monthly();
        let answer = orchestrator
            .answer(input(&advice, &result, &metadata, &[]))
            .await;
        assert_eq!(answer.source, AnswerSource::Fallback);
        assert_eq!(answer.text, FALLBACK_ANSWER);
        assert_eq!(answer.generation_attempts, 3);
    }

    #[test]
    fn test_period_fallback_keeps_figures() {
        let text = fallback_answer(&intent(AggregationKind::PeriodRevenue), &monthly());
        assert!(text.starts_with(FALLBACK_ANSWER));
        assert!(text.contains("December 2024: $150.00"));
    }
}
