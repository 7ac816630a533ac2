//! Intent resolution: free-text question → structured [`Intent`].
//!
//! Resolution happens in two stages:
//!
//! 1. [`QuestionSignals::extract`] normalizes the question once and pulls out
//!    every slot a matcher might need: product and location focus (matched
//!    against [`DatasetMetadata`]), month/year mentions, quarter mentions,
//!    "top N"/"bottom N" counts, and percentages.
//! 2. [`IntentResolver`] walks an ordered list of [`IntentMatcher`]s and
//!    returns the first non-empty result. When nothing fires, the question
//!    is handed to the narrative layer as a general question.
//!
//! # Priority
//!
//! | # | Matcher | Fires on |
//! |---|---------|----------|
//! | 1 | [`ProductMonthMatcher`] | product + one month, no location |
//! | 2 | [`LocationMonthMatcher`] | location + one month, no product |
//! | 3 | [`TopProductsMatcher`] | "top products" + period, no product |
//! | 4 | [`LocationRankingMatcher`] | store-ranking phrasing + product + one month |
//! | 5 | [`PeriodRevenueMatcher`] | revenue/sales + month or quarter |
//! | 6 | [`LowPerformerMatcher`] | cut/worst/bottom + product/item |
//! | 7 | [`StoreOrderValueMatcher`] | store + AOV + highest/best |
//! | 8 | [`AdviceMatcher`] | business-advice keywords |
//!
//! Matchers 1 and 2 step aside for ranking-phrased questions ("which store
//! sold the most ..."), otherwise matcher 4 could never fire.
//!
//! # Entity matching
//!
//! A candidate matches when its normalized name is a substring of the
//! normalized question; among several matches the longest wins, so
//! "Protein Acai Bowl" beats "Acai Bowl". Without a substring match, a
//! candidate matches when each of its words appears as a whole word in the
//! question.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::metadata::DatasetMetadata;
use crate::models::MonthRef;

/// Default count for "top N" style questions when no number is given.
pub const DEFAULT_LIMIT: usize = 3;

/// How many trailing conversation turns are searched for inherited slots.
pub const FOLLOW_UP_LOOKBACK: usize = 4;

const ADVICE_KEYWORDS: &[&str] = &[
    "improve",
    "increase",
    "boost",
    "grow",
    "sales",
    "revenue",
    "performance",
    "trend",
    "strategy",
    "recommendation",
    "advice",
];

const RANKING_CUES: &[&str] = &[
    "top", "bottom", "best", "worst", "rank", "ranking", "which", "highest", "lowest", "most",
    "least",
];

const LOCATION_RANKING_PHRASES: &[&str] = &[
    "which store",
    "which stores",
    "which location",
    "which locations",
    "what store",
    "what location",
    "best store",
    "top store",
    "top stores",
    "top location",
    "top locations",
    "by store",
    "by location",
    "per store",
    "per location",
    "each store",
    "each location",
    "rank the stores",
    "rank stores",
    "where",
];

const PRODUCT_WORDS: &[&str] = &[
    "product", "products", "item", "items", "menu", "sku", "skus", "seller", "sellers", "selling",
];

const STORE_WORDS: &[&str] = &["store", "stores", "location", "locations", "shop", "shops"];

const FOLLOW_UP_PHRASES: &[&str] = &[
    "what about",
    "how about",
    "same for",
    "same thing",
    "that month",
    "that product",
    "that store",
    "that location",
];

// ═══════════════════════════════════════════════════════════════════════
// Intent
// ═══════════════════════════════════════════════════════════════════════

/// The computation a question resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Scalar total for one product in one month.
    ProductMonthTotal,
    /// Scalar total for one location in one month.
    LocationMonthTotal,
    /// Top-N products by revenue for a period.
    TopProducts,
    /// Locations ranked by revenue for one product in one month.
    LocationRanking,
    /// Month-by-month revenue report with growth.
    PeriodRevenue,
    /// Smallest products by revenue and their combined share.
    LowPerformers,
    /// Stores ranked by order-level average order value.
    StoreOrderValue,
    /// Business-advice question; answered by the narrative layer.
    Advice,
    /// Nothing matched; answered by the narrative layer.
    General,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::ProductMonthTotal => "product_month_total",
            AggregationKind::LocationMonthTotal => "location_month_total",
            AggregationKind::TopProducts => "top_products",
            AggregationKind::LocationRanking => "location_ranking",
            AggregationKind::PeriodRevenue => "period_revenue",
            AggregationKind::LowPerformers => "low_performers",
            AggregationKind::StoreOrderValue => "store_order_value",
            AggregationKind::Advice => "advice",
            AggregationKind::General => "general",
        }
    }

    /// `true` for advice/general questions, which are always narrated
    /// rather than answered from a template.
    pub fn is_delegated(&self) -> bool {
        matches!(self, AggregationKind::Advice | AggregationKind::General)
    }
}

/// The time slot of an intent: one or two `(month, year)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeWindow {
    /// A single month mention.
    Month { month: MonthRef },
    /// Two month mentions, in the order they were written.
    Compare { first: MonthRef, second: MonthRef },
    /// A contiguous span, e.g. a quarter.
    Range { start: MonthRef, end: MonthRef },
}

impl TimeWindow {
    /// The single month, if this window is one month.
    pub fn single(&self) -> Option<MonthRef> {
        match self {
            TimeWindow::Month { month } => Some(*month),
            _ => None,
        }
    }

    /// Every calendar month the window spans, ascending.
    pub fn months(&self) -> Vec<MonthRef> {
        match *self {
            TimeWindow::Month { month } => vec![month],
            TimeWindow::Compare { first, second } | TimeWindow::Range { start: first, end: second } => {
                let (lo, hi) = if first <= second {
                    (first, second)
                } else {
                    (second, first)
                };
                lo.through(hi)
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            TimeWindow::Month { month } => month.label(),
            TimeWindow::Compare { first, second } => {
                format!("{} vs {}", first.label(), second.label())
            }
            TimeWindow::Range { start, end } => format!("{} to {}", start.label(), end.label()),
        }
    }
}

/// Structured interpretation of a question. Created fresh per question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    pub kind: AggregationKind,
    pub product: Option<String>,
    pub location: Option<String>,
    pub window: Option<TimeWindow>,
    pub limit: Option<usize>,
    /// Share of products requested by a low-performer question, in percent.
    pub percent: Option<f64>,
    /// Resolver confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// `true` when a slot was carried over from an earlier conversation turn.
    pub inherited: bool,
}

impl Intent {
    fn new(kind: AggregationKind, confidence: f64) -> Self {
        Self {
            kind,
            product: None,
            location: None,
            window: None,
            limit: None,
            percent: None,
            confidence,
            inherited: false,
        }
    }

    /// A general, delegated intent carrying whatever focus was extracted.
    pub fn general(signals: &QuestionSignals) -> Self {
        let mut intent = Intent::new(AggregationKind::General, 0.3);
        intent.product = signals.product.clone();
        intent.location = signals.location.clone();
        intent.window = signals.window();
        intent
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Signal extraction
// ═══════════════════════════════════════════════════════════════════════

/// Every slot extracted from a question, shared by all matchers.
#[derive(Debug, Clone, Default)]
pub struct QuestionSignals {
    /// Lowercased question with punctuation folded to spaces.
    pub normalized: String,
    words: HashSet<String>,
    pub product: Option<String>,
    pub location: Option<String>,
    /// Month/year mentions in the order they appear.
    pub months: Vec<MonthRef>,
    /// A quarter mention, expanded to its three-month range.
    pub quarter: Option<TimeWindow>,
    /// Month names mentioned without a year, as zero-based indices.
    pub bare_months: Vec<u32>,
    /// Explicit "top N"/"bottom N" count.
    pub count: Option<usize>,
    pub percent: Option<f64>,
    pub inherited: bool,
}

impl QuestionSignals {
    /// Extract signals from `question`, filling missing slots from recent
    /// user turns when the question reads as a follow-up.
    pub fn extract(
        question: &str,
        history: &[ConversationTurn],
        metadata: &DatasetMetadata,
    ) -> Self {
        let normalized = normalize(question);
        let words = normalized.split_whitespace().map(str::to_string).collect();
        let mut signals = Self {
            product: match_entity(&normalized, metadata.products.iter()),
            location: match_entity(&normalized, metadata.locations.iter()),
            months: extract_months(&normalized),
            quarter: extract_quarter(&normalized),
            bare_months: extract_bare_months(&normalized),
            count: extract_count(&normalized),
            percent: extract_percent(&question.to_lowercase()),
            normalized,
            words,
            inherited: false,
        };

        if signals.is_follow_up() {
            signals.inherit_from(history, metadata);
        }
        signals
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn has_any_word(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.has_word(w))
    }

    /// Multi-word phrase containment on word boundaries.
    pub fn has_phrase(&self, phrase: &str) -> bool {
        format!(" {} ", self.normalized).contains(&format!(" {} ", phrase))
    }

    pub fn has_any_phrase(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.has_phrase(p))
    }

    fn has_ranking_cue(&self) -> bool {
        self.has_any_word(RANKING_CUES)
    }

    /// The time window implied by the month and quarter mentions.
    ///
    /// Two month mentions make a comparison; a single mention is one month;
    /// otherwise a quarter mention, if any.
    pub fn window(&self) -> Option<TimeWindow> {
        match self.months.as_slice() {
            [first, second, ..] => Some(TimeWindow::Compare {
                first: *first,
                second: *second,
            }),
            [month] => Some(TimeWindow::Month { month: *month }),
            [] => self.quarter,
        }
    }

    fn is_follow_up(&self) -> bool {
        self.normalized.starts_with("and ") || self.has_any_phrase(FOLLOW_UP_PHRASES)
    }

    fn inherit_from(&mut self, history: &[ConversationTurn], metadata: &DatasetMetadata) {
        let start = history.len().saturating_sub(FOLLOW_UP_LOOKBACK);
        for turn in history[start..].iter().rev() {
            if turn.role != Role::User {
                continue;
            }
            let text = normalize(&turn.content);
            if self.product.is_none() && self.location.is_none() {
                if let Some(product) = match_entity(&text, metadata.products.iter()) {
                    self.product = Some(product);
                    self.inherited = true;
                }
                if let Some(location) = match_entity(&text, metadata.locations.iter()) {
                    self.location = Some(location);
                    self.inherited = true;
                }
            }
            if self.months.is_empty() && self.quarter.is_none() {
                let months = extract_months(&text);
                if !self.bare_months.is_empty() {
                    // A named month is never replaced by an earlier one;
                    // only its year is taken from context.
                    if let Some(year) = mention_year(&text) {
                        self.months = self
                            .bare_months
                            .iter()
                            .filter_map(|&month0| MonthRef::new(year, month0))
                            .collect();
                        self.inherited = true;
                    }
                } else if !months.is_empty() {
                    self.months = months;
                    self.inherited = true;
                } else if let Some(quarter) = extract_quarter(&text) {
                    self.quarter = Some(quarter);
                    self.inherited = true;
                }
            }
        }
    }
}

/// Lowercase, drop apostrophes, and fold every other non-alphanumeric
/// character to a single space.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the candidate named in `normalized_question`.
///
/// Substring containment first, longest match winning; then the
/// every-word-present fallback, again preferring the longest candidate.
pub fn match_entity<'a>(
    normalized_question: &str,
    candidates: impl Iterator<Item = &'a String>,
) -> Option<String> {
    let question_words: HashSet<&str> = normalized_question.split_whitespace().collect();
    let mut substring: Option<(usize, &String)> = None;
    let mut by_words: Option<(usize, &String)> = None;

    for candidate in candidates {
        let name = normalize(candidate);
        if name.is_empty() {
            continue;
        }
        if normalized_question.contains(&name) {
            if substring.map_or(true, |(len, _)| name.len() > len) {
                substring = Some((name.len(), candidate));
            }
        } else if name.split_whitespace().all(|w| question_words.contains(w))
            && by_words.map_or(true, |(len, _)| name.len() > len)
        {
            by_words = Some((name.len(), candidate));
        }
    }

    substring.or(by_words).map(|(_, c)| c.clone())
}

fn month_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\s+(\d{4})\b",
        )
        .expect("month pattern is valid")
    })
}

fn bare_month_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:(in|for|during|of|about)\s+)?(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b(?:\s+(\d{4})\b)?",
        )
        .expect("bare month pattern is valid")
    })
}

fn quarter_regexes() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r"\bq([1-4])\s*(?:of\s+)?(\d{4})\b").expect("quarter pattern is valid"),
            Regex::new(r"\b(first|second|third|fourth|1st|2nd|3rd|4th)\s+quarter\s+(?:of\s+)?(\d{4})\b")
                .expect("quarter pattern is valid"),
        )
    })
}

fn count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:top|bottom|best|worst)\s+(\d+|one|two|three|four|five|six|seven|eight|nine|ten)\b")
            .expect("count pattern is valid")
    })
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)\s*(?:%|percent\b)").expect("percent pattern is valid")
    })
}

fn month_index(token: &str) -> Option<u32> {
    let prefix = token.get(..3)?;
    crate::models::MONTH_NAMES
        .iter()
        .position(|name| name[..3].eq_ignore_ascii_case(prefix))
        .map(|i| i as u32)
}

/// Month/year mentions in order of appearance.
pub fn extract_months(normalized: &str) -> Vec<MonthRef> {
    month_regex()
        .captures_iter(normalized)
        .filter_map(|caps| {
            let month0 = month_index(&caps[1])?;
            let year: i32 = caps[2].parse().ok()?;
            MonthRef::new(year, month0)
        })
        .collect()
}

/// Month names not followed by a year, in order of appearance.
///
/// "may" only counts after a preposition ("in may"), since it is also a
/// common verb.
pub fn extract_bare_months(normalized: &str) -> Vec<u32> {
    bare_month_regex()
        .captures_iter(normalized)
        .filter(|caps| caps.get(3).is_none())
        .filter(|caps| &caps[2] != "may" || caps.get(1).is_some())
        .filter_map(|caps| month_index(&caps[2]))
        .collect()
}

/// The year of the latest month or quarter mentioned in `normalized`.
fn mention_year(normalized: &str) -> Option<i32> {
    if let Some(month) = extract_months(normalized).last() {
        return Some(month.year);
    }
    extract_quarter(normalized)?
        .months()
        .first()
        .map(|month| month.year)
}

/// A quarter mention expanded to its first and last month.
pub fn extract_quarter(normalized: &str) -> Option<TimeWindow> {
    let (short, long) = quarter_regexes();
    let (quarter, year) = if let Some(caps) = short.captures(normalized) {
        (caps[1].parse::<u32>().ok()?, caps[2].parse::<i32>().ok()?)
    } else {
        let caps = long.captures(normalized)?;
        let q = match &caps[1] {
            "first" | "1st" => 1,
            "second" | "2nd" => 2,
            "third" | "3rd" => 3,
            _ => 4,
        };
        (q, caps[2].parse::<i32>().ok()?)
    };
    let start = MonthRef::new(year, (quarter - 1) * 3)?;
    let end = MonthRef::new(year, (quarter - 1) * 3 + 2)?;
    Some(TimeWindow::Range { start, end })
}

/// Integer adjacent to a top/bottom keyword.
pub fn extract_count(normalized: &str) -> Option<usize> {
    let caps = count_regex().captures(normalized)?;
    let token = &caps[1];
    let n = match token {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        digits => digits.parse().ok()?,
    };
    (n > 0).then_some(n)
}

/// A percentage such as `20%` or `15 percent`.
pub fn extract_percent(lowercase: &str) -> Option<f64> {
    let caps = percent_regex().captures(lowercase)?;
    let pct: f64 = caps[1].parse().ok()?;
    (pct > 0.0 && pct <= 100.0).then_some(pct)
}

// ═══════════════════════════════════════════════════════════════════════
// Matchers
// ═══════════════════════════════════════════════════════════════════════

/// One link of the resolution chain.
///
/// `try_resolve` returns `Some` when the matcher recognises the question;
/// the resolver stops at the first `Some`.
pub trait IntentMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn try_resolve(&self, signals: &QuestionSignals) -> Option<Intent>;
}

/// Product named, one month, no location → scalar total.
pub struct ProductMonthMatcher;

impl IntentMatcher for ProductMonthMatcher {
    fn name(&self) -> &'static str {
        "product_month"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        if s.location.is_some() || s.months.len() != 1 || s.has_ranking_cue() {
            return None;
        }
        let product = s.product.clone()?;
        let mut intent = Intent::new(AggregationKind::ProductMonthTotal, 0.95);
        intent.product = Some(product);
        intent.window = s.window();
        Some(intent)
    }
}

/// Location named, one month, no product → scalar total.
pub struct LocationMonthMatcher;

impl IntentMatcher for LocationMonthMatcher {
    fn name(&self) -> &'static str {
        "location_month"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        if s.product.is_some() || s.months.len() != 1 || s.has_ranking_cue() {
            return None;
        }
        let location = s.location.clone()?;
        let mut intent = Intent::new(AggregationKind::LocationMonthTotal, 0.95);
        intent.location = Some(location);
        intent.window = s.window();
        Some(intent)
    }
}

/// "Top products" phrasing with a period and no specific product.
pub struct TopProductsMatcher;

impl IntentMatcher for TopProductsMatcher {
    fn name(&self) -> &'static str {
        "top_products"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        let top = s.has_any_word(&["top", "best", "bestselling"]) || s.has_phrase("most popular");
        if !top || !s.has_any_word(PRODUCT_WORDS) || s.product.is_some() {
            return None;
        }
        let window = s.window()?;
        let mut intent = Intent::new(AggregationKind::TopProducts, 0.9);
        intent.location = s.location.clone();
        intent.window = Some(window);
        intent.limit = Some(s.count.unwrap_or(DEFAULT_LIMIT));
        Some(intent)
    }
}

/// Store-ranking phrasing for a named product in one month.
pub struct LocationRankingMatcher;

impl IntentMatcher for LocationRankingMatcher {
    fn name(&self) -> &'static str {
        "location_ranking"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        if !s.has_any_phrase(LOCATION_RANKING_PHRASES) || s.months.len() != 1 {
            return None;
        }
        let product = s.product.clone()?;
        let mut intent = Intent::new(AggregationKind::LocationRanking, 0.9);
        intent.product = Some(product);
        intent.window = s.window();
        intent.limit = s.count;
        Some(intent)
    }
}

/// Revenue/sales wording with a month or quarter → period report.
pub struct PeriodRevenueMatcher;

impl IntentMatcher for PeriodRevenueMatcher {
    fn name(&self) -> &'static str {
        "period_revenue"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        if !s.has_any_word(&["revenue", "sales", "earnings", "income", "sold", "turnover"]) {
            return None;
        }
        let window = s.window()?;
        let mut intent = Intent::new(AggregationKind::PeriodRevenue, 0.85);
        intent.product = s.product.clone();
        intent.location = s.location.clone();
        intent.window = Some(window);
        Some(intent)
    }
}

/// Cut/eliminate/worst/bottom wording about products or items.
pub struct LowPerformerMatcher;

impl IntentMatcher for LowPerformerMatcher {
    fn name(&self) -> &'static str {
        "low_performers"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        let cut = s.has_any_word(&[
            "cut",
            "eliminate",
            "worst",
            "bottom",
            "drop",
            "discontinue",
            "remove",
            "underperforming",
            "underperformers",
            "weakest",
        ]);
        if !cut || !s.has_any_word(PRODUCT_WORDS) {
            return None;
        }
        let mut intent = Intent::new(AggregationKind::LowPerformers, 0.8);
        intent.location = s.location.clone();
        intent.window = s.window();
        intent.percent = s.percent;
        intent.limit = s.count;
        Some(intent)
    }
}

/// Store + average order value + highest/best.
pub struct StoreOrderValueMatcher;

impl IntentMatcher for StoreOrderValueMatcher {
    fn name(&self) -> &'static str {
        "store_order_value"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        let aov = s.has_word("aov")
            || s.has_phrase("average order value")
            || s.has_phrase("order value")
            || s.has_phrase("average order");
        let superlative = s.has_any_word(&[
            "highest", "best", "top", "largest", "biggest", "greatest", "most",
        ]);
        if !aov || !superlative || !s.has_any_word(STORE_WORDS) {
            return None;
        }
        let mut intent = Intent::new(AggregationKind::StoreOrderValue, 0.8);
        intent.window = s.window();
        intent.limit = s.count;
        Some(intent)
    }
}

/// Business-advice keywords; the catch-all before `General`.
pub struct AdviceMatcher;

impl IntentMatcher for AdviceMatcher {
    fn name(&self) -> &'static str {
        "advice"
    }

    fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
        if !s.has_any_word(ADVICE_KEYWORDS) && !s.has_word("recommendations") {
            return None;
        }
        let mut intent = Intent::general(s);
        intent.kind = AggregationKind::Advice;
        intent.confidence = 0.6;
        Some(intent)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════

/// Ordered chain of [`IntentMatcher`]s.
pub struct IntentResolver {
    matchers: Vec<Box<dyn IntentMatcher>>,
}

impl IntentResolver {
    /// The standard eight-step priority chain.
    pub fn new() -> Self {
        Self::with_matchers(vec![
            Box::new(ProductMonthMatcher),
            Box::new(LocationMonthMatcher),
            Box::new(TopProductsMatcher),
            Box::new(LocationRankingMatcher),
            Box::new(PeriodRevenueMatcher),
            Box::new(LowPerformerMatcher),
            Box::new(StoreOrderValueMatcher),
            Box::new(AdviceMatcher),
        ])
    }

    pub fn with_matchers(matchers: Vec<Box<dyn IntentMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Resolve `question` to an [`Intent`]. Never fails: unmatched
    /// questions become [`AggregationKind::General`].
    pub fn resolve(
        &self,
        question: &str,
        history: &[ConversationTurn],
        metadata: &DatasetMetadata,
    ) -> Intent {
        let signals = QuestionSignals::extract(question, history, metadata);
        self.resolve_signals(&signals)
    }

    pub fn resolve_signals(&self, signals: &QuestionSignals) -> Intent {
        let mut intent = self
            .matchers
            .iter()
            .find_map(|m| m.try_resolve(signals))
            .unwrap_or_else(|| Intent::general(signals));
        if signals.inherited {
            intent.inherited = true;
            intent.confidence = (intent.confidence - 0.1).max(0.0);
        }
        intent
    }
}

impl Default for IntentResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(products: &[&str], locations: &[&str]) -> DatasetMetadata {
        DatasetMetadata {
            products: products.iter().map(|s| s.to_string()).collect(),
            locations: locations.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn shop() -> DatasetMetadata {
        metadata(
            &["Acai Bowl", "Protein Acai Bowl", "Cold Brew", "Green Smoothie"],
            &["Downtown", "Airport", "Mall of America"],
        )
    }

    fn resolve(question: &str) -> Intent {
        IntentResolver::new().resolve(question, &[], &shop())
    }

    fn month(year: i32, month0: u32) -> MonthRef {
        MonthRef::new(year, month0).unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("What's  the AOV, Dec. 2024?"), "whats the aov dec 2024");
    }

    #[test]
    fn test_longest_match_wins() {
        let meta = shop();
        let q = normalize("How did the Protein Acai Bowl do in December 2024?");
        assert_eq!(
            match_entity(&q, meta.products.iter()).as_deref(),
            Some("Protein Acai Bowl")
        );
    }

    #[test]
    fn test_word_fallback_match() {
        let meta = shop();
        let q = normalize("sales at the america mall of in march 2024");
        assert_eq!(
            match_entity(&q, meta.locations.iter()).as_deref(),
            Some("Mall of America")
        );
        assert!(match_entity("nothing here", meta.locations.iter()).is_none());
    }

    #[test]
    fn test_extract_months_normalizes_abbreviations() {
        let months = extract_months(&normalize("Compare Nov 2024 with sept. 2025"));
        assert_eq!(months, vec![month(2024, 10), month(2025, 8)]);
        assert!(extract_months("march madness").is_empty());
        assert!(extract_months("may 24").is_empty());
    }

    #[test]
    fn test_extract_quarter() {
        assert_eq!(
            extract_quarter("revenue in q4 2024"),
            Some(TimeWindow::Range {
                start: month(2024, 9),
                end: month(2024, 11)
            })
        );
        assert_eq!(
            extract_quarter("the second quarter of 2025"),
            Some(TimeWindow::Range {
                start: month(2025, 3),
                end: month(2025, 5)
            })
        );
        assert!(extract_quarter("q5 2024").is_none());
    }

    #[test]
    fn test_extract_count_and_percent() {
        assert_eq!(extract_count("top 5 products"), Some(5));
        assert_eq!(extract_count("bottom three items"), Some(3));
        assert_eq!(extract_count("top products"), None);
        assert_eq!(extract_percent("cut the bottom 15% of items"), Some(15.0));
        assert_eq!(extract_percent("bottom 10 percent"), Some(10.0));
        assert_eq!(extract_percent("no numbers"), None);
    }

    #[test]
    fn test_product_month_total() {
        let intent = resolve("What were total sales for Cold Brew in December 2024?");
        assert_eq!(intent.kind, AggregationKind::ProductMonthTotal);
        assert_eq!(intent.product.as_deref(), Some("Cold Brew"));
        assert_eq!(intent.window.and_then(|w| w.single()), Some(month(2024, 11)));
    }

    #[test]
    fn test_protein_bowl_resolves_longest() {
        let intent = resolve("Sales of Protein Acai Bowl in Jan 2025");
        assert_eq!(intent.product.as_deref(), Some("Protein Acai Bowl"));
    }

    #[test]
    fn test_location_month_total() {
        let intent = resolve("How much did Downtown make in November 2024?");
        assert_eq!(intent.kind, AggregationKind::LocationMonthTotal);
        assert_eq!(intent.location.as_deref(), Some("Downtown"));
    }

    #[test]
    fn test_product_and_location_skip_scalar_matchers() {
        // Both named: neither scalar matcher fires; revenue wording does.
        let intent = resolve("Cold Brew sales at Airport in December 2024");
        assert_eq!(intent.kind, AggregationKind::PeriodRevenue);
        assert_eq!(intent.product.as_deref(), Some("Cold Brew"));
        assert_eq!(intent.location.as_deref(), Some("Airport"));
    }

    #[test]
    fn test_top_products() {
        let intent = resolve("What were the top 5 products in December 2024?");
        assert_eq!(intent.kind, AggregationKind::TopProducts);
        assert_eq!(intent.limit, Some(5));

        let intent = resolve("Show me the top selling items in Q4 2024");
        assert_eq!(intent.kind, AggregationKind::TopProducts);
        assert_eq!(intent.limit, Some(DEFAULT_LIMIT));
    }

    #[test]
    fn test_location_ranking() {
        let intent = resolve("Which store sold the most Green Smoothie in March 2025?");
        assert_eq!(intent.kind, AggregationKind::LocationRanking);
        assert_eq!(intent.product.as_deref(), Some("Green Smoothie"));
    }

    #[test]
    fn test_period_revenue_comparison() {
        let intent = resolve("Compare revenue for November 2024 and December 2024");
        assert_eq!(intent.kind, AggregationKind::PeriodRevenue);
        assert!(matches!(intent.window, Some(TimeWindow::Compare { .. })));
    }

    #[test]
    fn test_low_performers() {
        let intent = resolve("Which products should we cut? Show the bottom 10%");
        assert_eq!(intent.kind, AggregationKind::LowPerformers);
        assert_eq!(intent.percent, Some(10.0));
    }

    #[test]
    fn test_store_order_value() {
        let intent = resolve("Which store has the highest average order value?");
        assert_eq!(intent.kind, AggregationKind::StoreOrderValue);
        let intent = resolve("best AOV by location");
        assert_eq!(intent.kind, AggregationKind::StoreOrderValue);
    }

    #[test]
    fn test_advice_and_general() {
        let intent = resolve("How can we improve performance next quarter?");
        assert_eq!(intent.kind, AggregationKind::Advice);
        assert!(intent.kind.is_delegated());

        let intent = resolve("Tell me something interesting");
        assert_eq!(intent.kind, AggregationKind::General);
        assert!(intent.confidence < 0.5);
    }

    #[test]
    fn test_follow_up_inherits_product() {
        let history = vec![
            ConversationTurn::user("What were total sales for Cold Brew in December 2024?"),
            ConversationTurn::assistant("Cold Brew sold $1,200.00 in December 2024."),
        ];
        let intent =
            IntentResolver::new().resolve("What about January 2025?", &history, &shop());
        assert_eq!(intent.kind, AggregationKind::ProductMonthTotal);
        assert_eq!(intent.product.as_deref(), Some("Cold Brew"));
        assert_eq!(intent.window.and_then(|w| w.single()), Some(month(2025, 0)));
        assert!(intent.inherited);
        assert!((intent.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_follow_up_month_without_year_takes_year_from_context() {
        let history = vec![ConversationTurn::user(
            "total sales for Cold Brew in December 2024",
        )];
        let intent = IntentResolver::new().resolve("and in November?", &history, &shop());
        assert_eq!(intent.kind, AggregationKind::ProductMonthTotal);
        assert_eq!(intent.product.as_deref(), Some("Cold Brew"));
        assert_eq!(intent.window.and_then(|w| w.single()), Some(month(2024, 10)));
        assert!(intent.inherited);
    }

    #[test]
    fn test_follow_up_month_without_any_year_is_not_answered_for_another_month() {
        let history = vec![
            ConversationTurn::user("How is Cold Brew doing?"),
            ConversationTurn::user("total sales for Acai Bowl in December 2024"),
            ConversationTurn::user("ok, thanks"),
        ];
        // The most recent turn with a year names December; November must
        // not become December.
        let intent = IntentResolver::new().resolve("and in November?", &history, &shop());
        assert_ne!(
            intent.window.and_then(|w| w.single()),
            Some(month(2024, 11))
        );

        let history = vec![ConversationTurn::user("How is Cold Brew doing?")];
        let intent = IntentResolver::new().resolve("and in November?", &history, &shop());
        assert!(intent.window.is_none());
        assert_ne!(intent.kind, AggregationKind::ProductMonthTotal);
    }

    #[test]
    fn test_bare_month_extraction() {
        assert_eq!(extract_bare_months("and in november"), vec![10]);
        assert_eq!(extract_bare_months("what about sept"), vec![8]);
        assert_eq!(extract_bare_months("november 2024"), Vec::<u32>::new());
        assert_eq!(extract_bare_months("what may help sales"), Vec::<u32>::new());
        assert_eq!(extract_bare_months("and for may"), vec![4]);
    }

    #[test]
    fn test_non_follow_up_ignores_history() {
        let history = vec![ConversationTurn::user("Cold Brew in December 2024")];
        let intent = IntentResolver::new().resolve("Tell me a joke", &history, &shop());
        assert_eq!(intent.kind, AggregationKind::General);
        assert!(intent.product.is_none());
        assert!(!intent.inherited);
    }

    struct AlwaysGeneral;

    impl IntentMatcher for AlwaysGeneral {
        fn name(&self) -> &'static str {
            "always"
        }
        fn try_resolve(&self, s: &QuestionSignals) -> Option<Intent> {
            Some(Intent::general(s))
        }
    }

    #[test]
    fn test_custom_chain_order() {
        let resolver = IntentResolver::with_matchers(vec![
            Box::new(AlwaysGeneral),
            Box::new(ProductMonthMatcher),
        ]);
        assert_eq!(resolver.matcher_names(), vec!["always", "product_month"]);
        let intent = resolver.resolve("Cold Brew in December 2024", &[], &shop());
        assert_eq!(intent.kind, AggregationKind::General);
    }

    #[test]
    fn test_window_months() {
        let w = TimeWindow::Compare {
            first: month(2025, 1),
            second: month(2024, 11),
        };
        assert_eq!(w.months(), vec![month(2024, 11), month(2025, 0), month(2025, 1)]);
    }
}
