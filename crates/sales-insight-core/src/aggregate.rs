//! Aggregation engine: executes an [`Intent`] against the full record set.
//!
//! Every function here is pure. The same `(Intent, records)` input always
//! yields the same [`AggregationResult`], including tie ordering (ties are
//! broken by name).
//!
//! # Conventions
//!
//! - Month buckets compare `(year, month0)` exactly.
//! - Records without a parsed timestamp are excluded from time-bucketed
//!   aggregates (months, time of day, weekday) but still count toward totals
//!   that ignore time.
//! - Growth: `(current - previous) / previous × 100`, defined as `0` when
//!   `previous` is `0`.
//! - An empty selection yields [`AggregationResult::NoData`] instead of an
//!   error.

use chrono::{Datelike, Timelike, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::intent::{AggregationKind, Intent, TimeWindow, DEFAULT_LIMIT};
use crate::models::{MonthRef, TransactionRecord};

/// Default share of products selected by a low-performer question.
pub const DEFAULT_LOW_PERFORMER_PERCENT: f64 = 20.0;

// ============ Result types ============

/// One row of a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    /// 1-based position.
    pub rank: usize,
    pub name: String,
    pub amount: f64,
    /// Extra context for the entry, e.g. order counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One month of a chronological breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyEntry {
    pub month: MonthRef,
    pub label: String,
    pub total: f64,
    /// Growth against the preceding calendar month, in percent.
    pub growth_pct: f64,
}

/// Dimension of a bucket breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    TimeOfDay,
    DayOfWeek,
    DiscountCode,
}

/// One bucket of a per-dimension breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub amount: f64,
    /// Line items in the bucket.
    pub count: usize,
    /// Share of the breakdown total, in percent.
    pub share_pct: f64,
}

/// The computed answer to a resolved [`Intent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationResult {
    /// Scalar currency total.
    Total {
        label: String,
        amount: f64,
        line_items: usize,
    },
    /// Ranked `(entity, amount)` list.
    Ranked {
        title: String,
        entries: Vec<RankedEntry>,
    },
    /// Chronological per-month totals with growth.
    Monthly {
        title: String,
        entries: Vec<MonthlyEntry>,
    },
    /// Per-dimension buckets with percentage of total.
    Buckets {
        title: String,
        dimension: Dimension,
        buckets: Vec<Bucket>,
    },
    /// The smallest products by revenue and their combined share.
    LowPerformers {
        entries: Vec<RankedEntry>,
        /// Combined revenue of `entries`.
        combined: f64,
        /// Revenue of the whole selection.
        total: f64,
        share_pct: f64,
        /// Number of products considered.
        product_count: usize,
        /// Requested share of products, if the question gave one.
        percent: Option<f64>,
    },
    /// Nothing matched the selection.
    NoData { selection: String },
}

impl AggregationResult {
    pub fn is_no_data(&self) -> bool {
        matches!(self, AggregationResult::NoData { .. })
    }

    /// `true` for results the narrative layer formats without generation.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            AggregationResult::Total { .. }
                | AggregationResult::Ranked { .. }
                | AggregationResult::LowPerformers { .. }
        )
    }
}

// ============ Filtering ============

/// Product/location focus applied to every intent-driven aggregation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Focus<'a> {
    pub product: Option<&'a str>,
    pub location: Option<&'a str>,
}

impl<'a> Focus<'a> {
    pub fn from_intent(intent: &'a Intent) -> Self {
        Self {
            product: intent.product.as_deref(),
            location: intent.location.as_deref(),
        }
    }

    pub fn matches(&self, rec: &TransactionRecord) -> bool {
        self.product
            .map_or(true, |p| rec.product_name.eq_ignore_ascii_case(p))
            && self
                .location
                .map_or(true, |l| rec.store_location.eq_ignore_ascii_case(l))
    }

    /// e.g. `"Cold Brew at Airport"`, `"Airport"`, or `"all sales"`.
    pub fn describe(&self) -> String {
        match (self.product, self.location) {
            (Some(p), Some(l)) => format!("{} at {}", p, l),
            (Some(p), None) => p.to_string(),
            (None, Some(l)) => l.to_string(),
            (None, None) => "all sales".to_string(),
        }
    }
}

fn in_months(rec: &TransactionRecord, months: Option<&[MonthRef]>) -> bool {
    match months {
        None => true,
        Some(months) => rec.month().is_some_and(|m| months.contains(&m)),
    }
}

fn describe_selection(focus: Focus<'_>, window: Option<&TimeWindow>) -> String {
    match window {
        Some(w) => format!("{} in {}", focus.describe(), w.label()),
        None => focus.describe(),
    }
}

// ============ Engine ============

/// Execute `intent` against `records`.
///
/// Delegated intents ([`AggregationKind::Advice`], [`AggregationKind::General`])
/// produce the focus-filtered monthly breakdown, which the narrative layer
/// uses as its primary excerpt.
pub fn execute(intent: &Intent, records: &[TransactionRecord]) -> AggregationResult {
    let focus = Focus::from_intent(intent);
    let window = intent.window.as_ref();
    let window_months = window.map(TimeWindow::months);
    let months = window_months.as_deref();

    match intent.kind {
        AggregationKind::ProductMonthTotal | AggregationKind::LocationMonthTotal => {
            scalar_total(records, focus, window)
        }
        AggregationKind::TopProducts => {
            let limit = intent.limit.unwrap_or(DEFAULT_LIMIT);
            let totals = group_totals(records, focus, months, |r| &r.product_name);
            ranked(
                format!(
                    "Top {} products for {}",
                    limit,
                    describe_selection(focus, window)
                ),
                totals,
                Some(limit),
                describe_selection(focus, window),
            )
        }
        AggregationKind::LocationRanking => {
            let totals = group_totals(records, focus, months, |r| &r.store_location);
            ranked(
                format!("Locations ranked by {}", describe_selection(focus, window)),
                totals,
                intent.limit,
                describe_selection(focus, window),
            )
        }
        AggregationKind::PeriodRevenue => match window {
            Some(w) => period_report(records, focus, w),
            None => monthly_result(records, focus),
        },
        AggregationKind::LowPerformers => {
            let scope = Focus {
                product: None,
                location: focus.location,
            };
            let selection = describe_selection(scope, window);
            let (totals, total) = product_totals(records, scope, months);
            if totals.is_empty() {
                return AggregationResult::NoData { selection };
            }
            low_performers(&totals, total, intent.percent, intent.limit)
        }
        AggregationKind::StoreOrderValue => {
            let scoped: Vec<TransactionRecord> = records
                .iter()
                .filter(|r| in_months(r, months))
                .cloned()
                .collect();
            store_order_value_ranking(&scoped, intent.limit, describe_selection(focus, window))
        }
        AggregationKind::Advice | AggregationKind::General => monthly_result(records, focus),
    }
}

fn scalar_total(
    records: &[TransactionRecord],
    focus: Focus<'_>,
    window: Option<&TimeWindow>,
) -> AggregationResult {
    let months = window.map(TimeWindow::months);
    let selection = describe_selection(focus, window);
    let matching: Vec<&TransactionRecord> = records
        .iter()
        .filter(|r| focus.matches(r) && in_months(r, months.as_deref()))
        .collect();
    if matching.is_empty() {
        return AggregationResult::NoData { selection };
    }
    AggregationResult::Total {
        label: selection,
        amount: matching.iter().map(|r| r.line_total).sum(),
        line_items: matching.len(),
    }
}

fn ranked(
    title: String,
    totals: Vec<(String, f64)>,
    limit: Option<usize>,
    selection: String,
) -> AggregationResult {
    if totals.is_empty() {
        return AggregationResult::NoData { selection };
    }
    let entries = totals
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, (name, amount))| RankedEntry {
            rank: i + 1,
            name,
            amount,
            detail: None,
        })
        .collect();
    AggregationResult::Ranked { title, entries }
}

/// Sum `line_total` grouped by `key`, sorted by amount descending then name.
///
/// Rows with an empty key are skipped.
pub fn group_totals<F>(
    records: &[TransactionRecord],
    focus: Focus<'_>,
    months: Option<&[MonthRef]>,
    key: F,
) -> Vec<(String, f64)>
where
    F: Fn(&TransactionRecord) -> &String,
{
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for rec in records {
        let k = key(rec);
        if k.is_empty() || !focus.matches(rec) || !in_months(rec, months) {
            continue;
        }
        *totals.entry(k.as_str()).or_default() += rec.line_total;
    }
    let mut sorted: Vec<(String, f64)> = totals
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Product totals sorted descending, plus the revenue of the whole scope
/// (including rows with no product name).
pub fn product_totals(
    records: &[TransactionRecord],
    focus: Focus<'_>,
    months: Option<&[MonthRef]>,
) -> (Vec<(String, f64)>, f64) {
    let total = records
        .iter()
        .filter(|r| focus.matches(r) && in_months(r, months))
        .map(|r| r.line_total)
        .sum();
    (group_totals(records, focus, months, |r| &r.product_name), total)
}

/// Total revenue across every record, ignoring time.
pub fn total_revenue(records: &[TransactionRecord]) -> f64 {
    records.iter().map(|r| r.line_total).sum()
}

/// Month-over-month growth in percent; `0` when `previous` is `0`.
pub fn growth_pct(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Per-month totals of records matching `focus`. Records without a
/// timestamp are skipped.
pub fn monthly_totals(records: &[TransactionRecord], focus: Focus<'_>) -> BTreeMap<MonthRef, f64> {
    let mut totals = BTreeMap::new();
    for rec in records {
        if !focus.matches(rec) {
            continue;
        }
        if let Some(month) = rec.month() {
            *totals.entry(month).or_insert(0.0) += rec.line_total;
        }
    }
    totals
}

/// Chronological breakdown of every month with data, with growth against
/// the preceding calendar month.
pub fn monthly_breakdown(records: &[TransactionRecord], focus: Focus<'_>) -> Vec<MonthlyEntry> {
    let totals = monthly_totals(records, focus);
    totals
        .iter()
        .map(|(month, total)| {
            let previous = totals.get(&month.previous()).copied().unwrap_or(0.0);
            MonthlyEntry {
                month: *month,
                label: month.label(),
                total: *total,
                growth_pct: growth_pct(previous, *total),
            }
        })
        .collect()
}

fn monthly_result(records: &[TransactionRecord], focus: Focus<'_>) -> AggregationResult {
    let entries = monthly_breakdown(records, focus);
    if entries.is_empty() {
        return AggregationResult::NoData {
            selection: focus.describe(),
        };
    }
    AggregationResult::Monthly {
        title: format!("Monthly revenue for {}", focus.describe()),
        entries,
    }
}

fn period_report(
    records: &[TransactionRecord],
    focus: Focus<'_>,
    window: &TimeWindow,
) -> AggregationResult {
    let totals = monthly_totals(records, focus);
    let months = window.months();
    if !months.iter().any(|m| totals.contains_key(m)) {
        return AggregationResult::NoData {
            selection: describe_selection(focus, Some(window)),
        };
    }
    let entries = months
        .iter()
        .map(|month| {
            let total = totals.get(month).copied().unwrap_or(0.0);
            let previous = totals.get(&month.previous()).copied().unwrap_or(0.0);
            MonthlyEntry {
                month: *month,
                label: month.label(),
                total,
                growth_pct: growth_pct(previous, total),
            }
        })
        .collect();
    AggregationResult::Monthly {
        title: format!("Revenue for {}", describe_selection(focus, Some(window))),
        entries,
    }
}

/// Select the smallest products by revenue.
///
/// `totals` may be in any order. With a `percent`, the smallest
/// `⌈count × percent / 100⌉` products are taken; otherwise an explicit
/// `limit`; otherwise [`DEFAULT_LOW_PERFORMER_PERCENT`].
pub fn low_performers(
    totals: &[(String, f64)],
    total_revenue: f64,
    percent: Option<f64>,
    limit: Option<usize>,
) -> AggregationResult {
    let mut ascending = totals.to_vec();
    ascending.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let n = ascending.len();
    let take = match (percent, limit) {
        (Some(pct), _) => take_for_percent(n, pct),
        (None, Some(limit)) => limit.min(n),
        (None, None) => take_for_percent(n, DEFAULT_LOW_PERFORMER_PERCENT),
    };

    let entries: Vec<RankedEntry> = ascending
        .into_iter()
        .take(take)
        .enumerate()
        .map(|(i, (name, amount))| RankedEntry {
            rank: i + 1,
            name,
            amount,
            detail: None,
        })
        .collect();
    let combined: f64 = entries.iter().map(|e| e.amount).sum();
    let share_pct = if total_revenue == 0.0 {
        0.0
    } else {
        combined / total_revenue * 100.0
    };

    AggregationResult::LowPerformers {
        entries,
        combined,
        total: total_revenue,
        share_pct,
        product_count: n,
        percent,
    }
}

fn take_for_percent(n: usize, pct: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let raw = (n as f64 * pct / 100.0 - 1e-9).ceil().max(1.0);
    (raw as usize).min(n)
}

// ============ Order-level store performance ============

/// Order-level performance of one store.
///
/// Rows are first grouped by `transaction_id` into orders, so
/// `avg_order_value` is revenue per reconstructed order, not per line item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorePerformance {
    pub store: String,
    pub revenue: f64,
    pub orders: usize,
    pub line_items: usize,
    pub avg_order_value: f64,
    pub items_per_order: f64,
}

/// Reconstruct orders per store and compute order-level averages.
///
/// Sorted by revenue descending, then store name. Rows without a
/// transaction id count as single-line orders.
pub fn store_performance(records: &[TransactionRecord]) -> Vec<StorePerformance> {
    #[derive(Default)]
    struct Order {
        quantity: u64,
    }
    #[derive(Default)]
    struct Acc<'a> {
        revenue: f64,
        line_items: usize,
        orders: HashMap<&'a str, Order>,
        anonymous_orders: usize,
        anonymous_quantity: u64,
    }

    let mut stores: BTreeMap<&str, Acc<'_>> = BTreeMap::new();
    for rec in records {
        if rec.store_location.is_empty() {
            continue;
        }
        let acc = stores.entry(rec.store_location.as_str()).or_default();
        acc.revenue += rec.line_total;
        acc.line_items += 1;
        if rec.transaction_id.is_empty() {
            acc.anonymous_orders += 1;
            acc.anonymous_quantity += u64::from(rec.quantity);
        } else {
            acc.orders
                .entry(rec.transaction_id.as_str())
                .or_default()
                .quantity += u64::from(rec.quantity);
        }
    }

    let mut out: Vec<StorePerformance> = stores
        .into_iter()
        .map(|(store, acc)| {
            let orders = acc.orders.len() + acc.anonymous_orders;
            let quantity: u64 =
                acc.orders.values().map(|o| o.quantity).sum::<u64>() + acc.anonymous_quantity;
            let (avg_order_value, items_per_order) = if orders == 0 {
                (0.0, 0.0)
            } else {
                (acc.revenue / orders as f64, quantity as f64 / orders as f64)
            };
            StorePerformance {
                store: store.to_string(),
                revenue: acc.revenue,
                orders,
                line_items: acc.line_items,
                avg_order_value,
                items_per_order,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.store.cmp(&b.store))
    });
    out
}

fn store_order_value_ranking(
    records: &[TransactionRecord],
    limit: Option<usize>,
    selection: String,
) -> AggregationResult {
    let mut stores = store_performance(records);
    if stores.is_empty() {
        return AggregationResult::NoData { selection };
    }
    stores.sort_by(|a, b| {
        b.avg_order_value
            .total_cmp(&a.avg_order_value)
            .then_with(|| a.store.cmp(&b.store))
    });
    let entries = stores
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, s)| RankedEntry {
            rank: i + 1,
            detail: Some(format!(
                "{} orders, {:.1} items per order",
                s.orders, s.items_per_order
            )),
            name: s.store,
            amount: s.avg_order_value,
        })
        .collect();
    AggregationResult::Ranked {
        title: "Stores ranked by average order value".to_string(),
        entries,
    }
}

/// Line-item average: total revenue ÷ matching row count.
///
/// Not interchangeable with [`StorePerformance::avg_order_value`], which
/// divides by reconstructed orders.
pub fn average_line_value(records: &[TransactionRecord], focus: Focus<'_>) -> Option<f64> {
    let (sum, count) = records
        .iter()
        .filter(|r| focus.matches(r))
        .fold((0.0, 0usize), |(s, c), r| (s + r.line_total, c + 1));
    (count > 0).then(|| sum / count as f64)
}

// ============ Bucket breakdowns ============

/// Part of the day a purchase falls in, from the local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    /// `[6, 12)`
    Morning,
    /// `[12, 17)`
    Afternoon,
    /// `[17, 21)`
    Evening,
    /// `[21, 6)`, wrapping midnight.
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Afternoon,
        TimeOfDay::Evening,
        TimeOfDay::Night,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "Morning",
            TimeOfDay::Afternoon => "Afternoon",
            TimeOfDay::Evening => "Evening",
            TimeOfDay::Night => "Night",
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn finish_buckets(raw: Vec<(String, f64, usize)>) -> Vec<Bucket> {
    let total: f64 = raw.iter().map(|(_, amount, _)| amount).sum();
    raw.into_iter()
        .map(|(name, amount, count)| Bucket {
            name,
            amount,
            count,
            share_pct: if total == 0.0 {
                0.0
            } else {
                amount / total * 100.0
            },
        })
        .collect()
}

/// Revenue by time of day, in fixed morning → night order.
pub fn time_of_day_breakdown(records: &[TransactionRecord], focus: Focus<'_>) -> AggregationResult {
    let mut raw: Vec<(String, f64, usize)> = TimeOfDay::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), 0.0, 0))
        .collect();
    for rec in records.iter().filter(|r| focus.matches(r)) {
        if let Some(ts) = rec.purchased_at {
            let slot = TimeOfDay::ALL
                .iter()
                .position(|t| *t == TimeOfDay::from_hour(ts.hour()))
                .unwrap_or(TimeOfDay::ALL.len() - 1);
            raw[slot].1 += rec.line_total;
            raw[slot].2 += 1;
        }
    }
    AggregationResult::Buckets {
        title: format!("Revenue by time of day for {}", focus.describe()),
        dimension: Dimension::TimeOfDay,
        buckets: finish_buckets(raw),
    }
}

/// Revenue by weekday, Monday first.
pub fn weekday_breakdown(records: &[TransactionRecord], focus: Focus<'_>) -> AggregationResult {
    let mut raw: Vec<(String, f64, usize)> = (0..7)
        .map(|i| {
            let day = Weekday::Mon;
            let day = (0..i).fold(day, |d, _| d.succ());
            (weekday_name(day).to_string(), 0.0, 0)
        })
        .collect();
    for rec in records.iter().filter(|r| focus.matches(r)) {
        if let Some(ts) = rec.purchased_at {
            let slot = ts.weekday().num_days_from_monday() as usize;
            raw[slot].1 += rec.line_total;
            raw[slot].2 += 1;
        }
    }
    AggregationResult::Buckets {
        title: format!("Revenue by day of week for {}", focus.describe()),
        dimension: Dimension::DayOfWeek,
        buckets: finish_buckets(raw),
    }
}

/// Revenue by discount code, largest first; undiscounted lines last.
pub fn discount_breakdown(records: &[TransactionRecord], focus: Focus<'_>) -> AggregationResult {
    let mut codes: HashMap<&str, (f64, usize)> = HashMap::new();
    let mut none = (0.0, 0usize);
    for rec in records.iter().filter(|r| focus.matches(r)) {
        match rec.discount_code.as_deref() {
            Some(code) => {
                let slot = codes.entry(code).or_default();
                slot.0 += rec.line_total;
                slot.1 += 1;
            }
            None => {
                none.0 += rec.line_total;
                none.1 += 1;
            }
        }
    }
    let mut raw: Vec<(String, f64, usize)> = codes
        .into_iter()
        .map(|(code, (amount, count))| (code.to_string(), amount, count))
        .collect();
    raw.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if none.1 > 0 {
        raw.push(("No discount".to_string(), none.0, none.1));
    }
    AggregationResult::Buckets {
        title: format!("Revenue by discount code for {}", focus.describe()),
        dimension: Dimension::DiscountCode,
        buckets: finish_buckets(raw),
    }
}
