//! Trend-based recommendation engine.
//!
//! Scans the full record set for month-over-month movement per product,
//! per store, and per discount code, then composes a short, heterogeneous
//! list with a fixed template:
//!
//! | Slot | Content |
//! |------|---------|
//! | 1–2 | Products with the largest absolute dollar decline |
//! | 3 | Exactly one store (largest absolute % change, or a synthesized entry) |
//! | 4.. | Remaining unique targets up to [`MAX_RECOMMENDATIONS`] |
//!
//! Each entity is diffed over its own two most recent months of data.
//! Seasonality notes compare the same calendar pair one year earlier and
//! never affect ranking.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::aggregate::growth_pct;
use crate::models::{format_currency, format_percent, MonthRef, TransactionRecord};

/// Stores whose prior-month revenue is below this are too small to rank.
pub const STORE_NOISE_FLOOR: f64 = 100.0;

/// Upper bound on the composed list.
pub const MAX_RECOMMENDATIONS: usize = 6;

/// Declining products placed ahead of the store slot.
const LEADING_PRODUCTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Product,
    Store,
    Discount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationAction {
    ReverseDecline,
    MaintainGrowth,
    MonitorPerformance,
    ExpandPromotion,
}

impl RecommendationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationAction::ReverseDecline => "reverse_decline",
            RecommendationAction::MaintainGrowth => "maintain_growth",
            RecommendationAction::MonitorPerformance => "monitor_performance",
            RecommendationAction::ExpandPromotion => "expand_promotion",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            RecommendationAction::ReverseDecline => "Reverse the decline of",
            RecommendationAction::MaintainGrowth => "Maintain growth at",
            RecommendationAction::MonitorPerformance => "Monitor performance of",
            RecommendationAction::ExpandPromotion => "Expand the promotion",
        }
    }
}

/// A ranked, trend-derived suggestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub action: RecommendationAction,
    pub target: String,
    /// Metric label, e.g. `"Monthly revenue"`.
    pub metric: String,
    /// Formatted current value of the metric.
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
    /// Percentage and absolute change, in words.
    pub impact: String,
    /// Informational seasonality note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub delta: f64,
    pub delta_pct: f64,
}

impl Recommendation {
    /// One-line form for context bundles and the CLI.
    pub fn headline(&self) -> String {
        let mut line = format!("{} {}: {}", self.action.verb(), self.target, self.impact);
        if let Some(note) = &self.note {
            line.push_str(" (");
            line.push_str(note);
            line.push(')');
        }
        line
    }
}

// ============ Trends ============

/// Movement of one entity between its two most recent months.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    pub entity: String,
    pub previous_month: MonthRef,
    pub current_month: MonthRef,
    pub previous: f64,
    pub current: f64,
    pub delta: f64,
    pub delta_pct: f64,
    pub seasonality: Option<String>,
}

type Series = BTreeMap<String, BTreeMap<MonthRef, f64>>;

fn build_series<F>(records: &[TransactionRecord], key: F) -> Series
where
    F: Fn(&TransactionRecord) -> Option<&str>,
{
    let mut series: Series = BTreeMap::new();
    for rec in records {
        let (Some(k), Some(month)) = (key(rec), rec.month()) else {
            continue;
        };
        if k.is_empty() {
            continue;
        }
        *series
            .entry(k.to_string())
            .or_default()
            .entry(month)
            .or_insert(0.0) += rec.line_total;
    }
    series
}

/// Diff the two most recent months of `months`, if there are two.
pub fn trend_for(entity: &str, months: &BTreeMap<MonthRef, f64>) -> Option<Trend> {
    let mut recent = months.iter().rev();
    let (current_month, current) = recent.next()?;
    let (previous_month, previous) = recent.next()?;
    let delta = current - previous;
    Some(Trend {
        entity: entity.to_string(),
        previous_month: *previous_month,
        current_month: *current_month,
        previous: *previous,
        current: *current,
        delta,
        delta_pct: growth_pct(*previous, *current),
        seasonality: seasonality_note(months, *previous_month, *current_month, delta),
    })
}

fn seasonality_note(
    months: &BTreeMap<MonthRef, f64>,
    previous_month: MonthRef,
    current_month: MonthRef,
    delta: f64,
) -> Option<String> {
    let earlier_prev = previous_month.year_earlier();
    let earlier_cur = current_month.year_earlier();
    let then_prev = months.get(&earlier_prev)?;
    let then_cur = months.get(&earlier_cur)?;
    let then_delta = then_cur - then_prev;
    if then_delta == 0.0 || delta == 0.0 || then_delta.signum() == delta.signum() {
        return None;
    }
    Some(format!(
        "last year {} to {} moved {}, so this may be seasonal",
        earlier_prev.label(),
        earlier_cur.label(),
        format_percent(growth_pct(*then_prev, *then_cur))
    ))
}

fn impact(t: &Trend) -> String {
    let direction = if t.delta < 0.0 { "fell" } else { "rose" };
    format!(
        "revenue {} {} ({}) from {} to {}",
        direction,
        format_percent(t.delta_pct),
        signed_currency(t.delta),
        t.previous_month.label(),
        t.current_month.label()
    )
}

fn signed_currency(amount: f64) -> String {
    if amount >= 0.0 {
        format!("+{}", format_currency(amount))
    } else {
        format_currency(amount)
    }
}

fn from_trend(kind: RecommendationKind, action: RecommendationAction, t: &Trend) -> Recommendation {
    Recommendation {
        kind,
        action,
        target: t.entity.clone(),
        metric: "Monthly revenue".to_string(),
        value: format_currency(t.current),
        benchmark: Some(format!(
            "{} in {}",
            format_currency(t.previous),
            t.previous_month.label()
        )),
        impact: impact(t),
        note: t.seasonality.clone(),
        delta: t.delta,
        delta_pct: t.delta_pct,
    }
}

fn store_action(t: &Trend) -> RecommendationAction {
    if t.delta < 0.0 {
        RecommendationAction::ReverseDecline
    } else if t.delta > 0.0 {
        RecommendationAction::MaintainGrowth
    } else {
        RecommendationAction::MonitorPerformance
    }
}

// ============ Engine ============

/// Compose the recommendation list for `records`.
///
/// Returns an empty list when the dataset covers fewer than two months.
pub fn recommend(records: &[TransactionRecord]) -> Vec<Recommendation> {
    let dataset_months: Vec<MonthRef> = {
        let mut m: Vec<MonthRef> = records.iter().filter_map(|r| r.month()).collect();
        m.sort();
        m.dedup();
        m
    };
    if dataset_months.len() < 2 {
        return Vec::new();
    }

    let product_trends: Vec<Trend> = build_series(records, |r| Some(r.product_name.as_str()))
        .iter()
        .filter_map(|(name, months)| trend_for(name, months))
        .collect();
    let store_series = build_series(records, |r| Some(r.store_location.as_str()));
    let store_trends: Vec<Trend> = store_series
        .iter()
        .filter_map(|(name, months)| trend_for(name, months))
        .collect();

    let mut declining: Vec<&Trend> = product_trends.iter().filter(|t| t.delta < 0.0).collect();
    declining.sort_by(|a, b| a.delta.total_cmp(&b.delta).then_with(|| a.entity.cmp(&b.entity)));

    let mut growing: Vec<&Trend> = product_trends.iter().filter(|t| t.delta > 0.0).collect();
    growing.sort_by(|a, b| b.delta.total_cmp(&a.delta).then_with(|| a.entity.cmp(&b.entity)));

    let mut stores: Vec<&Trend> = store_trends
        .iter()
        .filter(|t| t.previous >= STORE_NOISE_FLOOR)
        .collect();
    stores.sort_by(|a, b| {
        b.delta_pct
            .abs()
            .total_cmp(&a.delta_pct.abs())
            .then_with(|| a.entity.cmp(&b.entity))
    });

    let mut composer = Composer::default();

    for t in declining.iter().take(LEADING_PRODUCTS) {
        composer.push(from_trend(
            RecommendationKind::Product,
            RecommendationAction::ReverseDecline,
            t,
        ));
    }

    match stores.first() {
        Some(t) => composer.push(from_trend(RecommendationKind::Store, store_action(t), t)),
        None => composer.push(fallback_store(&store_series, &dataset_months)),
    };

    let mut pool: Vec<Recommendation> = Vec::new();
    pool.extend(declining.iter().skip(LEADING_PRODUCTS).map(|t| {
        from_trend(
            RecommendationKind::Product,
            RecommendationAction::ReverseDecline,
            t,
        )
    }));
    pool.extend(discount_recommendations(records, &dataset_months));
    pool.extend(
        stores
            .iter()
            .skip(1)
            .map(|t| from_trend(RecommendationKind::Store, store_action(t), t)),
    );
    pool.extend(growing.iter().map(|t| {
        from_trend(
            RecommendationKind::Product,
            RecommendationAction::MaintainGrowth,
            t,
        )
    }));

    for rec in pool {
        if composer.items.len() >= MAX_RECOMMENDATIONS {
            break;
        }
        composer.push(rec);
    }
    composer.items
}

/// Targets are unique per kind: a product and a store may share a name.
#[derive(Default)]
struct Composer {
    items: Vec<Recommendation>,
    targets: HashSet<(RecommendationKind, String)>,
}

impl Composer {
    fn push(&mut self, rec: Recommendation) {
        if self.targets.insert((rec.kind, rec.target.to_lowercase())) {
            self.items.push(rec);
        }
    }
}

/// Store slot when no store clears the noise floor: the highest-revenue
/// store of the latest dataset month, flagged for monitoring.
fn fallback_store(series: &Series, dataset_months: &[MonthRef]) -> Recommendation {
    let latest = dataset_months.last().copied();
    let best = series
        .iter()
        .filter_map(|(name, months)| {
            let month = latest?;
            months.get(&month).map(|v| (name, *v))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)));

    let label = latest.map(|m| m.label()).unwrap_or_default();
    match best {
        Some((name, revenue)) => Recommendation {
            kind: RecommendationKind::Store,
            action: RecommendationAction::MonitorPerformance,
            target: name.clone(),
            metric: "Monthly revenue".to_string(),
            value: format_currency(revenue),
            benchmark: None,
            impact: format!(
                "no store moved enough to rank; {} led {} with {}",
                name,
                label,
                format_currency(revenue)
            ),
            note: None,
            delta: 0.0,
            delta_pct: 0.0,
        },
        None => Recommendation {
            kind: RecommendationKind::Store,
            action: RecommendationAction::MonitorPerformance,
            target: "All stores".to_string(),
            metric: "Monthly revenue".to_string(),
            value: format_currency(0.0),
            benchmark: None,
            impact: format!("no store recorded sales in {}", label),
            note: None,
            delta: 0.0,
            delta_pct: 0.0,
        },
    }
}

/// Codes whose revenue grew between the two most recent dataset months.
fn discount_recommendations(
    records: &[TransactionRecord],
    dataset_months: &[MonthRef],
) -> Vec<Recommendation> {
    let [.., previous_month, current_month] = dataset_months else {
        return Vec::new();
    };
    let series = build_series(records, |r| r.discount_code.as_deref());
    let mut trends: Vec<Trend> = series
        .iter()
        .filter_map(|(code, months)| {
            let previous = months.get(previous_month).copied().unwrap_or(0.0);
            let current = months.get(current_month).copied().unwrap_or(0.0);
            (current > previous).then(|| Trend {
                entity: code.clone(),
                previous_month: *previous_month,
                current_month: *current_month,
                previous,
                current,
                delta: current - previous,
                delta_pct: growth_pct(previous, current),
                seasonality: None,
            })
        })
        .collect();
    trends.sort_by(|a, b| b.delta.total_cmp(&a.delta).then_with(|| a.entity.cmp(&b.entity)));
    trends
        .iter()
        .map(|t| {
            let mut rec = from_trend(
                RecommendationKind::Discount,
                RecommendationAction::ExpandPromotion,
                t,
            );
            rec.metric = "Discounted revenue".to_string();
            rec
        })
        .collect()
}
