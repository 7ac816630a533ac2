//! Dataset metadata: known products, known locations, and covered months.
//!
//! Rebuilt from the full record set on every request. An empty record set
//! yields empty metadata, which callers treat as "no data" rather than an
//! error.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::{MonthRef, TransactionRecord};

/// Summary of the distinct entities and date coverage of a record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetMetadata {
    /// Distinct non-empty product names, sorted.
    pub products: BTreeSet<String>,
    /// Distinct non-empty store locations, sorted.
    pub locations: BTreeSet<String>,
    /// Covered months, ascending. Records with unparseable timestamps do not
    /// contribute.
    pub months: Vec<MonthRef>,
    /// `"Month Year"` labels, parallel to `months`.
    pub month_labels: Vec<String>,
    pub record_count: usize,
}

impl DatasetMetadata {
    /// Build metadata in a single pass over `records`.
    pub fn build(records: &[TransactionRecord]) -> Self {
        let mut products = BTreeSet::new();
        let mut locations = BTreeSet::new();
        let mut months = BTreeSet::new();

        for rec in records {
            if !rec.product_name.is_empty() {
                products.insert(rec.product_name.clone());
            }
            if !rec.store_location.is_empty() {
                locations.insert(rec.store_location.clone());
            }
            if let Some(month) = rec.month() {
                months.insert(month);
            }
        }

        let months: Vec<MonthRef> = months.into_iter().collect();
        let month_labels = months.iter().map(MonthRef::label).collect();

        Self {
            products,
            locations,
            months,
            month_labels,
            record_count: records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn latest_month(&self) -> Option<MonthRef> {
        self.months.last().copied()
    }

    /// One-paragraph description for the narrative context bundle.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "The dataset contains no transactions.".to_string();
        }
        let coverage = match (self.month_labels.first(), self.month_labels.last()) {
            (Some(first), Some(last)) if first == last => format!("covering {}", first),
            (Some(first), Some(last)) => format!(
                "covering {} months from {} to {}",
                self.months.len(),
                first,
                last
            ),
            _ => "with no parseable purchase dates".to_string(),
        };
        format!(
            "The dataset contains {} line items {}. Products ({}): {}. Store locations ({}): {}.",
            self.record_count,
            coverage,
            self.products.len(),
            join_names(&self.products),
            self.locations.len(),
            join_names(&self.locations),
        )
    }
}

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
