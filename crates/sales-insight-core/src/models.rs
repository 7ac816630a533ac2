//! Core data models: transaction records, month keys, and row parsing.
//!
//! The record source hands over an ordered 2-D grid of strings (header row
//! first). [`parse_grid`] converts it exactly once into strongly-typed
//! [`TransactionRecord`]s so that no downstream code touches column indices.
//!
//! # Tolerance
//!
//! Row-level problems never abort parsing:
//! - unparseable currency or quantity cells become `0`
//! - unparseable timestamps leave [`TransactionRecord::purchased_at`] empty,
//!   which excludes the record from time-bucketed aggregates only
//!
//! Every such problem is recorded as a [`ParseWarning`] in the
//! [`ParseReport`] so callers can log totals.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Full English month names, indexed by zero-based month.
pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A calendar month bucket: `(year, zero-based month index)`.
///
/// Ordering is chronological (year first, then month), so a `BTreeMap`
/// keyed by `MonthRef` iterates oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MonthRef {
    pub year: i32,
    /// Zero-based month index (`0` = January).
    pub month0: u32,
}

impl MonthRef {
    /// Returns `None` when `month0` is not in `0..12`.
    pub fn new(year: i32, month0: u32) -> Option<Self> {
        (month0 < 12).then_some(Self { year, month0 })
    }

    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month0: dt.month0(),
        }
    }

    /// Human-readable label, e.g. `"December 2024"`.
    pub fn label(&self) -> String {
        format!("{} {}", MONTH_NAMES[self.month0 as usize], self.year)
    }

    /// Sortable key, e.g. `"2024-12"`.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month0 + 1)
    }

    pub fn previous(&self) -> Self {
        if self.month0 == 0 {
            Self {
                year: self.year - 1,
                month0: 11,
            }
        } else {
            Self {
                year: self.year,
                month0: self.month0 - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month0 == 11 {
            Self {
                year: self.year + 1,
                month0: 0,
            }
        } else {
            Self {
                year: self.year,
                month0: self.month0 + 1,
            }
        }
    }

    /// The same calendar month one year earlier.
    pub fn year_earlier(&self) -> Self {
        Self {
            year: self.year - 1,
            month0: self.month0,
        }
    }

    /// All months from `self` to `end` inclusive. Empty if `end < self`.
    pub fn through(&self, end: MonthRef) -> Vec<MonthRef> {
        let mut months = Vec::new();
        let mut cursor = *self;
        while cursor <= end {
            months.push(cursor);
            cursor = cursor.next();
        }
        months
    }
}

impl std::fmt::Display for MonthRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// One sold line item. An order may span several records sharing
/// `transaction_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    /// Purchase time in business-local wall-clock time. `None` when the
    /// source cell could not be parsed.
    pub purchased_at: Option<NaiveDateTime>,
    pub customer_id: String,
    pub store_location: String,
    pub product_name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub discount_code: Option<String>,
    pub line_total: f64,
}

impl TransactionRecord {
    /// Month bucket of the purchase, if the timestamp parsed.
    pub fn month(&self) -> Option<MonthRef> {
        self.purchased_at.as_ref().map(MonthRef::from_datetime)
    }
}

// ============ Columns ============

/// Logical columns of the transaction grid, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    TransactionId,
    PurchaseDate,
    CustomerId,
    StoreLocation,
    ProductName,
    UnitPrice,
    Quantity,
    DiscountCode,
    LineTotal,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::TransactionId,
        Column::PurchaseDate,
        Column::CustomerId,
        Column::StoreLocation,
        Column::ProductName,
        Column::UnitPrice,
        Column::Quantity,
        Column::DiscountCode,
        Column::LineTotal,
    ];

    /// Canonical header text as it appears in the source sheet.
    pub fn header(&self) -> &'static str {
        match self {
            Column::TransactionId => "Transaction_ID",
            Column::PurchaseDate => "Purchase_Date",
            Column::CustomerId => "Customer_ID",
            Column::StoreLocation => "Store_Location",
            Column::ProductName => "Product_Name",
            Column::UnitPrice => "Unit_Price",
            Column::Quantity => "Quantity",
            Column::DiscountCode => "Discount_Code_Used",
            Column::LineTotal => "Line_Total",
        }
    }

    fn matches_header(&self, cell: &str) -> bool {
        squash_header(cell) == squash_header(self.header())
    }
}

fn squash_header(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolved cell index for each [`Column`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    indices: [usize; 9],
}

impl ColumnMap {
    /// The fixed positional layout used when no header is recognised.
    pub fn positional() -> Self {
        Self {
            indices: [0, 1, 2, 3, 4, 5, 6, 7, 8],
        }
    }

    /// Locate columns by header name.
    ///
    /// Falls back to [`ColumnMap::positional`] unless every column is found.
    pub fn from_header(header: &[String]) -> Self {
        let mut indices = [0usize; 9];
        for (slot, column) in Column::ALL.iter().enumerate() {
            match header.iter().position(|cell| column.matches_header(cell)) {
                Some(idx) => indices[slot] = idx,
                None => return Self::positional(),
            }
        }
        Self { indices }
    }

    fn cell<'a>(&self, row: &'a [String], column: Column) -> &'a str {
        row.get(self.indices[column as usize])
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

// ============ Parse report ============

/// A recoverable, row-level parsing problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// The purchase timestamp could not be parsed; the record is kept but
    /// excluded from time-bucketed aggregates.
    InvalidTimestamp { row: usize, value: String },
    /// A numeric cell could not be parsed and was treated as `0`.
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },
}

/// Summary of a [`parse_grid`] run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseReport {
    /// Data rows seen (header excluded).
    pub rows_seen: usize,
    /// Rows skipped because every cell was blank.
    pub blank_rows: usize,
    pub warnings: Vec<ParseWarning>,
}

impl ParseReport {
    pub fn invalid_timestamps(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, ParseWarning::InvalidTimestamp { .. }))
            .count()
    }

    pub fn invalid_numbers(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, ParseWarning::InvalidNumber { .. }))
            .count()
    }
}

/// Output of [`parse_grid`].
#[derive(Debug, Clone, Default)]
pub struct ParsedDataset {
    pub records: Vec<TransactionRecord>,
    pub report: ParseReport,
}

/// Convert a raw grid (header row first) into typed records.
///
/// Timestamps carrying an explicit UTC offset are converted into
/// `business_offset`; naive timestamps are taken as already being in
/// business-local time.
pub fn parse_grid(grid: &[Vec<String>], business_offset: FixedOffset) -> ParsedDataset {
    let mut parsed = ParsedDataset::default();
    let Some((header, rows)) = grid.split_first() else {
        return parsed;
    };
    let columns = ColumnMap::from_header(header);

    for (idx, row) in rows.iter().enumerate() {
        // 1-based, counting the header as row 1
        let row_no = idx + 2;
        parsed.report.rows_seen += 1;

        if row.iter().all(|cell| cell.trim().is_empty()) {
            parsed.report.blank_rows += 1;
            continue;
        }

        let raw_ts = columns.cell(row, Column::PurchaseDate);
        let purchased_at = parse_timestamp(raw_ts, business_offset);
        if purchased_at.is_none() {
            parsed.report.warnings.push(ParseWarning::InvalidTimestamp {
                row: row_no,
                value: raw_ts.to_string(),
            });
        }

        let mut number = |column: Column| -> f64 {
            let raw = columns.cell(row, column);
            match parse_currency(raw) {
                Some(v) => v,
                None => {
                    parsed.report.warnings.push(ParseWarning::InvalidNumber {
                        row: row_no,
                        column: column.header(),
                        value: raw.to_string(),
                    });
                    0.0
                }
            }
        };

        let unit_price = number(Column::UnitPrice);
        let quantity = number(Column::Quantity);
        let line_total = number(Column::LineTotal);

        let discount = columns.cell(row, Column::DiscountCode);
        let discount_code = match discount.to_ascii_lowercase().as_str() {
            "" | "none" | "n/a" | "na" | "-" | "no" | "false" => None,
            _ => Some(discount.to_string()),
        };

        parsed.records.push(TransactionRecord {
            transaction_id: columns.cell(row, Column::TransactionId).to_string(),
            purchased_at,
            customer_id: columns.cell(row, Column::CustomerId).to_string(),
            store_location: columns.cell(row, Column::StoreLocation).to_string(),
            product_name: columns.cell(row, Column::ProductName).to_string(),
            unit_price,
            quantity: if quantity.is_finite() && quantity > 0.0 {
                quantity.round() as u32
            } else {
                0
            },
            discount_code,
            line_total,
        });
    }

    parsed
}

// ============ Scalar parsing ============

/// Parse a currency or plain numeric cell.
///
/// Accepts `$`, thousands separators, surrounding whitespace, and a leading
/// minus or accounting parentheses. Blank cells are `Some(0.0)`; anything
/// else unparseable is `None`.
pub fn parse_currency(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '\u{a0}'))
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

const NAIVE_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse a purchase timestamp into business-local wall-clock time.
pub fn parse_timestamp(raw: &str, business_offset: FixedOffset) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&business_offset).naive_local());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

// ============ Formatting ============

/// Format an amount as US currency, e.g. `$1,234.50` or `-$12.00`.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, frac)
}

/// Format a signed percentage with one decimal, e.g. `+12.5%`.
pub fn format_percent(pct: f64) -> String {
    if pct > 0.0 {
        format!("+{:.1}%", pct)
    } else {
        format!("{:.1}%", pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn header() -> Vec<String> {
        Column::ALL.iter().map(|c| c.header().to_string()).collect()
    }

    #[test]
    fn test_month_ref_navigation() {
        let jan = MonthRef::new(2025, 0).unwrap();
        assert_eq!(jan.previous(), MonthRef::new(2024, 11).unwrap());
        assert_eq!(jan.previous().next(), jan);
        assert_eq!(jan.label(), "January 2025");
        assert_eq!(jan.key(), "2025-01");
        assert!(MonthRef::new(2025, 12).is_none());
    }

    #[test]
    fn test_month_ref_through() {
        let nov = MonthRef::new(2024, 10).unwrap();
        let feb = MonthRef::new(2025, 1).unwrap();
        let months = nov.through(feb);
        assert_eq!(months.len(), 4);
        assert_eq!(months[2], MonthRef::new(2025, 0).unwrap());
        assert!(feb.through(nov).is_empty());
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,234.50"), Some(1234.5));
        assert_eq!(parse_currency(" 12 "), Some(12.0));
        assert_eq!(parse_currency(""), Some(0.0));
        assert_eq!(parse_currency("(5.00)"), Some(-5.0));
        assert_eq!(parse_currency("abc"), None);
        assert_eq!(parse_currency("NaN"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 12, 3)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-12-03 14:05:00", utc()), Some(expected));
        assert_eq!(parse_timestamp("12/3/2024 14:05", utc()), Some(expected));
        assert_eq!(parse_timestamp("2024-12-03T14:05:00Z", utc()), Some(expected));
        assert!(parse_timestamp("not a date", utc()).is_none());
        assert!(parse_timestamp("", utc()).is_none());
    }

    #[test]
    fn test_parse_timestamp_converts_offsets() {
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        let dt = parse_timestamp("2025-01-01T02:00:00Z", eastern).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 12);
    }

    #[test]
    fn test_parse_grid_header_by_name() {
        // Shuffled header: columns are located by name, not position.
        let mut h = header();
        h.swap(0, 8);
        let mut r = row(&[
            "T1", "2024-12-01 09:00:00", "C1", "Downtown", "Acai Bowl", "$5.00", "2", "",
            "$10.00",
        ]);
        r.swap(0, 8);
        let parsed = parse_grid(&[h, r], utc());
        assert_eq!(parsed.records.len(), 1);
        let rec = &parsed.records[0];
        assert_eq!(rec.transaction_id, "T1");
        assert_eq!(rec.line_total, 10.0);
        assert_eq!(rec.quantity, 2);
        assert!(rec.discount_code.is_none());
    }

    #[test]
    fn test_parse_grid_tolerates_bad_cells() {
        let grid = vec![
            header(),
            row(&["T1", "garbage", "C1", "Downtown", "Latte", "x", "1", "SAVE10", "4.50"]),
            row(&["", "", "", "", "", "", "", "", ""]),
            row(&["T2", "2024-11-02", "C2", "Uptown"]),
        ];
        let parsed = parse_grid(&grid, utc());
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.report.rows_seen, 3);
        assert_eq!(parsed.report.blank_rows, 1);
        assert_eq!(parsed.report.invalid_timestamps(), 1);
        assert_eq!(parsed.report.invalid_numbers(), 1);

        let first = &parsed.records[0];
        assert!(first.purchased_at.is_none());
        assert_eq!(first.unit_price, 0.0);
        assert_eq!(first.line_total, 4.5);
        assert_eq!(first.discount_code.as_deref(), Some("SAVE10"));

        // Short row: missing cells are blank, which parse as zero.
        let second = &parsed.records[1];
        assert_eq!(second.product_name, "");
        assert_eq!(second.line_total, 0.0);
    }

    #[test]
    fn test_parse_grid_empty() {
        let parsed = parse_grid(&[], utc());
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.report.rows_seen, 0);
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(70.0), "$70.00");
        assert_eq!(format_currency(1234567.891), "$1,234,567.89");
        assert_eq!(format_currency(-12.5), "-$12.50");
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(999.999), "$1,000.00");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(12.345), "+12.3%");
        assert_eq!(format_percent(-4.0), "-4.0%");
        assert_eq!(format_percent(0.0), "0.0%");
    }
}
