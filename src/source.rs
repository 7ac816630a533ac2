//! Record sources: where the raw transaction grid comes from.
//!
//! A [`RecordSource`] returns the dataset as an ordered 2-D grid of strings,
//! header row first. [`load_dataset`] turns that grid into typed records
//! once per request.
//!
//! | Source | Config | Backing |
//! |--------|--------|---------|
//! | [`CsvSource`] | `source = "csv"` | Local CSV file |
//! | [`SheetsSource`] | `source = "sheets"` | Spreadsheet values API over HTTP |
//! | [`StaticSource`] | n/a | In-memory grid, for tests and embedding |

use async_trait::async_trait;
use chrono::FixedOffset;
use std::path::PathBuf;
use std::time::Duration;

use sales_insight_core::models::{parse_grid, ParsedDataset};

use crate::config::{Config, Credentials};
use crate::error::{ConfigError, SourceError};

/// Supplier of the raw transaction grid.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name for logs, e.g. `"csv"`.
    fn name(&self) -> &str;

    /// Fetch every row, header first.
    async fn fetch_grid(&self) -> Result<Vec<Vec<String>>, SourceError>;
}

/// Build the source selected by `[dataset]`.
pub fn create_source(
    config: &Config,
    credentials: &Credentials,
) -> Result<Box<dyn RecordSource>, ConfigError> {
    let dataset = &config.dataset;
    match dataset.source.as_str() {
        "csv" => {
            let path = dataset
                .path
                .clone()
                .ok_or_else(|| ConfigError::Missing(vec!["dataset.path".to_string()]))?;
            Ok(Box::new(CsvSource::new(path)))
        }
        "sheets" => {
            let mut missing = Vec::new();
            if dataset.spreadsheet_id.is_none() {
                missing.push("dataset.spreadsheet_id".to_string());
            }
            if credentials.sheets_api_key.is_none() {
                missing.push(crate::config::SHEETS_API_KEY.to_string());
            }
            match (&dataset.spreadsheet_id, &credentials.sheets_api_key) {
                (Some(id), Some(key)) => Ok(Box::new(SheetsSource::new(
                    &dataset.base_url,
                    id,
                    &dataset.range,
                    key,
                    Duration::from_secs(dataset.timeout_secs),
                ))),
                _ => Err(ConfigError::Missing(missing)),
            }
        }
        other => Err(ConfigError::Invalid(format!(
            "unknown dataset.source '{}'",
            other
        ))),
    }
}

/// Fetch from `source` and parse into typed records, logging parse warnings.
pub async fn load_dataset(
    source: &dyn RecordSource,
    business_offset: FixedOffset,
) -> Result<ParsedDataset, SourceError> {
    let grid = source.fetch_grid().await?;
    if grid.is_empty() {
        return Err(SourceError::Empty);
    }

    let dataset = parse_grid(&grid, business_offset);
    let report = &dataset.report;
    if !report.warnings.is_empty() {
        tracing::warn!(
            source = source.name(),
            invalid_timestamps = report.invalid_timestamps(),
            invalid_numbers = report.invalid_numbers(),
            "dataset rows had unparseable cells"
        );
    }
    tracing::debug!(
        source = source.name(),
        rows = report.rows_seen,
        records = dataset.records.len(),
        "dataset loaded"
    );
    Ok(dataset)
}

// ============ CSV ============

/// Reads the grid from a CSV file on every fetch.
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse CSV bytes into a grid without treating the first row specially.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let mut grid = Vec::new();
    for row in reader.records() {
        let row = row?;
        grid.push(row.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

#[async_trait]
impl RecordSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch_grid(&self) -> Result<Vec<Vec<String>>, SourceError> {
        let read_err = |message: String| SourceError::Read {
            path: self.path.display().to_string(),
            message,
        };
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| read_err(e.to_string()))?;
        parse_csv(&bytes).map_err(|e| read_err(e.to_string()))
    }
}

// ============ Spreadsheet values API ============

/// Reads the grid from a spreadsheet values endpoint:
/// `GET {base_url}/{spreadsheet_id}/values/{range}?key={api_key}`,
/// answering `{ "values": [[...], ...] }`.
pub struct SheetsSource {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SheetsSource {
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        range: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            url: format!(
                "{}/{}/values/{}",
                base_url.trim_end_matches('/'),
                spreadsheet_id,
                range
            ),
            api_key: api_key.to_string(),
            client,
        }
    }
}

/// Extract the `values` grid from a values-API response body.
///
/// Cells may be strings, numbers, or booleans; a missing `values` key means
/// an empty sheet.
pub fn parse_values_response(json: &serde_json::Value) -> Result<Vec<Vec<String>>, SourceError> {
    let Some(values) = json.get("values") else {
        return Ok(Vec::new());
    };
    let rows = values
        .as_array()
        .ok_or_else(|| SourceError::Http("values is not an array".to_string()))?;
    Ok(rows
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|cell| match cell {
                            serde_json::Value::String(s) => s.clone(),
                            serde_json::Value::Null => String::new(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect())
}

#[async_trait]
impl RecordSource for SheetsSource {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn fetch_grid(&self) -> Result<Vec<Vec<String>>, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        parse_values_response(&json)
    }
}

// ============ Static ============

/// Serves a fixed grid.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    grid: Vec<Vec<String>>,
}

impl StaticSource {
    pub fn new(grid: Vec<Vec<String>>) -> Self {
        Self { grid }
    }

    /// Build from string slices, header row first.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_grid(&self) -> Result<Vec<Vec<String>>, SourceError> {
        Ok(self.grid.clone())
    }
}
