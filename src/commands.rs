//! CLI command implementations for `insight`.

use anyhow::Result;
use std::sync::Arc;

use sales_insight_core::intent::ConversationTurn;
use sales_insight_core::models::ParseWarning;
use sales_insight_core::store::memory::InMemoryKvStore;

use crate::config::{Config, Credentials};
use crate::service::InsightService;

fn build_service(config: &Config, credentials: &Credentials) -> Result<InsightService> {
    Ok(InsightService::from_config(
        config,
        credentials,
        Arc::new(InMemoryKvStore::new()),
    )?)
}

/// `insight ask "<question>"`.
///
/// Each `--context` value is a prior user turn, oldest first.
pub async fn run_ask(
    config: &Config,
    credentials: &Credentials,
    question: &str,
    context: &[String],
    json: bool,
) -> Result<()> {
    let service = build_service(config, credentials)?;
    let history: Vec<ConversationTurn> = context.iter().map(ConversationTurn::user).collect();
    let response = service.ask(question, &history).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.answer);
    }
    Ok(())
}

/// `insight recommend`.
pub async fn run_recommend(config: &Config, credentials: &Credentials, json: bool) -> Result<()> {
    let service = build_service(config, credentials)?;
    let recommendations = service.recommendations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recommendations)?);
        return Ok(());
    }
    if recommendations.is_empty() {
        println!("No recommendations yet: at least two months of data are needed.");
        return Ok(());
    }
    for (i, rec) in recommendations.iter().enumerate() {
        println!(
            "{}. [{}] {}: {} = {}",
            i + 1,
            rec.action.as_str(),
            rec.target,
            rec.metric,
            rec.value
        );
        println!("   {}", rec.impact);
        if let Some(note) = &rec.note {
            println!("   note: {}", note);
        }
    }
    Ok(())
}

/// `insight metadata`.
pub async fn run_metadata(config: &Config, credentials: &Credentials, json: bool) -> Result<()> {
    let service = build_service(config, credentials)?;
    let response = service.metadata().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let meta = &response.metadata;
    println!("{}", meta.summary());
    let report = &response.parse_report;
    println!(
        "Rows: {} ({} blank), {} invalid timestamps, {} invalid numbers",
        report.rows_seen,
        report.blank_rows,
        report.invalid_timestamps(),
        report.invalid_numbers()
    );
    for warning in report.warnings.iter().take(10) {
        match warning {
            ParseWarning::InvalidTimestamp { row, value } => {
                println!("  row {}: unparseable timestamp {:?}", row, value)
            }
            ParseWarning::InvalidNumber { row, column, value } => {
                println!("  row {}: unparseable {} {:?}", row, column, value)
            }
        }
    }
    Ok(())
}

/// `insight check`: validate configuration and credentials without
/// fetching data.
pub fn run_check(config: &Config, credentials: &Credentials) -> Result<()> {
    config.validate(credentials)?;
    println!("Configuration OK.");
    println!("  dataset source: {}", config.dataset.source);
    println!("  generation:     {}", config.generation.provider);
    println!("  server bind:    {}", config.server.bind);
    Ok(())
}
