//! # Sales Insight
//!
//! Natural-language analytics over a retail sales transaction log.
//!
//! A question is resolved into a structured intent, executed exactly
//! against the transaction set, and answered either with a templated
//! figure or with a narrative grounded in computed facts. Trend-based
//! recommendations are derived from month-over-month movement.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────────┐   ┌────────────┐
//! │ RecordSource │──▶│ sales-insight-core           │──▶│ Narrative  │
//! │ CSV / Sheets │   │ metadata · intent · aggregate │   │ template / │
//! └──────────────┘   │ recommend                    │   │ generator  │
//!                    └──────────────────────────────┘   └─────┬──────┘
//!                                                             │
//!                      ┌──────────────────────────────────────┤
//!                      ▼                                      ▼
//!                 ┌──────────┐                          ┌──────────┐
//!                 │   CLI    │                          │   HTTP   │
//!                 │(insight) │                          │  (axum)  │
//!                 └──────────┘                          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! insight check                                   # validate config + credentials
//! insight ask "What were total sales for Cold Brew in December 2024?"
//! insight recommend
//! insight serve                                   # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`error`] | Typed error taxonomy |
//! | [`source`] | CSV, spreadsheet, and static record sources |
//! | [`generation`] | Text generator trait, OpenAI client, retry loop |
//! | [`narrative`] | Deterministic templates, context bundle, fallback |
//! | [`cache`] | Signature-keyed response cache |
//! | [`rate_limit`] | Per-client rolling-window limiter |
//! | [`service`] | End-to-end request facade |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod generation;
pub mod narrative;
pub mod rate_limit;
pub mod server;
pub mod service;
pub mod source;

pub use sales_insight_core as core;
