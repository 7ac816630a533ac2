//! # Sales Insight Core
//!
//! Pure analytics logic for Sales Insight: transaction models and row
//! parsing, dataset metadata, intent resolution, aggregation, trend-based
//! recommendations, and the key-value store abstraction.
//!
//! This crate does no network or filesystem I/O and needs no async
//! runtime. Record fetching, text generation, and HTTP live in the
//! `sales-insight` crate.

pub mod aggregate;
pub mod intent;
pub mod metadata;
pub mod models;
pub mod recommend;
pub mod store;
