//! Typed error taxonomy.
//!
//! | Error | Scope |
//! |-------|-------|
//! | [`ConfigError`] | Missing or malformed configuration; fatal before any computation |
//! | [`SourceError`] | Record fetch failed or returned nothing; fatal for the request |
//! | [`GenerationError`] | Text generation failed; transient variants are retried, then degraded to a static fallback |
//! | [`ServiceError`] | Request-level failure surfaced to the CLI and HTTP layers |
//!
//! Row-level parse problems are not errors; they are collected as
//! [`ParseWarning`](sales_insight_core::models::ParseWarning)s.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read dataset {path}: {message}")]
    Read { path: String, message: String },

    #[error("dataset request failed: {0}")]
    Http(String),

    #[error("dataset request returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("dataset returned no rows")]
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("generation rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("generation server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("generation request failed: {0}")]
    Network(String),

    #[error("generation request rejected {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("text generation is disabled")]
    Disabled,
}

impl GenerationError {
    /// Rate limits, server errors, and network failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. }
                | GenerationError::Server { .. }
                | GenerationError::Network(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("too many requests; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_lists_every_key() {
        let err = ConfigError::Missing(vec![
            "OPENAI_API_KEY".to_string(),
            "dataset.path".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "missing required configuration: OPENAI_API_KEY, dataset.path"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::RateLimited { retry_after: None }.is_transient());
        assert!(GenerationError::Server {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(GenerationError::Network("timeout".into()).is_transient());
        assert!(!GenerationError::Rejected {
            status: 401,
            body: String::new()
        }
        .is_transient());
        assert!(!GenerationError::Disabled.is_transient());
    }
}
