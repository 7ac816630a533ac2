//! TOML configuration and environment credentials.
//!
//! ```toml
//! [dataset]
//! source = "csv"                  # or "sheets"
//! path = "./data/transactions.csv"
//!
//! [generation]
//! provider = "openai"             # or "disabled"
//! model = "gpt-4o-mini"
//!
//! [analysis]
//! utc_offset_minutes = -300       # business timezone for month/hour buckets
//! ```
//!
//! Credentials never live in the file. They are read from the environment
//! (`OPENAI_API_KEY`, `SHEETS_API_KEY`), optionally seeded from a `.env`
//! file by the binary.
//!
//! Validation runs before any computation and reports every missing key at
//! once via [`ConfigError::Missing`].

use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const SHEETS_API_KEY: &str = "SHEETS_API_KEY";

/// Most retries allowed after a transient generation failure.
pub const MAX_GENERATION_RETRIES: u32 = 2;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_source")]
    pub source: String,
    /// CSV file, for `source = "csv"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Spreadsheet identifier, for `source = "sheets"`.
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default = "default_range")]
    pub range: String,
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            path: None,
            spreadsheet_id: None,
            range: default_range(),
            base_url: default_sheets_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source() -> String {
    "csv".to_string()
}
fn default_range() -> String {
    "Sheet1!A:I".to_string()
}
fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com/v4/spreadsheets".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Retries after the first attempt, for transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on each further retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Conversation turns forwarded with a delegated question.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_openai_base_url(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_history_turns() -> usize {
    4
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalysisConfig {
    /// Offset of the business timezone from UTC. Month, hour, and weekday
    /// buckets use wall-clock time at this offset.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl AnalysisConfig {
    pub fn business_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "analysis.utc_offset_minutes must be within ±1439, got {}",
                self.utc_offset_minutes
            ))
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_requests() -> usize {
    30
}
fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Secrets taken from the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub sheets_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: read(OPENAI_API_KEY),
            sheets_api_key: read(SHEETS_API_KEY),
        }
    }
}

/// Read and parse `path`, then check the values that do not depend on
/// credentials.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = toml::from_str(&content)?;

    match config.dataset.source.as_str() {
        "csv" | "sheets" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "unknown dataset.source '{}'. Must be csv or sheets.",
                other
            )))
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "unknown generation.provider '{}'. Must be disabled or openai.",
                other
            )))
        }
    }

    if config.generation.max_retries > MAX_GENERATION_RETRIES {
        return Err(ConfigError::Invalid(format!(
            "generation.max_retries must be at most {}",
            MAX_GENERATION_RETRIES
        )));
    }

    config.analysis.business_offset()?;

    if config.cache.enabled && config.cache.ttl_secs == 0 {
        return Err(ConfigError::Invalid(
            "cache.ttl_secs must be > 0 when the cache is enabled".to_string(),
        ));
    }

    if config.rate_limit.enabled
        && (config.rate_limit.max_requests == 0 || config.rate_limit.window_secs == 0)
    {
        return Err(ConfigError::Invalid(
            "rate_limit.max_requests and rate_limit.window_secs must be > 0".to_string(),
        ));
    }

    Ok(config)
}

impl Config {
    /// Config reading `path` as CSV with every other section defaulted.
    pub fn for_csv(path: impl Into<PathBuf>) -> Self {
        Self {
            dataset: DatasetConfig {
                path: Some(path.into()),
                ..DatasetConfig::default()
            },
            ..Config::default()
        }
    }

    /// Every key this configuration needs but does not have, in a stable
    /// order. Empty when the configuration is complete.
    pub fn missing_keys(&self, credentials: &Credentials) -> Vec<String> {
        let mut missing = Vec::new();

        match self.dataset.source.as_str() {
            "sheets" => {
                if self
                    .dataset
                    .spreadsheet_id
                    .as_deref()
                    .map_or(true, |id| id.trim().is_empty())
                {
                    missing.push("dataset.spreadsheet_id".to_string());
                }
                if credentials.sheets_api_key.is_none() {
                    missing.push(SHEETS_API_KEY.to_string());
                }
            }
            _ => {
                if self.dataset.path.is_none() {
                    missing.push("dataset.path".to_string());
                }
            }
        }

        if self.generation.is_enabled() {
            if self.generation.model.trim().is_empty() {
                missing.push("generation.model".to_string());
            }
            if credentials.openai_api_key.is_none() {
                missing.push(OPENAI_API_KEY.to_string());
            }
        }

        missing
    }

    /// Fail with [`ConfigError::Missing`] listing every absent key.
    pub fn validate(&self, credentials: &Credentials) -> Result<(), ConfigError> {
        let missing = self.missing_keys(credentials);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_defaults() {
        let file = write_config("[dataset]\npath = \"sales.csv\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.dataset.source, "csv");
        assert_eq!(config.generation.provider, "disabled");
        assert_eq!(config.generation.max_retries, 2);
        assert_eq!(config.generation.history_turns, 4);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.analysis.utc_offset_minutes, 0);
        assert!(config.validate(&Credentials::default()).is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let file = write_config("[dataset]\npath = \"x.csv\"\n[generation]\nprovider = \"magic\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("generation.provider"));
    }

    #[test]
    fn test_too_many_retries_rejected() {
        let file = write_config("[dataset]\npath = \"x.csv\"\n[generation]\nmax_retries = 5\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("generation.max_retries"));
    }

    #[test]
    fn test_offset_out_of_range_rejected() {
        let file = write_config("[dataset]\npath = \"x.csv\"\n[analysis]\nutc_offset_minutes = 1440\n");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_keys_enumerated() {
        let file = write_config(
            "[dataset]\nsource = \"sheets\"\n[generation]\nprovider = \"openai\"\n",
        );
        let config = load_config(file.path()).unwrap();
        let err = config.validate(&Credentials::default()).unwrap_err();
        match err {
            ConfigError::Missing(keys) => assert_eq!(
                keys,
                vec!["dataset.spreadsheet_id", SHEETS_API_KEY, OPENAI_API_KEY]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_credentials_satisfy_validation() {
        let mut config = Config::for_csv("sales.csv");
        config.generation.provider = "openai".to_string();
        let creds = Credentials {
            openai_api_key: Some("sk-test".to_string()),
            sheets_api_key: None,
        };
        assert!(config.validate(&creds).is_ok());
    }
}
