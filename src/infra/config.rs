//! Receipt store configuration
//!
//! Loaded from `RECEIPTS_*` environment variables. Backend precedence is
//! embedded path, then database URL, then in-memory.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::retry::{RetryConfig, DEFAULT_INITIAL_DELAY, DEFAULT_TIMEOUT};
use super::writer::ExhaustionPolicy;

/// Default hard cap on `limit` for list queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Default database pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Which persistence backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Embedded ordered store at a directory
    Embedded { path: PathBuf },
    /// Document database
    Database { url: String, max_connections: u32 },
    /// Non-durable in-memory store
    Memory,
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Embedded { .. } => "sled",
            BackendConfig::Database { .. } => "postgres",
            BackendConfig::Memory => "memory",
        }
    }
}

/// Receipt store configuration
#[derive(Debug, Clone)]
pub struct ReceiptStoreConfig {
    pub backend: BackendConfig,
    /// Informational soft cap on stored receipts (0 = unset)
    pub max_docs: usize,
    /// Hard cap on the `limit` of list queries
    pub query_limit: usize,
    /// Write path backoff schedule
    pub retry: RetryConfig,
    /// What to do when a write exhausts its retry budget
    pub on_retry_exhausted: ExhaustionPolicy,
}

impl Default for ReceiptStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            max_docs: 0,
            query_limit: DEFAULT_QUERY_LIMIT,
            retry: RetryConfig::default(),
            on_retry_exhausted: ExhaustionPolicy::default(),
        }
    }
}

impl ReceiptStoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_connections =
            parse_number::<u32>("RECEIPTS_DB_MAX_CONNECTIONS", var("RECEIPTS_DB_MAX_CONNECTIONS"))?
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let backend = match (var("RECEIPTS_EMBEDDED_PATH"), var("RECEIPTS_DATABASE_URL")) {
            (Some(path), _) => BackendConfig::Embedded {
                path: PathBuf::from(path),
            },
            (None, Some(url)) => BackendConfig::Database {
                url,
                max_connections,
            },
            (None, None) => BackendConfig::Memory,
        };

        let max_docs = parse_number::<usize>("RECEIPTS_MAX_DOCS", var("RECEIPTS_MAX_DOCS"))?
            .unwrap_or(0);

        let query_limit =
            parse_number::<usize>("RECEIPTS_QUERY_LIMIT", var("RECEIPTS_QUERY_LIMIT"))?
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_QUERY_LIMIT);

        // Non-positive retry settings fall back to the defaults.
        let initial_delay = parse_number::<i64>(
            "RECEIPTS_RETRY_INITIAL_DELAY_MS",
            var("RECEIPTS_RETRY_INITIAL_DELAY_MS"),
        )?
        .filter(|ms| *ms > 0)
        .map_or(DEFAULT_INITIAL_DELAY, |ms| Duration::from_millis(ms as u64));

        let timeout = parse_number::<i64>(
            "RECEIPTS_RETRY_TIMEOUT_MS",
            var("RECEIPTS_RETRY_TIMEOUT_MS"),
        )?
        .filter(|ms| *ms > 0)
        .map_or(DEFAULT_TIMEOUT, |ms| Duration::from_millis(ms as u64));

        let on_retry_exhausted = match var("RECEIPTS_RETRY_EXHAUSTED") {
            None => ExhaustionPolicy::default(),
            Some(v) => v.parse().map_err(|reason| ConfigError::InvalidValue {
                name: "RECEIPTS_RETRY_EXHAUSTED",
                value: v.clone(),
                reason,
            })?,
        };

        Ok(Self {
            backend,
            max_docs,
            query_limit,
            retry: RetryConfig::default()
                .with_initial_delay(initial_delay)
                .with_timeout(timeout),
            on_retry_exhausted,
        })
    }
}

fn parse_number<T>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name,
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
