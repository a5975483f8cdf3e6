//! Logging setup for the receipt gateway
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a
//! console formatter, compact by default or JSON when `LOG_JSON` is set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Enable JSON logging format
    pub json_format: bool,
    /// Log level filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "receipt-gateway".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            service_name: lookup("SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: defaults.service_version,
            json_format: lookup("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

/// Errors while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize logging with the given configuration.
///
/// `RUST_LOG` wins over `log_level`. Fails if a global subscriber is
/// already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        subscriber.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .compact();
        subscriber.with(fmt_layer).try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "receipt-gateway");
        assert!(!config.json_format);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_telemetry_config_from_lookup() {
        let config = TelemetryConfig::from_lookup(|name| match name {
            "LOG_JSON" => Some("1".to_string()),
            "LOG_LEVEL" => Some("receipt_gateway=debug".to_string()),
            _ => None,
        });
        assert!(config.json_format);
        assert_eq!(config.log_level, "receipt_gateway=debug");
    }
}
