//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on malformed values. The queue part
//! is validated before it is returned.

use crate::error::{Error, Result};
use crate::queue::QueueConfig;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub queue: QueueConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `BATCHQ_MAX_BATCH_SIZE` | 50 |
    /// | `BATCHQ_MAX_WAIT_MS` | 250 |
    /// | `BATCHQ_IDLE_TIMEOUT_MS` | unset (no eviction) |
    /// | `OTEL_ENDPOINT` | unset (stderr logs only) |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            max_batch_size: parsed_var("BATCHQ_MAX_BATCH_SIZE")?
                .unwrap_or(defaults.max_batch_size),
            max_wait: parsed_var("BATCHQ_MAX_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_wait),
            idle_timeout: parsed_var("BATCHQ_IDLE_TIMEOUT_MS")?.map(Duration::from_millis),
        };
        queue.validate()?;

        Ok(Self {
            queue,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Parse a TOML document; see [`Config::from_file`] for the layout.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        file.into_config()
    }

    /// Load a TOML config file:
    ///
    /// ```toml
    /// [queue]
    /// max_batch_size = 25
    /// max_wait_ms = 100
    /// idle_timeout_ms = 60000   # optional
    ///
    /// [telemetry]               # optional
    /// otel_endpoint = "http://localhost:4317"
    /// log_level = "debug"
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("environment variable {name}={raw:?}: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::Config(format!("environment variable {name}: {e}"))),
    }
}

/// On-disk layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    queue: QueueSection,
    #[serde(default)]
    telemetry: TelemetrySection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueueSection {
    max_batch_size: usize,
    max_wait_ms: u64,
    idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TelemetrySection {
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl ConfigFile {
    fn into_config(self) -> Result<Config> {
        let queue = QueueConfig {
            max_batch_size: self.queue.max_batch_size,
            max_wait: Duration::from_millis(self.queue.max_wait_ms),
            idle_timeout: self.queue.idle_timeout_ms.map(Duration::from_millis),
        };
        queue.validate()?;

        Ok(Config {
            queue,
            otel_endpoint: self.telemetry.otel_endpoint,
            log_level: self.telemetry.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_with_all_sections() {
        let config = Config::from_toml_str(
            r#"
            [queue]
            max_batch_size = 25
            max_wait_ms = 100
            idle_timeout_ms = 60000

            [telemetry]
            otel_endpoint = "http://localhost:4317"
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_batch_size, 25);
        assert_eq!(config.queue.max_wait, Duration::from_millis(100));
        assert_eq!(config.queue.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn toml_telemetry_section_is_optional() {
        let config = Config::from_toml_str(
            r#"
            [queue]
            max_batch_size = 5
            max_wait_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.idle_timeout, None);
        assert_eq!(config.otel_endpoint, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn toml_invalid_queue_values_fail_validation() {
        let err = Config::from_toml_str(
            r#"
            [queue]
            max_batch_size = 0
            max_wait_ms = 50
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn toml_unknown_keys_are_rejected() {
        let err = Config::from_toml_str(
            r#"
            [queue]
            max_batch_size = 5
            max_wait_ms = 50
            max_wiat_ms = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
