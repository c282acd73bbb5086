//! Configuration for the monitor server, client and healer.
//!
//! Every struct has a `Default` matching the stock queue depths and delays, and
//! deserializes with missing fields falling back to those defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Monitor server queue sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorServerConfig {
    /// Max queued commands (events, registrations, deregistrations, queries)
    /// before callers block.
    pub event_queue_capacity: usize,
    /// Per-recipient outbound buffer. A recipient whose buffer is full when an
    /// event is broadcast stops receiving events until it drains, then gets a
    /// fresh initial state transfer.
    pub outbound_queue_capacity: usize,
}

impl Default for MonitorServerConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 10,
            outbound_queue_capacity: 32,
        }
    }
}

/// Monitor client sink sizing.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorClientConfig {
    pub event_sink_capacity: usize,
    pub error_sink_capacity: usize,
}

impl Default for MonitorClientConfig {
    fn default() -> Self {
        Self {
            event_sink_capacity: 1,
            error_sink_capacity: 1,
        }
    }
}

/// What the healer does when the monitor reports a deleted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Stop monitoring altogether; `Healer::run` returns.
    #[default]
    StopMonitoring,
    /// Drop the connection from the cache and keep monitoring.
    RemoveEntry,
}

/// Healer retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealerConfig {
    /// Delay after a failed connect attempt or an incomplete recovery sweep.
    pub retry_delay_ms: u64,
    /// Reaction to a deleted connection.
    pub delete_policy: DeletePolicy,
    /// Consecutive failed connect attempts after which `run` gives up and
    /// returns the last error. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl HealerConfig {
    /// `retry_delay_ms` as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 5_000,
            delete_policy: DeletePolicy::default(),
            max_reconnect_attempts: None,
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging setup used by `telemetry::init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output encoding.
    pub format: LogFormat,
    /// Level for this crate's targets when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
        }
    }
}

/// Aggregate configuration, as loaded from a JSON file.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: MonitorServerConfig,
    pub client: MonitorClientConfig,
    pub healer: HealerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Reject zero-capacity queues; a zero-depth queue would deadlock the
    /// snapshot-then-register step.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("server.event_queue_capacity", self.server.event_queue_capacity),
            ("server.outbound_queue_capacity", self.server.outbound_queue_capacity),
            ("client.event_sink_capacity", self.client.event_sink_capacity),
            ("client.error_sink_capacity", self.client.error_sink_capacity),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "capacity must be at least 1".to_string(),
                });
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                reason: "level must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_stock_depths() {
        let cfg = Config::default();
        assert_eq!(cfg.server.event_queue_capacity, 10);
        assert_eq!(cfg.server.outbound_queue_capacity, 32);
        assert_eq!(cfg.client.event_sink_capacity, 1);
        assert_eq!(cfg.client.error_sink_capacity, 1);
        assert_eq!(cfg.healer.retry_delay(), Duration::from_secs(5));
        assert_eq!(cfg.healer.delete_policy, DeletePolicy::StopMonitoring);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = Config::from_json_str(
            r#"{"healer": {"delete_policy": "remove_entry", "max_reconnect_attempts": 3}}"#,
        )
        .unwrap();
        assert_eq!(cfg.healer.delete_policy, DeletePolicy::RemoveEntry);
        assert_eq!(cfg.healer.max_reconnect_attempts, Some(3));
        assert_eq!(cfg.healer.retry_delay_ms, 5_000);
        assert_eq!(cfg.server, MonitorServerConfig::default());
        assert_eq!(cfg.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_logging_section() {
        let cfg = Config::from_json_str(r#"{"logging": {"format": "json", "level": "debug"}}"#)
            .unwrap();
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.level, "debug");

        let err = Config::from_json_str(r#"{"logging": {"level": " "}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "logging.level", .. }));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Config::from_json_str(r#"{"server": {"event_queue_capacity": 0}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "server.event_queue_capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            Config::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"outbound_queue_capacity": 4}}}}"#).unwrap();
        let cfg = Config::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.server.outbound_queue_capacity, 4);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            Config::from_json_file(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
