//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events inside per-task spans
//! (`monitor_server`, `recipient`, `monitor_client`, `healer`). Installing a
//! subscriber is left to the embedding process.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;

/// Install the global subscriber described by `cfg`.
///
/// `RUST_LOG` takes precedence over `cfg.level`. Fails if a global subscriber
/// is already installed.
pub fn init(cfg: &LoggingConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("nsm_monitor={}", cfg.level)))
        .map_err(|e| ConfigError::Invalid {
            field: "logging.level",
            reason: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match cfg.format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_target(true).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_target(true).with_ansi(false).json())
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Invalid {
        field: "logging",
        reason: e.to_string(),
    })
}

/// Route logs through the test harness writer. Safe to call from every test.
#[doc(hidden)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("nsm_monitor=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}


#[cfg(test)]
pub(crate) use capture::capture_logs;
