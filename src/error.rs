//! Error types for the monitor subsystem.
//!
//! All errors are strongly typed using thiserror. None of them is fatal to the
//! process: the server loop logs and continues, the client surfaces transport
//! failures on its error sink, and the healer retries failed reconciliations.

use std::path::PathBuf;

use thiserror::Error;

use crate::entity::EntityKind;

/// An event could not be mapped to or from a wire message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("Unknown wire event type code {code}")]
    UnknownEventType {
        code: i32,
    },

    #[error("Expected a {expected} payload, got {actual}")]
    UnexpectedPayload {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// The underlying stream (or an internal queue standing in for it) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Stream closed by peer")]
    StreamClosed,

    #[error("Receive failed: {message}")]
    RecvFailed {
        message: String,
    },

    #[error("Send failed: {message}")]
    SendFailed {
        message: String,
    },

    #[error("Connection failed: {message}")]
    ConnectFailed {
        message: String,
    },

    #[error("Disconnected from {path}")]
    Disconnected {
        path: String,
    },
}

impl TransportError {
    pub(crate) fn disconnected(path: impl Into<String>) -> Self {
        Self::Disconnected { path: path.into() }
    }
}

/// Re-requesting a connection during a recovery sweep failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    #[error("Request for connection '{connection_id}' failed: {message}")]
    RequestFailed {
        connection_id: String,
        message: String,
    },
}

/// Configuration could not be loaded or is out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MonitorError {
    /// Returns true if this is a translation error.
    #[must_use]
    pub const fn is_translation(&self) -> bool {
        matches!(self, Self::Translation(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a reconciliation error.
    #[must_use]
    pub const fn is_reconciliation(&self) -> bool {
        matches!(self, Self::Reconciliation(_))
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Translation(_) | Self::Config(_) => false,
            Self::Transport(e) => !matches!(e, TransportError::Disconnected { .. }),
            Self::Reconciliation(_) => true,
        }
    }
}

/// Result type alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_error_unknown_code() {
        let err = TranslationError::UnknownEventType { code: 42 };
        let msg = format!("{err}");
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_translation_error_payload() {
        let err = TranslationError::UnexpectedPayload {
            expected: EntityKind::Connection,
            actual: EntityKind::TrustBundle,
        };
        let msg = format!("{err}");
        assert!(msg.contains("connection"));
        assert!(msg.contains("trust bundle"));
    }

    #[test]
    fn test_monitor_error_from_transport() {
        let err: MonitorError = TransportError::StreamClosed.into();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_monitor_error_disconnected_not_retryable() {
        let err: MonitorError = TransportError::disconnected("monitor_server").into();
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("monitor_server"));
    }

    #[test]
    fn test_monitor_error_from_reconciliation() {
        let err: MonitorError = ReconciliationError::RequestFailed {
            connection_id: "c1".to_string(),
            message: "no endpoint".to_string(),
        }
        .into();
        assert!(err.is_reconciliation());
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("c1"));
    }

    #[test]
    fn test_monitor_error_translation_not_retryable() {
        let err: MonitorError = TranslationError::UnknownEventType { code: 7 }.into();
        assert!(err.is_translation());
        assert!(!err.is_retryable());
    }
}
