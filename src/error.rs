//! Error types for the cache layer.
//!
//! Producer failures are never wrapped in [`Error`]: the memoizer returns the
//! producer's own error type unchanged. This enum only covers failures of the
//! cache machinery itself (store, configuration, workers).

use thiserror::Error;

/// Errors raised by the cache layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Liveness check failed, or the store is not ready for an administrative call.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Store I/O failed (network, timeout, protocol).
    #[error("backend error: {0}")]
    BackendError(String),

    /// Unregistered category or invalid configuration value.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Value could not be represented as a JSON-compatible tree.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Off-loaded job panicked or the worker pool was closed.
    #[error("worker error: {0}")]
    WorkerError(String),
}

impl Error {
    /// True for failures that mean the store is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::ConnectionError(_) | Error::BackendError(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConfigError("no TTL registered for category 'x'".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: no TTL registered for category 'x'"
        );
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::ConnectionError("ping".into()).is_connectivity());
        assert!(Error::BackendError("timeout".into()).is_connectivity());
        assert!(!Error::ConfigError("ttl".into()).is_connectivity());
        assert!(!Error::WorkerError("panic".into()).is_connectivity());
    }
}
