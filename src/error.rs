//! Error types for the guard, its configuration, and the storage port.

use std::time::Duration;

/// Invalid construction-time options. Fatal: surfaced immediately, no retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `page_count` must be > 0.
    #[error("page_count must be > 0 (got {provided})")]
    InvalidPageCount {
        /// Value provided by caller.
        provided: u32,
    },
    /// `page_interval` must be a positive duration.
    #[error("page_interval must be > 0 (got {provided:?})")]
    InvalidPageInterval {
        /// Value provided by caller.
        provided: Duration,
    },
    /// `blocking_period` must be a positive duration.
    #[error("blocking_period must be > 0 (got {provided:?})")]
    InvalidBlockingPeriod {
        /// Value provided by caller.
        provided: Duration,
    },
    /// At least one HTTP method must be tracked.
    #[error("tracked_methods must not be empty")]
    EmptyTrackedMethods,
    /// A backend-specific option failed validation (e.g. a SQL identifier).
    #[error("invalid backend option: {detail}")]
    InvalidBackendOption {
        /// What was rejected and why.
        detail: String,
    },
}

/// Failure inside a storage backend.
///
/// A missing key on `get` is *not* an error; backends report it as `Ok(None)`.
/// `NotFound` is reserved for `update` against a nonexistent record.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// `update` was called for a key with no record. Callers must `get` first
    /// and fall back to `store` when nothing exists.
    #[error("no record exists for key {key:?}")]
    NotFound {
        /// The key that had no record.
        key: String,
    },
    /// A persisted payload could not be encoded or decoded.
    #[error("record codec failure: {detail}")]
    Codec {
        /// What the codec rejected.
        detail: String,
    },
    /// The backing store itself failed (I/O, driver, connection).
    #[error("storage backend failure: {source}")]
    Backend {
        /// Driver-level cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// Wrap a driver-level error.
    pub fn backend(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend { source: source.into() }
    }

    /// `update` against a nonexistent record.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// A payload the codec rejected.
    pub fn codec(detail: impl std::fmt::Display) -> Self {
        Self::Codec { detail: detail.to_string() }
    }

    /// Check whether this is the distinguished `NotFound` sub-kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure surfaced by [`RateGuard::evaluate`](crate::RateGuard::evaluate).
///
/// The guard never converts a failure into an Allow or Block verdict; the host
/// owns the fail-open/fail-closed policy.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The storage backend failed during the read-modify-write cycle.
    #[error("storage backend failed during evaluate: {0}")]
    Storage(#[from] StorageError),
    /// Concurrent writers kept invalidating our reads; the bounded optimistic
    /// retry loop gave up.
    #[error("storage contention persisted after {attempts} attempts")]
    Contention {
        /// How many read-modify-write attempts were made.
        attempts: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn config_error_display_names_the_field() {
        let err = ConfigError::InvalidPageCount { provided: 0 };
        assert!(err.to_string().contains("page_count"));
        let err = ConfigError::InvalidBlockingPeriod { provided: Duration::ZERO };
        assert!(err.to_string().contains("blocking_period"));
    }

    #[test]
    fn not_found_is_distinguished() {
        let err = StorageError::not_found("session-1");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("session-1"));
        assert!(!StorageError::codec("bad payload").is_not_found());
    }

    #[test]
    fn backend_error_preserves_source() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "lost the database");
        let err = StorageError::backend(io_err);
        assert!(err.source().expect("source").to_string().contains("lost the database"));
    }

    #[test]
    fn guard_error_wraps_storage() {
        let err: GuardError = StorageError::codec("truncated").into();
        assert!(matches!(err, GuardError::Storage(_)));
        assert!(err.to_string().contains("truncated"));
    }
}
