//! Error types for meterwatch.
//!
//! Errors are strongly typed using thiserror. Each concern owns a small
//! enum (access, configuration, source adapters) and everything folds into
//! [`MeterError`] so callers can match on the taxonomy directly.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ids::UserId;
use crate::storage::StorageError;

/// Permission failures raised before a coordinator operation runs.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Token for user {user_id} is not valid")]
    InvalidToken {
        user_id: u64,
    },

    #[error("Operation '{operation}' requires the admin role")]
    AdminRequired {
        operation: &'static str,
    },

    #[error("User {token_user} may not act on behalf of user {requested}")]
    ForeignUser {
        token_user: UserId,
        requested: UserId,
    },

    #[error("Unknown login or wrong credentials")]
    BadCredentials,
}

/// Configuration problems for sources and alert rules.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported source kind: '{kind}'")]
    UnsupportedKind {
        kind: String,
    },

    #[error("Required parameter '{field}' is missing")]
    MissingParameter {
        field: &'static str,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

/// Failures of a source adapter to produce a handle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source location does not exist: {}", path.display())]
    LocationMissing {
        path: PathBuf,
    },

    #[error("No readable candidates in {}", path.display())]
    NoCandidates {
        path: PathBuf,
    },

    #[error("I/O error while scanning {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level error type for meterwatch.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("Access denied: {0}")]
    AccessDenied(#[from] AccessError),

    #[error("User not found: {id}")]
    UserNotFound {
        id: UserId,
    },

    #[error("Source '{id}' is offline")]
    SourceOffline {
        id: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MeterError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the caller lacked permission.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    /// Returns true for unknown users and unregistered sources.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound { .. } | Self::SourceOffline { .. })
    }

    /// Returns true if a source or rule kind is not recognized.
    #[must_use]
    pub const fn is_unsupported_configuration(&self) -> bool {
        matches!(self, Self::Configuration(ConfigError::UnsupportedKind { .. }))
    }

    /// Returns true if a configuration is missing a parameter or carries a bad value.
    #[must_use]
    pub const fn is_invalid_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(ConfigError::MissingParameter { .. } | ConfigError::InvalidValue { .. })
        )
    }

    /// Returns true if an adapter could not produce a handle.
    #[must_use]
    pub const fn is_source_unavailable(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_))
    }

    /// Returns true for repository failures.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Result type alias for meterwatch operations.
pub type MeterResult<T> = Result<T, MeterError>;
