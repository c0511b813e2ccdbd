//! Abstract storage traits for meterwatch.
//!
//! These traits define the contract that persistence backends must implement.
//! The coordinator, the aggregator leaves and the alert engine only ever see
//! these traits, so backends can be swapped:
//! - In-memory backends for tests and embedded use
//! - The JSON file backend for single-process deployments

use thiserror::Error;

use crate::alerting::rules::{AlertRule, RuleDefinition};
use crate::alerting::types::{AlertRecord, NewAlertRecord};
use crate::ids::{RuleId, UserId};
use crate::reading::{NewReading, Reading};
use crate::user::{NewUser, User};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// User not found.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Login already taken.
    #[error("Duplicate login: {0}")]
    DuplicateLogin(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Read-only view over a user's reading history, as consumed by rules.
pub trait ReadingHistory {
    /// Most recent `limit` readings for `user_id`, newest first.
    fn recent_readings(&self, user_id: UserId, limit: usize) -> Result<Vec<Reading>, StorageError>;
}

/// Storage trait for users and their source linkage.
///
/// Implementations must enforce login uniqueness and must remove every
/// linkage record of a user when the user is deleted.
pub trait UserStore: Send + Sync {
    /// Insert a new user and return it with its assigned id.
    fn insert(&self, user: NewUser) -> Result<User, StorageError>;

    /// Get a user (with linked sources) by id.
    fn get(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// Get a user by exact login.
    fn find_by_login(&self, login: &str) -> Result<Option<User>, StorageError>;

    /// Delete a user and its linkage records. Returns false if it did not exist.
    fn delete(&self, id: UserId) -> Result<bool, StorageError>;

    /// Link a source to a user. Linking twice is a no-op.
    fn link_source(&self, id: UserId, source_id: &str) -> Result<(), StorageError>;

    /// Remove a link. Returns false if the link did not exist.
    fn unlink_source(&self, id: UserId, source_id: &str) -> Result<bool, StorageError>;

    /// All users in id order.
    fn list_all(&self) -> Result<Vec<User>, StorageError>;

    /// Every linkage record as `(user, source)` pairs.
    fn links(&self) -> Result<Vec<(UserId, String)>, StorageError>;
}

/// Storage trait for readings, alert records and rule definitions.
pub trait HistoryStore: Send + Sync {
    /// Append a reading.
    fn save_reading(&self, reading: NewReading) -> Result<Reading, StorageError>;

    /// Most recent `limit` readings for a user, newest first.
    fn recent_readings(&self, user_id: UserId, limit: usize) -> Result<Vec<Reading>, StorageError>;

    /// Append an alert record.
    fn save_alert(&self, alert: NewAlertRecord) -> Result<AlertRecord, StorageError>;

    /// Alert records for a user, newest first.
    fn alerts_for_user(&self, user_id: UserId) -> Result<Vec<AlertRecord>, StorageError>;

    /// Persist a rule definition and return its id.
    fn save_rule(&self, user_id: UserId, rule: AlertRule) -> Result<RuleId, StorageError>;

    /// Rule definitions for a user, in insertion order.
    fn rules_for_user(&self, user_id: UserId) -> Result<Vec<RuleDefinition>, StorageError>;

    /// Every rule definition, in insertion order.
    fn all_rules(&self) -> Result<Vec<RuleDefinition>, StorageError>;
}

/// Adapts a [`HistoryStore`] trait object to the [`ReadingHistory`] view.
#[derive(Clone, Copy)]
pub struct HistoryView<'a>(pub &'a dyn HistoryStore);

impl ReadingHistory for HistoryView<'_> {
    fn recent_readings(&self, user_id: UserId, limit: usize) -> Result<Vec<Reading>, StorageError> {
        self.0.recent_readings(user_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_user_store_object_safe(_: &dyn UserStore) {}
    fn _assert_history_store_object_safe(_: &dyn HistoryStore) {}
    fn _assert_reading_history_object_safe(_: &dyn ReadingHistory) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::UserNotFound(UserId::new(5));
        assert!(err.to_string().contains("User not found: 5"));

        let err = StorageError::DuplicateLogin("admin".to_string());
        assert!(err.to_string().contains("admin"));
    }
}
