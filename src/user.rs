//! Users and their linked sources.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::auth::{hash_credential, Role};
use crate::error::ConfigError;
use crate::ids::UserId;

/// A stored user together with the identifiers of the sources it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned id.
    pub id: UserId,
    /// Unique login.
    pub login: String,
    /// Hex blake3 digest of the secret.
    pub credential_hash: String,
    /// Contact address for notifications.
    pub email: String,
    /// Granted role.
    pub role: Role,
    /// Linked source identifiers.
    #[serde(default)]
    pub sources: BTreeSet<String>,
}

/// Input for creating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Unique login.
    pub login: String,
    /// Hex blake3 digest of the secret.
    pub credential_hash: String,
    /// Contact address for notifications.
    pub email: String,
    /// Granted role.
    pub role: Role,
}

impl NewUser {
    /// Builds a new user from a plain secret, hashing it.
    #[must_use]
    pub fn new(login: impl Into<String>, secret: &str, email: impl Into<String>, role: Role) -> Self {
        Self {
            login: login.into(),
            credential_hash: hash_credential(secret),
            email: email.into(),
            role,
        }
    }

    /// Rejects blank logins and logins containing whitespace.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let login = self.login.trim();
        if login.is_empty() {
            return Err(ConfigError::MissingParameter { field: "login" });
        }
        if login.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "login",
                reason: "must not contain whitespace".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn into_user(self, id: UserId) -> User {
        User {
            id,
            login: self.login.trim().to_string(),
            credential_hash: self.credential_hash,
            email: self.email,
            role: self.role,
            sources: BTreeSet::new(),
        }
    }
}
