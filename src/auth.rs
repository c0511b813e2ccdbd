//! Roles, per-request tokens, and credential hashing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AccessError, ConfigError};
use crate::ids::UserId;

/// Role carried by a user and by every token issued for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access to user management and configuration.
    Admin,
    /// May link sources and read values.
    Reader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::Reader => f.write_str("reader"),
        }
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    /// Parses `admin` or `reader`, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let role = s.trim();
        if role.eq_ignore_ascii_case("admin") {
            Ok(Self::Admin)
        } else if role.eq_ignore_ascii_case("reader") {
            Ok(Self::Reader)
        } else {
            Err(ConfigError::InvalidValue {
                field: "role",
                reason: format!("'{role}' is neither admin nor reader"),
            })
        }
    }
}

/// Ephemeral proof of identity used to authorize one coordinator call.
///
/// Tokens are never persisted. A token is valid iff its user id is
/// positive; the role is trusted as issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    user_id: u64,
    role: Role,
}

impl Token {
    /// Builds a token for the given raw user id and role.
    #[must_use]
    pub const fn new(user_id: u64, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Builds a token for a stored user.
    #[must_use]
    pub const fn for_user(user_id: UserId, role: Role) -> Self {
        Self::new(user_id.get(), role)
    }

    /// The user this token speaks for.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        UserId::new(self.user_id)
    }

    /// The role granted by this token.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns true if the token identifies a real user.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.user_id > 0
    }

    /// Fails unless the token is valid.
    pub fn require_valid(&self) -> Result<(), AccessError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AccessError::InvalidToken {
                user_id: self.user_id,
            })
        }
    }

    /// Fails unless the token is valid and carries the admin role.
    pub fn require_admin(&self, operation: &'static str) -> Result<(), AccessError> {
        self.require_valid()?;
        match self.role {
            Role::Admin => Ok(()),
            Role::Reader => Err(AccessError::AdminRequired { operation }),
        }
    }

    /// Fails unless the token is an admin or speaks for `user_id` itself.
    pub fn require_self_or_admin(&self, user_id: UserId) -> Result<(), AccessError> {
        self.require_valid()?;
        if self.role == Role::Admin || self.user_id() == user_id {
            Ok(())
        } else {
            Err(AccessError::ForeignUser {
                token_user: self.user_id(),
                requested: user_id,
            })
        }
    }
}

/// Hashes a secret into the stored credential form (hex blake3 digest).
#[must_use]
pub fn hash_credential(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex().to_string()
}

/// Compares a secret against a stored credential hash.
#[must_use]
pub fn verify_credential(secret: &str, stored_hash: &str) -> bool {
    hash_credential(secret) == stored_hash
}
