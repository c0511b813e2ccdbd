//! Numeric identifiers assigned by the persistence layer.
//!
//! Stores hand out ids starting at 1. Zero is never assigned, which is what
//! makes a token for user 0 invalid.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw id.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a registered user.
    UserId
);
numeric_id!(
    /// Identifier of a persisted reading.
    ReadingId
);
numeric_id!(
    /// Identifier of a persisted alert record.
    AlertId
);
numeric_id!(
    /// Identifier of a persisted rule definition.
    RuleId
);

/// Monotonic id allocator used by the store backends.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct IdSequence(u64);

impl IdSequence {
    pub(crate) fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// The value `next` would hand out, without consuming it.
    pub(crate) fn peek(&self) -> u64 {
        self.0 + 1
    }

    /// Moves the sequence past `seen` if it is not already.
    pub(crate) fn advance_past(&mut self, seen: u64) {
        self.0 = self.0.max(seen);
    }
}
