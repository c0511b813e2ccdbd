//! Consumption readings captured by aggregator leaves.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ReadingId, UserId};

/// A persisted reading. Append-only; never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Store-assigned id.
    pub id: ReadingId,
    /// Owner of the source at the time of the reading.
    pub user_id: UserId,
    /// Identifier of the source that produced the value.
    pub source_id: String,
    /// When the value was captured.
    #[serde(serialize_with = "crate::time::serialize_millis")]
    pub recorded_at: DateTime<Utc>,
    /// Extracted consumption value, in cubic metres.
    pub value: f64,
    /// Handle (file path) the value was derived from.
    pub provenance: String,
}

/// A reading that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    /// Owner of the source.
    pub user_id: UserId,
    /// Identifier of the source.
    pub source_id: String,
    /// Capture time.
    pub recorded_at: DateTime<Utc>,
    /// Extracted value.
    pub value: f64,
    /// Handle the value came from.
    pub provenance: String,
}

impl NewReading {
    pub(crate) fn into_reading(self, id: ReadingId) -> Reading {
        Reading {
            id,
            user_id: self.user_id,
            source_id: self.source_id,
            recorded_at: self.recorded_at.trunc_subsecs(3),
            value: self.value,
            provenance: self.provenance,
        }
    }
}
