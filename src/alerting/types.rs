//! Alert records and the transient payload handed to observers.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{AlertId, UserId};
use crate::time::now_millis;

/// A raised alert as handed to observers. Never persisted.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    pub event_id: Uuid,
    pub user_id: UserId,
    /// Login of the owning user, used for display.
    pub display_name: String,
    /// Aggregate consumption that triggered the rule, in cubic metres.
    pub consumption: f64,
    pub message: String,
    #[serde(serialize_with = "crate::time::serialize_millis")]
    pub raised_at: DateTime<Utc>,
}

impl AlertData {
    /// Builds the payload for a rule that just triggered.
    #[must_use]
    pub fn new(user_id: UserId, display_name: impl Into<String>, consumption: f64, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id,
            display_name: display_name.into(),
            consumption,
            message: message.into(),
            raised_at: now_millis(),
        }
    }

    /// The persisted form of this alert.
    #[must_use]
    pub fn to_new_record(&self) -> NewAlertRecord {
        NewAlertRecord {
            user_id: self.user_id,
            consumption: self.consumption,
            message: self.message.clone(),
            raised_at: self.raised_at,
        }
    }
}

/// A persisted alert. Append-only.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    pub user_id: UserId,
    pub consumption: f64,
    pub message: String,
    #[serde(serialize_with = "crate::time::serialize_millis")]
    pub raised_at: DateTime<Utc>,
}

/// An alert record that has not been stored yet.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlertRecord {
    pub user_id: UserId,
    pub consumption: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl NewAlertRecord {
    pub(crate) fn into_record(self, id: AlertId) -> AlertRecord {
        AlertRecord {
            id,
            user_id: self.user_id,
            consumption: self.consumption,
            message: self.message,
            raised_at: self.raised_at.trunc_subsecs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_mirrors_alert_data() {
        let data = AlertData::new(UserId::new(2), "ana", 61.5, "over limit");
        let record = data.to_new_record().into_record(AlertId::new(9));
        assert_eq!(record.user_id, data.user_id);
        assert_eq!(record.message, "over limit");
        assert_eq!(record.raised_at, data.raised_at);
        assert!((record.consumption - 61.5).abs() < f64::EPSILON);
    }

    #[test]
    fn raised_at_serializes_with_millisecond_precision() {
        let record = AlertData::new(UserId::new(2), "ana", 61.5, "over limit")
            .to_new_record()
            .into_record(AlertId::new(1));
        let json = serde_json::to_value(&record).unwrap();
        let text = json["raised_at"].as_str().unwrap();
        let fraction = text.rsplit('.').next().unwrap();
        assert_eq!(fraction.len(), 4, "{text}");
        assert!(fraction.ends_with('Z'));

        let back: AlertRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
