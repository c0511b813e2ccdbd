//! Alert rule strategies.
//!
//! The rule set is closed, so rules are a serde-tagged enum. Each variant
//! wraps a strategy struct implementing [`RuleStrategy`]; the enum dispatches.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::ids::{RuleId, UserId};
use crate::storage::ReadingHistory;

/// Default multiplier applied to the moving average.
pub const DEFAULT_MULTIPLIER: f64 = 1.2;

/// Result of analyzing one value against one rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The rule fired; the message describes why.
    Triggered(String),
    /// Nothing to report.
    Quiet,
}

impl Verdict {
    /// Returns true if the rule fired.
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered(_))
    }
}

/// Decides from a current value and historical readings whether to alert.
pub trait RuleStrategy {
    /// Analyzes `value` for `user_id`, consulting `history` when needed.
    fn analyze(&self, value: f64, history: &dyn ReadingHistory, user_id: UserId) -> Verdict;
}

/// Fires when the value is strictly above a limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedThreshold {
    /// Upper bound; the bound itself does not fire.
    pub limit: f64,
}

impl RuleStrategy for FixedThreshold {
    fn analyze(&self, value: f64, _history: &dyn ReadingHistory, _user_id: UserId) -> Verdict {
        if value > self.limit {
            Verdict::Triggered(format!("Consumption {value:.3} exceeds limit {:.3}", self.limit))
        } else {
            Verdict::Quiet
        }
    }
}

/// Fires when the value is above the mean of the last `window` readings
/// scaled by `multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingAverage {
    /// Number of most recent readings forming the baseline.
    pub window: usize,
    /// Factor applied to the baseline mean.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

impl MovingAverage {
    /// A moving average with the default multiplier.
    #[must_use]
    pub const fn new(window: usize) -> Self {
        Self {
            window,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RuleStrategy for MovingAverage {
    fn analyze(&self, value: f64, history: &dyn ReadingHistory, user_id: UserId) -> Verdict {
        let readings = match history.recent_readings(user_id, self.window) {
            Ok(readings) => readings,
            Err(err) => {
                warn!(user = %user_id, error = %err, "moving average skipped: history unavailable");
                return Verdict::Quiet;
            }
        };
        // No baseline yet.
        if readings.is_empty() {
            return Verdict::Quiet;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = readings.iter().map(|r| r.value).sum::<f64>() / readings.len() as f64;
        let ceiling = mean * self.multiplier;
        if value > ceiling {
            Verdict::Triggered(format!(
                "Consumption {value:.3} exceeds moving average {mean:.3} x {:.2} over {} readings",
                self.multiplier,
                readings.len()
            ))
        } else {
            Verdict::Quiet
        }
    }
}

/// Alert rule definitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertRule {
    /// See [`FixedThreshold`].
    FixedThreshold(FixedThreshold),
    /// See [`MovingAverage`].
    MovingAverage(MovingAverage),
}

impl AlertRule {
    /// Shorthand for a fixed threshold rule.
    #[must_use]
    pub const fn fixed(limit: f64) -> Self {
        Self::FixedThreshold(FixedThreshold { limit })
    }

    /// Shorthand for a moving average rule.
    #[must_use]
    pub const fn moving_average(window: usize, multiplier: f64) -> Self {
        Self::MovingAverage(MovingAverage { window, multiplier })
    }

    /// Stable name of the rule kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FixedThreshold(_) => "fixed_threshold",
            Self::MovingAverage(_) => "moving_average",
        }
    }

    /// Checks rule parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::FixedThreshold(rule) => {
                if !rule.limit.is_finite() {
                    return Err(ConfigError::InvalidValue {
                        field: "limit",
                        reason: format!("must be finite, got {}", rule.limit),
                    });
                }
            }
            Self::MovingAverage(rule) => {
                if rule.window == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "window",
                        reason: "must be at least 1".to_string(),
                    });
                }
                if !rule.multiplier.is_finite() || rule.multiplier <= 0.0 {
                    return Err(ConfigError::InvalidValue {
                        field: "multiplier",
                        reason: format!("must be finite and positive, got {}", rule.multiplier),
                    });
                }
            }
        }
        Ok(())
    }
}

impl RuleStrategy for AlertRule {
    fn analyze(&self, value: f64, history: &dyn ReadingHistory, user_id: UserId) -> Verdict {
        match self {
            Self::FixedThreshold(rule) => rule.analyze(value, history, user_id),
            Self::MovingAverage(rule) => rule.analyze(value, history, user_id),
        }
    }
}

/// A rule as persisted for a user.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: RuleId,
    pub user_id: UserId,
    pub rule: AlertRule,
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::ids::ReadingId;
    use crate::reading::Reading;
    use crate::storage::StorageError;

    struct FixedHistory(Vec<f64>);

    impl ReadingHistory for FixedHistory {
        fn recent_readings(&self, user_id: UserId, limit: usize) -> Result<Vec<Reading>, StorageError> {
            Ok(self
                .0
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, v)| Reading {
                    id: ReadingId::new(i as u64 + 1),
                    user_id,
                    source_id: "m1".to_string(),
                    recorded_at: Utc::now(),
                    value: *v,
                    provenance: String::new(),
                })
                .collect())
        }
    }

    struct BrokenHistory;

    impl ReadingHistory for BrokenHistory {
        fn recent_readings(&self, _user_id: UserId, _limit: usize) -> Result<Vec<Reading>, StorageError> {
            Err(StorageError::BackendError("disk gone".to_string()))
        }
    }

    const USER: UserId = UserId::new(1);

    #[test]
    fn fixed_threshold_is_strict() {
        let rule = AlertRule::fixed(50.0);
        let history = FixedHistory(vec![]);
        assert!(rule.analyze(51.0, &history, USER).is_triggered());
        assert!(!rule.analyze(50.0, &history, USER).is_triggered());
    }

    #[test]
    fn fixed_threshold_zero_does_not_fire_on_zero() {
        let rule = AlertRule::fixed(0.0);
        assert_eq!(rule.analyze(0.0, &FixedHistory(vec![]), USER), Verdict::Quiet);
    }

    #[test]
    fn moving_average_uses_multiplier() {
        let rule = AlertRule::moving_average(3, 1.2);
        let history = FixedHistory(vec![10.0, 10.0, 10.0]);
        assert!(rule.analyze(37.0, &history, USER).is_triggered());
        assert!(!rule.analyze(35.0, &history, USER).is_triggered());
    }

    #[test]
    fn moving_average_only_reads_window() {
        let rule = AlertRule::moving_average(2, 1.0);
        // Newest first: window covers 10 and 20, mean 15.
        let history = FixedHistory(vec![10.0, 20.0, 1000.0]);
        assert!(rule.analyze(16.0, &history, USER).is_triggered());
        assert!(!rule.analyze(15.0, &history, USER).is_triggered());
    }

    #[test]
    fn moving_average_without_history_is_quiet() {
        let rule = AlertRule::MovingAverage(MovingAverage::new(5));
        assert_eq!(rule.analyze(1_000.0, &FixedHistory(vec![]), USER), Verdict::Quiet);
    }

    #[test]
    fn moving_average_history_failure_is_quiet() {
        let rule = AlertRule::moving_average(3, 1.2);
        assert_eq!(rule.analyze(1_000.0, &BrokenHistory, USER), Verdict::Quiet);
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert!(AlertRule::moving_average(0, 1.2).validate().is_err());
        assert!(AlertRule::moving_average(3, 0.0).validate().is_err());
        assert!(AlertRule::fixed(f64::NAN).validate().is_err());
        assert!(AlertRule::fixed(50.0).validate().is_ok());
    }

    #[test]
    fn rule_serializes_with_kind_tag() {
        let json = serde_json::to_value(AlertRule::moving_average(4, 1.5)).unwrap();
        assert_eq!(json["kind"], "moving_average");
        assert_eq!(json["window"], 4);

        let parsed: AlertRule = serde_json::from_str(r#"{"kind":"moving_average","window":3}"#).unwrap();
        assert_eq!(parsed, AlertRule::MovingAverage(MovingAverage::new(3)));
    }
}
