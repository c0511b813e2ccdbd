//! Runtime configuration for a monitoring deployment.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::ids::UserId;
use crate::source::DiscoveryConfig;

/// Limit of the fixed-threshold rule given to every new user, in cubic metres.
pub const DEFAULT_LIMIT: f64 = 50.0;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Directory holding the JSON store.
    pub data_dir: PathBuf,
    /// Discovery loop settings.
    pub discovery: DiscoveryConfig,
    /// Directory receiving undelivered notifications.
    pub outbox_dir: PathBuf,
    /// Limit of the default rule for new users.
    pub default_limit: f64,
    /// User whose alerts are forwarded remotely, if any.
    pub notify_user: Option<UserId>,
    /// Recipient address for remote notifications.
    pub notify_recipient: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            discovery: DiscoveryConfig::default(),
            outbox_dir: PathBuf::from("outbox"),
            default_limit: DEFAULT_LIMIT,
            notify_user: None,
            notify_recipient: None,
        }
    }
}

impl MonitorConfig {
    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discovery.validate()?;
        if !self.default_limit.is_finite() || self.default_limit < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "default_limit",
                reason: format!("must be finite and non-negative, got {}", self.default_limit),
            });
        }
        match (&self.notify_user, &self.notify_recipient) {
            (Some(_), None) => Err(ConfigError::MissingParameter {
                field: "notify_recipient",
            }),
            (None, Some(_)) => Err(ConfigError::MissingParameter { field: "notify_user" }),
            (Some(user), Some(_)) if user.get() == 0 => Err(ConfigError::InvalidValue {
                field: "notify_user",
                reason: "user ids start at 1".to_string(),
            }),
            (_, Some(recipient)) if recipient.trim().is_empty() => Err(ConfigError::MissingParameter {
                field: "notify_recipient",
            }),
            _ => Ok(()),
        }
    }

    /// Returns the remote notification target when both halves are set.
    #[must_use]
    pub fn notification_target(&self) -> Option<(UserId, &str)> {
        match (self.notify_user, self.notify_recipient.as_deref()) {
            (Some(user), Some(recipient)) => Some((user, recipient)),
            _ => None,
        }
    }
}
