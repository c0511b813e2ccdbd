//! Alerting subsystem: rule strategies, the evaluation engine and observers.

/// Rule registry and evaluation pass.
pub mod engine;
/// Alert observers (console, remote notifier).
pub mod observers;
/// Rule strategies.
pub mod rules;
/// Notification transports.
pub mod transport;
/// Alert record and payload types.
pub mod types;

pub use engine::AlertEngine;
pub use observers::{AlertObserver, ConsoleObserver, RemoteNotifier};
pub use rules::{AlertRule, FixedThreshold, MovingAverage, RuleDefinition, RuleStrategy, Verdict};
pub use transport::{ChannelTransport, DeliveryError, Notification, NotificationTransport, UnconfiguredTransport};
pub use types::{AlertData, AlertRecord, NewAlertRecord};
