//! Delivery transports for remote notifications.

use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ids::UserId;

/// A formatted notification ready for delivery.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Id of the alert event this notification reports.
    pub event_id: Uuid,
    pub user_id: UserId,
    pub subject: String,
    pub body: String,
}

/// Delivery failures. Always recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("No delivery transport is configured")]
    Unconfigured,

    #[error("Delivery to {recipient} rejected: {reason}")]
    Rejected {
        recipient: String,
        reason: String,
    },

    #[error("Delivery channel disconnected")]
    Disconnected,
}

/// Sends a formatted notification to a recipient.
pub trait NotificationTransport: Send + Sync + fmt::Debug {
    /// Attempts delivery; failures are returned, never panicked.
    fn send(&self, message: &Notification, recipient: &str) -> Result<(), DeliveryError>;
}

/// A delivered notification as seen by the receiving end of a [`ChannelTransport`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub recipient: String,
    pub notification: Notification,
}

/// In-process mailbox transport backed by a bounded channel.
///
/// A full mailbox rejects the delivery instead of blocking the alert path.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: Sender<Delivery>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver draining it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<Delivery>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationTransport for ChannelTransport {
    fn send(&self, message: &Notification, recipient: &str) -> Result<(), DeliveryError> {
        let delivery = Delivery {
            recipient: recipient.to_string(),
            notification: message.clone(),
        };
        match self.tx.try_send(delivery) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Rejected {
                recipient: recipient.to_string(),
                reason: "mailbox full".to_string(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Disconnected),
        }
    }
}

/// Transport for deployments without a relay: every send fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredTransport;

impl NotificationTransport for UnconfiguredTransport {
    fn send(&self, _message: &Notification, _recipient: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Unconfigured)
    }
}
