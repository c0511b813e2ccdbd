//! Alert observers.
//!
//! Observers never return errors to the engine. Each one decides for itself
//! whether an alert concerns it.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ids::UserId;
use crate::time::{file_stamp, iso_millis};

use super::transport::{Notification, NotificationTransport};
use super::types::AlertData;

/// Litres per cubic metre.
const LITRES_PER_CUBIC_METRE: f64 = 1000.0;

/// Capability: react to a raised alert.
pub trait AlertObserver: Send + Sync {
    /// Receives one alert. Must not panic on delivery problems.
    fn on_alert(&self, alert: &AlertData);
}

/// Renders every alert as one line on a writer (stdout by default).
#[derive(Debug)]
pub struct ConsoleObserver<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
}

impl ConsoleObserver<io::Stdout> {
    /// Observer printing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    /// Observer printing to `out`.
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl<W: Write + Send> AlertObserver for ConsoleObserver<W> {
    fn on_alert(&self, alert: &AlertData) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        // Best-effort output.
        let _ = writeln!(
            out,
            "[ALERT {}] user {} ({}) | consumption {:.3} m3 | {}",
            iso_millis(alert.raised_at),
            alert.user_id,
            alert.display_name,
            alert.consumption,
            alert.message
        );
        let _ = out.flush();
    }
}

/// Fallback record written when remote delivery fails.
#[derive(Debug, Serialize)]
struct OutboxRecord<'a> {
    recipient: &'a str,
    notification: &'a Notification,
    error: String,
    failed_at: DateTime<Utc>,
}

/// Sends alerts for one user through a transport, falling back to a local outbox.
#[derive(Debug)]
pub struct RemoteNotifier {
    target: UserId,
    recipient: String,
    transport: Arc<dyn NotificationTransport>,
    outbox: PathBuf,
}

impl RemoteNotifier {
    /// Notifier for alerts of `target`, delivered to `recipient`.
    #[must_use]
    pub fn new(
        target: UserId,
        recipient: impl Into<String>,
        transport: Arc<dyn NotificationTransport>,
        outbox: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            recipient: recipient.into(),
            transport,
            outbox: outbox.into(),
        }
    }

    /// The user this notifier listens for.
    #[must_use]
    pub const fn target(&self) -> UserId {
        self.target
    }

    /// Builds the message for an alert. Consumption is reported in litres.
    #[must_use]
    pub fn format(alert: &AlertData) -> Notification {
        let litres = alert.consumption * LITRES_PER_CUBIC_METRE;
        Notification {
            event_id: alert.event_id,
            user_id: alert.user_id,
            subject: format!("Consumption alert for {}", alert.display_name),
            body: format!(
                "ALERT: consumption of {litres:.1} L ({:.3} m3) detected.\nMessage: {}\nDate: {}",
                alert.consumption,
                alert.message,
                iso_millis(alert.raised_at)
            ),
        }
    }

    fn write_fallback(&self, notification: &Notification, error: String) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.outbox)?;
        let now = Utc::now();
        let name = format!(
            "alert_{}_{}_{}.json",
            notification.user_id,
            file_stamp(now),
            notification.event_id.simple()
        );
        let path = self.outbox.join(name);
        let record = OutboxRecord {
            recipient: &self.recipient,
            notification,
            error,
            failed_at: now,
        };
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &record)?;
        writer.flush()?;
        Ok(path)
    }
}

impl AlertObserver for RemoteNotifier {
    fn on_alert(&self, alert: &AlertData) {
        if alert.user_id != self.target {
            return;
        }

        let notification = Self::format(alert);
        match self.transport.send(&notification, &self.recipient) {
            Ok(()) => {
                info!(user = %alert.user_id, recipient = %self.recipient, "alert notification delivered");
            }
            Err(err) => match self.write_fallback(&notification, err.to_string()) {
                Ok(path) => {
                    warn!(
                        user = %alert.user_id,
                        error = %err,
                        outbox = %path.display(),
                        "delivery failed, alert kept in outbox"
                    );
                }
                Err(io_err) => {
                    error!(
                        user = %alert.user_id,
                        error = %err,
                        outbox_error = %io_err,
                        "delivery failed and outbox write failed, alert lost"
                    );
                }
            },
        }
    }
}
