//! Alert engine.
//!
//! Owns rule registrations and observers. Each collection sits behind its own
//! `RwLock`, independent of the coordinator's state lock, so evaluation never
//! queues behind unrelated coordinator work.
//!
//! Evaluation iterates snapshots of the rule list and of the observer list,
//! each taken under a shared lock that is released before iterating. A rule
//! or observer registered while a pass is running is therefore either wholly
//! part of a later pass or absent from the current one.

use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{MeterError, MeterResult};
use crate::ids::UserId;
use crate::storage::{HistoryStore, HistoryView};

use super::observers::AlertObserver;
use super::rules::{AlertRule, RuleStrategy, Verdict};
use super::types::AlertData;

fn lock_err(context: &'static str) -> MeterError {
    MeterError::internal(format!("poisoned lock: {context}"))
}

/// Rule registry, observer registry and the evaluation pass.
pub struct AlertEngine {
    history: Arc<dyn HistoryStore>,
    rules: RwLock<Vec<(UserId, AlertRule)>>,
    observers: RwLock<Vec<Arc<dyn AlertObserver>>>,
}

impl AlertEngine {
    /// Creates an engine reading history from and persisting alerts to `history`.
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            history,
            rules: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a rule for a user. Rules are not persisted here.
    pub fn add_rule(&self, user_id: UserId, rule: AlertRule) -> MeterResult<()> {
        rule.validate()?;
        let mut rules = self.rules.write().map_err(|_| lock_err("engine.rules"))?;
        rules.push((user_id, rule));
        debug!(user = %user_id, kind = rule.kind(), "rule registered");
        Ok(())
    }

    /// Drops every rule of a user. Returns how many were removed.
    pub fn remove_rules_for(&self, user_id: UserId) -> MeterResult<usize> {
        let mut rules = self.rules.write().map_err(|_| lock_err("engine.rules"))?;
        let before = rules.len();
        rules.retain(|(uid, _)| *uid != user_id);
        Ok(before - rules.len())
    }

    /// Rules currently registered for a user, in registration order.
    pub fn rules_for(&self, user_id: UserId) -> MeterResult<Vec<AlertRule>> {
        let rules = self.rules.read().map_err(|_| lock_err("engine.rules"))?;
        Ok(rules.iter().filter(|(uid, _)| *uid == user_id).map(|(_, r)| *r).collect())
    }

    /// Adds an observer to the fan-out list.
    pub fn register_observer(&self, observer: Arc<dyn AlertObserver>) -> MeterResult<()> {
        let mut observers = self.observers.write().map_err(|_| lock_err("engine.observers"))?;
        observers.push(observer);
        Ok(())
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> MeterResult<usize> {
        let observers = self.observers.read().map_err(|_| lock_err("engine.observers"))?;
        Ok(observers.len())
    }

    /// Evaluates every rule of `user_id` against `value`.
    ///
    /// For each triggered rule an alert record is persisted and every observer
    /// is notified. A failure to persist the record is logged and does not stop
    /// the notification. Returns the alerts raised, in rule order.
    pub fn evaluate(&self, user_id: UserId, display_name: &str, value: f64) -> MeterResult<Vec<AlertData>> {
        let snapshot: Vec<AlertRule> = {
            let rules = self.rules.read().map_err(|_| lock_err("engine.rules"))?;
            rules.iter().filter(|(uid, _)| *uid == user_id).map(|(_, r)| *r).collect()
        };

        let history = HistoryView(self.history.as_ref());
        let mut raised = Vec::new();
        for rule in &snapshot {
            let Verdict::Triggered(message) = rule.analyze(value, &history, user_id) else {
                continue;
            };

            let alert = AlertData::new(user_id, display_name, value, message);
            match self.history.save_alert(alert.to_new_record()) {
                Ok(record) => {
                    info!(user = %user_id, alert = %record.id, kind = rule.kind(), value, "alert raised");
                }
                Err(err) => {
                    warn!(user = %user_id, kind = rule.kind(), error = %err, "alert raised but not persisted");
                }
            }
            self.notify(&alert)?;
            raised.push(alert);
        }

        debug!(user = %user_id, value, rules = snapshot.len(), raised = raised.len(), "evaluation pass done");
        Ok(raised)
    }

    fn notify(&self, alert: &AlertData) -> MeterResult<()> {
        // Observers run without the list lock held; they may register observers themselves.
        let snapshot: Vec<Arc<dyn AlertObserver>> = {
            let observers = self.observers.read().map_err(|_| lock_err("engine.observers"))?;
            observers.clone()
        };
        for observer in &snapshot {
            observer.on_alert(alert);
        }
        Ok(())
    }
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("rules", &self.rules.read().map(|r| r.len()).unwrap_or(0))
            .field("observers", &self.observers.read().map(|o| o.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}
