//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::sync::{Arc, RwLock};

use crate::alerting::rules::{AlertRule, RuleDefinition};
use crate::alerting::types::{AlertRecord, NewAlertRecord};
use crate::ids::{RuleId, UserId};
use crate::reading::{NewReading, Reading};
use crate::storage::state::{HistoryTables, ReadingTable, UserTables};
use crate::storage::traits::{HistoryStore, StorageError, UserStore};
use crate::user::{NewUser, User};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory user store.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    state: RwLock<UserTables>,
}

impl InMemoryUserStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for InMemoryUserStore {
    fn insert(&self, user: NewUser) -> Result<User, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("user.insert"))?;
        state.insert(user)
    }

    fn get(&self, id: UserId) -> Result<Option<User>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("user.get"))?;
        Ok(state.get(id))
    }

    fn find_by_login(&self, login: &str) -> Result<Option<User>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("user.find_by_login"))?;
        Ok(state.find_by_login(login))
    }

    fn delete(&self, id: UserId) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("user.delete"))?;
        Ok(state.delete(id))
    }

    fn link_source(&self, id: UserId, source_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("user.link_source"))?;
        state.link(id, source_id)
    }

    fn unlink_source(&self, id: UserId, source_id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("user.unlink_source"))?;
        Ok(state.unlink(id, source_id))
    }

    fn list_all(&self) -> Result<Vec<User>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("user.list_all"))?;
        Ok(state.list_all())
    }

    fn links(&self) -> Result<Vec<(UserId, String)>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("user.links"))?;
        Ok(state.links())
    }
}

/// Thread-safe in-memory history store.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    state: RwLock<HistoryTables>,
    readings: RwLock<ReadingTable>,
}

impl InMemoryHistoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn save_reading(&self, reading: NewReading) -> Result<Reading, StorageError> {
        let mut readings = self.readings.write().map_err(|_| lock_err("history.save_reading"))?;
        Ok(readings.save(reading))
    }

    fn recent_readings(&self, user_id: UserId, limit: usize) -> Result<Vec<Reading>, StorageError> {
        let readings = self.readings.read().map_err(|_| lock_err("history.recent_readings"))?;
        Ok(readings.recent(user_id, limit))
    }

    fn save_alert(&self, alert: NewAlertRecord) -> Result<AlertRecord, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("history.save_alert"))?;
        Ok(state.save_alert(alert))
    }

    fn alerts_for_user(&self, user_id: UserId) -> Result<Vec<AlertRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("history.alerts_for_user"))?;
        Ok(state.alerts_for_user(user_id))
    }

    fn save_rule(&self, user_id: UserId, rule: AlertRule) -> Result<RuleId, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("history.save_rule"))?;
        Ok(state.save_rule(user_id, rule))
    }

    fn rules_for_user(&self, user_id: UserId) -> Result<Vec<RuleDefinition>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("history.rules_for_user"))?;
        Ok(state.rules_for_user(user_id))
    }

    fn all_rules(&self) -> Result<Vec<RuleDefinition>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("history.all_rules"))?;
        Ok(state.all_rules())
    }
}

/// Convenience bundle of in-memory stores, shared by handle.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStores {
    /// User store.
    pub users: Arc<InMemoryUserStore>,
    /// History store.
    pub history: Arc<InMemoryHistoryStore>,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::auth::Role;

    fn new_user(login: &str) -> NewUser {
        NewUser::new(login, "pw", format!("{login}@example.org"), Role::Reader)
    }

    fn reading(user_id: UserId, value: f64) -> NewReading {
        NewReading {
            user_id,
            source_id: "m1".to_string(),
            recorded_at: Utc::now(),
            value,
            provenance: "/tmp/m1/10.png".to_string(),
        }
    }

    #[test]
    fn test_user_insert_assigns_increasing_ids() {
        let store = InMemoryUserStore::new();
        let a = store.insert(new_user("a")).unwrap();
        let b = store.insert(new_user("b")).unwrap();
        assert_eq!(a.id.get(), 1);
        assert_eq!(b.id.get(), 2);
    }

    #[test]
    fn test_user_login_is_unique() {
        let store = InMemoryUserStore::new();
        store.insert(new_user("ana")).unwrap();
        let err = store.insert(new_user("ana")).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateLogin(login) if login == "ana"));
    }

    #[test]
    fn test_user_links_are_returned_with_user() {
        let store = InMemoryUserStore::new();
        let user = store.insert(new_user("ana")).unwrap();
        store.link_source(user.id, "m1").unwrap();
        store.link_source(user.id, "m2").unwrap();
        store.link_source(user.id, "m1").unwrap();

        let loaded = store.get(user.id).unwrap().unwrap();
        assert_eq!(loaded.sources.len(), 2);
        assert!(loaded.sources.contains("m2"));

        let by_login = store.find_by_login("ana").unwrap().unwrap();
        assert_eq!(by_login.sources, loaded.sources);
    }

    #[test]
    fn test_user_link_requires_existing_user() {
        let store = InMemoryUserStore::new();
        let err = store.link_source(UserId::new(99), "m1").unwrap_err();
        assert!(matches!(err, StorageError::UserNotFound(_)));
    }

    #[test]
    fn test_user_delete_cascades_links() {
        let store = InMemoryUserStore::new();
        let a = store.insert(new_user("a")).unwrap();
        let b = store.insert(new_user("b")).unwrap();
        store.link_source(a.id, "m1").unwrap();
        store.link_source(b.id, "m2").unwrap();

        assert!(store.delete(a.id).unwrap());
        assert!(!store.delete(a.id).unwrap());

        let links = store.links().unwrap();
        assert_eq!(links, vec![(b.id, "m2".to_string())]);
        assert!(store.find_by_login("a").unwrap().is_none());
        // The login is free again.
        store.insert(new_user("a")).unwrap();
    }

    #[test]
    fn test_user_unlink_reports_presence() {
        let store = InMemoryUserStore::new();
        let user = store.insert(new_user("ana")).unwrap();
        store.link_source(user.id, "m1").unwrap();
        assert!(store.unlink_source(user.id, "m1").unwrap());
        assert!(!store.unlink_source(user.id, "m1").unwrap());
        assert!(store.get(user.id).unwrap().unwrap().sources.is_empty());
    }

    #[test]
    fn test_history_recent_readings_newest_first() {
        let store = InMemoryHistoryStore::new();
        let me = UserId::new(1);
        let other = UserId::new(2);
        for v in [1.0, 2.0, 3.0, 4.0] {
            store.save_reading(reading(me, v)).unwrap();
        }
        store.save_reading(reading(other, 100.0)).unwrap();

        let recent = store.recent_readings(me, 3).unwrap();
        let values: Vec<f64> = recent.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_history_alerts_newest_first() {
        let store = InMemoryHistoryStore::new();
        let me = UserId::new(1);
        for msg in ["first", "second"] {
            store
                .save_alert(NewAlertRecord {
                    user_id: me,
                    consumption: 60.0,
                    message: msg.to_string(),
                    raised_at: Utc::now(),
                })
                .unwrap();
        }
        let alerts = store.alerts_for_user(me).unwrap();
        assert_eq!(alerts[0].message, "second");
        assert_eq!(alerts[1].message, "first");
    }

    #[test]
    fn test_history_rules_by_user() {
        let store = InMemoryHistoryStore::new();
        let a = UserId::new(1);
        let b = UserId::new(2);
        let r1 = store.save_rule(a, AlertRule::fixed(50.0)).unwrap();
        let r2 = store.save_rule(b, AlertRule::moving_average(3, 1.2)).unwrap();
        assert_ne!(r1, r2);

        let rules = store.rules_for_user(a).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule, AlertRule::fixed(50.0));
        assert_eq!(store.all_rules().unwrap().len(), 2);
    }
}
