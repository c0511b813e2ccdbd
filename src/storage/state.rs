//! Backend-independent table logic shared by the in-memory and file stores.
//!
//! Both backends keep these structs behind `RwLock`s. The file backend
//! serializes `UserTables` and `HistoryTables` as one document after every
//! mutation, and appends readings to a separate log one line at a time.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::alerting::rules::{AlertRule, RuleDefinition};
use crate::alerting::types::{AlertRecord, NewAlertRecord};
use crate::ids::{AlertId, IdSequence, ReadingId, RuleId, UserId};
use crate::reading::{NewReading, Reading};
use crate::storage::traits::StorageError;
use crate::user::{NewUser, User};

fn login_key(login: &str) -> String {
    login.trim().to_string()
}

/// Users and their linkage records.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct UserTables {
    seq: IdSequence,
    users: BTreeMap<UserId, User>,
    links: BTreeSet<(UserId, String)>,
    #[serde(skip)]
    by_login: HashMap<String, UserId>,
}

impl UserTables {
    /// Rebuilds derived indexes after deserialization.
    pub(crate) fn reindex(&mut self) {
        self.by_login = self
            .users
            .values()
            .map(|u| (login_key(&u.login), u.id))
            .collect();
    }

    fn hydrate(&self, user: &User) -> User {
        let mut out = user.clone();
        out.sources = self
            .links
            .range((user.id, String::new())..)
            .take_while(|(uid, _)| *uid == user.id)
            .map(|(_, sid)| sid.clone())
            .collect();
        out
    }

    pub(crate) fn insert(&mut self, new_user: NewUser) -> Result<User, StorageError> {
        let key = login_key(&new_user.login);
        if self.by_login.contains_key(&key) {
            return Err(StorageError::DuplicateLogin(key));
        }
        let id = UserId::new(self.seq.next());
        let user = new_user.into_user(id);
        self.by_login.insert(key, id);
        self.users.insert(id, user.clone());
        Ok(user)
    }

    pub(crate) fn get(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| self.hydrate(u))
    }

    pub(crate) fn find_by_login(&self, login: &str) -> Option<User> {
        self.by_login
            .get(&login_key(login))
            .and_then(|id| self.users.get(id))
            .map(|u| self.hydrate(u))
    }

    pub(crate) fn delete(&mut self, id: UserId) -> bool {
        let Some(user) = self.users.remove(&id) else {
            return false;
        };
        self.by_login.remove(&login_key(&user.login));
        self.links.retain(|(uid, _)| *uid != id);
        true
    }

    pub(crate) fn link(&mut self, id: UserId, source_id: &str) -> Result<(), StorageError> {
        if !self.users.contains_key(&id) {
            return Err(StorageError::UserNotFound(id));
        }
        self.links.insert((id, source_id.to_string()));
        Ok(())
    }

    pub(crate) fn unlink(&mut self, id: UserId, source_id: &str) -> bool {
        self.links.remove(&(id, source_id.to_string()))
    }

    pub(crate) fn list_all(&self) -> Vec<User> {
        self.users.values().map(|u| self.hydrate(u)).collect()
    }

    pub(crate) fn links(&self) -> Vec<(UserId, String)> {
        self.links.iter().cloned().collect()
    }
}

/// Append-only reading history, kept in id order.
#[derive(Debug, Default)]
pub(crate) struct ReadingTable {
    seq: IdSequence,
    rows: Vec<Reading>,
}

impl ReadingTable {
    /// Rebuilds the table from previously stored rows.
    pub(crate) fn from_rows(mut rows: Vec<Reading>) -> Self {
        rows.sort_by_key(|r| r.id);
        let mut seq = IdSequence::default();
        if let Some(last) = rows.last() {
            seq.advance_past(last.id.get());
        }
        Self { seq, rows }
    }

    pub(crate) fn save(&mut self, reading: NewReading) -> Reading {
        let reading = self.prepare(reading);
        self.commit(reading.clone());
        reading
    }

    /// Assigns the next id without storing the reading.
    pub(crate) fn prepare(&self, reading: NewReading) -> Reading {
        reading.into_reading(ReadingId::new(self.seq.peek()))
    }

    /// Stores a reading produced by [`ReadingTable::prepare`].
    pub(crate) fn commit(&mut self, reading: Reading) {
        self.seq.advance_past(reading.id.get());
        self.rows.push(reading);
    }

    pub(crate) fn recent(&self, user_id: UserId, limit: usize) -> Vec<Reading> {
        // Insertion order is id order, so reverse iteration is newest first.
        self.rows
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Alert records and rule definitions.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct HistoryTables {
    alert_seq: IdSequence,
    rule_seq: IdSequence,
    alerts: Vec<AlertRecord>,
    rules: Vec<RuleDefinition>,
}

impl HistoryTables {
    pub(crate) fn save_alert(&mut self, alert: NewAlertRecord) -> AlertRecord {
        let record = alert.into_record(AlertId::new(self.alert_seq.next()));
        self.alerts.push(record.clone());
        record
    }

    pub(crate) fn alerts_for_user(&self, user_id: UserId) -> Vec<AlertRecord> {
        self.alerts
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    pub(crate) fn save_rule(&mut self, user_id: UserId, rule: AlertRule) -> RuleId {
        let id = RuleId::new(self.rule_seq.next());
        self.rules.push(RuleDefinition { id, user_id, rule });
        id
    }

    pub(crate) fn rules_for_user(&self, user_id: UserId) -> Vec<RuleDefinition> {
        self.rules.iter().filter(|r| r.user_id == user_id).copied().collect()
    }

    pub(crate) fn all_rules(&self) -> Vec<RuleDefinition> {
        self.rules.clone()
    }
}
