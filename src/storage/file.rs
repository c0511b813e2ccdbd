//! JSON file storage backend.
//!
//! Users, links, alerts and rules live in one JSON document. Every mutation
//! rewrites it using the write-to-temp-then-rename pattern so a crash leaves
//! either the old or the new document on disk, never a torn one. The
//! in-memory copy only changes once the new document is on disk.
//!
//! Readings grow with every monitoring pass, so they stay out of the document:
//! each one is appended as a single JSON line to `<name>.readings.jsonl` next
//! to it. A torn last line, left by a crash mid-append, is dropped on open.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alerting::rules::{AlertRule, RuleDefinition};
use crate::alerting::types::{AlertRecord, NewAlertRecord};
use crate::ids::{RuleId, UserId};
use crate::reading::{NewReading, Reading};
use crate::storage::memory::lock_err;
use crate::storage::state::{HistoryTables, ReadingTable, UserTables};
use crate::storage::traits::{HistoryStore, StorageError, UserStore};
use crate::user::{NewUser, User};

/// Default file name inside a data directory.
pub const DEFAULT_FILE_NAME: &str = "meterwatch.json";

const READINGS_EXTENSION: &str = "readings.jsonl";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Document {
    users: UserTables,
    history: HistoryTables,
}

fn io_err(path: &Path, err: &std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {err}", path.display()))
}

fn serde_err(path: &Path, err: &serde_json::Error) -> StorageError {
    StorageError::SerializationError(format!("{}: {err}", path.display()))
}

/// Append-only reading log and its in-memory index.
#[derive(Debug)]
struct ReadingLog {
    path: PathBuf,
    file: File,
    table: ReadingTable,
}

impl ReadingLog {
    fn open(path: PathBuf) -> Result<Self, StorageError> {
        let rows = if path.exists() {
            Self::load(&path)?
        } else {
            Vec::new()
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, &e))?;
        let table = ReadingTable::from_rows(rows);
        debug!(path = %path.display(), readings = table.len(), "reading log opened");
        Ok(Self { path, file, table })
    }

    fn load(path: &Path) -> Result<Vec<Reading>, StorageError> {
        let content = fs::read_to_string(path).map_err(|e| io_err(path, &e))?;
        let mut rows = Vec::new();
        let mut good_len = 0usize;
        let mut lines = content.split_inclusive('\n').peekable();
        while let Some(line) = lines.next() {
            let is_last = lines.peek().is_none();
            let text = line.trim_end();
            if text.is_empty() {
                good_len += line.len();
                continue;
            }
            match serde_json::from_str::<Reading>(text) {
                Ok(reading) if line.ends_with('\n') => {
                    rows.push(reading);
                    good_len += line.len();
                }
                Err(err) if !is_last => return Err(serde_err(path, &err)),
                // Last line unparsable or missing its newline: an append that never finished.
                _ => {
                    warn!(path = %path.display(), kept = rows.len(), "dropping torn reading log tail");
                    let file = OpenOptions::new()
                        .write(true)
                        .open(path)
                        .map_err(|e| io_err(path, &e))?;
                    file.set_len(good_len as u64).map_err(|e| io_err(path, &e))?;
                }
            }
        }
        Ok(rows)
    }

    fn append(&mut self, reading: NewReading) -> Result<Reading, StorageError> {
        let reading = self.table.prepare(reading);
        let mut line = serde_json::to_vec(&reading).map_err(|e| serde_err(&self.path, &e))?;
        line.push(b'\n');

        let start = self.file.metadata().map_err(|e| io_err(&self.path, &e))?.len();
        let written = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data());
        if let Err(err) = written {
            if let Err(undo) = self.file.set_len(start) {
                warn!(path = %self.path.display(), error = %undo, "could not trim failed reading append");
            }
            return Err(io_err(&self.path, &err));
        }

        self.table.commit(reading.clone());
        Ok(reading)
    }
}

/// File-backed store implementing both [`UserStore`] and [`HistoryStore`].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    doc: RwLock<Document>,
    readings: RwLock<ReadingLog>,
}

impl FileStore {
    /// Opens (or creates) the document at `path` and its reading log.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the parent directory cannot be created or a
    /// file cannot be read, and `StorageError::SerializationError` if one is corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, &e))?;
        }

        let doc = if path.exists() {
            let file = File::open(&path).map_err(|e| io_err(&path, &e))?;
            let mut doc: Document =
                serde_json::from_reader(BufReader::new(file)).map_err(|e| serde_err(&path, &e))?;
            doc.users.reindex();
            info!(path = %path.display(), "loaded store document");
            doc
        } else {
            info!(path = %path.display(), "starting empty store document");
            Document::default()
        };
        let readings = ReadingLog::open(path.with_extension(READINGS_EXTENSION))?;

        Ok(Self {
            path,
            doc: RwLock::new(doc),
            readings: RwLock::new(readings),
        })
    }

    /// Opens `<dir>/meterwatch.json`.
    ///
    /// # Errors
    ///
    /// See [`FileStore::open`].
    pub fn open_in(dir: &Path) -> Result<Self, StorageError> {
        Self::open(dir.join(DEFAULT_FILE_NAME))
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the append-only reading log.
    #[must_use]
    pub fn readings_path(&self) -> PathBuf {
        self.path.with_extension(READINGS_EXTENSION)
    }

    fn persist(&self, doc: &Document) -> Result<(), StorageError> {
        let temp_path = self.path.with_extension("json.tmp");
        let file = File::create(&temp_path).map_err(|e| io_err(&temp_path, &e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, doc).map_err(|e| serde_err(&temp_path, &e))?;
        writer.flush().map_err(|e| io_err(&temp_path, &e))?;
        writer.get_ref().sync_all().map_err(|e| io_err(&temp_path, &e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| io_err(&self.path, &e))?;
        debug!(path = %self.path.display(), "store document written");
        Ok(())
    }

    fn read<T>(&self, context: &'static str, f: impl FnOnce(&Document) -> T) -> Result<T, StorageError> {
        let doc = self.doc.read().map_err(|_| lock_err(context))?;
        Ok(f(&doc))
    }

    /// Applies `f` to a copy of the document, persists the copy and only then
    /// swaps it in. A failed write leaves memory and disk unchanged.
    fn write<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&mut Document) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut doc = self.doc.write().map_err(|_| lock_err(context))?;
        let mut next = doc.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *doc = next;
        Ok(out)
    }
}

impl UserStore for FileStore {
    fn insert(&self, user: NewUser) -> Result<User, StorageError> {
        self.write("file.user.insert", |doc| doc.users.insert(user))
    }

    fn get(&self, id: UserId) -> Result<Option<User>, StorageError> {
        self.read("file.user.get", |doc| doc.users.get(id))
    }

    fn find_by_login(&self, login: &str) -> Result<Option<User>, StorageError> {
        self.read("file.user.find_by_login", |doc| doc.users.find_by_login(login))
    }

    fn delete(&self, id: UserId) -> Result<bool, StorageError> {
        self.write("file.user.delete", |doc| Ok(doc.users.delete(id)))
    }

    fn link_source(&self, id: UserId, source_id: &str) -> Result<(), StorageError> {
        self.write("file.user.link_source", |doc| doc.users.link(id, source_id))
    }

    fn unlink_source(&self, id: UserId, source_id: &str) -> Result<bool, StorageError> {
        self.write("file.user.unlink_source", |doc| Ok(doc.users.unlink(id, source_id)))
    }

    fn list_all(&self) -> Result<Vec<User>, StorageError> {
        self.read("file.user.list_all", |doc| doc.users.list_all())
    }

    fn links(&self) -> Result<Vec<(UserId, String)>, StorageError> {
        self.read("file.user.links", |doc| doc.users.links())
    }
}

impl HistoryStore for FileStore {
    fn save_reading(&self, reading: NewReading) -> Result<Reading, StorageError> {
        let mut log = self.readings.write().map_err(|_| lock_err("file.history.save_reading"))?;
        log.append(reading)
    }

    fn recent_readings(&self, user_id: UserId, limit: usize) -> Result<Vec<Reading>, StorageError> {
        let log = self.readings.read().map_err(|_| lock_err("file.history.recent_readings"))?;
        Ok(log.table.recent(user_id, limit))
    }

    fn save_alert(&self, alert: NewAlertRecord) -> Result<AlertRecord, StorageError> {
        self.write("file.history.save_alert", |doc| Ok(doc.history.save_alert(alert)))
    }

    fn alerts_for_user(&self, user_id: UserId) -> Result<Vec<AlertRecord>, StorageError> {
        self.read("file.history.alerts_for_user", |doc| doc.history.alerts_for_user(user_id))
    }

    fn save_rule(&self, user_id: UserId, rule: AlertRule) -> Result<RuleId, StorageError> {
        self.write("file.history.save_rule", |doc| Ok(doc.history.save_rule(user_id, rule)))
    }

    fn rules_for_user(&self, user_id: UserId) -> Result<Vec<RuleDefinition>, StorageError> {
        self.read("file.history.rules_for_user", |doc| doc.history.rules_for_user(user_id))
    }

    fn all_rules(&self) -> Result<Vec<RuleDefinition>, StorageError> {
        self.read("file.history.all_rules", |doc| doc.history.all_rules())
    }
}
