//! Persistence for users, readings, alerts and rules.
//!
//! The traits define the abstract interface; `memory` and `file` provide the
//! backends shipped with the crate.

mod file;
mod memory;
mod state;
mod traits;

pub use file::{FileStore, DEFAULT_FILE_NAME};
pub use memory::{InMemoryHistoryStore, InMemoryStores, InMemoryUserStore};
pub use traits::{HistoryStore, HistoryView, ReadingHistory, StorageError, UserStore};
