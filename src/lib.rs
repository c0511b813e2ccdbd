//! # meterwatch - consumption monitoring and alerting
//!
//! meterwatch coordinates concurrent access to a pool of utility meters,
//! aggregates their readings per owning user, evaluates alert rules against
//! the aggregate and notifies interested observers.
//!
//! ## Core Concepts
//!
//! - **Coordinator**: the shared, permission-checked entry point for every operation
//! - **Source**: a meter directory behind an adapter, kept in an in-memory registry
//! - **Reading**: one persisted value of one source, taken during a monitoring pass
//! - **AlertRule**: a fixed threshold or a moving average over recent readings
//! - **Observer**: anything that reacts to raised alerts (console, remote notifier)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meterwatch::{AlertRule, Coordinator, NewUser, Role, SourceConfig, Token};
//!
//! let coordinator = Arc::new(Coordinator::in_memory());
//! let admin = Token::new(1, Role::Admin);
//!
//! let ana = coordinator.create_user(&admin, NewUser::new("ana", "secret", "ana@example.org", Role::Reader))?;
//! coordinator.register_source_config(&admin, SourceConfig::filesystem("kitchen", "/data/Medicoes_1/kitchen"))?;
//! coordinator.link_source(&admin, ana.id, "kitchen")?;
//! coordinator.configure_rule(&admin, ana.id, AlertRule::fixed(50.0))?;
//!
//! let report = coordinator.monitor(&admin, ana.id)?;
//! println!("{} m3, {} alert(s)", report.total, report.alerts.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod auth;
pub mod error;
pub mod ids;
pub mod reading;
pub mod time;
pub mod user;

// Subsystems
pub mod alerting;
pub mod source;
pub mod storage;

// Facade and configuration
pub mod config;
pub mod coordinator;

// Re-export primary types at crate root for convenience
pub use alerting::{AlertData, AlertEngine, AlertObserver, AlertRecord, AlertRule, ConsoleObserver, RemoteNotifier};
pub use auth::{Role, Token};
pub use config::MonitorConfig;
pub use coordinator::{Coordinator, MonitorReport, SourceState, SourceStatus};
pub use error::{MeterError, MeterResult};
pub use ids::{AlertId, ReadingId, RuleId, UserId};
pub use reading::Reading;
pub use source::{DiscoveryConfig, DiscoveryLoop, SourceConfig};
pub use storage::{FileStore, HistoryStore, InMemoryStores, StorageError, UserStore};
pub use user::{NewUser, User};
