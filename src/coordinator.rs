//! Permission-checked access coordinator.
//!
//! The coordinator is the single entry point for every operation touching
//! shared state. Repository handles, the source registry and the active
//! reading extractor live behind one `RwLock`: read-only operations take it
//! shared, mutating operations take it exclusively. The alert engine has its
//! own locks. Rule activation and removal happen while the state lock is
//! held, always in the order state then engine; evaluation runs only after
//! the state lock is released.
//!
//! Only user administration (`create_user`, `list_all_users`, `delete_user`,
//! `unlink_source`) requires an admin token. Every other operation accepts
//! any valid token; `monitor` and `alerts_for` additionally keep readers to
//! their own data.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::alerting::{AlertData, AlertEngine, AlertObserver, AlertRecord, AlertRule};
use crate::auth::{verify_credential, Token};
use crate::error::{AccessError, MeterError, MeterResult};
use crate::ids::{RuleId, UserId};
use crate::source::{
    ConsumptionComponent, FilenameExtractor, ReadingExtractor, Registration, SourceConfig, SourceLeaf,
    SourceRegistry, UserAggregate,
};
use crate::storage::{HistoryStore, InMemoryStores, UserStore};
use crate::user::{NewUser, User};

/// Outcome of one monitoring pass for a user.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    /// User that was monitored.
    pub user_id: UserId,
    /// Aggregated consumption handed to the alert engine.
    pub total: f64,
    /// Linked sources that produced a reading.
    pub sources_reported: usize,
    /// Linked sources that failed and contributed 0.0.
    pub sources_failed: usize,
    /// Linked sources skipped because they are not registered.
    pub skipped_unregistered: usize,
    /// Alerts raised by this pass.
    pub alerts: Vec<AlertData>,
}

impl MonitorReport {
    /// Returns true if at least one rule triggered.
    #[must_use]
    pub fn triggered(&self) -> bool {
        !self.alerts.is_empty()
    }
}

/// Observed state of one source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceState {
    /// Linked and readable.
    Online {
        /// Current value.
        value: f64,
    },
    /// Linked, but not registered or not readable.
    Offline {
        /// Why no value could be produced.
        reason: String,
    },
    /// Registered but linked to nobody.
    Free {
        /// Current value, if readable.
        value: Option<f64>,
    },
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online { value } => write!(f, "ONLINE ({value:.3} m3)"),
            Self::Offline { reason } => write!(f, "OFFLINE ({reason})"),
            Self::Free { value: Some(value) } => write!(f, "FREE ({value:.3} m3)"),
            Self::Free { value: None } => f.write_str("FREE"),
        }
    }
}

/// One line of the source status overview.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    pub source_id: String,
    /// Owning user, `None` for free sources.
    pub owner: Option<UserId>,
    pub state: SourceState,
}

struct CoordinatorState {
    users: Arc<dyn UserStore>,
    history: Arc<dyn HistoryStore>,
    registry: SourceRegistry,
    extractor: Arc<dyn ReadingExtractor>,
}

impl CoordinatorState {
    fn require_user(&self, user_id: UserId) -> MeterResult<User> {
        self.users
            .get(user_id)?
            .ok_or(MeterError::UserNotFound { id: user_id })
    }

    fn read_source(&self, source_id: &str) -> MeterResult<f64> {
        let adapter = self
            .registry
            .get(source_id)
            .ok_or_else(|| MeterError::SourceOffline {
                id: source_id.to_string(),
            })?;
        let handle = adapter.current_handle()?;
        Ok(self.extractor.extract(&handle))
    }
}

/// Shared access coordinator. Construct once and share as `Arc<Coordinator>`.
pub struct Coordinator {
    state: RwLock<CoordinatorState>,
    engine: Arc<AlertEngine>,
}

impl Coordinator {
    /// Creates a coordinator over the given stores, extracting readings from file names.
    pub fn new(users: Arc<dyn UserStore>, history: Arc<dyn HistoryStore>) -> Self {
        let engine = Arc::new(AlertEngine::new(Arc::clone(&history)));
        Self {
            state: RwLock::new(CoordinatorState {
                users,
                history,
                registry: SourceRegistry::new(),
                extractor: Arc::new(FilenameExtractor),
            }),
            engine,
        }
    }

    /// Creates a coordinator over fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        let stores = InMemoryStores::new();
        Self::new(stores.users, stores.history)
    }

    /// The alert engine owned by this coordinator.
    #[must_use]
    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    /// Adds an observer to the alert fan-out.
    pub fn register_observer(&self, observer: Arc<dyn AlertObserver>) -> MeterResult<()> {
        self.engine.register_observer(observer)
    }

    fn read_state(&self, context: &'static str) -> MeterResult<RwLockReadGuard<'_, CoordinatorState>> {
        self.state
            .read()
            .map_err(|_| MeterError::internal(format!("poisoned lock: coordinator.{context}")))
    }

    fn write_state(&self, context: &'static str) -> MeterResult<RwLockWriteGuard<'_, CoordinatorState>> {
        self.state
            .write()
            .map_err(|_| MeterError::internal(format!("poisoned lock: coordinator.{context}")))
    }

    /// Resolves a login and secret into a token.
    pub fn authenticate(&self, login: &str, secret: &str) -> MeterResult<Token> {
        let state = self.read_state("authenticate")?;
        let user = state.users.find_by_login(login)?.ok_or(AccessError::BadCredentials)?;
        if !verify_credential(secret, &user.credential_hash) {
            return Err(AccessError::BadCredentials.into());
        }
        debug!(user = %user.id, role = %user.role, "authenticated");
        Ok(Token::for_user(user.id, user.role))
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Creates a user. Admin only.
    pub fn create_user(&self, token: &Token, new_user: NewUser) -> MeterResult<User> {
        token.require_admin("create_user")?;
        new_user.validate()?;
        let state = self.write_state("create_user")?;
        let user = state.users.insert(new_user)?;
        info!(user = %user.id, login = %user.login, role = %user.role, "user created");
        Ok(user)
    }

    /// Lists every user. Admin only.
    pub fn list_all_users(&self, token: &Token) -> MeterResult<Vec<User>> {
        token.require_admin("list_all_users")?;
        let state = self.read_state("list_all_users")?;
        Ok(state.users.list_all()?)
    }

    /// Deletes a user, its source links and its active rules. Admin only.
    pub fn delete_user(&self, token: &Token, user_id: UserId) -> MeterResult<()> {
        token.require_admin("delete_user")?;
        let state = self.write_state("delete_user")?;
        if !state.users.delete(user_id)? {
            return Err(MeterError::UserNotFound { id: user_id });
        }
        let dropped = self.engine.remove_rules_for(user_id)?;
        drop(state);
        info!(user = %user_id, rules_dropped = dropped, "user deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Links a registered source to a user. Any valid token.
    ///
    /// The source is checked before the user.
    pub fn link_source(&self, token: &Token, user_id: UserId, source_id: &str) -> MeterResult<()> {
        token.require_valid()?;
        let state = self.write_state("link_source")?;
        if !state.registry.contains(source_id) {
            return Err(MeterError::SourceOffline {
                id: source_id.to_string(),
            });
        }
        state.require_user(user_id)?;
        state.users.link_source(user_id, source_id)?;
        info!(user = %user_id, source = %source_id, "source linked");
        Ok(())
    }

    /// Removes a link. Returns true if the link existed. Admin only.
    pub fn unlink_source(&self, token: &Token, user_id: UserId, source_id: &str) -> MeterResult<bool> {
        token.require_admin("unlink_source")?;
        let state = self.write_state("unlink_source")?;
        let removed = state.users.unlink_source(user_id, source_id)?;
        if removed {
            info!(user = %user_id, source = %source_id, "source unlinked");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Registers a source from a configuration map. Any valid token.
    ///
    /// Re-registering an identifier replaces its adapter.
    pub fn register_source(&self, token: &Token, params: &HashMap<String, String>) -> MeterResult<Registration> {
        token.require_valid()?;
        let config = SourceConfig::from_params(params)?;
        self.register_source_config(token, config)
    }

    /// Registers a source from an already typed configuration. Any valid token.
    pub fn register_source_config(&self, token: &Token, config: SourceConfig) -> MeterResult<Registration> {
        token.require_valid()?;
        let identifier = config.identifier.clone();
        let location = config.location.display().to_string();
        let mut state = self.write_state("register_source")?;
        let outcome = state.registry.register(config);
        match outcome {
            Registration::Added => info!(source = %identifier, location = %location, "source registered"),
            Registration::Replaced => debug!(source = %identifier, location = %location, "source re-registered"),
        }
        Ok(outcome)
    }

    /// Current value of a registered source. Any valid token.
    pub fn current_reading(&self, token: &Token, source_id: &str) -> MeterResult<f64> {
        token.require_valid()?;
        let state = self.read_state("current_reading")?;
        state.read_source(source_id)
    }

    /// Identifiers of every registered source, sorted. Any valid token.
    pub fn detected_sources(&self, token: &Token) -> MeterResult<Vec<String>> {
        token.require_valid()?;
        let state = self.read_state("detected_sources")?;
        Ok(state.registry.identifiers())
    }

    /// Replaces the reading extractor used by later reads. Any valid token.
    pub fn set_extraction_strategy(&self, token: &Token, extractor: Arc<dyn ReadingExtractor>) -> MeterResult<()> {
        token.require_valid()?;
        let mut state = self.write_state("set_extraction_strategy")?;
        info!(extractor = ?extractor, "extraction strategy replaced");
        state.extractor = extractor;
        Ok(())
    }

    /// Status of every linked source, followed by registered sources nobody owns. Any valid token.
    pub fn source_status(&self, token: &Token) -> MeterResult<Vec<SourceStatus>> {
        token.require_valid()?;
        let state = self.read_state("source_status")?;

        let links = state.users.links()?;
        let mut linked = BTreeSet::new();
        let mut statuses = Vec::with_capacity(links.len());
        for (owner, source_id) in links {
            let state_of = match state.read_source(&source_id) {
                Ok(value) => SourceState::Online { value },
                Err(err) => SourceState::Offline {
                    reason: err.to_string(),
                },
            };
            linked.insert(source_id.clone());
            statuses.push(SourceStatus {
                source_id,
                owner: Some(owner),
                state: state_of,
            });
        }

        for source_id in state.registry.identifiers() {
            if linked.contains(&source_id) {
                continue;
            }
            let value = state.read_source(&source_id).ok();
            statuses.push(SourceStatus {
                source_id,
                owner: None,
                state: SourceState::Free { value },
            });
        }
        Ok(statuses)
    }

    // ------------------------------------------------------------------
    // Rules & monitoring
    // ------------------------------------------------------------------

    /// Persists a rule for a user and activates it. Any valid token.
    ///
    /// The rule becomes active before the state lock is released, so a
    /// concurrent `delete_user` either sees it and drops it or runs first and
    /// makes this call fail with `UserNotFound`.
    pub fn configure_rule(&self, token: &Token, user_id: UserId, rule: AlertRule) -> MeterResult<RuleId> {
        token.require_valid()?;
        rule.validate()?;
        let state = self.write_state("configure_rule")?;
        state.require_user(user_id)?;
        let rule_id = state.history.save_rule(user_id, rule)?;
        self.engine.add_rule(user_id, rule)?;
        drop(state);
        info!(user = %user_id, rule = %rule_id, kind = rule.kind(), "rule configured");
        Ok(rule_id)
    }

    /// Loads persisted rules of existing users into the engine. Any valid token.
    ///
    /// Meant to run once at startup; calling it again activates the rules twice.
    pub fn restore_rules(&self, token: &Token) -> MeterResult<usize> {
        token.require_valid()?;
        let state = self.read_state("restore_rules")?;
        let known: BTreeSet<UserId> = state.users.list_all()?.into_iter().map(|u| u.id).collect();
        let mut restored = 0;
        for def in state.history.all_rules()? {
            if known.contains(&def.user_id) {
                self.engine.add_rule(def.user_id, def.rule)?;
                restored += 1;
            }
        }
        drop(state);
        info!(rules = restored, "rules restored");
        Ok(restored)
    }

    /// Aggregates a user's linked, registered sources and evaluates its rules.
    ///
    /// Readers may only monitor themselves. Linked sources that are not
    /// registered are skipped; failing sources contribute 0.0.
    pub fn monitor(&self, token: &Token, user_id: UserId) -> MeterResult<MonitorReport> {
        token.require_self_or_admin(user_id)?;

        let (user, consumption, skipped) = {
            let state = self.read_state("monitor")?;
            let user = state.require_user(user_id)?;
            let mut root = UserAggregate::new();
            let mut skipped = 0;
            for source_id in &user.sources {
                let Some(adapter) = state.registry.get(source_id) else {
                    skipped += 1;
                    continue;
                };
                root.add(Box::new(SourceLeaf::new(
                    source_id.clone(),
                    Arc::clone(adapter),
                    Arc::clone(&state.extractor),
                    Arc::clone(&state.history),
                    user_id,
                )));
            }
            (user, root.consumption(), skipped)
        };

        let alerts = self.engine.evaluate(user_id, &user.login, consumption.total)?;
        debug!(
            user = %user_id,
            total = consumption.total,
            reported = consumption.reported,
            failed = consumption.failed,
            skipped,
            alerts = alerts.len(),
            "monitoring pass"
        );
        Ok(MonitorReport {
            user_id,
            total: consumption.total,
            sources_reported: consumption.reported,
            sources_failed: consumption.failed,
            skipped_unregistered: skipped,
            alerts,
        })
    }

    /// Alert history of a user, newest first. Readers only see their own.
    pub fn alerts_for(&self, token: &Token, user_id: UserId) -> MeterResult<Vec<AlertRecord>> {
        token.require_self_or_admin(user_id)?;
        let state = self.read_state("alerts_for")?;
        Ok(state.history.alerts_for_user(user_id)?)
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
