//! Background discovery of meter directories.
//!
//! The simulator writes one batch directory per run (`Medicoes_<stamp>`), with
//! one subdirectory per meter. Every cycle the newest batch is located and
//! each of its meter subdirectories is registered through a
//! [`SourceRegistrar`], normally the coordinator. Registration is idempotent,
//! so rescanning unchanged contents is a no-op.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::auth::Token;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, MeterError, MeterResult, SourceError};

use super::adapter::SourceConfig;
use super::registry::Registration;

/// Default batch directory prefix.
pub const DEFAULT_PREFIX: &str = "Medicoes_";

/// Default delay between two discovery cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Where and how often to look for meters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Directory containing batch directories.
    pub root: PathBuf,
    /// Prefix a batch directory name must start with.
    pub prefix: String,
    /// Delay between cycles.
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            prefix: DEFAULT_PREFIX.to_string(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl DiscoveryConfig {
    /// Config scanning `root` with default prefix and interval.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Rejects an empty prefix and a zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::MissingParameter { field: "prefix" });
        }
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of one discovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Batch directory that was scanned, if any matched.
    pub batch: Option<PathBuf>,
    /// Meter identifiers found in the batch, sorted.
    pub seen: Vec<String>,
    /// Identifiers that were not registered before this cycle.
    pub added: Vec<String>,
}

/// Where discovered sources are registered.
pub trait SourceRegistrar: Send + Sync {
    /// Registers one discovered source on behalf of `token`.
    fn register_source_config(&self, token: &Token, config: SourceConfig) -> MeterResult<Registration>;
}

impl SourceRegistrar for Coordinator {
    fn register_source_config(&self, token: &Token, config: SourceConfig) -> MeterResult<Registration> {
        Coordinator::register_source_config(self, token, config)
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<(String, PathBuf, SystemTime)>, SourceError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SourceError::io(dir, e))? {
        let entry = entry.map_err(|e| SourceError::io(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| SourceError::io(&path, e))?;
        if !meta.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let modified = meta.modified().map_err(|e| SourceError::io(&path, e))?;
        found.push((name, path, modified));
    }
    Ok(found)
}

/// Runs a single discovery cycle synchronously.
///
/// A missing root is not an error: nothing is registered.
pub fn scan_once(
    registrar: &dyn SourceRegistrar,
    token: &Token,
    config: &DiscoveryConfig,
) -> MeterResult<DiscoveryOutcome> {
    if !config.root.is_dir() {
        debug!(root = %config.root.display(), "discovery root not present");
        return Ok(DiscoveryOutcome::default());
    }

    let batch = subdirectories(&config.root)?
        .into_iter()
        .filter(|(name, _, _)| name.starts_with(&config.prefix))
        .max_by_key(|(_, _, modified)| *modified);
    let Some((_, batch, _)) = batch else {
        debug!(root = %config.root.display(), prefix = %config.prefix, "no batch directory");
        return Ok(DiscoveryOutcome::default());
    };

    let mut meters = subdirectories(&batch)?;
    meters.sort_by(|a, b| a.0.cmp(&b.0));

    let mut outcome = DiscoveryOutcome {
        batch: Some(batch),
        ..DiscoveryOutcome::default()
    };
    for (name, path, _) in meters {
        let registration = registrar.register_source_config(token, SourceConfig::filesystem(name.clone(), path))?;
        if registration == Registration::Added {
            outcome.added.push(name.clone());
        }
        outcome.seen.push(name);
    }
    Ok(outcome)
}

/// Handle to the background discovery thread.
///
/// Dropping the handle stops the loop and waits for it.
#[derive(Debug)]
pub struct DiscoveryLoop {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DiscoveryLoop {
    /// Starts the loop. `token` must be valid; it is used for every registration.
    pub fn spawn(registrar: Arc<dyn SourceRegistrar>, token: Token, config: DiscoveryConfig) -> MeterResult<Self> {
        config.validate()?;
        token.require_valid()?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let join = thread::Builder::new()
            .name("meterwatch-discovery".to_string())
            .spawn(move || discovery_loop(registrar.as_ref(), &token, &config, &flag))
            .map_err(|e| MeterError::internal(format!("failed to spawn discovery thread: {e}")))?;

        Ok(Self {
            running,
            join: Some(join),
        })
    }

    /// Returns true until [`stop`](Self::stop) has been requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Requests shutdown and waits for the current cycle and its sleep to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!("discovery thread panicked");
            }
        }
    }
}

impl Drop for DiscoveryLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn discovery_loop(registrar: &dyn SourceRegistrar, token: &Token, config: &DiscoveryConfig, running: &AtomicBool) {
    info!(
        root = %config.root.display(),
        prefix = %config.prefix,
        interval_ms = config.interval.as_millis(),
        "discovery started"
    );
    while running.load(Ordering::Acquire) {
        match scan_once(registrar, token, config) {
            Ok(outcome) if !outcome.added.is_empty() => {
                info!(added = ?outcome.added, seen = outcome.seen.len(), "discovered new sources");
            }
            Ok(outcome) => {
                debug!(seen = outcome.seen.len(), "discovery cycle unchanged");
            }
            Err(err) => {
                warn!(error = %err, "discovery cycle failed");
            }
        }
        thread::sleep(config.interval);
    }
    info!("discovery stopped");
}
