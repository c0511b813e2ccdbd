//! Source adapters and their configuration.
//!
//! An adapter knows how to point at the *current* raw artifact of a meter.
//! Turning that artifact into a number is the extractor's job.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{ConfigError, SourceError};

/// File extensions the filesystem adapter considers, compared case-insensitively.
pub const RECOGNIZED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "txt"];

/// Handle to the current value of a source (a file path for the filesystem adapter).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceHandle(PathBuf);

impl SourceHandle {
    /// Wraps a path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Capability: produce a handle to the current source value.
pub trait SourceAdapter: Send + Sync + fmt::Debug {
    /// Returns the handle for the most recent value.
    fn current_handle(&self) -> Result<SourceHandle, SourceError>;

    /// Human-readable location, for logs and status output.
    fn location(&self) -> String;
}

/// Adapter that picks the most recently modified recognized file in a directory.
#[derive(Debug, Clone)]
pub struct FilesystemAdapter {
    base: PathBuf,
}

impl FilesystemAdapter {
    /// Creates an adapter rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn is_recognized(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| RECOGNIZED_EXTENSIONS.iter().any(|r| r.eq_ignore_ascii_case(ext)))
    }
}

impl SourceAdapter for FilesystemAdapter {
    fn current_handle(&self) -> Result<SourceHandle, SourceError> {
        if !self.base.is_dir() {
            return Err(SourceError::LocationMissing {
                path: self.base.clone(),
            });
        }

        let entries = fs::read_dir(&self.base).map_err(|e| SourceError::io(&self.base, e))?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|e| SourceError::io(&self.base, e))?;
            let path = entry.path();
            let meta = entry.metadata().map_err(|e| SourceError::io(&path, e))?;
            if !meta.is_file() || !Self::is_recognized(&path) {
                continue;
            }
            let modified = meta.modified().map_err(|e| SourceError::io(&path, e))?;
            // `>=` so the last file seen among equally new ones wins.
            if newest.as_ref().map_or(true, |(best, _)| modified >= *best) {
                newest = Some((modified, path));
            }
        }

        newest
            .map(|(_, path)| SourceHandle(path))
            .ok_or_else(|| SourceError::NoCandidates {
                path: self.base.clone(),
            })
    }

    fn location(&self) -> String {
        self.base.display().to_string()
    }
}

/// Supported adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Directory of reading artifacts.
    Filesystem,
}

impl SourceKind {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim() {
            "filesystem" => Ok(Self::Filesystem),
            other => Err(ConfigError::UnsupportedKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Typed source configuration, built from the `{kind, location, identifier}` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Adapter kind.
    pub kind: SourceKind,
    /// Where the adapter reads from.
    pub location: PathBuf,
    /// Registry identifier.
    pub identifier: String,
}

impl SourceConfig {
    /// Key holding the adapter kind.
    pub const KIND: &'static str = "kind";
    /// Key holding the adapter location.
    pub const LOCATION: &'static str = "location";
    /// Key holding the registry identifier.
    pub const IDENTIFIER: &'static str = "identifier";

    /// A filesystem source configuration.
    #[must_use]
    pub fn filesystem(identifier: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            kind: SourceKind::Filesystem,
            location: location.into(),
            identifier: identifier.into(),
        }
    }

    /// Parses a configuration map.
    ///
    /// `kind` must be `filesystem`; `location` is required; `identifier`
    /// defaults to the last component of `location`.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnsupportedKind` for a missing or unknown kind,
    /// `ConfigError::MissingParameter` when `location` is absent, and
    /// `ConfigError::InvalidValue` when no identifier can be determined.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let kind = SourceKind::parse(params.get(Self::KIND).map_or("", String::as_str))?;

        let location = params
            .get(Self::LOCATION)
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingParameter { field: Self::LOCATION })?;

        let identifier = match params.get(Self::IDENTIFIER).map(|i| i.trim()) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => location
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: Self::IDENTIFIER,
                    reason: format!("cannot derive one from location {}", location.display()),
                })?,
        };

        Ok(Self {
            kind,
            location,
            identifier,
        })
    }

    /// Renders this configuration back into the map form.
    #[must_use]
    pub fn to_params(&self) -> HashMap<String, String> {
        let kind = match self.kind {
            SourceKind::Filesystem => "filesystem",
        };
        HashMap::from([
            (Self::KIND.to_string(), kind.to_string()),
            (Self::LOCATION.to_string(), self.location.display().to_string()),
            (Self::IDENTIFIER.to_string(), self.identifier.clone()),
        ])
    }

    /// Instantiates the adapter described by this configuration.
    #[must_use]
    pub fn build_adapter(&self) -> Arc<dyn SourceAdapter> {
        match self.kind {
            SourceKind::Filesystem => Arc::new(FilesystemAdapter::new(self.location.clone())),
        }
    }
}
