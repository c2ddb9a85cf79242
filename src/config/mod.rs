//! Host configuration for plughost
//!
//! The client-resident aggregate the lifecycle machine operates on: the
//! installed set, the blocked set, and the seen-defaults set. The whole
//! aggregate is replaced atomically on every mutation (temp file + rename);
//! concurrent writers are last-write-wins, with no reconciliation.
//!
//! # Persisted shape
//!
//! ```json
//! {
//!   "version": 1,
//!   "installed": [ { "id": "...", "manifest": { ... }, "files": { ... }, "enabled": true } ],
//!   "blocked": ["com.example.hidden"],
//!   "seenDefaults": ["com.plughost.enterprise-theme"]
//! }
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::package::Package;

/// Current aggregate schema version. Older aggregates (or ones missing the
/// newer sets entirely) load with defaults and are rewritten at this
/// version on the next mutation.
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// The host's plugin configuration aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Schema version of the persisted aggregate.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Packages the host references, each individually enabled/disabled.
    #[serde(default)]
    pub installed: Vec<Package>,

    /// Ids explicitly hidden from repository discovery by the user.
    #[serde(default)]
    pub blocked: Vec<String>,

    /// Ids the host has auto-installed at least once; suppresses
    /// resurrection after the user removes a default.
    #[serde(rename = "seenDefaults", default)]
    pub seen_defaults: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            installed: Vec::new(),
            blocked: Vec::new(),
            seen_defaults: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Look up an installed package by id.
    pub fn installed(&self, id: &str) -> Option<&Package> {
        self.installed.iter().find(|p| p.id == id)
    }

    /// Mutable lookup of an installed package by id.
    pub fn installed_mut(&mut self, id: &str) -> Option<&mut Package> {
        self.installed.iter_mut().find(|p| p.id == id)
    }

    /// Whether an id is present in the installed set.
    pub fn is_installed(&self, id: &str) -> bool {
        self.installed(id).is_some()
    }

    /// Whether an id is present in the blocked set.
    pub fn is_blocked(&self, id: &str) -> bool {
        self.blocked.iter().any(|b| b == id)
    }

    /// Whether an id has ever been auto-installed as a built-in default.
    pub fn has_seen_default(&self, id: &str) -> bool {
        self.seen_defaults.iter().any(|s| s == id)
    }
}

/// Loads and atomically replaces the persisted [`HostConfig`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// The default configuration directory (`~/.plughost`).
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".plughost")
    }

    /// Store at the default location (`~/.plughost/config.json`).
    pub fn open_default() -> Self {
        Self::at(Self::default_dir().join("config.json"))
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the persisted aggregate.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the aggregate, defaulting to an empty configuration when no
    /// file exists yet.
    pub fn load(&self) -> Result<HostConfig> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No host configuration on disk, starting empty");
            return Ok(HostConfig::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut config: HostConfig = serde_json::from_str(&content)?;
        if config.version != CONFIG_VERSION {
            info!(
                from = config.version,
                to = CONFIG_VERSION,
                "Migrating host configuration"
            );
            config.version = CONFIG_VERSION;
        }
        Ok(config)
    }

    /// Atomically replace the persisted aggregate: serialize to a temp file
    /// in the same directory, then rename over the target.
    pub fn replace(&self, config: &HostConfig) -> Result<()> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        let json = serde_json::to_string_pretty(config)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(
            path = %self.path.display(),
            installed = config.installed.len(),
            blocked = config.blocked.len(),
            "Replaced host configuration"
        );
        Ok(())
    }
}
