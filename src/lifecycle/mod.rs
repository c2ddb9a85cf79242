//! Repository and lifecycle state machine for plughost
//!
//! Tracks which packages are installed (in host configuration), blocked
//! (soft-deleted from repository view), or destroyed (hard-deleted from
//! physical storage), and enforces the legal transitions between those
//! states:
//!
//! ```text
//! Unknown → Repository-only → Installed(enabled) ⇄ Installed(disabled)
//!             ↑    ↓ uninstall (only while disabled)
//!             ↑    Repository-only → soft-block → Blocked → restore
//!             └──────────────────────────────────────┘      ↓ hard-delete
//!                                                        Destroyed (terminal)
//! ```
//!
//! Every operation is all-or-nothing: guards are checked first, the
//! mutation is applied to a working copy of the aggregate, and the copy is
//! persisted atomically before it becomes current. A failed persist leaves
//! both memory and disk untouched.

use tracing::{debug, info};

use crate::config::{ConfigStore, HostConfig};
use crate::error::{HostError, Result};
use crate::package::Package;
use crate::repository::{sanitize_id, DestroyPhase, DiskProtocol};

/// Outcome of a [`Lifecycle::reconcile_defaults`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids auto-installed for the first time.
    pub installed: Vec<String>,
    /// Ids whose installed entry was patched to the shipped definition.
    pub patched: Vec<String>,
}

impl ReconcileReport {
    /// Whether the pass changed the aggregate at all.
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty() && self.patched.is_empty()
    }
}

/// The lifecycle state machine over the persisted host configuration.
pub struct Lifecycle {
    config: HostConfig,
    store: ConfigStore,
}

impl Lifecycle {
    /// Load the aggregate from a store and wrap it in the state machine.
    pub fn open(store: ConfigStore) -> Result<Self> {
        let config = store.load()?;
        Ok(Self { config, store })
    }

    /// The current aggregate.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Persist a mutated working copy, then make it current.
    fn commit(&mut self, next: HostConfig) -> Result<()> {
        self.store.replace(&next)?;
        self.config = next;
        Ok(())
    }

    /// Copy a repository entry into the installed set with `enabled=true`,
    /// overwriting any installed entry with the same id.
    pub fn install(&mut self, entry: Package) -> Result<()> {
        if !entry.is_installable() {
            return Err(HostError::Validation(format!(
                "package '{}' has no entry file '{}'",
                entry.id, entry.manifest.main
            )));
        }

        let mut next = self.config.clone();
        next.installed.retain(|p| p.id != entry.id);
        let id = entry.id.clone();
        next.installed.push(Package {
            enabled: true,
            ..entry
        });
        self.commit(next)?;

        info!(plugin = %id, "Installed plugin");
        Ok(())
    }

    /// Flip `enabled` on an installed entry. Touches neither the repository
    /// nor disk. Returns the new state.
    pub fn toggle(&mut self, id: &str) -> Result<bool> {
        if !self.config.is_installed(id) {
            return Err(HostError::NotFound(format!("plugin '{}' is not installed", id)));
        }

        let mut next = self.config.clone();
        let enabled = {
            let entry = next
                .installed_mut(id)
                .ok_or_else(|| HostError::NotFound(format!("plugin '{}' is not installed", id)))?;
            entry.enabled = !entry.enabled;
            entry.enabled
        };
        self.commit(next)?;

        info!(plugin = id, enabled, "Toggled plugin");
        Ok(enabled)
    }

    /// Remove an id from the installed set. Guarded: rejected while the
    /// entry is enabled. The repository entry, if any, survives.
    pub fn uninstall(&mut self, id: &str) -> Result<()> {
        let entry = self
            .config
            .installed(id)
            .ok_or_else(|| HostError::NotFound(format!("plugin '{}' is not installed", id)))?;
        if entry.enabled {
            return Err(HostError::Guard(format!(
                "plugin '{}' is enabled; disable it before uninstalling",
                id
            )));
        }

        let mut next = self.config.clone();
        next.installed.retain(|p| p.id != id);
        self.commit(next)?;

        info!(plugin = id, "Uninstalled plugin");
        Ok(())
    }

    /// Hide an id from repository discovery. Guarded: rejected while the id
    /// is installed. Idempotent for ids already blocked.
    pub fn soft_block(&mut self, id: &str) -> Result<()> {
        if self.config.is_installed(id) {
            return Err(HostError::Guard(format!(
                "plugin '{}' is installed; uninstall it before blocking",
                id
            )));
        }
        if self.config.is_blocked(id) {
            debug!(plugin = id, "Already blocked");
            return Ok(());
        }

        let mut next = self.config.clone();
        next.blocked.push(id.to_string());
        self.commit(next)?;

        info!(plugin = id, "Blocked plugin");
        Ok(())
    }

    /// Remove an id from the blocked set. Idempotent; a no-op when absent.
    pub fn restore(&mut self, id: &str) -> Result<()> {
        if !self.config.is_blocked(id) {
            debug!(plugin = id, "Not blocked, nothing to restore");
            return Ok(());
        }

        let mut next = self.config.clone();
        next.blocked.retain(|b| b != id);
        self.commit(next)?;

        info!(plugin = id, "Restored plugin to repository view");
        Ok(())
    }

    /// Remove an id from the blocked set and issue exactly one destructive
    /// disk request for its sanitized id. Irreversible: the repository
    /// entry is deleted from physical storage once the serving process has
    /// released its locks.
    pub async fn hard_delete(&mut self, id: &str, disk: &dyn DiskProtocol) -> Result<DestroyPhase> {
        if self.config.is_blocked(id) {
            let mut next = self.config.clone();
            next.blocked.retain(|b| b != id);
            self.commit(next)?;
        }

        let safe_id = sanitize_id(id);
        let phase = disk.destroy(&safe_id).await?;
        info!(plugin = id, safe_id = %safe_id, phase = ?phase, "Issued destroy request");
        Ok(phase)
    }

    /// Reconcile the built-in default packages against the aggregate.
    ///
    /// Each built-in is auto-installed exactly once per host: the first time
    /// its id is seen it is installed (or, if the user already has it,
    /// patched) and recorded in the seen-defaults set. Afterwards the
    /// shipped definition only patches entries that are still installed:
    /// `enabled` is always preserved, and an id the user removed is never
    /// silently re-added.
    pub fn reconcile_defaults(&mut self, builtins: &[Package]) -> Result<ReconcileReport> {
        let mut next = self.config.clone();
        let mut report = ReconcileReport::default();

        for builtin in builtins {
            let seen = next.has_seen_default(&builtin.id);
            if !seen {
                if let Some(existing) = next.installed_mut(&builtin.id) {
                    let enabled = existing.enabled;
                    *existing = Package {
                        enabled,
                        ..builtin.clone()
                    };
                    report.patched.push(builtin.id.clone());
                } else {
                    next.installed.push(Package {
                        enabled: true,
                        ..builtin.clone()
                    });
                    report.installed.push(builtin.id.clone());
                }
                next.seen_defaults.push(builtin.id.clone());
            } else if let Some(existing) = next.installed_mut(&builtin.id) {
                let enabled = existing.enabled;
                *existing = Package {
                    enabled,
                    ..builtin.clone()
                };
                report.patched.push(builtin.id.clone());
            }
            // Seen and absent from the installed set: the user removed it
            // on purpose; leave it gone.
        }

        if !report.is_noop() {
            self.commit(next)?;
            info!(
                installed = report.installed.len(),
                patched = report.patched.len(),
                "Reconciled default plugins"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{FileBlob, PluginKind, PluginManifest};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn make_package(id: &str, version: &str) -> Package {
        let manifest = PluginManifest {
            id: id.to_string(),
            name: format!("Plugin {}", id),
            version: version.to_string(),
            description: String::new(),
            main: "index.js".to_string(),
            style: None,
            global_var: format!("Var_{}", id.replace('.', "_")),
            kind: PluginKind::Tool,
        };
        let mut files = BTreeMap::new();
        files.insert(
            "index.js".to_string(),
            FileBlob::new("text/javascript", format!("// {}", version).into_bytes()),
        );
        Package::new(manifest, files, false)
    }

    fn open_lifecycle(tmp: &TempDir) -> Lifecycle {
        Lifecycle::open(ConfigStore::at(tmp.path().join("config.json"))).unwrap()
    }

    /// Protocol fake that records destroy calls.
    #[derive(Default)]
    struct RecordingDisk {
        destroyed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DiskProtocol for RecordingDisk {
        async fn list(&self) -> Result<Vec<Package>> {
            Ok(vec![])
        }

        async fn upload(&self, _package: &Package) -> Result<()> {
            Ok(())
        }

        async fn destroy(&self, id: &str) -> Result<DestroyPhase> {
            self.destroyed.lock().unwrap().push(id.to_string());
            Ok(DestroyPhase::Halting)
        }
    }

    #[test]
    fn test_install_sets_enabled_and_overwrites() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);

        lifecycle.install(make_package("com.x.tool", "1.0.0")).unwrap();
        assert!(lifecycle.config().installed("com.x.tool").unwrap().enabled);

        // Same id again with a newer version: exactly one entry remains
        lifecycle.install(make_package("com.x.tool", "2.0.0")).unwrap();
        assert_eq!(lifecycle.config().installed.len(), 1);
        assert_eq!(
            lifecycle.config().installed("com.x.tool").unwrap().manifest.version,
            "2.0.0"
        );
    }

    #[test]
    fn test_install_rejects_missing_entry_file() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);

        let mut pkg = make_package("com.x.tool", "1.0.0");
        pkg.files.clear();
        let result = lifecycle.install(pkg);
        assert!(matches!(result, Err(HostError::Validation(_))));
        assert!(lifecycle.config().installed.is_empty());
    }

    #[test]
    fn test_toggle_flips_enabled() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        lifecycle.install(make_package("com.x.tool", "1.0.0")).unwrap();

        assert!(!lifecycle.toggle("com.x.tool").unwrap());
        assert!(lifecycle.toggle("com.x.tool").unwrap());
    }

    #[test]
    fn test_toggle_unknown_id() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        assert!(matches!(
            lifecycle.toggle("com.x.ghost"),
            Err(HostError::NotFound(_))
        ));
    }

    #[test]
    fn test_uninstall_guarded_while_enabled() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        lifecycle.install(make_package("com.x.tool", "1.0.0")).unwrap();

        let result = lifecycle.uninstall("com.x.tool");
        assert!(matches!(result, Err(HostError::Guard(_))));
        // Nothing was removed
        assert!(lifecycle.config().is_installed("com.x.tool"));

        lifecycle.toggle("com.x.tool").unwrap();
        lifecycle.uninstall("com.x.tool").unwrap();
        assert!(lifecycle.config().installed.is_empty());
    }

    #[test]
    fn test_reinstall_after_uninstall_is_identical() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        let pkg = make_package("com.x.tool", "1.0.0");

        lifecycle.install(pkg.clone()).unwrap();
        let first = lifecycle.config().installed("com.x.tool").unwrap().clone();

        lifecycle.toggle("com.x.tool").unwrap();
        lifecycle.uninstall("com.x.tool").unwrap();
        lifecycle.install(pkg).unwrap();
        let second = lifecycle.config().installed("com.x.tool").unwrap().clone();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_soft_block_guarded_while_installed() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        lifecycle.install(make_package("com.x.tool", "1.0.0")).unwrap();

        let result = lifecycle.soft_block("com.x.tool");
        assert!(matches!(result, Err(HostError::Guard(_))));
        assert!(!lifecycle.config().is_blocked("com.x.tool"));
    }

    #[test]
    fn test_soft_block_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);

        lifecycle.soft_block("com.x.tool").unwrap();
        lifecycle.soft_block("com.x.tool").unwrap();
        assert_eq!(lifecycle.config().blocked, vec!["com.x.tool"]);
    }

    #[test]
    fn test_restore_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);

        lifecycle.soft_block("com.x.tool").unwrap();
        lifecycle.restore("com.x.tool").unwrap();
        lifecycle.restore("com.x.tool").unwrap();
        assert!(lifecycle.config().blocked.is_empty());
    }

    #[tokio::test]
    async fn test_hard_delete_clears_block_and_destroys_once() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        let disk = RecordingDisk::default();

        lifecycle.soft_block("com.x.tool").unwrap();
        let phase = lifecycle.hard_delete("com.x.tool", &disk).await.unwrap();

        assert_eq!(phase, DestroyPhase::Halting);
        assert!(lifecycle.config().blocked.is_empty());
        assert_eq!(*disk.destroyed.lock().unwrap(), vec!["com.x.tool"]);
    }

    #[tokio::test]
    async fn test_hard_delete_sanitizes_id() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        let disk = RecordingDisk::default();

        lifecycle.hard_delete("com.x/evil tool", &disk).await.unwrap();
        assert_eq!(*disk.destroyed.lock().unwrap(), vec!["com.x_evil_tool"]);
    }

    #[test]
    fn test_reconcile_installs_new_default_once() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        let builtin = make_package("com.host.default", "1.0.0");

        let report = lifecycle.reconcile_defaults(&[builtin.clone()]).unwrap();
        assert_eq!(report.installed, vec!["com.host.default"]);
        assert!(lifecycle.config().installed("com.host.default").unwrap().enabled);
        assert!(lifecycle.config().has_seen_default("com.host.default"));
    }

    #[test]
    fn test_reconcile_never_resurrects_removed_default() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);
        let builtin = make_package("com.host.default", "1.0.0");

        lifecycle.reconcile_defaults(&[builtin.clone()]).unwrap();
        lifecycle.toggle("com.host.default").unwrap();
        lifecycle.uninstall("com.host.default").unwrap();

        // Repeated passes leave the user's removal alone
        for _ in 0..3 {
            let report = lifecycle.reconcile_defaults(&[builtin.clone()]).unwrap();
            assert!(report.is_noop());
            assert!(!lifecycle.config().is_installed("com.host.default"));
        }
    }

    #[test]
    fn test_reconcile_patches_but_preserves_enabled() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);

        lifecycle
            .reconcile_defaults(&[make_package("com.host.default", "1.0.0")])
            .unwrap();
        // User disables the default
        lifecycle.toggle("com.host.default").unwrap();

        // A newer shipped definition patches the manifest, not the flag
        let report = lifecycle
            .reconcile_defaults(&[make_package("com.host.default", "1.1.0")])
            .unwrap();
        assert_eq!(report.patched, vec!["com.host.default"]);

        let entry = lifecycle.config().installed("com.host.default").unwrap();
        assert_eq!(entry.manifest.version, "1.1.0");
        assert!(!entry.enabled);
    }

    #[test]
    fn test_reconcile_patches_preexisting_unseen_entry() {
        let tmp = TempDir::new().unwrap();
        let mut lifecycle = open_lifecycle(&tmp);

        // The user manually installed the package before it shipped as a
        // default
        lifecycle.install(make_package("com.host.default", "0.9.0")).unwrap();
        lifecycle.toggle("com.host.default").unwrap();

        let report = lifecycle
            .reconcile_defaults(&[make_package("com.host.default", "1.0.0")])
            .unwrap();
        assert_eq!(report.patched, vec!["com.host.default"]);

        let entry = lifecycle.config().installed("com.host.default").unwrap();
        assert_eq!(entry.manifest.version, "1.0.0");
        assert!(!entry.enabled);
        assert!(lifecycle.config().has_seen_default("com.host.default"));
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut lifecycle = open_lifecycle(&tmp);
            lifecycle.install(make_package("com.x.tool", "1.0.0")).unwrap();
            lifecycle.soft_block("com.x.hidden").unwrap();
        }
        let lifecycle = open_lifecycle(&tmp);
        assert!(lifecycle.config().is_installed("com.x.tool"));
        assert!(lifecycle.config().is_blocked("com.x.hidden"));
    }
}
