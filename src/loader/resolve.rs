//! Deduplicated plugin resolution
//!
//! `PluginLoader::resolve` turns an enabled, installable package into a
//! live module handle, exactly once per package id: concurrent resolutions
//! for the same id attach to the in-flight injection instead of injecting
//! a second time, and later resolutions are satisfied straight from the
//! namespace. Eviction removes the namespace entry and injected resources
//! so a re-install starts clean.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::package::Package;

use super::injector::{InjectionRequest, ResourceInjector};
use super::namespace::ModuleNamespace;

/// A successfully resolved module: the package that provided it and the
/// value its code published (with one level of `default`-export
/// indirection already unwrapped).
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleHandle {
    pub package_id: String,
    pub export: Value,
}

/// Failure of a single resolution attempt. Cloneable so one outcome can be
/// broadcast to every attached waiter.
#[derive(Debug, Clone)]
enum LoadFailure {
    Network(String),
    Runtime(String),
}

impl From<LoadFailure> for HostError {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::Network(msg) => HostError::Network(msg),
            LoadFailure::Runtime(msg) => HostError::Runtime(msg),
        }
    }
}

type LoadOutcome = std::result::Result<Value, LoadFailure>;

/// Resolves enabled packages into live modules through a
/// [`ResourceInjector`], deduplicating concurrent work per package id.
pub struct PluginLoader {
    namespace: Arc<ModuleNamespace>,
    injector: Arc<dyn ResourceInjector>,
    /// In-flight registry: the only concurrency-control structure. While a
    /// package id is present here, its injection is in progress and new
    /// resolutions subscribe instead of injecting.
    pending: Mutex<HashMap<String, broadcast::Sender<LoadOutcome>>>,
    /// Ids whose code resource has been injected this process lifetime.
    injected_code: Mutex<HashSet<String>>,
    /// Ids whose style resource is active.
    injected_styles: Mutex<HashSet<String>>,
}

impl PluginLoader {
    /// Create a loader over a shared namespace and injector.
    pub fn new(namespace: Arc<ModuleNamespace>, injector: Arc<dyn ResourceInjector>) -> Self {
        Self {
            namespace,
            injector,
            pending: Mutex::new(HashMap::new()),
            injected_code: Mutex::new(HashSet::new()),
            injected_styles: Mutex::new(HashSet::new()),
        }
    }

    /// The namespace this loader publishes into.
    pub fn namespace(&self) -> &Arc<ModuleNamespace> {
        &self.namespace
    }

    /// Resolve an enabled package into a live module handle.
    ///
    /// Idempotent: a namespace hit returns immediately, and concurrent
    /// calls for the same id share a single injection. Errors are terminal
    /// for this attempt only; the caller may retry.
    ///
    /// # Errors
    /// - `HostError::Guard` if the package is disabled
    /// - `HostError::Validation` if the entry file is absent from the set
    /// - `HostError::Network` if the injector fails to load the code
    /// - `HostError::Runtime` if the code never populated its namespace key
    pub async fn resolve(&self, package: &Package) -> Result<ModuleHandle> {
        if !package.enabled {
            return Err(HostError::Guard(format!(
                "plugin '{}' is disabled and cannot be resolved",
                package.id
            )));
        }
        if !package.is_installable() {
            return Err(HostError::Validation(format!(
                "entry file '{}' not found in plugin resources",
                package.manifest.main
            )));
        }

        let key = package.manifest.global_var.as_str();

        // Fast path: already bridged into the namespace.
        if let Some(value) = self.namespace.get(key) {
            debug!(plugin = %package.id, global_var = key, "Namespace hit");
            return Ok(self.handle(package, value));
        }

        // Either claim the injection for this id or attach to the one in
        // flight.
        let mut receiver = {
            let mut pending = self.pending.lock().await;
            if let Some(value) = self.namespace.get(key) {
                return Ok(self.handle(package, value));
            }
            match pending.get(&package.id) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    pending.insert(package.id.clone(), sender);
                    None
                }
            }
        };

        if let Some(rx) = receiver.as_mut() {
            debug!(plugin = %package.id, "Attaching to in-flight load");
            return match rx.recv().await {
                Ok(outcome) => outcome
                    .map(|value| self.handle(package, value))
                    .map_err(Into::into),
                // Sender dropped without broadcasting: the injecting call
                // was abandoned (consumer went away or the id was evicted
                // mid-flight).
                Err(_) => Err(HostError::Runtime(format!(
                    "load of plugin '{}' was abandoned",
                    package.id
                ))),
            };
        }

        let outcome = self.perform_injection(package).await;

        // Release waiters before returning our own copy of the outcome.
        let sender = self.pending.lock().await.remove(&package.id);
        if let Some(sender) = sender {
            let _ = sender.send(outcome.clone());
        }

        outcome
            .map(|value| self.handle(package, value))
            .map_err(Into::into)
    }

    /// Tear down everything resolved for a package id so a future
    /// re-install starts from a clean binding. Applied uniformly on
    /// disable, uninstall, and hard delete.
    pub async fn evict(&self, id: &str, global_var: &str) {
        let had_binding = self.namespace.evict(global_var);
        self.pending.lock().await.remove(id);
        self.injected_code.lock().await.remove(id);
        self.injected_styles.lock().await.remove(id);
        self.injector.remove(id).await;
        info!(
            plugin = id,
            global_var,
            had_binding,
            "Evicted plugin resources"
        );
    }

    async fn perform_injection(&self, package: &Package) -> LoadOutcome {
        let key = package.manifest.global_var.as_str();

        // Style first, exactly once per id. A style that cannot be injected
        // degrades the rendering, not the module, so it never fails the
        // resolution.
        if let Some(style) = package.style_blob() {
            let mut styles = self.injected_styles.lock().await;
            if !styles.contains(&package.id) {
                match self.injector.inject_style(&package.id, style).await {
                    Ok(()) => {
                        styles.insert(package.id.clone());
                    }
                    Err(e) => {
                        warn!(plugin = %package.id, error = %e, "Style injection failed");
                    }
                }
            }
        }

        // Code resource, exactly once per id per process lifetime. The tag
        // is recorded before injecting: a failed execution still consumed
        // the one injection and later attempts re-read the namespace
        // instead of re-running user code.
        {
            let mut injected = self.injected_code.lock().await;
            if !injected.contains(&package.id) {
                let code = match package.main_blob() {
                    Some(blob) => blob,
                    None => {
                        return Err(LoadFailure::Runtime(format!(
                            "entry file '{}' missing from plugin resources",
                            package.manifest.main
                        )))
                    }
                };
                injected.insert(package.id.clone());
                drop(injected);
                let request = InjectionRequest {
                    id: &package.id,
                    global_var: key,
                    code,
                    namespace: &self.namespace,
                };
                if let Err(e) = self.injector.inject_code(request).await {
                    return Err(LoadFailure::Network(format!(
                        "failed to execute entry point '{}': {}",
                        package.manifest.main, e
                    )));
                }
            }
        }

        match self.namespace.get(key) {
            Some(value) => {
                info!(plugin = %package.id, global_var = key, "Module bridged");
                Ok(value)
            }
            None => Err(LoadFailure::Runtime(format!(
                "global entry point '{}' was not populated",
                key
            ))),
        }
    }

    fn handle(&self, package: &Package, value: Value) -> ModuleHandle {
        ModuleHandle {
            package_id: package.id.clone(),
            export: unwrap_default_export(value),
        }
    }
}

/// Unwrap one level of `default`-export indirection: bundlers publish either
/// the module itself or `{ default: module }`.
fn unwrap_default_export(value: Value) -> Value {
    if let Value::Object(map) = &value {
        if let Some(inner) = map.get("default") {
            return inner.clone();
        }
    }
    value
}
