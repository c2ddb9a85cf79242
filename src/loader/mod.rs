//! Dynamic loader for plughost
//!
//! Turns enabled, installed packages into live modules inside the host
//! process. Three pieces cooperate:
//!
//! - **namespace**: the explicit registry of loaded-module handles keyed by
//!   each manifest's `globalVar` (the namespace bridge)
//! - **injector**: the capability boundary that actually executes code and
//!   style payloads; supplied by the embedding host
//! - **resolve**: the deduplicating resolution path, one injection per
//!   package id per process lifetime no matter how many concurrent
//!   consumers ask for it
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use plughost::loader::{DryRunInjector, ModuleNamespace, PluginLoader};
//!
//! let namespace = Arc::new(ModuleNamespace::new());
//! let loader = PluginLoader::new(namespace, Arc::new(DryRunInjector));
//! // loader.resolve(&package).await?
//! ```

mod injector;
mod namespace;
mod resolve;

pub use injector::{DryRunInjector, InjectionRequest, ResourceInjector};
pub use namespace::ModuleNamespace;
pub use resolve::{ModuleHandle, PluginLoader};
